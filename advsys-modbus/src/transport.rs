//! Modbus transport abstraction and the RTU (serial) implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::error::TransportError;

/// Register-level access to one addressed unit.
///
/// The transport is already routed to the unit: reads carry no unit id.
/// At most one request is in flight at any time; callers await each call
/// before issuing the next.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Read `count` consecutive 16-bit registers starting at `address`.
    async fn read_registers(&mut self, address: u16, count: u16)
    -> Result<Vec<u16>, TransportError>;

    /// Discard any buffered, partially received data.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// (Re)open the session.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Wait on the monotonic clock.
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Modbus register table read by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Input registers (read-only, 16-bit)
    #[default]
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
}

impl RegisterType {
    /// Return the string name for this register type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Input => "input",
            RegisterType::Holding => "holding",
        }
    }
}

/// Serial line settings of the RS485 interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub parity: tokio_serial::Parity,
    pub stop_bits: tokio_serial::StopBits,
}

impl SerialSettings {
    /// 19200 8N1, the gateway factory setting.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: 19200,
            data_bits: tokio_serial::DataBits::Eight,
            parity: tokio_serial::Parity::None,
            stop_bits: tokio_serial::StopBits::One,
        }
    }
}

/// Modbus RTU transport over a serial line.
pub struct RtuTransport {
    settings: SerialSettings,
    slave: Slave,
    register_type: RegisterType,
    timeout: Duration,
    ctx: Option<Context>,
    clear_on_open: bool,
}

impl std::fmt::Debug for RtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuTransport")
            .field("settings", &self.settings)
            .field("slave", &self.slave)
            .field("register_type", &self.register_type)
            .field("timeout", &self.timeout)
            .field("open", &self.ctx.is_some())
            .finish()
    }
}

impl RtuTransport {
    /// Create a closed transport for the unit `unit_id`.
    pub fn new(
        settings: SerialSettings,
        unit_id: u8,
        register_type: RegisterType,
        timeout: Duration,
    ) -> Self {
        Self {
            settings,
            slave: Slave(unit_id),
            register_type,
            timeout,
            ctx: None,
            clear_on_open: false,
        }
    }

    /// Create the transport and open the serial port.
    pub async fn connect(
        settings: SerialSettings,
        unit_id: u8,
        register_type: RegisterType,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut transport = Self::new(settings, unit_id, register_type, timeout);
        transport.open().await?;
        Ok(transport)
    }

    pub fn is_open(&self) -> bool {
        self.ctx.is_some()
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let register_type = self.register_type;
        let timeout = self.timeout;
        let ctx = self.ctx.as_mut().ok_or(TransportError::NotOpen)?;

        let request = async {
            match register_type {
                RegisterType::Input => ctx.read_input_registers(address, count).await,
                RegisterType::Holding => ctx.read_holding_registers(address, count).await,
            }
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Protocol(e.to_string()))?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        // The serial stream is owned by the Modbus context; its buffers are
        // cleared when the port is reopened.
        self.clear_on_open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.ctx.take().is_some() {
            debug!("Closed serial port {}", self.settings.port);
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let builder = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .parity(self.settings.parity)
            .stop_bits(self.settings.stop_bits)
            .data_bits(self.settings.data_bits)
            .timeout(self.timeout);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| TransportError::Protocol(format!("Serial open failed: {}", e)))?;

        if std::mem::take(&mut self.clear_on_open) {
            serial
                .clear(ClearBuffer::All)
                .map_err(|e| TransportError::Protocol(format!("Serial clear failed: {}", e)))?;
        }

        self.ctx = Some(rtu::attach_slave(serial, self.slave));
        info!(
            "Opened serial port {} ({} baud, unit {}, {} registers)",
            self.settings.port,
            self.settings.baud_rate,
            self.slave.0,
            self.register_type.as_str()
        );
        Ok(())
    }
}
