//! Unit-addressable gateway devices.

use tracing::{Instrument, info, info_span};

use crate::configuration::{ConfigLayout, Configuration};
use crate::error::{DeviceError, Result};
use crate::poller::{
    CommunicationState, PollOutcome, PollState, Poller, PollerConfig, ReadStrategy,
    words_to_bytes,
};
use crate::register::Reading;
use crate::transport::ModbusTransport;

/// Static description of a gateway model.
pub trait DeviceModel {
    /// Short model name, used in logs and telemetry labels.
    const NAME: &'static str;
    /// First register of the configuration block.
    const CONFIGURATION_ADDRESS: u16;
    const CONFIG_LAYOUT: ConfigLayout;
    const READ_STRATEGY: ReadStrategy;
    type Reading: Reading;
}

/// A gateway whose identity has been checked against its configuration.
///
/// The transport is borrowed for the lifetime of the device; polls must be
/// serialized by the caller.
pub struct Device<'a, M: DeviceModel, T: ModbusTransport + ?Sized> {
    unit_id: u8,
    transport: &'a mut T,
    configuration: Configuration,
    poller: Poller,
    _model: std::marker::PhantomData<M>,
}

impl<'a, M: DeviceModel, T: ModbusTransport + ?Sized> Device<'a, M, T> {
    /// Read the configuration block and check it matches `unit_id`.
    ///
    /// Fails with [`DeviceError::IdentityMismatch`] when another unit answers,
    /// [`DeviceError::MalformedConfig`] on an unexpected block and
    /// [`DeviceError::Transport`] when the block cannot be read.
    pub async fn construct(
        transport: &'a mut T,
        unit_id: u8,
        poller_config: PollerConfig,
    ) -> Result<Self> {
        let span = info_span!("device", model = M::NAME, unit_id);
        let configuration = Self::identify(&mut *transport, unit_id)
            .instrument(span)
            .await?;

        Ok(Self {
            unit_id,
            transport,
            configuration,
            poller: Poller::new(poller_config),
            _model: std::marker::PhantomData,
        })
    }

    async fn identify(transport: &mut T, unit_id: u8) -> Result<Configuration> {
        info!("getting unit configuration...");
        let words = transport
            .read_registers(M::CONFIGURATION_ADDRESS, M::CONFIG_LAYOUT.word_count())
            .await?;
        let configuration = M::CONFIG_LAYOUT.parse(&words_to_bytes(&words))?;
        info!("... {}", configuration);

        let found = configuration.modbus_id();
        if found != unit_id {
            return Err(DeviceError::IdentityMismatch {
                expected: unit_id,
                found,
            });
        }

        info!(
            "{} id={} role: {}",
            M::NAME,
            unit_id,
            if configuration.is_coordinator() {
                "coordinator"
            } else {
                "endpoint"
            }
        );
        Ok(configuration)
    }

    /// Poll every register of the model.
    ///
    /// Returns `None` when a transport error interrupted the poll; the
    /// transport has then been reset and the next poll starts afresh.
    pub async fn poll(&mut self) -> Option<M::Reading> {
        let span = info_span!("device", model = M::NAME, unit_id = self.unit_id);
        let outcome = self
            .poller
            .poll::<M::Reading, T>(&mut *self.transport, M::READ_STRATEGY)
            .instrument(span.clone())
            .await;

        match outcome {
            PollOutcome::Complete { reading, recovered } => {
                if recovered {
                    span.in_scope(|| info!("communication recovered"));
                }
                Some(reading)
            }
            PollOutcome::Failed => None,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn is_coordinator(&self) -> bool {
        self.configuration.is_coordinator()
    }

    pub fn communication_state(&self) -> CommunicationState {
        self.poller.communication_state()
    }

    pub fn poll_state(&self) -> PollState {
        self.poller.state()
    }
}

impl<M: DeviceModel, T: ModbusTransport + ?Sized> std::fmt::Debug for Device<'_, M, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("model", &M::NAME)
            .field("unit_id", &self.unit_id)
            .field("configuration", &self.configuration)
            .field("poller", &self.poller)
            .finish()
    }
}
