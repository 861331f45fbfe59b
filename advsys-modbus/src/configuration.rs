//! Configuration block parsing.
//!
//! The basic gateway exposes its radio and serial setup as nine consecutive
//! registers (18 bytes, big-endian):
//!
//! ```text
//! offset  size  field
//!      0     1  group id
//!      1     1  radio channel
//!      2     1  modbus id
//!      3     1  roll node (coordinator when non zero)
//!      4     1  reserved
//!      5     1  UART config (baud:2, parity:2, data bits:1, stop bits:2 overlapping data bits)
//!      6     2  radio id
//!      8     1  ack enabled
//!      9     1  AES enabled
//!     10     1  radio power code
//!     11     2  reserved
//!     13     1  retries
//!     14     2  reserved
//!     16     2  timeout
//! ```
//!
//! The collector only exposes its Modbus id, in the low byte of one register.

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::error::MalformedConfig;

/// Transmit power for each known radio power code.
const RADIO_POWER_DBM: &[(u8, f32)] = &[
    (3, -2.0),
    (23, 7.5),
    (29, 12.5),
    (38, 18.0),
    (55, 22.0),
    (80, 25.0),
    (134, 26.0),
];

const BAUD_RATES: [u32; 4] = [2400, 4800, 9600, 19200];

/// Transmit power in dBm for a radio power code.
pub fn radio_power_dbm(code: u8) -> Option<f32> {
    RADIO_POWER_DBM
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, dbm)| *dbm)
}

/// Shape of the configuration block of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayout {
    /// Full radio/UART block of the basic gateway.
    Gateway,
    /// Modbus id only, as exposed by the collector.
    Collector,
}

impl ConfigLayout {
    /// Size of the block in bytes.
    pub const fn byte_len(self) -> usize {
        match self {
            ConfigLayout::Gateway => 18,
            ConfigLayout::Collector => 2,
        }
    }

    /// Size of the block in registers.
    pub const fn word_count(self) -> u16 {
        (self.byte_len() / 2) as u16
    }

    /// Parse a configuration block of this layout.
    pub fn parse(self, bytes: &[u8]) -> Result<Configuration, MalformedConfig> {
        let malformed = || MalformedConfig {
            layout: self,
            expected: self.byte_len(),
            found: bytes.len(),
        };

        match self {
            ConfigLayout::Gateway => {
                let block: &[u8; 18] = bytes.try_into().map_err(|_| malformed())?;
                Ok(Configuration::Gateway(GatewayConfiguration::from_block(
                    block,
                )))
            }
            ConfigLayout::Collector => {
                let [_, modbus_id]: [u8; 2] = bytes.try_into().map_err(|_| malformed())?;
                Ok(Configuration::Collector(CollectorConfiguration {
                    modbus_id,
                }))
            }
        }
    }
}

impl fmt::Display for ConfigLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLayout::Gateway => write!(f, "gateway"),
            ConfigLayout::Collector => write!(f, "collector"),
        }
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    fn from_code(code: u8) -> Self {
        match code {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            _ => {
                warn!("unexpected UART parity code ({}), assuming none", code);
                Parity::None
            }
        }
    }

    fn code(self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "N"),
            Parity::Odd => write!(f, "O"),
            Parity::Even => write!(f, "E"),
        }
    }
}

/// Serial line settings of the gateway's wired side, as encoded in the
/// configuration block.
///
/// `data_bits` is bit 3 plus one and `stop_bits` is bits 3-2 plus seven, as
/// the gateway register map defines them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UartConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
}

impl UartConfig {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            baud_rate: BAUD_RATES[usize::from(byte >> 6)],
            parity: Parity::from_code((byte >> 4) & 0x03),
            data_bits: ((byte >> 3) & 0x01) + 1,
            stop_bits: ((byte >> 2) & 0x03) + 7,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let baud = BAUD_RATES
            .iter()
            .position(|b| *b == self.baud_rate)
            .unwrap_or(0) as u8;
        (baud << 6)
            | (self.parity.code() << 4)
            | ((self.data_bits.saturating_sub(1) & 0x01) << 3)
            | ((self.stop_bits.saturating_sub(7) & 0x03) << 2)
    }
}

impl fmt::Display for UartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.baud_rate, self.parity, self.data_bits, self.stop_bits
        )
    }
}

/// Configuration stored in the basic gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GatewayConfiguration {
    pub group_id: u8,
    pub radio_channel: u8,
    pub modbus_id: u8,
    pub is_coordinator: bool,
    pub uart: UartConfig,
    pub radio_id: u16,
    pub ack_enabled: bool,
    pub aes_enabled: bool,
    /// Raw power code as stored in the device.
    pub radio_power_code: u8,
    /// Transmit power, 0 when the code is unknown.
    pub radio_power_dbm: f32,
    pub retries: u8,
    pub timeout: u16,
}

impl GatewayConfiguration {
    fn from_block(block: &[u8; 18]) -> Self {
        let radio_power_code = block[10];
        let radio_power_dbm = radio_power_dbm(radio_power_code).unwrap_or_else(|| {
            warn!(
                "unexpected radio power register content ({})",
                radio_power_code
            );
            0.0
        });

        Self {
            group_id: block[0],
            radio_channel: block[1],
            modbus_id: block[2],
            is_coordinator: block[3] != 0,
            uart: UartConfig::from_byte(block[5]),
            radio_id: u16::from_be_bytes([block[6], block[7]]),
            ack_enabled: block[8] != 0,
            aes_enabled: block[9] != 0,
            radio_power_code,
            radio_power_dbm,
            retries: block[13],
            timeout: u16::from_be_bytes([block[16], block[17]]),
        }
    }

    /// Encode back into the register block. Reserved bytes are written as zero.
    pub fn to_bytes(&self) -> [u8; 18] {
        let mut block = [0u8; 18];
        block[0] = self.group_id;
        block[1] = self.radio_channel;
        block[2] = self.modbus_id;
        block[3] = u8::from(self.is_coordinator);
        block[5] = self.uart.to_byte();
        block[6..8].copy_from_slice(&self.radio_id.to_be_bytes());
        block[8] = u8::from(self.ack_enabled);
        block[9] = u8::from(self.aes_enabled);
        block[10] = self.radio_power_code;
        block[13] = self.retries;
        block[16..18].copy_from_slice(&self.timeout.to_be_bytes());
        block
    }
}

impl fmt::Display for GatewayConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Configuration(group_id={}, radio_channel={}, modbus_id={}, uart_config={}, \
             radio_id={}, ack_enabled={}, aes_enabled={}, radio_power={}dBm, retries={}, timeout={})",
            self.group_id,
            self.radio_channel,
            self.modbus_id,
            self.uart,
            self.radio_id,
            u8::from(self.ack_enabled),
            u8::from(self.aes_enabled),
            self.radio_power_dbm,
            self.retries,
            self.timeout
        )
    }
}

/// Configuration exposed by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectorConfiguration {
    pub modbus_id: u8,
}

impl fmt::Display for CollectorConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration(modbus_id={})", self.modbus_id)
    }
}

/// Configuration record read at device construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum Configuration {
    Gateway(GatewayConfiguration),
    Collector(CollectorConfiguration),
}

impl Configuration {
    pub fn modbus_id(&self) -> u8 {
        match self {
            Configuration::Gateway(config) => config.modbus_id,
            Configuration::Collector(config) => config.modbus_id,
        }
    }

    /// The collector always holds the coordinator role.
    pub fn is_coordinator(&self) -> bool {
        match self {
            Configuration::Gateway(config) => config.is_coordinator,
            Configuration::Collector(_) => true,
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configuration::Gateway(config) => config.fmt(f),
            Configuration::Collector(config) => config.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    /// Coordinator, id 1, 19200 baud no parity, radio id 257, 25 dBm, 3 retries.
    fn gateway_block() -> [u8; 18] {
        [
            7, 12, 1, 1, 0, 0xc4, 0x01, 0x01, 1, 0, 80, 0, 0, 3, 0, 0, 0x01, 0xf4,
        ]
    }

    fn parse_gateway(bytes: &[u8]) -> GatewayConfiguration {
        match ConfigLayout::Gateway.parse(bytes).unwrap() {
            Configuration::Gateway(config) => config,
            other => panic!("unexpected configuration {:?}", other),
        }
    }

    #[test]
    fn test_parse_gateway_block() {
        let config = parse_gateway(&gateway_block());

        assert_eq!(config.group_id, 7);
        assert_eq!(config.radio_channel, 12);
        assert_eq!(config.modbus_id, 1);
        assert!(config.is_coordinator);
        assert_eq!(config.radio_id, 257);
        assert!(config.ack_enabled);
        assert!(!config.aes_enabled);
        assert_eq!(config.radio_power_code, 80);
        assert_eq!(config.radio_power_dbm, 25.0);
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout, 500);
        assert_eq!(
            config.uart,
            UartConfig {
                baud_rate: 19200,
                parity: Parity::None,
                data_bits: 1,
                stop_bits: 8,
            }
        );
    }

    #[test]
    fn test_uart_bit_fields() {
        let byte = 0b1010_1100;
        let uart = UartConfig::from_byte(byte);
        assert_eq!(uart.baud_rate, 9600);
        assert_eq!(uart.parity, Parity::Even);
        assert_eq!(uart.data_bits, ((byte >> 3) & 1) + 1);
        assert_eq!(uart.data_bits, 2);
        assert_eq!(uart.stop_bits, ((byte >> 2) & 0x03) + 7);
        assert_eq!(uart.stop_bits, 10);
        assert_eq!(uart.to_string(), "(9600, E, 2, 10)");

        let uart = UartConfig::from_byte(0xc4);
        assert_eq!(uart.data_bits, 1);
        assert_eq!(uart.stop_bits, 8);
        assert_eq!(uart.to_string(), "(19200, N, 1, 8)");

        let uart = UartConfig::from_byte(0b0001_0000);
        assert_eq!(uart.baud_rate, 2400);
        assert_eq!(uart.parity, Parity::Odd);
    }

    #[test]
    fn test_every_uart_byte_decodes() {
        for byte in 0..=u8::MAX {
            let uart = UartConfig::from_byte(byte);
            assert!(BAUD_RATES.contains(&uart.baud_rate));
            assert_eq!(uart.data_bits, ((byte >> 3) & 1) + 1);
            assert_eq!(uart.stop_bits, ((byte >> 2) & 0x03) + 7);
            assert_eq!(UartConfig::from_byte(uart.to_byte()), uart);
        }
    }

    #[test]
    fn test_endpoint_role() {
        let mut block = gateway_block();
        block[3] = 0;
        assert!(!parse_gateway(&block).is_coordinator);
    }

    #[test]
    fn test_known_radio_power_codes() {
        assert_eq!(radio_power_dbm(3), Some(-2.0));
        assert_eq!(radio_power_dbm(29), Some(12.5));
        assert_eq!(radio_power_dbm(134), Some(26.0));
        assert_eq!(radio_power_dbm(4), None);
    }

    #[test]
    #[traced_test]
    fn test_unknown_radio_power_defaults_to_zero() {
        let mut block = gateway_block();
        block[10] = 99;

        let config = parse_gateway(&block);
        assert_eq!(config.radio_power_dbm, 0.0);
        assert_eq!(config.radio_power_code, 99);
        assert!(logs_contain("unexpected radio power register content (99)"));
    }

    #[test]
    fn test_roundtrip_except_reserved() {
        let block = gateway_block();
        assert_eq!(parse_gateway(&block).to_bytes(), block);

        let mut dirty = block;
        dirty[4] = 0xaa;
        dirty[11] = 0xbb;
        dirty[12] = 0xcc;
        dirty[14] = 0xdd;
        dirty[15] = 0xee;
        dirty[5] |= 0x03;
        assert_eq!(parse_gateway(&dirty).to_bytes(), block);
    }

    #[test]
    fn test_roundtrip_various_blocks() {
        for (uart, power) in [(0x00, 3), (0x6c, 23), (0xa4, 38), (0xd8, 134)] {
            let mut block = gateway_block();
            block[5] = uart;
            block[10] = power;
            assert_eq!(parse_gateway(&block).to_bytes(), block);
        }
    }

    #[test]
    fn test_gateway_layout_rejects_wrong_length() {
        let err = ConfigLayout::Gateway.parse(&[0u8; 17]).unwrap_err();
        assert_eq!(
            err,
            MalformedConfig {
                layout: ConfigLayout::Gateway,
                expected: 18,
                found: 17,
            }
        );
        assert!(ConfigLayout::Gateway.parse(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_collector_layout() {
        let config = ConfigLayout::Collector.parse(&[0x55, 4]).unwrap();
        assert_eq!(config.modbus_id(), 4);
        assert!(config.is_coordinator());
        assert_eq!(config.to_string(), "Configuration(modbus_id=4)");

        assert!(ConfigLayout::Collector.parse(&[4]).is_err());
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(ConfigLayout::Gateway.word_count(), 9);
        assert_eq!(ConfigLayout::Collector.word_count(), 1);
    }

    #[test]
    fn test_gateway_display() {
        let config = ConfigLayout::Gateway.parse(&gateway_block()).unwrap();
        assert_eq!(
            config.to_string(),
            "Configuration(group_id=7, radio_channel=12, modbus_id=1, uart_config=(19200, N, 1, 8), \
             radio_id=257, ack_enabled=1, aes_enabled=0, radio_power=25dBm, retries=3, timeout=500)"
        );
    }
}
