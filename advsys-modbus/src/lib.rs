//! Register-level driver for AdvanticSys DM108 wireless Modbus gateways.
//!
//! Two models are supported:
//! - the basic DM108 gateway, exposing a pulse counter read in one request;
//! - the DM108C collector, relaying energy meter values spread over the map
//!   and read one register at a time.
//!
//! A [`Device`](device::Device) first reads the gateway configuration block
//! and checks that the unit answering is the one addressed. Each poll then
//! yields a typed reading, or nothing when the radio link failed, in which
//! case the transport is reset before the next poll.
//!
//! # Register map
//!
//! ```text
//! 4096  pulse counter (dm108)
//! 4224  configuration block
//! 4353  energy meter values (dm108c)
//! 4483  BCD pulse counter (dm108c)
//! ```

pub mod config;
pub mod configuration;
pub mod device;
pub mod error;
pub mod mock;
pub mod models;
pub mod poller;
pub mod register;
pub mod telemetry;
pub mod transport;

pub use configuration::Configuration;
pub use device::{Device, DeviceModel};
pub use error::{DeviceError, TransportError};
pub use models::{CollectorReading, Dm108, Dm108c, GatewayReading};
pub use poller::{PollOutcome, Poller, PollerConfig, ReadStrategy};
pub use register::{Reading, Value};
pub use transport::{ModbusTransport, RtuTransport};
