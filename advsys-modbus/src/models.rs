//! Register maps of the DM108 gateway family.

use crate::configuration::ConfigLayout;
use crate::device::DeviceModel;
use crate::poller::ReadStrategy;
use crate::register::{RegisterDescriptor, register_map};

/// Base of the gateway register map.
pub const ADDR_BASE: u16 = 0;

/// First register of the configuration block, shared by both models.
pub const CONFIGURATION_ADDRESS: u16 = ADDR_BASE + 4224;

register_map! {
    /// Values polled from the basic DM108 gateway.
    pub struct GatewayReading {
        /// Pulse counter of the gateway input.
        pulse_count: i64 => RegisterDescriptor::raw_i32(ADDR_BASE + 4096),
    }
}

register_map! {
    /// Values relayed by the DM108C collector from the attached energy meter
    /// and pulse counter.
    pub struct CollectorReading {
        voltage_l1_n: f64 ["V"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4353, 10.0),
        current_l1: f64 ["A"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4365, 1000.0),
        active_power_l1: f64 ["W"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4371, 10.0),
        apparent_power_l1: f64 ["VA"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4377, 10.0),
        reactive_power_l1: f64 ["var"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4383, 10.0),
        power_factor_l1: f64 => RegisterDescriptor::linear(ADDR_BASE + 4403, 1000.0, true),
        // Unverified: this scale was wrong on the EM21 meter, kept as is until
        // checked against EM24 hardware.
        frequency: f64 ["Hz"] => RegisterDescriptor::linear(ADDR_BASE + 4408, 10.0, false),
        active_energy: f64 ["kWh"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4423, 10.0),
        reactive_energy: f64 ["kvarh"] => RegisterDescriptor::word_swapped(ADDR_BASE + 4437, 10.0),
        /// Water meter style BCD counter.
        pulse_count: f64 => RegisterDescriptor::packed_bcd(ADDR_BASE + 4483, 3, 100.0),
    }
}

/// AdvanticSys DM108 wireless Modbus gateway with pulse counter.
#[derive(Debug, Clone, Copy)]
pub struct Dm108;

impl DeviceModel for Dm108 {
    const NAME: &'static str = "dm108";
    const CONFIGURATION_ADDRESS: u16 = CONFIGURATION_ADDRESS;
    const CONFIG_LAYOUT: ConfigLayout = ConfigLayout::Gateway;
    const READ_STRATEGY: ReadStrategy = ReadStrategy::Bulk;
    type Reading = GatewayReading;
}

/// AdvanticSys DM108C parameter collector.
///
/// Its registers are spread over the map, so each one costs a radio round
/// trip and the reads are paced.
#[derive(Debug, Clone, Copy)]
pub struct Dm108c;

impl DeviceModel for Dm108c {
    const NAME: &'static str = "dm108c";
    const CONFIGURATION_ADDRESS: u16 = CONFIGURATION_ADDRESS;
    const CONFIG_LAYOUT: ConfigLayout = ConfigLayout::Collector;
    const READ_STRATEGY: ReadStrategy = ReadStrategy::Scattered;
    type Reading = CollectorReading;
}
