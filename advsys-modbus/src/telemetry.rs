//! Conversion of readings into telemetry points.

use advsys_common::{TelemetryPoint, TelemetryValue, current_timestamp_millis};

use crate::register::{Reading, Value};

impl From<Value> for TelemetryValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(v) => TelemetryValue::Integer(v),
            Value::Float(v) => TelemetryValue::Gauge(v),
        }
    }
}

/// One telemetry point per register of `reading`, in register order.
pub fn reading_points<R: Reading>(source: &str, model: &str, reading: &R) -> Vec<TelemetryPoint> {
    let timestamp = current_timestamp_millis();

    reading
        .fields()
        .into_iter()
        .map(|(register, value)| {
            let point = TelemetryPoint::new(source, register.label, value.into())
                .with_timestamp(timestamp)
                .with_label("model", model)
                .with_label("address", register.descriptor.address.to_string());
            match register.unit {
                Some(unit) => point.with_label("unit", unit),
                None => point,
            }
        })
        .collect()
}
