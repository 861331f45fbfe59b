use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// A single telemetry data point emitted by a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Unix epoch milliseconds when the measurement was taken.
    pub timestamp: i64,

    /// Device identifier (e.g., "meter01").
    pub source: String,

    /// Metric name (e.g., "voltage_l1_n").
    pub metric: String,

    /// The measured value.
    pub value: TelemetryValue,

    /// Additional context labels (e.g., register address, unit).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TelemetryPoint {
    /// Create a new telemetry point with the current timestamp.
    pub fn new(source: impl Into<String>, metric: impl Into<String>, value: TelemetryValue) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            metric: metric.into(),
            value,
            labels: BTreeMap::new(),
        }
    }

    /// Override the timestamp of this telemetry point.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a label to this telemetry point.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Encode this point as a single JSON line.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Typed telemetry value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Raw integer (counters, unscaled registers).
    Integer(i64),

    /// Scaled engineering value.
    Gauge(f64),
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::Integer(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
