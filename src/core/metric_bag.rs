//! Unified metric bag
//!
//! Every data source of the wider system hands readings to the merge layer in
//! this shape. This crate only produces bags from heart-rate samples.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::bluetooth::constants::SOURCE_BLE_HRM;
use crate::core::bluetooth::HeartRateSample;

pub const METRIC_HEART_RATE: &str = "heart_rate";
pub const METRIC_BATTERY_LEVEL: &str = "battery_level";
pub const META_DEVICE_NAME: &str = "device_name";
pub const META_SESSION_ID: &str = "session_id";

/// A timestamped reading from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBag {
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    pub device_id: String,
    /// Producing source, `"ble_hrm"` for this crate
    pub source: String,
    pub metrics: BTreeMap<String, f64>,
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rr_intervals_ms: Option<Vec<f64>>,
}

impl MetricBag {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

impl From<&HeartRateSample> for MetricBag {
    fn from(sample: &HeartRateSample) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert(METRIC_HEART_RATE.to_string(), sample.heart_rate as f64);

        let mut metadata = BTreeMap::new();
        if let Some(name) = &sample.device_name {
            metadata.insert(META_DEVICE_NAME.to_string(), name.clone());
        }
        if let Some(session) = &sample.session_tag {
            metadata.insert(META_SESSION_ID.to_string(), session.clone());
        }

        MetricBag {
            timestamp_ms: sample.timestamp_ms,
            device_id: sample.device_id.clone(),
            source: SOURCE_BLE_HRM.to_string(),
            metrics,
            metadata,
            rr_intervals_ms: sample.rr_intervals_ms.clone(),
        }
    }
}

/// Builds the metric bag for `sample`, adding the battery level when known
pub fn to_metric_bag(sample: &HeartRateSample, battery_level: Option<u8>) -> MetricBag {
    let mut bag = MetricBag::from(sample);
    if let Some(level) = battery_level {
        bag.metrics
            .insert(METRIC_BATTERY_LEVEL.to_string(), level as f64);
    }
    bag
}
