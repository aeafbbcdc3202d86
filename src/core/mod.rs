//! Core functionality for the heart-rate bridge
//! This module contains measurement decoding, the BLE subsystem, and the metric bag

pub mod bluetooth;
pub mod heart_rate;
pub mod metric_bag;

// Re-export commonly used types
pub use bluetooth::HeartRateProvider;
pub use heart_rate::{HeartRateMeasurement, parse_measurement};
pub use metric_bag::MetricBag;
