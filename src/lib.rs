//! Heart-rate monitor bridge library
//! Scans for Bluetooth LE heart-rate monitors, keeps a GATT link to one of them
//! alive, and exposes its measurements as samples and metric bags.

// Module declarations
pub mod config;
pub mod core;

pub use crate::config::ProviderConfig;
pub use crate::core::bluetooth::{
    ConnectionEvent, ConnectionState, DiscoveredDevice, ErrorCode, HeartRateSample, HrmError,
};
pub use crate::core::{HeartRateProvider, MetricBag};
