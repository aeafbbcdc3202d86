//! Bluetooth functionality for the heart-rate bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and receiving measurements from heart-rate monitors.

mod bluest_radio;
mod connection;
pub mod constants;
mod error;
mod manager;
mod notification;
mod radio;
mod sample_stream;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_radio::{BluestLink, BluestRadio};
pub use connection::{ConnectionManager, ConnectionSettings};
pub use error::{ErrorCode, HrmError};
pub use manager::HeartRateProvider;
pub use notification::{NotificationHandler, SampleOrigin};
pub use radio::{
    Advertisement, AlwaysGranted, GattLink, LinkEvent, LinkProfile, PermissionGate, Radio,
    RadioAvailability, ScanEvent,
};
pub use sample_stream::{SampleStream, SampleSubscription};
pub use scanner::{HeartRateScanner, filter_by_prefix};
pub use types::{ConnectionEvent, ConnectionState, DiscoveredDevice, HeartRateSample};
