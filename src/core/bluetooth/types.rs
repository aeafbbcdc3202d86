//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;
use std::time::Duration;

/// Represents a heart-rate monitor seen during a scan
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    /// The address of the device (MAC address where the platform exposes one, otherwise the platform id)
    pub address: String,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the latest advertisement
    pub rssi: i16,
}

impl DiscoveredDevice {
    /// Creates a new DiscoveredDevice instance
    pub fn new(address: String, name: Option<String>, rssi: i16) -> Self {
        Self { address, name, rssi }
    }

    /// Returns true if the advertised name starts with `prefix`
    pub fn name_starts_with(&self, prefix: &str) -> bool {
        self.name
            .as_ref()
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false)
    }
}

/// Devices are identified by address alone
impl PartialEq for DiscoveredDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DiscoveredDevice {}

/// One decoded heart-rate notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartRateSample {
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Pulse rate in beats per minute
    pub heart_rate: u16,
    /// Address of the originating device
    pub device_id: String,
    pub device_name: Option<String>,
    /// Caller-supplied grouping key
    pub session_tag: Option<String>,
    /// Beat-to-beat intervals in milliseconds
    pub rr_intervals_ms: Option<Vec<f64>>,
}

/// Lifecycle state of the GATT link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    Subscribed,
    Reconnecting,
}

/// Lifecycle notifications broadcast by the connection state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A link was established and notifications enabled
    Connected { address: String },
    /// The link dropped unexpectedly and an attempt is scheduled after `delay`
    ReconnectAttempt { attempt: usize, delay: Duration },
    /// An automatic reconnection succeeded
    Reconnected { address: String },
    /// Every automatic attempt failed, the device is now permanently disconnected
    ReconnectExhausted { address: String },
    /// The link was torn down by the caller
    Disconnected { address: String },
    /// The one-time battery read completed
    BatteryLevel { address: String, level: u8 },
}
