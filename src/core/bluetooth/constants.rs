//! Constants used throughout the bridge
//! This module contains the GATT UUIDs of the Heart Rate and Battery profiles
//! and the default timing values of the scanner and connection state machine.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration Descriptor
pub const UUID_CLIENT_CHARACTERISTIC_CONFIG: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Source tag carried by every metric bag produced from a BLE heart-rate monitor
pub const SOURCE_BLE_HRM: &str = "ble_hrm";

/// Scan duration in milliseconds
pub const DEFAULT_SCAN_DURATION_MS: u64 = 10_000;

/// Upper bound on service discovery and notification setup in milliseconds
pub const SERVICE_DISCOVERY_TIMEOUT_MS: u64 = 15_000;

/// Delay between subscribing and the one-time battery read in milliseconds
pub const BATTERY_READ_SETTLE_DELAY_MS: u64 = 500;

/// Delays before each automatic reconnection attempt in milliseconds.
/// The number of entries is the attempt limit.
pub const RECONNECT_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];
