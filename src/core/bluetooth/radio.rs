//! Platform radio abstraction
//! The scanner and the connection state machine only talk to the radio through
//! these traits. Platform callbacks are translated into [`ScanEvent`] and
//! [`LinkEvent`] values before they reach the state machine.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::HrmError;

/// Whether the radio can be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioAvailability {
    Ready,
    /// No Bluetooth capability on this platform
    Unsupported,
    PoweredOff,
    /// The platform refused access to the radio
    Unauthorized,
}

/// A single advertisement report
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
}

/// Items produced by a running scan
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    /// The radio aborted the scan with a platform error code
    Failed { code: i32, message: String },
}

/// Items pushed by an open link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Raw Heart Rate Measurement value
    Notification(Vec<u8>),
    /// The peripheral dropped the link
    Disconnected,
}

/// What service discovery found on the peripheral
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkProfile {
    pub has_battery: bool,
}

/// Access to the platform Bluetooth stack
#[async_trait::async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Reports capability, power and authorization without touching the radio
    async fn availability(&self) -> RadioAvailability;

    /// Starts a scan filtered to `service`. Dropping the stream stops the scan.
    async fn scan(&self, service: Uuid) -> Result<BoxStream<'static, ScanEvent>, HrmError>;

    /// Resolves `address` and opens an explicit (non auto-connect) link
    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, HrmError>;
}

/// An open GATT link to one peripheral
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    fn address(&self) -> &str;

    fn name(&self) -> Option<String>;

    /// Discovers services, locates the measurement characteristic and its CCCD,
    /// enables notifications and starts forwarding [`LinkEvent`]s into `events`.
    /// Resolves once notifications are enabled.
    async fn subscribe(
        &self,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<LinkProfile, HrmError>;

    /// Reads the battery level characteristic, if the peripheral has one
    async fn read_battery(&self) -> Result<Option<u8>, HrmError>;

    /// Closes the link and stops forwarding events
    async fn close(&self) -> Result<(), HrmError>;
}

/// Runtime authorization granted by the host application
pub trait PermissionGate: Send + Sync + 'static {
    fn can_scan(&self) -> bool;

    fn can_connect(&self) -> bool;
}

/// Gate used when the host has no permission model of its own
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn can_scan(&self) -> bool {
        true
    }

    fn can_connect(&self) -> bool {
        true
    }
}

/// Which operation a precondition check guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Scan,
    Connect,
}

/// Fails fast if the radio or the host forbids `operation`
pub(crate) async fn check_preconditions(
    radio: &dyn Radio,
    gate: &dyn PermissionGate,
    operation: Operation,
) -> Result<(), HrmError> {
    match radio.availability().await {
        RadioAvailability::Ready => {}
        RadioAvailability::Unsupported => {
            return Err(HrmError::BluetoothOff(
                "no Bluetooth adapter found".to_string(),
            ));
        }
        RadioAvailability::PoweredOff => {
            return Err(HrmError::BluetoothOff(
                "Bluetooth adapter is powered off".to_string(),
            ));
        }
        RadioAvailability::Unauthorized => {
            return Err(HrmError::PermissionDenied(
                "the platform denied Bluetooth access".to_string(),
            ));
        }
    }

    let granted = match operation {
        Operation::Scan => gate.can_scan(),
        Operation::Connect => gate.can_connect(),
    };
    if !granted {
        return Err(HrmError::PermissionDenied(format!(
            "{:?} permission not granted",
            operation
        )));
    }
    Ok(())
}
