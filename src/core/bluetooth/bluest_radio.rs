//! bluest implementation of the radio traits

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::error::ErrorKind;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_CLIENT_CHARACTERISTIC_CONFIG,
    UUID_HEART_RATE_MEASUREMENT, UUID_HEART_RATE_SERVICE,
};
use crate::core::bluetooth::error::HrmError;
use crate::core::bluetooth::radio::{
    Advertisement, GattLink, LinkEvent, LinkProfile, Radio, RadioAvailability, ScanEvent,
};

/// Platform code reported when bluest gives no numeric error
const UNKNOWN_PLATFORM_CODE: i32 = -1;

/// How long a powered-off adapter gets to come up before a scan or connect
const AVAILABILITY_WAIT: Duration = Duration::from_millis(1_000);

/// Radio backed by the default system Bluetooth adapter
pub struct BluestRadio {
    adapter: Option<Adapter>,
    /// Devices seen while scanning, keyed by address
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestRadio {
    /// Opens the default adapter. A missing adapter is reported later as `BLUETOOTH_OFF`.
    pub async fn new() -> Self {
        let adapter = Adapter::default().await;
        match &adapter {
            Some(_) => info!("Bluetooth adapter found."),
            None => warn!("No Bluetooth adapter found"),
        }
        Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn adapter(&self) -> Result<&Adapter, HrmError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| HrmError::BluetoothOff("no Bluetooth adapter found".to_string()))
    }

    fn known_device(&self, address: &str) -> Option<Device> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.get(address).cloned()
    }

    /// Looks for a heart-rate device the OS already holds a connection to
    async fn find_connected(&self, adapter: &Adapter, address: &str) -> Option<Device> {
        let connected = match adapter
            .connected_devices_with_services(&[UUID_HEART_RATE_SERVICE])
            .await
        {
            Ok(devices) => devices,
            Err(e) => {
                debug!("Could not list connected devices: {}", e);
                return None;
            }
        };
        connected
            .into_iter()
            .find(|device| device_address(device) == address)
    }
}

#[async_trait::async_trait]
impl Radio for BluestRadio {
    async fn availability(&self) -> RadioAvailability {
        let Ok(adapter) = self.adapter() else {
            return RadioAvailability::Unsupported;
        };
        let waited = tokio::time::timeout(AVAILABILITY_WAIT, adapter.wait_available())
            .await
            .ok()
            .map(|result| {
                result.map_err(|e| {
                    warn!("Adapter did not become available: {}", e);
                    e.kind()
                })
            });
        availability_from_wait(waited)
    }

    async fn scan(&self, service: Uuid) -> Result<BoxStream<'static, ScanEvent>, HrmError> {
        let adapter = self.adapter()?.clone();
        let devices = self.devices.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            info!("Starting bluetooth scan");
            let services = [service];
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(scan_stream) => scan_stream,
                Err(e) => {
                    let _ = tx.send(ScanEvent::Failed {
                        code: platform_code(&e),
                        message: e.to_string(),
                    });
                    return;
                }
            };

            loop {
                tokio::select! {
                    // The receiver is dropped when the caller stops scanning
                    _ = tx.closed() => break,
                    result = scan_stream.next() => {
                        let Some(discovered) = result else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let address = device_address(&discovered.device);
                        let name = discovered
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| discovered.device.name().ok());
                        {
                            let mut devices = devices.lock().unwrap_or_else(|e| e.into_inner());
                            devices.insert(address.clone(), discovered.device.clone());
                        }
                        let advertisement = Advertisement {
                            address,
                            name,
                            rssi: discovered.rssi.unwrap_or(i16::MIN),
                        };
                        if tx.send(ScanEvent::Advertisement(advertisement)).is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Bluetooth scan stopped.");
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, HrmError> {
        let adapter = self.adapter()?;
        let device = match self.known_device(address) {
            Some(device) => device,
            None => self
                .find_connected(adapter, address)
                .await
                .ok_or_else(|| HrmError::DeviceNotFound(address.to_string()))?,
        };

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            adapter
                .connect_device(&device)
                .await
                .map_err(|e| classify(e, |msg| HrmError::DeviceNotFound(format!("{address}: {msg}"))))?;
        }

        Ok(Arc::new(BluestLink {
            adapter: adapter.clone(),
            name: device.name().ok(),
            device,
            address: address.to_string(),
            pump_cancel: CancellationToken::new(),
            battery: Mutex::new(None),
        }))
    }
}

/// An open link to one device
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    address: String,
    name: Option<String>,
    /// Stops the notification pump
    pump_cancel: CancellationToken,
    battery: Mutex<Option<Characteristic>>,
}

impl BluestLink {
    async fn find_measurement(&self) -> Result<Characteristic, HrmError> {
        let service = self
            .device
            .discover_services_with_uuid(UUID_HEART_RATE_SERVICE)
            .await
            .map_err(|e| classify(e, HrmError::SubscribeFailed))?
            .into_iter()
            .next()
            .ok_or_else(|| HrmError::SubscribeFailed(format!("heart rate service not found on {}", self.address)))?;
        info!("Found heart rate service: {}", service.uuid());

        let measurement = service
            .discover_characteristics_with_uuid(UUID_HEART_RATE_MEASUREMENT)
            .await
            .map_err(|e| classify(e, HrmError::SubscribeFailed))?
            .into_iter()
            .next()
            .ok_or_else(|| HrmError::SubscribeFailed("heart rate measurement characteristic not found".to_string()))?;

        let descriptors = measurement
            .discover_descriptors()
            .await
            .map_err(|e| classify(e, HrmError::SubscribeFailed))?;
        if !descriptors
            .iter()
            .any(|descriptor| descriptor.uuid() == UUID_CLIENT_CHARACTERISTIC_CONFIG)
        {
            return Err(HrmError::SubscribeFailed(
                "notification configuration descriptor not found".to_string(),
            ));
        }
        Ok(measurement)
    }

    async fn find_battery(&self) -> Option<Characteristic> {
        let services = self
            .device
            .discover_services_with_uuid(UUID_BATTERY_SERVICE)
            .await
            .ok()?;
        for service in services {
            if let Ok(characteristics) = service
                .discover_characteristics_with_uuid(UUID_BATTERY_LEVEL)
                .await
            {
                if let Some(characteristic) = characteristics.into_iter().next() {
                    return Some(characteristic);
                }
            }
        }
        None
    }

    /// Forwards notifications until the link drops or is closed
    async fn pump(
        adapter: Adapter,
        device: Device,
        measurement: Characteristic,
        events: mpsc::UnboundedSender<LinkEvent>,
        ready: oneshot::Sender<Result<(), HrmError>>,
        cancel_token: CancellationToken,
    ) {
        info!("Subscribing to notifications...");
        let mut notifications = match measurement.notify().await {
            Ok(notifications) => {
                let _ = ready.send(Ok(()));
                notifications
            }
            Err(e) => {
                let _ = ready.send(Err(classify(e, HrmError::SubscribeFailed)));
                return;
            }
        };
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(connection_events) => connection_events.boxed(),
            Err(e) => {
                debug!("Connection events unavailable, relying on the notification stream: {}", e);
                stream::pending().boxed()
            }
        };

        info!("Listening for heart rate notifications...");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Notification stream closed");
                    return;
                }
                result = notifications.next() => match result {
                    Some(Ok(value)) => {
                        if events.send(LinkEvent::Notification(value)).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
                Some(bluest::ConnectionEvent::Disconnected) = connection_events.next() => break,
            }
        }

        info!("Notification stream ended");
        let _ = events.send(LinkEvent::Disconnected);
    }
}

#[async_trait::async_trait]
impl GattLink for BluestLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn subscribe(
        &self,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<LinkProfile, HrmError> {
        let measurement = self.find_measurement().await?;
        let battery = self.find_battery().await;
        let profile = LinkProfile {
            has_battery: battery.is_some(),
        };
        *self.battery.lock().unwrap_or_else(|e| e.into_inner()) = battery;

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::pump(
            self.adapter.clone(),
            self.device.clone(),
            measurement,
            events,
            ready_tx,
            self.pump_cancel.clone(),
        ));
        ready_rx.await.map_err(|_| {
            HrmError::SubscribeFailed("notification task stopped before subscribing".to_string())
        })??;
        Ok(profile)
    }

    async fn read_battery(&self) -> Result<Option<u8>, HrmError> {
        let characteristic = self
            .battery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(characteristic) = characteristic else {
            return Ok(None);
        };
        let value = characteristic
            .read()
            .await
            .map_err(|e| classify(e, HrmError::Disconnected))?;
        Ok(value.first().copied())
    }

    async fn close(&self) -> Result<(), HrmError> {
        self.pump_cancel.cancel();
        if self.device.is_connected().await {
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(|e| classify(e, HrmError::Disconnected))?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.address);
        }
        Ok(())
    }
}

impl Drop for BluestLink {
    fn drop(&mut self) {
        self.pump_cancel.cancel();
    }
}

/// Maps permission and power errors to their codes, everything else through `fallback`
fn classify(err: bluest::Error, fallback: impl FnOnce(String) -> HrmError) -> HrmError {
    match err.kind() {
        ErrorKind::NotAuthorized => HrmError::PermissionDenied(err.to_string()),
        ErrorKind::AdapterUnavailable => HrmError::BluetoothOff(err.to_string()),
        _ => fallback(err.to_string()),
    }
}

/// Maps the outcome of `wait_available`, `None` meaning the wait timed out
fn availability_from_wait(waited: Option<Result<(), ErrorKind>>) -> RadioAvailability {
    match waited {
        Some(Ok(())) => RadioAvailability::Ready,
        Some(Err(ErrorKind::NotAuthorized)) => RadioAvailability::Unauthorized,
        Some(Err(ErrorKind::NotSupported)) => RadioAvailability::Unsupported,
        Some(Err(_)) | None => RadioAvailability::PoweredOff,
    }
}

fn platform_code(err: &bluest::Error) -> i32 {
    match err.kind() {
        ErrorKind::NotAuthorized => 1,
        ErrorKind::AdapterUnavailable => 2,
        ErrorKind::AlreadyScanning => 3,
        ErrorKind::NotSupported => 4,
        _ => UNKNOWN_PLATFORM_CODE,
    }
}

/// Stable address of a device: its MAC when the platform id embeds one
fn device_address(device: &Device) -> String {
    let id = device.id().to_string();
    extract_mac_address(&id).unwrap_or(id)
}

fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}
