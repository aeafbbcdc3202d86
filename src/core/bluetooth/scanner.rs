use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::UUID_HEART_RATE_SERVICE;
use crate::core::bluetooth::error::HrmError;
use crate::core::bluetooth::radio::{
    Operation, PermissionGate, Radio, ScanEvent, check_preconditions,
};
use crate::core::bluetooth::types::DiscoveredDevice;

/// Discovers heart-rate monitors within a bounded scan window
pub struct HeartRateScanner {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn PermissionGate>,
    /// Generation and token of the scan currently in flight
    active_scan: Mutex<Option<(u64, CancellationToken)>>,
    next_generation: AtomicU64,
}

impl HeartRateScanner {
    pub fn new(radio: Arc<dyn Radio>, gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            radio,
            gate,
            active_scan: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Scans for `timeout` and returns every heart-rate device seen, strongest signal first.
    ///
    /// `name_prefix` is applied after the window closes. A new scan stops the
    /// one already in flight, which then resolves with what it collected.
    /// Dropping the returned future stops the radio scan.
    pub async fn scan(
        &self,
        timeout: Duration,
        name_prefix: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, HrmError> {
        check_preconditions(self.radio.as_ref(), self.gate.as_ref(), Operation::Scan).await?;

        let cancel_token = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.replace_active(Some((generation, cancel_token.clone()))) {
            info!("Stopping the scan already in flight.");
            previous.cancel();
        }

        let result = self.run_scan(timeout, &cancel_token).await;

        // Only clear the slot if a newer scan has not taken it
        {
            let mut active = self.active_scan.lock().unwrap_or_else(|e| e.into_inner());
            if active.as_ref().is_some_and(|(current, _)| *current == generation) {
                *active = None;
            }
        }

        let devices = result?;
        Ok(filter_by_prefix(devices, name_prefix))
    }

    /// Stops the scan in flight, if any
    pub fn stop_scan(&self) {
        info!("Stopping Bluetooth scan.");
        if let Some((_, token)) = self.replace_active(None) {
            token.cancel();
        } else {
            info!("No active scan found to stop.");
        }
    }

    async fn run_scan(
        &self,
        timeout: Duration,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, HrmError> {
        info!("Starting heart rate scan for {:?}", timeout);
        let mut scan_stream = self.radio.scan(UUID_HEART_RATE_SERVICE).await?;
        let mut devices: HashMap<String, DiscoveredDevice> = HashMap::new();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    info!("Scan cancelled.");
                    break;
                }
                _ = &mut deadline => {
                    debug!("Scan window elapsed.");
                    break;
                }
                event = scan_stream.next() => {
                    match event {
                        Some(ScanEvent::Advertisement(advertisement)) => {
                            debug!(
                                "Found device - Address: {}, Name: {:?}, RSSI: {}",
                                advertisement.address, advertisement.name, advertisement.rssi
                            );
                            let name = advertisement.name.or_else(|| {
                                devices
                                    .get(&advertisement.address)
                                    .and_then(|known| known.name.clone())
                            });
                            devices.insert(
                                advertisement.address.clone(),
                                DiscoveredDevice::new(advertisement.address, name, advertisement.rssi),
                            );
                        }
                        Some(ScanEvent::Failed { code, message }) => {
                            warn!("Radio aborted the scan with code {}: {}", code, message);
                            return Err(HrmError::ScanFailed { code, message });
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
            }
        }

        // Dropping the stream stops the radio scan
        drop(scan_stream);

        let mut devices: Vec<DiscoveredDevice> = devices.into_values().collect();
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.address.cmp(&b.address)));
        info!("Scan complete, {} heart rate device(s) found", devices.len());
        Ok(devices)
    }

    fn replace_active(
        &self,
        token: Option<(u64, CancellationToken)>,
    ) -> Option<(u64, CancellationToken)> {
        let mut active = self.active_scan.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *active, token)
    }
}

/// Keeps devices whose advertised name starts with `prefix`
pub fn filter_by_prefix(devices: Vec<DiscoveredDevice>, prefix: Option<&str>) -> Vec<DiscoveredDevice> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => devices
            .into_iter()
            .filter(|device| device.name_starts_with(prefix))
            .collect(),
        _ => devices,
    }
}
