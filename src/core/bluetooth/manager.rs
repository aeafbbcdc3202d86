//! Heart-rate provider
//! This module provides the main interface for heart-rate monitor operations

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use log::info;
use tokio::sync::{broadcast, watch};

use crate::config::ProviderConfig;
use crate::core::bluetooth::bluest_radio::BluestRadio;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::error::HrmError;
use crate::core::bluetooth::radio::{AlwaysGranted, PermissionGate, Radio};
use crate::core::bluetooth::sample_stream::{SampleStream, SampleSubscription};
use crate::core::bluetooth::scanner::HeartRateScanner;
use crate::core::bluetooth::types::{
    ConnectionEvent, ConnectionState, DiscoveredDevice, HeartRateSample,
};
use crate::core::metric_bag::{MetricBag, to_metric_bag};

/// Public surface of the BLE heart-rate subsystem
pub struct HeartRateProvider {
    config: ProviderConfig,
    /// Bluetooth scanner
    scanner: HeartRateScanner,
    /// Connection state machine
    connection_manager: ConnectionManager,
    samples: SampleStream,
}

impl HeartRateProvider {
    /// Creates a provider on the default system adapter
    pub async fn new(config: ProviderConfig) -> Self {
        let radio = BluestRadio::new().await;
        Self::with_radio(Arc::new(radio), Arc::new(AlwaysGranted), config)
    }

    /// Creates a provider on a custom radio and permission gate
    pub fn with_radio(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn PermissionGate>,
        config: ProviderConfig,
    ) -> Self {
        let samples = SampleStream::new();
        let scanner = HeartRateScanner::new(radio.clone(), gate.clone());
        let connection_manager =
            ConnectionManager::new(radio, gate, config.connection_settings(), samples.clone());
        Self {
            config,
            scanner,
            connection_manager,
            samples,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Scans with the configured timeout and name prefix
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>, HrmError> {
        self.scan_with(self.config.scan_timeout(), self.config.name_prefix.as_deref())
            .await
    }

    /// Scans for heart-rate monitors for `timeout`, keeping names starting with `name_prefix`
    pub async fn scan_with(
        &self,
        timeout: Duration,
        name_prefix: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, HrmError> {
        self.scanner.scan(timeout, name_prefix).await
    }

    pub fn stop_scan(&self) {
        self.scanner.stop_scan();
    }

    /// Connects to the device at `address` and starts streaming samples
    pub async fn connect(
        &self,
        address: &str,
        session_tag: Option<String>,
        enable_battery: bool,
    ) -> Result<(), HrmError> {
        self.connection_manager
            .connect(address, session_tag, enable_battery)
            .await
    }

    /// Disconnects from the currently connected device
    pub async fn disconnect(&self) -> Result<(), HrmError> {
        self.connection_manager.disconnect().await
    }

    /// Stops scanning, disconnects, and refuses any later connect
    pub async fn dispose(&self) {
        self.scanner.stop_scan();
        self.connection_manager.dispose().await;
    }

    /// Checks if a device is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.connection_manager.is_connected().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_manager.watch_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_manager.subscribe_events()
    }

    /// Returns the ID of the currently connected device
    pub async fn connected_device_id(&self) -> Option<String> {
        self.connection_manager.connected_device_id().await
    }

    /// Returns the name of the currently connected device.
    pub async fn connected_device_name(&self) -> Option<String> {
        self.connection_manager.connected_device_name().await
    }

    /// Get battery level
    pub fn battery_level(&self) -> Option<u8> {
        self.connection_manager.battery_level()
    }

    pub fn last_sample(&self) -> Option<HeartRateSample> {
        self.samples.last_sample()
    }

    pub fn subscribe_samples(&self) -> SampleSubscription {
        self.samples.subscribe()
    }

    /// Latest sample as a metric bag
    pub fn last_metric_bag(&self) -> Option<MetricBag> {
        let sample = self.samples.last_sample()?;
        Some(to_metric_bag(&sample, self.battery_level()))
    }

    /// Stream of metric bags, starting with the latest sample if there is one.
    /// Each bag carries the battery level known when its sample is taken off the stream.
    pub fn metric_bags(&self) -> impl Stream<Item = MetricBag> + Send + 'static {
        info!("Opening metric bag stream.");
        let battery = self.connection_manager.watch_battery();
        self.samples
            .subscribe()
            .into_stream()
            .map(move |sample| to_metric_bag(&sample, *battery.borrow()))
    }
}
