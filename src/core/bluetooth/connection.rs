//! Bluetooth connection handling for heart-rate monitors
//! This module owns the single GATT link of a provider: connecting, enabling
//! notifications, the one-time battery read, and automatic reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    BATTERY_READ_SETTLE_DELAY_MS, RECONNECT_DELAYS_MS, SERVICE_DISCOVERY_TIMEOUT_MS,
};
use crate::core::bluetooth::error::HrmError;
use crate::core::bluetooth::notification::{NotificationHandler, SampleOrigin};
use crate::core::bluetooth::radio::{
    GattLink, LinkEvent, LinkProfile, Operation, PermissionGate, Radio, check_preconditions,
};
use crate::core::bluetooth::sample_stream::SampleStream;
use crate::core::bluetooth::types::{ConnectionEvent, ConnectionState};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Timing of the connection state machine
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Ceiling on service discovery and notification setup
    pub discovery_timeout: Duration,
    /// Delay between subscribing and the one-time battery read
    pub battery_settle_delay: Duration,
    /// Delay before each reconnection attempt; its length is the attempt limit
    pub reconnect_delays: Vec<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_millis(SERVICE_DISCOVERY_TIMEOUT_MS),
            battery_settle_delay: Duration::from_millis(BATTERY_READ_SETTLE_DELAY_MS),
            reconnect_delays: RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

/// Mutable state of the current connection
struct ConnectionContext {
    /// `None` while the link is down and a reconnection is pending
    link: Option<Arc<dyn GattLink>>,
    address: Option<String>,
    device_name: Option<String>,
    session_tag: Option<String>,
    battery_enabled: bool,
    retry_attempt: usize,
    reconnecting: bool,
}

impl ConnectionContext {
    fn origin(&self) -> Option<SampleOrigin> {
        Some(SampleOrigin {
            device_id: self.address.clone()?,
            device_name: self.device_name.clone(),
            session_tag: self.session_tag.clone(),
        })
    }
}

/// The background task consuming link events of the current connection
struct Driver {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A freshly subscribed link together with its event receiver
struct Subscription {
    link: Arc<dyn GattLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    profile: LinkProfile,
}

struct Shared {
    radio: Arc<dyn Radio>,
    settings: ConnectionSettings,
    context: Mutex<Option<ConnectionContext>>,
    state: watch::Sender<ConnectionState>,
    /// Result of the battery read on the current link
    battery: watch::Sender<Option<u8>>,
    events: broadcast::Sender<ConnectionEvent>,
    notification_handler: NotificationHandler,
}

/// Connection state machine for a single heart-rate monitor
pub struct ConnectionManager {
    shared: Arc<Shared>,
    gate: Arc<dyn PermissionGate>,
    /// Also serializes connect and disconnect calls
    driver: Mutex<Option<Driver>>,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn PermissionGate>,
        settings: ConnectionSettings,
        samples: SampleStream,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (battery, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                radio,
                settings,
                context: Mutex::new(None),
                state,
                battery,
                events,
                notification_handler: NotificationHandler::new(samples),
            }),
            gate,
            driver: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Connects to `address` and enables heart-rate notifications.
    ///
    /// An existing link is torn down first. Returns once notifications are
    /// enabled, or fails with `SUBSCRIBE_FAILED` after the discovery ceiling.
    pub async fn connect(
        &self,
        address: &str,
        session_tag: Option<String>,
        enable_battery: bool,
    ) -> Result<(), HrmError> {
        self.ensure_not_disposed()?;
        let mut driver = self.driver.lock().await;
        check_preconditions(self.shared.radio.as_ref(), self.gate.as_ref(), Operation::Connect)
            .await?;

        if driver.is_some() || self.shared.context.lock().await.is_some() {
            info!("A link is already active, tearing it down before connecting to {}", address);
            self.teardown(&mut driver).await;
        }

        info!("Initiating connection to {}...", address);
        self.shared.set_state(ConnectionState::Connecting);
        let subscription = match self.shared.open_and_subscribe(address).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let link = subscription.link.clone();
        let battery_due = self.shared.battery_deadline(enable_battery, subscription.profile);
        *self.shared.context.lock().await = Some(ConnectionContext {
            link: Some(link.clone()),
            address: Some(address.to_string()),
            device_name: link.name(),
            session_tag,
            battery_enabled: enable_battery,
            retry_attempt: 0,
            reconnecting: false,
        });
        self.shared.set_state(ConnectionState::Subscribed);
        self.shared.emit(ConnectionEvent::Connected {
            address: address.to_string(),
        });

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Shared::run(
            self.shared.clone(),
            subscription.events,
            cancel_token.clone(),
            battery_due,
        ));
        *driver = Some(Driver {
            cancel_token,
            handle,
        });

        info!("Connection and setup process completed successfully");
        Ok(())
    }

    /// Disconnects from the current device and cancels any pending reconnection
    pub async fn disconnect(&self) -> Result<(), HrmError> {
        let mut driver = self.driver.lock().await;
        self.teardown(&mut driver).await;
        Ok(())
    }

    /// Disconnects and refuses every later connect call
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let mut driver = self.driver.lock().await;
        self.teardown(&mut driver).await;
        info!("Connection manager disposed.");
    }

    /// True iff a link handle is held and a device address is recorded
    pub async fn is_connected(&self) -> bool {
        self.shared
            .context
            .lock()
            .await
            .as_ref()
            .is_some_and(|ctx| ctx.link.is_some() && ctx.address.is_some())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns the address of the connected device
    pub async fn connected_device_id(&self) -> Option<String> {
        let guard = self.shared.context.lock().await;
        guard
            .as_ref()
            .filter(|ctx| ctx.link.is_some())
            .and_then(|ctx| ctx.address.clone())
    }

    /// Returns the name of the connected device.
    pub async fn connected_device_name(&self) -> Option<String> {
        let guard = self.shared.context.lock().await;
        guard
            .as_ref()
            .filter(|ctx| ctx.link.is_some())
            .and_then(|ctx| ctx.device_name.clone())
    }

    /// Battery level from the one-time read after subscribing
    pub fn battery_level(&self) -> Option<u8> {
        *self.shared.battery.borrow()
    }

    pub fn watch_battery(&self) -> watch::Receiver<Option<u8>> {
        self.shared.battery.subscribe()
    }

    fn ensure_not_disposed(&self) -> Result<(), HrmError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HrmError::Disconnected("the provider has been disposed".to_string()));
        }
        Ok(())
    }

    /// Stops the driver, then closes and drops the context
    async fn teardown(&self, driver: &mut Option<Driver>) {
        if let Some(driver) = driver.take() {
            driver.cancel_token.cancel();
            {
                let mut guard = self.shared.context.lock().await;
                if let Some(ctx) = guard.as_mut() {
                    ctx.retry_attempt = self.shared.settings.reconnect_delays.len();
                    ctx.reconnecting = false;
                }
            }
            if let Err(e) = driver.handle.await {
                error!("Connection driver finished with an unexpected join error: {:?}", e);
            }
        }

        let context = self.shared.context.lock().await.take();
        self.shared.battery.send_replace(None);
        self.shared.set_state(ConnectionState::Disconnected);
        let Some(context) = context else {
            debug!("No device connected");
            return;
        };

        if let Some(link) = context.link {
            info!("Disconnecting from device {}", link.address());
            if let Err(e) = link.close().await {
                error!("Failed to close link to {}: {}", link.address(), e);
            }
        }
        info!("Connected state cleared, link released.");
        if let Some(address) = context.address {
            self.shared.emit(ConnectionEvent::Disconnected { address });
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn battery_deadline(&self, enable_battery: bool, profile: LinkProfile) -> Option<Instant> {
        (enable_battery && profile.has_battery)
            .then(|| Instant::now() + self.settings.battery_settle_delay)
    }

    async fn open_and_subscribe(&self, address: &str) -> Result<Subscription, HrmError> {
        let link = self.radio.connect(address).await?;
        self.subscribe_link(link).await
    }

    /// Waits, bounded by the discovery ceiling, for notifications to be enabled on `link`.
    /// The link is closed on failure.
    async fn subscribe_link(&self, link: Arc<dyn GattLink>) -> Result<Subscription, HrmError> {
        info!("Connection successful, discovering services...");
        self.set_state(ConnectionState::ServiceDiscovery);

        let (tx, events) = mpsc::unbounded_channel();
        let result = tokio::time::timeout(self.settings.discovery_timeout, link.subscribe(tx)).await;
        let profile = match result {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                close_quietly(link.as_ref()).await;
                return Err(e);
            }
            Err(_) => {
                close_quietly(link.as_ref()).await;
                return Err(HrmError::SubscribeFailed(format!(
                    "service discovery did not complete within {:?}",
                    self.settings.discovery_timeout
                )));
            }
        };

        Ok(Subscription {
            link,
            events,
            profile,
        })
    }

    /// Consumes link events in delivery order until cancelled or reconnection is abandoned
    async fn run(
        shared: Arc<Shared>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        cancel_token: CancellationToken,
        mut battery_due: Option<Instant>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep_until(battery_due.unwrap_or_else(Instant::now)), if battery_due.is_some() => {
                    battery_due = None;
                    tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => break,
                        _ = shared.read_battery() => {}
                    }
                    continue;
                }
                event = events.recv() => event,
            };

            match event {
                Some(LinkEvent::Notification(value)) => shared.handle_notification(&value).await,
                Some(LinkEvent::Disconnected) | None => {
                    battery_due = None;
                    match shared.reconnect(&cancel_token).await {
                        Some((next_events, next_battery_due)) => {
                            events = next_events;
                            battery_due = next_battery_due;
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("Connection driver stopped");
    }

    async fn handle_notification(&self, value: &[u8]) {
        let origin = {
            let guard = self.context.lock().await;
            guard.as_ref().and_then(ConnectionContext::origin)
        };
        match origin {
            Some(origin) => {
                self.notification_handler.handle(value, &origin);
            }
            None => debug!("Dropping notification received without a connection context"),
        }
    }

    async fn read_battery(&self) {
        let link = {
            let guard = self.context.lock().await;
            guard.as_ref().and_then(|ctx| ctx.link.clone())
        };
        let Some(link) = link else {
            return;
        };

        match link.read_battery().await {
            Ok(Some(level)) => {
                info!("Battery level of {}: {}%", link.address(), level);
                self.battery.send_replace(Some(level));
                self.emit(ConnectionEvent::BatteryLevel {
                    address: link.address().to_string(),
                    level,
                });
            }
            Ok(None) => debug!("No battery level available"),
            Err(e) => warn!("Failed to read battery level: {}", e),
        }
    }

    /// Runs the reconnection policy after an unexpected drop.
    ///
    /// Returns the new event receiver on success, `None` when cancelled or exhausted.
    async fn reconnect(
        &self,
        cancel_token: &CancellationToken,
    ) -> Option<(mpsc::UnboundedReceiver<LinkEvent>, Option<Instant>)> {
        let max_attempts = self.settings.reconnect_delays.len();
        let (stale_link, address, battery_enabled) = {
            let mut guard = self.context.lock().await;
            let ctx = guard.as_mut()?;
            if ctx.retry_attempt >= max_attempts && max_attempts > 0 {
                return None;
            }
            ctx.reconnecting = true;
            ctx.retry_attempt = 0;
            (ctx.link.take(), ctx.address.clone()?, ctx.battery_enabled)
        };
        warn!("Link to {} dropped unexpectedly", address);
        if let Some(link) = stale_link {
            close_quietly(link.as_ref()).await;
        }

        for (index, delay) in self.settings.reconnect_delays.iter().copied().enumerate() {
            let attempt = index + 1;
            {
                let mut guard = self.context.lock().await;
                let ctx = guard.as_mut()?;
                if ctx.retry_attempt >= max_attempts {
                    return None;
                }
                ctx.retry_attempt = attempt;
            }
            self.set_state(ConnectionState::Reconnecting);

            info!("Reconnection attempt {}/{} to {} in {:?}", attempt, max_attempts, address, delay);
            self.emit(ConnectionEvent::ReconnectAttempt { attempt, delay });
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let link = match self.open_link(&address, cancel_token).await? {
                Ok(link) => link,
                Err(e) => {
                    warn!("Reconnection attempt {} failed: {}", attempt, e);
                    continue;
                }
            };
            let result = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    close_quietly(link.as_ref()).await;
                    return None;
                }
                result = self.subscribe_link(link.clone()) => result,
            };

            match result {
                Ok(subscription) => {
                    let mut guard = self.context.lock().await;
                    if cancel_token.is_cancelled() || guard.is_none() {
                        drop(guard);
                        close_quietly(subscription.link.as_ref()).await;
                        return None;
                    }
                    if let Some(ctx) = guard.as_mut() {
                        if let Some(name) = subscription.link.name() {
                            ctx.device_name = Some(name);
                        }
                        ctx.link = Some(subscription.link.clone());
                        ctx.retry_attempt = 0;
                        ctx.reconnecting = false;
                    }
                    drop(guard);

                    info!("Reconnected to {} on attempt {}", address, attempt);
                    self.set_state(ConnectionState::Subscribed);
                    self.emit(ConnectionEvent::Reconnected {
                        address: address.clone(),
                    });
                    let battery_due = self.battery_deadline(battery_enabled, subscription.profile);
                    return Some((subscription.events, battery_due));
                }
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt, e),
            }
        }

        warn!("Giving up on {} after {} reconnection attempts", address, max_attempts);
        self.context.lock().await.take();
        self.battery.send_replace(None);
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::ReconnectExhausted { address });
        None
    }

    /// Opens a link to `address` unless cancelled first, `None` meaning cancelled.
    ///
    /// A link that completes after cancellation is closed in the background.
    async fn open_link(
        &self,
        address: &str,
        cancel_token: &CancellationToken,
    ) -> Option<Result<Arc<dyn GattLink>, HrmError>> {
        let radio = self.radio.clone();
        let target = address.to_string();
        let mut connecting = tokio::spawn(async move { radio.connect(&target).await });

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                tokio::spawn(async move {
                    if let Ok(Ok(link)) = connecting.await {
                        debug!("Closing link to {} opened after cancellation", link.address());
                        close_quietly(link.as_ref()).await;
                    }
                });
                None
            }
            joined = &mut connecting => Some(joined.unwrap_or_else(|e| {
                Err(HrmError::Disconnected(format!("connect task failed: {}", e)))
            })),
        }
    }
}

async fn close_quietly(link: &dyn GattLink) {
    if let Err(e) = link.close().await {
        warn!("Failed to close link to {}: {}", link.address(), e);
    }
}
