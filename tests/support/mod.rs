//! Scripted in-memory radio for driving the scanner and state machine

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use hrm_bridge::ProviderConfig;
use hrm_bridge::core::bluetooth::{
    Advertisement, GattLink, HeartRateProvider, HrmError, LinkEvent, LinkProfile,
    PermissionGate, Radio, RadioAvailability, ScanEvent,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub const HRM_ADDRESS: &str = "C8:3F:26:AA:01:02";
pub const OTHER_ADDRESS: &str = "D0:11:22:33:44:55";

/// Outcome of one `Radio::connect` call
#[derive(Debug, Clone)]
pub enum ConnectScript {
    Link {
        name: Option<&'static str>,
        battery: Option<u8>,
    },
    NotFound,
    SubscribeFails,
    SubscribeHangs,
    /// Answers with a default link after the delay
    Slow(Duration),
}

impl ConnectScript {
    pub fn link() -> Self {
        ConnectScript::Link {
            name: Some("Polar H10 A1B2C3"),
            battery: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubscribeBehavior {
    Succeed,
    Fail,
    Hang,
}

pub struct MockRadio {
    availability: Mutex<RadioAvailability>,
    scan_script: Mutex<Vec<(Duration, ScanEvent)>>,
    scanning: Arc<AtomicBool>,
    scan_calls: AtomicUsize,
    connect_script: Mutex<VecDeque<ConnectScript>>,
    connect_log: Mutex<Vec<(Instant, String)>>,
    links: Mutex<Vec<Arc<MockLink>>>,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            availability: Mutex::new(RadioAvailability::Ready),
            scan_script: Mutex::new(Vec::new()),
            scanning: Arc::new(AtomicBool::new(false)),
            scan_calls: AtomicUsize::new(0),
            connect_script: Mutex::new(VecDeque::new()),
            connect_log: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn set_availability(&self, availability: RadioAvailability) {
        *self.availability.lock().unwrap() = availability;
    }

    /// Each event is emitted `delay` after the previous one
    pub fn script_scan(&self, events: Vec<(Duration, ScanEvent)>) {
        *self.scan_script.lock().unwrap() = events;
    }

    /// Queues connect outcomes; an empty queue answers `DEVICE_NOT_FOUND`
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectScript>) {
        self.connect_script.lock().unwrap().extend(outcomes);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_log.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_log
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        self.links.lock().unwrap()[index].clone()
    }

    pub fn last_link(&self) -> Arc<MockLink> {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no link opened")
    }
}

struct ScanGuard(Arc<AtomicBool>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Radio for MockRadio {
    async fn availability(&self) -> RadioAvailability {
        *self.availability.lock().unwrap()
    }

    async fn scan(&self, service: Uuid) -> Result<BoxStream<'static, ScanEvent>, HrmError> {
        assert_eq!(
            service,
            hrm_bridge::core::bluetooth::constants::UUID_HEART_RATE_SERVICE
        );
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);
        let guard = ScanGuard(self.scanning.clone());
        let events: VecDeque<(Duration, ScanEvent)> =
            self.scan_script.lock().unwrap().clone().into();

        Ok(stream::unfold((events, guard), |(mut events, guard)| async move {
            match events.pop_front() {
                Some((delay, event)) => {
                    tokio::time::sleep(delay).await;
                    Some((event, (events, guard)))
                }
                None => {
                    // A real scan keeps running until stopped
                    std::future::pending::<()>().await;
                    None
                }
            }
        })
        .boxed())
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn GattLink>, HrmError> {
        self.connect_log
            .lock()
            .unwrap()
            .push((Instant::now(), address.to_string()));
        let script = self
            .connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectScript::NotFound);

        let script = match script {
            ConnectScript::Slow(delay) => {
                tokio::time::sleep(delay).await;
                ConnectScript::link()
            }
            other => other,
        };
        let (name, battery, behavior) = match script {
            ConnectScript::NotFound => {
                return Err(HrmError::DeviceNotFound(address.to_string()));
            }
            ConnectScript::Link { name, battery } => (name, battery, SubscribeBehavior::Succeed),
            ConnectScript::SubscribeFails => (None, None, SubscribeBehavior::Fail),
            ConnectScript::SubscribeHangs => (None, None, SubscribeBehavior::Hang),
            ConnectScript::Slow(_) => unreachable!(),
        };
        let link = Arc::new(MockLink {
            address: address.to_string(),
            name: name.map(str::to_string),
            battery,
            behavior,
            events: Mutex::new(None),
            closed: AtomicBool::new(false),
            subscribed_at: Mutex::new(None),
            battery_reads: Mutex::new(Vec::new()),
        });
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

pub struct MockLink {
    address: String,
    name: Option<String>,
    battery: Option<u8>,
    behavior: SubscribeBehavior,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    closed: AtomicBool,
    subscribed_at: Mutex<Option<Instant>>,
    battery_reads: Mutex<Vec<Instant>>,
}

impl MockLink {
    /// Pushes a raw measurement as the peripheral would
    pub fn notify(&self, value: &[u8]) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(LinkEvent::Notification(value.to_vec()));
        }
    }

    /// Simulates the peripheral dropping the link
    pub fn drop_link(&self) {
        if let Some(events) = self.events.lock().unwrap().take() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribed_at(&self) -> Option<Instant> {
        *self.subscribed_at.lock().unwrap()
    }

    pub fn battery_reads(&self) -> Vec<Instant> {
        self.battery_reads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GattLink for MockLink {
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
        match self.behavior {
            SubscribeBehavior::Succeed => {
                *self.events.lock().unwrap() = Some(events);
                *self.subscribed_at.lock().unwrap() = Some(Instant::now());
                Ok(LinkProfile {
                    has_battery: self.battery.is_some(),
                })
            }
            SubscribeBehavior::Fail => Err(HrmError::SubscribeFailed(
                "heart rate measurement characteristic not found".to_string(),
            )),
            SubscribeBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn read_battery(&self) -> Result<Option<u8>, HrmError> {
        self.battery_reads.lock().unwrap().push(Instant::now());
        Ok(self.battery)
    }

    async fn close(&self) -> Result<(), HrmError> {
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().unwrap().take();
        Ok(())
    }
}

/// Gate with switchable answers
pub struct TestGate {
    pub scan: AtomicBool,
    pub connect: AtomicBool,
}

impl TestGate {
    pub fn granted() -> Arc<Self> {
        Arc::new(Self {
            scan: AtomicBool::new(true),
            connect: AtomicBool::new(true),
        })
    }
}

impl PermissionGate for TestGate {
    fn can_scan(&self) -> bool {
        self.scan.load(Ordering::SeqCst)
    }

    fn can_connect(&self) -> bool {
        self.connect.load(Ordering::SeqCst)
    }
}

pub fn advertisement(address: &str, name: Option<&str>, rssi: i16) -> ScanEvent {
    ScanEvent::Advertisement(Advertisement {
        address: address.to_string(),
        name: name.map(str::to_string),
        rssi,
    })
}

pub fn provider(radio: &Arc<MockRadio>) -> HeartRateProvider {
    provider_with_gate(radio, TestGate::granted())
}

pub fn provider_with_gate(radio: &Arc<MockRadio>, gate: Arc<TestGate>) -> HeartRateProvider {
    HeartRateProvider::with_radio(radio.clone(), gate, ProviderConfig::default())
}
