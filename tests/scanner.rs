mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hrm_bridge::ErrorCode;
use hrm_bridge::core::bluetooth::{RadioAvailability, ScanEvent};
use pretty_assertions::assert_eq;
use support::{MockRadio, TestGate, advertisement, provider, provider_with_gate};
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn test_scan_deduplicates_by_address_keeping_latest() {
    let radio = MockRadio::new();
    radio.script_scan(vec![
        (Duration::from_millis(100), advertisement("AA:00:00:00:00:01", Some("Polar H10"), -80)),
        (Duration::from_millis(100), advertisement("AA:00:00:00:00:02", Some("TICKR"), -60)),
        (Duration::from_millis(100), advertisement("AA:00:00:00:00:01", Some("Polar H10"), -45)),
    ]);
    let provider = provider(&radio);

    let devices = provider.scan_with(WINDOW, None).await.unwrap();

    assert_eq!(devices.len(), 2);
    let polar = devices
        .iter()
        .find(|d| d.address == "AA:00:00:00:00:01")
        .expect("polar strap");
    assert_eq!(polar.rssi, -45);
    // strongest first
    assert_eq!(devices[0].address, "AA:00:00:00:00:01");
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_name_prefix_is_applied_after_scan() {
    let radio = MockRadio::new();
    radio.script_scan(vec![
        (Duration::from_millis(50), advertisement("AA:00:00:00:00:01", Some("Polar H10"), -70)),
        (Duration::from_millis(50), advertisement("AA:00:00:00:00:02", Some("Wahoo TICKR"), -50)),
        (Duration::from_millis(50), advertisement("AA:00:00:00:00:03", None, -40)),
    ]);
    let provider = provider(&radio);

    let devices = provider.scan_with(WINDOW, Some("Polar")).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, "AA:00:00:00:00:01");
    assert_eq!(devices[0].name.as_deref(), Some("Polar H10"));
}

#[tokio::test(start_paused = true)]
async fn test_later_nameless_advertisement_keeps_known_name() {
    let radio = MockRadio::new();
    radio.script_scan(vec![
        (Duration::from_millis(50), advertisement("AA:00:00:00:00:01", Some("Polar H10"), -70)),
        (Duration::from_millis(50), advertisement("AA:00:00:00:00:01", None, -65)),
    ]);
    let provider = provider(&radio);

    let devices = provider.scan_with(WINDOW, Some("Polar")).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].rssi, -65);
}

#[tokio::test(start_paused = true)]
async fn test_scan_waits_for_the_full_window() {
    let radio = MockRadio::new();
    let provider = provider(&radio);
    let started = Instant::now();

    let devices = provider.scan_with(Duration::from_secs(3), None).await.unwrap();

    assert!(devices.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_preconditions_fail_before_radio_activity() {
    let radio = MockRadio::new();
    let provider = provider(&radio);

    radio.set_availability(RadioAvailability::PoweredOff);
    let err = provider.scan_with(WINDOW, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BluetoothOff);

    radio.set_availability(RadioAvailability::Unsupported);
    let err = provider.scan_with(WINDOW, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BluetoothOff);

    radio.set_availability(RadioAvailability::Unauthorized);
    let err = provider.scan_with(WINDOW, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    assert_eq!(radio.scan_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_scan_permission_is_denied() {
    let radio = MockRadio::new();
    let gate = TestGate::granted();
    gate.scan.store(false, Ordering::SeqCst);
    let provider = provider_with_gate(&radio, gate);

    let err = provider.scan_with(WINDOW, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    assert_eq!(radio.scan_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_radio_failure_aborts_scan_immediately() {
    let radio = MockRadio::new();
    radio.script_scan(vec![
        (Duration::from_millis(100), advertisement("AA:00:00:00:00:01", Some("Polar H10"), -70)),
        (
            Duration::from_millis(100),
            ScanEvent::Failed {
                code: 2,
                message: "application registration failed".to_string(),
            },
        ),
    ]);
    let provider = provider(&radio);
    let started = Instant::now();

    let err = provider.scan_with(WINDOW, None).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ScanFailed);
    assert!(matches!(err, hrm_bridge::HrmError::ScanFailed { code: 2, .. }));
    assert!(started.elapsed() < WINDOW);
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_scan_stops_the_radio() {
    let radio = MockRadio::new();
    let provider = provider(&radio);

    let result = tokio::time::timeout(Duration::from_secs(1), provider.scan_with(WINDOW, None)).await;

    assert!(result.is_err());
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_stop_scan_returns_collected_devices() {
    let radio = MockRadio::new();
    radio.script_scan(vec![(
        Duration::from_millis(100),
        advertisement("AA:00:00:00:00:01", Some("Polar H10"), -70),
    )]);
    let provider = Arc::new(provider(&radio));

    let scanning = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.scan_with(WINDOW, None).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    provider.stop_scan();
    let started = Instant::now();

    let devices = scanning.await.unwrap().unwrap();
    assert_eq!(devices.len(), 1);
    assert!(started.elapsed() < WINDOW);
    assert!(!radio.is_scanning());
}
