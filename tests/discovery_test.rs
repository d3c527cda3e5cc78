//! Bonded listing, live inquiry and the candidate set.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use robocar_link_lib::core::bluetooth::{AllowAll, Operation};
use robocar_link_lib::{DeviceIdentity, LinkConfig, LinkEvent};

fn dev(address: &str, name: Option<&str>) -> DeviceIdentity {
    DeviceIdentity::new(address, name.map(str::to_string))
}

fn is_finished(event: &LinkEvent) -> bool {
    *event == LinkEvent::ScanFinished
}

#[tokio::test]
async fn scan_reports_each_device_once() {
    let mut radio = MockRadio::new();
    radio.inquiry = vec![
        dev("AA:AA", None),
        dev("BB:BB", Some("Car2")),
        dev("AA:AA", Some("Car1")),
    ];
    let (manager, _log, mut rx) = setup(radio);

    assert!(manager.start_scan().await);
    let events = events_until(&mut rx, is_finished).await;

    assert_eq!(
        events,
        vec![
            LinkEvent::DeviceFound(dev("AA:AA", None)),
            LinkEvent::DeviceFound(dev("BB:BB", None)),
            LinkEvent::ScanFinished,
        ]
    );
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn restarted_scan_reports_devices_again() {
    let mut radio = MockRadio::new();
    radio.inquiry = vec![dev("AA:AA", Some("Car1"))];
    let (manager, log, mut rx) = setup(radio);

    assert!(manager.start_scan().await);
    events_until(&mut rx, is_finished).await;
    assert!(manager.start_scan().await);
    let events = events_until(&mut rx, is_finished).await;

    assert_eq!(count(&events, &LinkEvent::DeviceFound(dev("AA:AA", None))), 1);
    assert_eq!(log.inquiry_starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stop_scan_is_idempotent() {
    let mut radio = MockRadio::new();
    radio.inquiry = vec![dev("AA:AA", None)];
    radio.inquiry_ends = false;
    let (manager, _log, mut rx) = setup(radio);

    manager.stop_scan().await;
    assert!(drain(&mut rx).is_empty());

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::DeviceFound(dev("AA:AA", None)));
    assert!(manager.is_scanning().await);

    manager.stop_scan().await;
    manager.stop_scan().await;

    assert_eq!(drain(&mut rx), vec![LinkEvent::ScanFinished]);
    assert!(!manager.is_scanning().await);
}

#[tokio::test]
async fn starting_a_scan_ends_the_running_one() {
    let mut radio = MockRadio::new();
    radio.inquiry = vec![dev("AA:AA", None)];
    radio.inquiry_ends = false;
    let (manager, _log, mut rx) = setup(radio);

    assert!(manager.start_scan().await);
    next_event(&mut rx).await;
    assert!(manager.start_scan().await);

    assert_eq!(next_event(&mut rx).await, LinkEvent::ScanFinished);
    assert_eq!(next_event(&mut rx).await, LinkEvent::DeviceFound(dev("AA:AA", None)));

    manager.stop_scan().await;
    assert_eq!(drain(&mut rx), vec![LinkEvent::ScanFinished]);
}

#[tokio::test]
async fn scan_stops_when_its_duration_elapses() {
    let mut radio = MockRadio::new();
    radio.inquiry_ends = false;
    let config = LinkConfig {
        scan_duration_secs: 1,
        ..fast_config()
    };
    let (manager, log, mut rx) = setup_with(radio, Arc::new(AllowAll), &config);

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::ScanFinished);
    assert_eq!(log.inquiry_cancels.load(Ordering::SeqCst), 1);
    assert!(!manager.is_scanning().await);
}

#[tokio::test]
async fn scan_without_permission_does_not_start() {
    let (manager, log, mut rx) =
        setup_with(MockRadio::new(), Arc::new(Deny(vec![Operation::Scan])), &fast_config());

    assert!(!manager.start_scan().await);

    assert_eq!(log.inquiry_starts.load(Ordering::SeqCst), 0);
    assert_eq!(
        drain(&mut rx),
        vec![LinkEvent::Error("Bluetooth permissions not granted".to_string())]
    );

    manager.stop_scan().await;
    assert_eq!(log.inquiry_cancels.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bonded_listing_requires_permission() {
    let mut radio = MockRadio::new();
    radio.bonded = vec![dev("AA:BB", Some("Car1"))];
    let (manager, _log, mut rx) = setup_with(
        radio,
        Arc::new(Deny(vec![Operation::Connect])),
        &fast_config(),
    );

    assert!(manager.list_bonded_devices().await.is_empty());
    assert_eq!(errors(&drain(&mut rx)).len(), 1);
    assert!(manager.candidates().is_empty());
}

#[tokio::test]
async fn candidates_merge_bonded_and_discovered() {
    let mut radio = MockRadio::new();
    radio.bonded = vec![dev("AA:BB", Some("Car1"))];
    radio.inquiry = vec![dev("AA:BB", Some("Car1")), dev("CC:DD", Some("Car2"))];
    let (manager, _log, mut rx) = setup(radio);

    manager.list_bonded_devices().await;
    assert!(manager.start_scan().await);
    events_until(&mut rx, is_finished).await;

    let candidates = manager.candidates();
    assert_eq!(candidates.len(), 2);
    let car1 = candidates
        .iter()
        .find(|c| c.device.address() == "AA:BB")
        .unwrap();
    assert!(car1.bonded);
    let car2 = candidates
        .iter()
        .find(|c| c.device.address() == "CC:DD")
        .unwrap();
    assert!(!car2.bonded);
}

#[tokio::test]
async fn connecting_stops_the_scan_and_forgets_discovered_devices() {
    let mut radio = MockRadio::new().succeeding_on(secure());
    radio.inquiry = vec![dev("CC:DD", Some("Car2"))];
    radio.inquiry_ends = false;
    let (manager, _log, mut rx) = setup(radio);

    assert!(manager.start_scan().await);
    next_event(&mut rx).await;
    assert_eq!(manager.candidates().len(), 1);

    manager.connect(dev("CC:DD", Some("Car2"))).await.unwrap().unwrap();

    let events = drain(&mut rx);
    assert_eq!(count(&events, &LinkEvent::ScanFinished), 1);
    assert!(!manager.is_scanning().await);
    assert!(manager.candidates().is_empty());
}

#[tokio::test]
async fn describe_reports_bond_state_and_kind() {
    let mut radio = MockRadio::new();
    radio.bonded = vec![dev("AA:BB", Some("Car1"))];
    let (manager, _log, _rx) = setup(radio);

    let paired = manager.describe_device(&dev("AA:BB", Some("Car1"))).await;
    assert_eq!(paired, "Device: Car1 (AA:BB)\nBond State: Paired\nType: Classic");

    let stranger = manager.describe_device(&dev("EE:FF", None)).await;
    assert!(stranger.contains("Not Paired"));
    assert!(stranger.starts_with("Device: Unknown (EE:FF)"));
}
