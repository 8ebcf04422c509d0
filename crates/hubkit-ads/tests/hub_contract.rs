//! Contract Test: ADS hub and connection monitor
//!
//! Constraints verified:
//! - Notification samples are decoded by the registered type and published
//! - Samples for unknown handles or with short data are dropped
//! - Concurrent registrations of one variable share a single notification
//! - A failed re-registration leaves no notification behind on the PLC
//! - A PLC leaving RUN suspends notifications and marks the hub offline;
//!   returning to RUN re-registers every variable
//! - A new PLC program (changed app timestamp) forces re-registration
//! - A PLC that never runs stops the monitor with a fatal error

mod common;

use common::*;
use hubkit_ads::monitor::{CHECK_INTERVAL, run_monitor};
use hubkit_ads::{AdsHub, AdsState, AdsType, AdsValue, RawNotification};
use hubkit_core::{Error, FailureClass};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

const RETRY: Duration = Duration::from_secs(15);

fn hub(plc: &Arc<MockPlc>) -> Arc<AdsHub> {
    Arc::new(AdsHub::new("plc", Arc::clone(plc) as _))
}

#[tokio::test(start_paused = true)]
async fn notifications_are_decoded_and_published() {
    let plc = MockPlc::new();
    plc.define("GVL.temp", AdsValue::Float(20.0));
    let hub = hub(&plc);
    let token = CancellationToken::new();

    let temp = assert_ok!(hub.register_notification("GVL.temp", AdsType::Real).await);
    let pump = tokio::spawn(Arc::clone(&hub).run_notifications(token.clone()));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(temp.current().data, Some(AdsValue::Float(20.0)));

    plc.set_value("GVL.temp", AdsValue::Float(21.5));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(temp.current().data, Some(AdsValue::Float(21.5)));

    // Same variable twice shares one notification
    let again = assert_ok!(hub.register_notification("GVL.temp", AdsType::Real).await);
    assert!(Arc::ptr_eq(&temp, &again));
    assert_eq!(plc.active_notifications(), 1);

    token.cancel();
    assert_ok!(pump.await.unwrap());
}

#[tokio::test]
async fn bad_samples_are_dropped() {
    let plc = MockPlc::new();
    plc.define("GVL.count", AdsValue::Int(1));
    let hub = hub(&plc);
    assert_ok!(hub.register_notification("GVL.count", AdsType::DInt).await);

    let unknown = RawNotification {
        handle: 999,
        timestamp: 0,
        data: vec![1, 0, 0, 0],
    };
    assert!(!hub.dispatch(&unknown));

    let short = RawNotification {
        handle: 1,
        timestamp: 0,
        data: vec![1],
    };
    assert!(!hub.dispatch(&short));

    let good = RawNotification {
        handle: 1,
        timestamp: 0,
        data: vec![7, 0, 0, 0],
    };
    assert!(hub.dispatch(&good));
}

#[tokio::test]
async fn concurrent_registrations_share_one_notification() {
    let plc = MockPlc::new();
    plc.define("GVL.level", AdsValue::Int(3));
    let hub = hub(&plc);

    let (first, second) = tokio::join!(
        hub.register_notification("GVL.level", AdsType::Int),
        hub.register_notification("GVL.level", AdsType::Int),
    );
    let (first, second) = (assert_ok!(first), assert_ok!(second));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(plc.active_notifications(), 1);
    assert_eq!(hub.registered(), vec!["GVL.level".to_string()]);
}

#[tokio::test]
async fn failed_reinitialize_rolls_back_notifications() {
    let plc = MockPlc::new();
    plc.define("GVL.a", AdsValue::Int(1));
    plc.define("GVL.b", AdsValue::Int(2));
    let hub = hub(&plc);
    assert_ok!(hub.register_notification("GVL.a", AdsType::Int).await);
    assert_ok!(hub.register_notification("GVL.b", AdsType::Int).await);
    hub.shutdown_notifications().await;
    assert_eq!(plc.active_notifications(), 0);

    // Every monitor tick retries; none may leave GVL.a registered
    plc.refuse_notifications(Some("GVL.b"));
    for _ in 0..3 {
        let err = hub.reinitialize_notifications().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(plc.active_notifications(), 0);
    }

    plc.refuse_notifications(None);
    assert_ok!(hub.reinitialize_notifications().await);
    assert_eq!(plc.active_notifications(), 2);

    // Running again replaces the handles
    assert_ok!(hub.reinitialize_notifications().await);
    assert_eq!(plc.active_notifications(), 2);
}

#[tokio::test]
async fn unknown_symbol_is_not_found() {
    let plc = MockPlc::new();
    let hub = hub(&plc);
    let err = hub
        .register_notification("GVL.missing", AdsType::Int)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.class(), FailureClass::Fatal);
}

#[tokio::test(start_paused = true)]
async fn monitor_follows_plc_through_stop() {
    let plc = MockPlc::new();
    plc.define("GVL.temp", AdsValue::Float(20.0));
    let hub = hub(&plc);
    let temp = assert_ok!(hub.register_notification("GVL.temp", AdsType::Real).await);

    let token = CancellationToken::new();
    let pump = tokio::spawn(Arc::clone(&hub).run_notifications(token.clone()));
    let monitor = tokio::spawn(run_monitor(
        Arc::clone(&hub),
        CHECK_INTERVAL,
        RETRY,
        token.clone(),
    ));

    sleep(Duration::from_millis(1500)).await;
    assert!(hub.is_connected());

    // t=2 shutdown, t=3 reconnect then wait RETRY
    plc.set_state(AdsState::Stop);
    sleep(Duration::from_secs(2)).await;
    assert!(!hub.is_connected());
    assert!(!temp.is_online());
    assert_eq!(plc.active_notifications(), 0);
    assert_eq!(plc.reconnects(), 1);

    // t=18 healthy again
    plc.set_state(AdsState::Run);
    sleep(Duration::from_secs(15)).await;
    assert!(hub.is_connected());
    assert_eq!(plc.active_notifications(), 1);
    assert!(temp.is_online());

    token.cancel();
    assert_ok!(monitor.await.unwrap());
    assert_ok!(pump.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn new_plc_program_re_registers_notifications() {
    let plc = MockPlc::new();
    plc.define("GVL.flag", AdsValue::Bool(false));
    let hub = hub(&plc);
    assert_ok!(hub.register_notification("GVL.flag", AdsType::Bool).await);

    let token = CancellationToken::new();
    let monitor = tokio::spawn(run_monitor(
        Arc::clone(&hub),
        CHECK_INTERVAL,
        RETRY,
        token.clone(),
    ));

    sleep(Duration::from_millis(1500)).await;
    assert!(hub.is_connected());

    // t=2 timestamp change drops notifications, t=3 re-registers
    plc.set_app_timestamp(1_800_000_000);
    sleep(Duration::from_millis(1000)).await;
    assert!(!hub.is_connected());
    assert_eq!(plc.active_notifications(), 0);

    sleep(Duration::from_millis(1000)).await;
    assert!(hub.is_connected());
    assert_eq!(plc.active_notifications(), 1);
    assert_eq!(plc.reconnects(), 0);

    token.cancel();
    assert_ok!(monitor.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn monitor_gives_up_when_plc_never_runs() {
    let plc = MockPlc::new();
    plc.set_state(AdsState::Config);
    let hub = hub(&plc);

    let err = run_monitor(
        Arc::clone(&hub),
        CHECK_INTERVAL,
        RETRY,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class(), FailureClass::Fatal);
    assert!(!hub.is_connected());
}
