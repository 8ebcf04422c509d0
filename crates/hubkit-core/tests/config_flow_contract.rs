//! Architectural Contract Test: Config Flow
//!
//! This test verifies the flow manager's handling of form steps.
//!
//! Constraints verified:
//! - Validation failures are shown as form errors and keep the flow open
//! - A successful flow persists exactly one config entry
//! - A second flow for the same device aborts with `already_configured`
//! - Finished flows cannot be configured again

mod common;

use common::*;
use hubkit_core::flow::ABORT_ALREADY_CONFIGURED;
use hubkit_core::traits::EntryStore;
use hubkit_core::traits::config_flow::BASE_ERROR;
use hubkit_core::{Error, FlowManager, FlowResult, MemoryEntryStore};
use serde_json::json;
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn flow_shows_errors_then_creates_entry() {
    let (registry, _counters) = mock_registry();
    let store = Arc::new(MemoryEntryStore::new());
    let flows = FlowManager::new(registry, store.clone());

    let step = assert_ok!(flows.start("mock").await);
    assert!(!step.is_done());
    assert!(matches!(step.result, FlowResult::ShowForm { .. }));
    let flow_id = step.flow_id;

    let step = assert_ok!(flows.configure(&flow_id, json!({"host": "unreachable"})).await);
    match &step.result {
        FlowResult::ShowForm { errors, .. } => {
            assert_eq!(errors.get(BASE_ERROR).map(String::as_str), Some("cannot_connect"));
        }
        other => panic!("expected form, got {:?}", other),
    }
    assert_eq!(flows.in_progress().await, 1);

    let step = assert_ok!(flows.configure(&flow_id, json!({"host": "10.0.0.5"})).await);
    assert!(step.is_done());
    let entry = step.entry.expect("entry is created");
    assert_eq!(entry.domain, "mock");
    assert_eq!(entry.unique_id.as_deref(), Some("10.0.0.5"));
    assert_eq!(store.len().await, 1);
    assert_eq!(flows.in_progress().await, 0);

    assert!(matches!(
        flows.configure(&flow_id, json!({"host": "10.0.0.5"})).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_device_aborts_flow() {
    let (registry, _counters) = mock_registry();
    let store = Arc::new(MemoryEntryStore::new());
    let flows = FlowManager::new(registry, store.clone());

    for expect_created in [true, false] {
        let step = assert_ok!(flows.start("mock").await);
        let step = assert_ok!(flows.configure(&step.flow_id, json!({"host": "10.0.0.9"})).await);
        if expect_created {
            assert!(step.entry.is_some());
        } else {
            assert_eq!(step.result, FlowResult::abort(ABORT_ALREADY_CONFIGURED));
            assert!(step.entry.is_none());
        }
    }

    assert_eq!(store.list_entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_domain_and_abort() {
    let (registry, _counters) = mock_registry();
    let store = Arc::new(MemoryEntryStore::new());
    let flows = FlowManager::new(registry, store);

    assert!(flows.start("nope").await.is_err());

    let step = assert_ok!(flows.start("mock").await);
    assert!(flows.abort(&step.flow_id).await);
    assert!(!flows.abort(&step.flow_id).await);
}
