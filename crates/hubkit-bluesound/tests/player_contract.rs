//! Contract Test: Bluesound players hosted by hubkit
//!
//! Constraints verified:
//! - Setup exposes a media player, a volume number and a mute switch keyed
//!   by MAC address and port
//! - Long polls deliver player-side changes without a poll interval
//! - An unreachable player makes every entity unavailable and is polled
//!   again after the offline retry
//! - Transport services reach the player; unknown presets are rejected
//! - The config flow names the entry after the player

mod common;

use common::*;
use hubkit_bluesound::{Command, DOMAIN};
use hubkit_core::flow::ABORT_ALREADY_CONFIGURED;
use hubkit_core::traits::config_flow::BASE_ERROR;
use hubkit_core::{
    ConfigEntry, EntityValue, EntryState, Error, FlowManager, FlowResult, Host, MemoryEntryStore,
    Platform,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

fn player_entry() -> ConfigEntry {
    ConfigEntry::new(DOMAIN, "Kitchen", json!({"host": "10.0.0.2", "port": 11000}))
}

fn volume_id() -> String {
    format!("{}-11000-volume", MAC)
}

#[tokio::test(start_paused = true)]
async fn setup_exposes_player_entities() {
    let player = MockPlayer::new();
    let registry = bluesound_registry(MockApiFactory::new(Arc::clone(&player)));
    let store = Arc::new(MemoryEntryStore::new());
    let (host, _events) = Host::new(registry, store, &test_config()).unwrap();

    let entry = player_entry();
    let entry_id = entry.entry_id.clone();
    assert_eq!(assert_ok!(host.setup_entry(entry).await), EntryState::Loaded);
    assert_eq!(host.entry_entities(&entry_id).len(), 3);

    let media = host.entity(&format!("{}-11000", MAC)).expect("media player");
    assert_eq!(media.platform(), Platform::MediaPlayer);
    assert_eq!(media.name(), "Kitchen");
    assert!(media.available());
    assert_eq!(media.value(), EntityValue::Text("playing".to_string()));
    let attributes = media.attributes();
    assert_eq!(attributes["media_title"], "So What");
    assert_eq!(attributes["media_artist"], "Miles Davis");
    assert_eq!(attributes["presets"].as_array().map(Vec::len), Some(2));

    // Changes on the player arrive through the long poll
    player.update_status(|s| {
        s.state = "pause".to_string();
        s.title1 = Some("Blue in Green".to_string());
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(media.value(), EntityValue::Text("paused".to_string()));
    assert_eq!(media.attributes()["media_title"], "Blue in Green");

    let volume = host.entity(&volume_id()).expect("volume");
    assert_eq!(volume.value(), EntityValue::Int(30));
    let settable = volume.as_settable().expect("settable");
    assert_ok!(settable.set_value(45.0).await);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(volume.value(), EntityValue::Int(45));
    assert!(matches!(
        settable.set_value(150.0).await,
        Err(Error::InvalidInput(_))
    ));

    let mute = host.entity(&format!("{}-11000-mute", MAC)).expect("mute");
    let switch = mute.as_switchable().expect("switchable");
    assert_eq!(switch.is_on(), Some(false));
    assert_ok!(switch.turn_on().await);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(switch.is_on(), Some(true));

    assert!(assert_ok!(host.unload_entry(&entry_id).await));
    assert!(host.entity(&volume_id()).is_none());
}

#[tokio::test(start_paused = true)]
async fn offline_player_recovers_after_retry() {
    let player = MockPlayer::new();
    let registry = bluesound_registry(MockApiFactory::new(Arc::clone(&player)));
    let store = Arc::new(MemoryEntryStore::new());
    let (host, _events) = Host::new(registry, store, &test_config()).unwrap();

    assert_eq!(
        assert_ok!(host.setup_entry(player_entry()).await),
        EntryState::Loaded
    );
    let volume = host.entity(&volume_id()).expect("volume");
    assert!(volume.available());

    player.set_reachable(false);
    sleep(Duration::from_millis(10)).await;
    assert!(!volume.available());
    // Last known value is kept but not reported
    assert_eq!(volume.snapshot().value, EntityValue::Unknown);

    // No polling while waiting out the offline retry
    player.set_reachable(true);
    let polls = player.polls();
    sleep(Duration::from_secs(170)).await;
    assert_eq!(player.polls(), polls);
    assert!(!volume.available());

    sleep(Duration::from_secs(11)).await;
    assert!(volume.available());
    assert_eq!(volume.value(), EntityValue::Int(30));

    assert_ok!(host.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn unreachable_player_is_retried() {
    let player = MockPlayer::new();
    player.set_reachable(false);
    let apis = MockApiFactory::new(Arc::clone(&player));
    let registry = bluesound_registry(Arc::clone(&apis));
    let store = Arc::new(MemoryEntryStore::new());
    let (host, _events) = Host::new(registry, store, &test_config()).unwrap();

    let entry = player_entry();
    let entry_id = entry.entry_id.clone();
    assert_eq!(
        assert_ok!(host.setup_entry(entry).await),
        EntryState::SetupRetry
    );
    assert!(host.entry_entities(&entry_id).is_empty());

    player.set_reachable(true);
    sleep(Duration::from_secs(31)).await;
    assert_eq!(host.entry_state(&entry_id), EntryState::Loaded);
    assert_eq!(apis.creates(), 2);

    assert_ok!(host.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn services_reach_the_player() {
    let player = MockPlayer::new();
    let registry = bluesound_registry(MockApiFactory::new(Arc::clone(&player)));
    let store = Arc::new(MemoryEntryStore::new());
    let (host, _events) = Host::new(registry, store, &test_config()).unwrap();
    assert_ok!(host.setup_entry(player_entry()).await);

    assert_ok!(host.call_service(DOMAIN, "pause", &json!({})).await);
    assert_ok!(host.call_service(DOMAIN, "next_track", &json!({})).await);
    assert_ok!(host.call_service(DOMAIN, "preset", &json!({"id": 2})).await);
    assert_eq!(
        player.commands(),
        vec![Command::Pause, Command::Next, Command::Preset(2)]
    );

    let unknown_preset = host.call_service(DOMAIN, "preset", &json!({"id": 9})).await;
    assert!(matches!(unknown_preset, Err(Error::InvalidInput(_))));

    let missing_id = host.call_service(DOMAIN, "preset", &json!({})).await;
    assert!(matches!(missing_id, Err(Error::InvalidInput(_))));

    let unknown = host.call_service(DOMAIN, "shuffle", &json!({})).await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));
    assert_eq!(player.commands().len(), 3);

    assert_ok!(host.shutdown().await);
}

#[tokio::test]
async fn config_flow_names_entry_after_player() {
    let player = MockPlayer::new();
    let registry = bluesound_registry(MockApiFactory::new(Arc::clone(&player)));
    let store = Arc::new(MemoryEntryStore::new());
    let flows = FlowManager::new(registry, store);

    let step = assert_ok!(flows.start(DOMAIN).await);
    assert!(matches!(step.result, FlowResult::ShowForm { .. }));
    let flow_id = step.flow_id;

    player.set_reachable(false);
    let step = assert_ok!(flows.configure(&flow_id, json!({"host": "10.0.0.2"})).await);
    match &step.result {
        FlowResult::ShowForm { errors, .. } => {
            assert_eq!(errors.get(BASE_ERROR).map(String::as_str), Some("cannot_connect"));
        }
        other => panic!("expected form, got {:?}", other),
    }

    player.set_reachable(true);
    let step = assert_ok!(flows.configure(&flow_id, json!({"host": "10.0.0.2"})).await);
    let entry = step.entry.expect("entry created");
    assert_eq!(entry.title, "Kitchen");
    assert_eq!(entry.unique_id.as_deref(), Some("90:56:82:9F:AA:01-11000"));
    assert_eq!(entry.data["port"], 11000);

    // Same player again
    let step = assert_ok!(flows.start(DOMAIN).await);
    let step = assert_ok!(flows.configure(&step.flow_id, json!({"host": "10.0.0.2"})).await);
    match &step.result {
        FlowResult::Abort { reason } => assert_eq!(reason, ABORT_ALREADY_CONFIGURED),
        other => panic!("expected abort, got {:?}", other),
    }
}
