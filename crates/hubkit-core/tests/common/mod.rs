//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without talking to real devices.

#![allow(dead_code)]

use async_trait::async_trait;
use hubkit_core::error::{Error, Result};
use hubkit_core::traits::config_flow::STEP_USER;
use hubkit_core::traits::{
    ConfigEntry, ConfigFlow, DeviceClient, Entity, EntityValue, EntryStore, FieldKind,
    FlowResult, FormField, Integration, IntegrationFactory, Platform, Switchable,
};
use hubkit_core::{HubConfig, IntegrationContext, IntegrationRegistry, MemoryEntryStore};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted response of a [`ScriptedClient`]
#[derive(Debug, Clone)]
pub enum Step {
    Value(u32),
    Offline,
    Fatal,
    Cancelled,
}

/// DeviceClient that replays a script, then repeats the fallback step
pub struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    fetch_count: AtomicUsize,
    previous_seen: Mutex<Vec<Option<u32>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            fetch_count: AtomicUsize::new(0),
            previous_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// The `previous` argument of every fetch, in order
    pub fn previous_seen(&self) -> Vec<Option<u32>> {
        self.previous_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClient for ScriptedClient {
    type Data = u32;

    async fn fetch(&self, previous: Option<&u32>) -> Result<u32> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.previous_seen.lock().unwrap().push(previous.copied());

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Value(v) => Ok(v),
            Step::Offline => Err(Error::transient("no route to host")),
            Step::Fatal => Err(Error::fatal("firmware rejected request")),
            Step::Cancelled => Err(Error::Cancelled),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Counters shared between a [`MockFactory`] and the test
#[derive(Default)]
pub struct MockCounters {
    pub setup_calls: AtomicUsize,
    pub unload_calls: AtomicUsize,
    pub tasks_stopped: AtomicUsize,
    pub service_calls: Mutex<Vec<String>>,
}

impl MockCounters {
    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn unload_calls(&self) -> usize {
        self.unload_calls.load(Ordering::SeqCst)
    }

    pub fn tasks_stopped(&self) -> usize {
        self.tasks_stopped.load(Ordering::SeqCst)
    }
}

/// Factory for the `mock` domain
///
/// Entry data controls setup:
/// - `{"fail": "transient", "fail_times": 2}` fails the first two setups
/// - `{"fail": "fatal"}` always fails permanently
pub struct MockFactory {
    pub counters: Arc<MockCounters>,
}

impl MockFactory {
    pub fn new() -> (Self, Arc<MockCounters>) {
        let counters = Arc::new(MockCounters::default());
        (
            Self {
                counters: Arc::clone(&counters),
            },
            counters,
        )
    }
}

impl IntegrationFactory for MockFactory {
    fn domain(&self) -> &'static str {
        "mock"
    }

    fn create(&self, entry: &ConfigEntry) -> Result<Box<dyn Integration>> {
        Ok(Box::new(MockIntegration {
            counters: Arc::clone(&self.counters),
            fail: entry.data["fail"].as_str().map(str::to_string),
            fail_times: entry.data["fail_times"].as_u64().unwrap_or(u64::MAX) as usize,
        }))
    }

    fn config_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(MockFlow)
    }
}

pub struct MockIntegration {
    counters: Arc<MockCounters>,
    fail: Option<String>,
    fail_times: usize,
}

#[async_trait]
impl Integration for MockIntegration {
    async fn setup(&self, ctx: &IntegrationContext) -> Result<Vec<Arc<dyn Entity>>> {
        let attempt = self.counters.setup_calls.fetch_add(1, Ordering::SeqCst);

        if attempt < self.fail_times {
            match self.fail.as_deref() {
                Some("transient") => return Err(Error::cannot_connect("device offline")),
                Some("fatal") => return Err(Error::invalid_auth("bad password")),
                _ => {}
            }
        }

        let token = ctx.token().clone();
        let counters = Arc::clone(&self.counters);
        ctx.spawn("poll", async move {
            token.cancelled().await;
            counters.tasks_stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        Ok(vec![Arc::new(MockSwitch::new(format!(
            "{}-switch",
            ctx.entry().entry_id
        )))])
    }

    async fn unload(&self) -> Result<()> {
        self.counters.unload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn call_service(&self, service: &str, _data: &serde_json::Value) -> Result<()> {
        if service != "ping" {
            return Err(Error::not_found(format!("Unknown service: {}", service)));
        }
        self.counters
            .service_calls
            .lock()
            .unwrap()
            .push(service.to_string());
        Ok(())
    }
}

/// A switch entity backed by a flag
pub struct MockSwitch {
    unique_id: String,
    on: AtomicBool,
}

impl MockSwitch {
    pub fn new(unique_id: String) -> Self {
        Self {
            unique_id,
            on: AtomicBool::new(false),
        }
    }
}

impl Entity for MockSwitch {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        "Mock switch"
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn available(&self) -> bool {
        true
    }

    fn value(&self) -> EntityValue {
        EntityValue::Bool(self.on.load(Ordering::SeqCst))
    }

    fn as_switchable(&self) -> Option<&dyn Switchable> {
        Some(self)
    }
}

#[async_trait]
impl Switchable for MockSwitch {
    async fn turn_on(&self) -> Result<()> {
        self.on.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn turn_off(&self) -> Result<()> {
        self.on.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One-step flow asking for a host
///
/// `unreachable` fails validation; any other host creates an entry whose
/// unique id is the host itself.
pub struct MockFlow;

fn mock_fields() -> Vec<FormField> {
    vec![FormField::required("host", FieldKind::String)]
}

#[async_trait]
impl ConfigFlow for MockFlow {
    async fn step(
        &mut self,
        step_id: &str,
        input: Option<serde_json::Value>,
    ) -> Result<FlowResult> {
        assert_eq!(step_id, STEP_USER);
        let Some(input) = input else {
            return Ok(FlowResult::form(STEP_USER, mock_fields()));
        };

        let host = input["host"].as_str().unwrap_or_default().to_string();
        if host == "unreachable" {
            return Ok(FlowResult::form_error(
                STEP_USER,
                mock_fields(),
                &Error::cannot_connect("timed out"),
            ));
        }

        Ok(FlowResult::CreateEntry {
            title: host.clone(),
            unique_id: Some(host),
            data: input,
        })
    }
}

/// Entry store that counts flushes
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryEntryStore,
    flushes: AtomicUsize,
}

impl CountingStore {
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntryStore for CountingStore {
    async fn get_entry(&self, entry_id: &str) -> Result<Option<ConfigEntry>> {
        self.inner.get_entry(entry_id).await
    }

    async fn list_entries(&self) -> Result<Vec<ConfigEntry>> {
        self.inner.list_entries().await
    }

    async fn add_entry(&self, entry: ConfigEntry) -> Result<()> {
        self.inner.add_entry(entry).await
    }

    async fn update_entry(&self, entry: ConfigEntry) -> Result<()> {
        self.inner.update_entry(entry).await
    }

    async fn remove_entry(&self, entry_id: &str) -> Result<()> {
        self.inner.remove_entry(entry_id).await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry with the mock integration registered
pub fn mock_registry() -> (Arc<IntegrationRegistry>, Arc<MockCounters>) {
    let registry = IntegrationRegistry::new();
    let (factory, counters) = MockFactory::new();
    registry.register(Box::new(factory));
    (Arc::new(registry), counters)
}

/// Config with short, round intervals
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::new();
    config.host.setup_retry_secs = 30;
    config.host.unload_timeout_secs = 5;
    config.host.event_channel_capacity = 64;
    config
}

pub fn mock_entry(data: serde_json::Value) -> ConfigEntry {
    ConfigEntry::new("mock", "Mock device", data)
}
