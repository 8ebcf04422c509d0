//! In-memory PLC for ADS contract tests

#![allow(dead_code)]

use async_trait::async_trait;
use hubkit_ads::monitor::APP_TIMESTAMP_VAR;
use hubkit_ads::{
    AdsConnection, AdsFactory, AdsParams, AdsState, AdsSymbol, AdsType, AdsValue, Connector,
    RawNotification, encode,
};
use hubkit_core::{Error, HubConfig, IntegrationRegistry, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// PLC holding variables in a map
///
/// Like a real PLC it sends the current value as soon as a notification is
/// added, and again on every write.
pub struct MockPlc {
    state: Mutex<AdsState>,
    app_timestamp: Mutex<i64>,
    values: Mutex<HashMap<String, AdsValue>>,
    notifications: Mutex<HashMap<u32, (String, AdsType)>>,
    symbols: Mutex<Vec<AdsSymbol>>,
    refused: Mutex<Option<String>>,
    next_handle: AtomicU32,
    tx: broadcast::Sender<RawNotification>,
    writes: Mutex<Vec<(String, AdsValue)>>,
    reachable: AtomicBool,
    closed: AtomicBool,
    reconnects: AtomicUsize,
}

impl MockPlc {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(AdsState::Run),
            app_timestamp: Mutex::new(1_700_000_000),
            values: Mutex::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            symbols: Mutex::new(Vec::new()),
            refused: Mutex::new(None),
            next_handle: AtomicU32::new(1),
            tx,
            writes: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
        })
    }

    /// Define a variable without notifying
    pub fn define(&self, name: &str, value: AdsValue) {
        self.values.lock().unwrap().insert(name.to_string(), value);
    }

    /// List a struct instance in the symbol table
    pub fn declare(&self, name: &str, type_name: &str) {
        self.symbols
            .lock()
            .unwrap()
            .push(AdsSymbol::new(name, type_name));
    }

    /// Make adding a notification for `name` fail, or stop failing with `None`
    pub fn refuse_notifications(&self, name: Option<&str>) {
        *self.refused.lock().unwrap() = name.map(str::to_string);
    }

    /// Change a variable as the PLC program would
    pub fn set_value(&self, name: &str, value: AdsValue) {
        self.define(name, value);
        self.notify(name);
    }

    pub fn value(&self, name: &str) -> Option<AdsValue> {
        self.values.lock().unwrap().get(name).cloned()
    }

    pub fn set_state(&self, state: AdsState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_app_timestamp(&self, ts: i64) {
        *self.app_timestamp.lock().unwrap() = ts;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn active_notifications(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn writes(&self) -> Vec<(String, AdsValue)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::cannot_connect("no route to PLC"))
        }
    }

    fn notify(&self, name: &str) {
        let Some(value) = self.value(name) else {
            return;
        };
        let targets: Vec<(u32, AdsType)> = self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (n, _))| n == name)
            .map(|(h, (_, ty))| (*h, *ty))
            .collect();
        for (handle, ty) in targets {
            let data = encode(ty, &value).expect("test value fits its type");
            let _ = self.tx.send(RawNotification {
                handle,
                timestamp: 0,
                data,
            });
        }
    }
}

#[async_trait]
impl AdsConnection for MockPlc {
    async fn read_state(&self) -> Result<(AdsState, u16)> {
        self.check_reachable()?;
        Ok((*self.state.lock().unwrap(), 0))
    }

    async fn read_by_name(&self, name: &str, ty: AdsType) -> Result<AdsValue> {
        self.check_reachable()?;
        if name == APP_TIMESTAMP_VAR {
            return Ok(AdsValue::Int(*self.app_timestamp.lock().unwrap()));
        }
        let value = self
            .value(name)
            .ok_or_else(|| Error::not_found(format!("ADS symbol {}", name)))?;
        encode(ty, &value)?;
        Ok(value)
    }

    async fn write_by_name(&self, name: &str, ty: AdsType, value: &AdsValue) -> Result<()> {
        self.check_reachable()?;
        let bytes = encode(ty, value)?;
        let stored = hubkit_ads::decode(ty, &bytes)?;
        self.writes
            .lock()
            .unwrap()
            .push((name.to_string(), stored.clone()));
        self.set_value(name, stored);
        Ok(())
    }

    async fn add_notification(&self, name: &str, ty: AdsType) -> Result<u32> {
        // A real round trip lets concurrent registrations interleave
        tokio::task::yield_now().await;
        self.check_reachable()?;
        if self.refused.lock().unwrap().as_deref() == Some(name) {
            return Err(Error::transient(format!("ADS error 0x745: {} timed out", name)));
        }
        if self.value(name).is_none() {
            return Err(Error::not_found(format!("ADS symbol {}", name)));
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.notifications
            .lock()
            .unwrap()
            .insert(handle, (name.to_string(), ty));
        self.notify(name);
        Ok(handle)
    }

    async fn delete_notification(&self, handle: u32) -> Result<()> {
        self.check_reachable()?;
        self.notifications.lock().unwrap().remove(&handle);
        Ok(())
    }

    async fn read_symbols(&self) -> Result<Vec<AdsSymbol>> {
        self.check_reachable()?;
        Ok(self.symbols.lock().unwrap().clone())
    }

    fn notifications(&self) -> broadcast::Receiver<RawNotification> {
        self.tx.subscribe()
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.notifications.lock().unwrap().clear();
        self.check_reachable()
    }

    async fn close(&self) {
        self.notifications.lock().unwrap().clear();
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out one shared [`MockPlc`]
pub struct MockConnector {
    pub plc: Arc<MockPlc>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(plc: Arc<MockPlc>) -> Arc<Self> {
        Arc::new(Self {
            plc,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _params: &AdsParams) -> Result<Arc<dyn AdsConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.plc.check_reachable()?;
        Ok(Arc::clone(&self.plc) as Arc<dyn AdsConnection>)
    }
}

/// Registry with the ADS integration using `connector`
pub fn ads_registry(connector: Arc<MockConnector>) -> Arc<IntegrationRegistry> {
    let registry = IntegrationRegistry::new();
    registry.register(Box::new(AdsFactory::with_connector(connector)));
    Arc::new(registry)
}

pub fn test_config() -> HubConfig {
    let mut config = HubConfig::new();
    config.host.setup_retry_secs = 30;
    config.host.unload_timeout_secs = 5;
    config
}
