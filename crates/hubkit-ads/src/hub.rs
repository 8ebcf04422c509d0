//! ADS hub: one PLC connection shared by all entities of an entry
//!
//! The hub keeps a registry of the variables entities listen to. Each
//! registration owns a [`Publisher`] that receives decoded notification
//! values; the hub itself publishes the PLC state so entities can follow the
//! connection.

use crate::ams::{AdsSymbol, RawNotification};
use crate::client::AdsConnection;
use crate::codec;
use crate::types::{AdsState, AdsType, AdsValue};
use hubkit_core::{Publisher, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct Registration {
    name: String,
    ty: AdsType,
    publisher: Arc<Publisher<AdsValue>>,
}

#[derive(Default)]
struct Registry {
    items: Vec<Registration>,
    // notification handle -> index into items
    handles: HashMap<u32, usize>,
}

/// Shared PLC connection with notification dispatch
pub struct AdsHub {
    name: String,
    connection: Arc<dyn AdsConnection>,
    registry: Mutex<Registry>,
    status: Publisher<AdsState>,
    // Subscribed at construction so samples sent while registering are kept
    receiver: Mutex<Option<broadcast::Receiver<RawNotification>>>,
}

impl AdsHub {
    /// Create a hub for an open connection
    pub fn new(name: impl Into<String>, connection: Arc<dyn AdsConnection>) -> Self {
        let receiver = connection.notifications();
        Self {
            name: name.into(),
            connection,
            registry: Mutex::new(Registry::default()),
            status: Publisher::new(),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Hub name used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PLC state publisher (online while the monitor sees RUN)
    pub fn status(&self) -> &Publisher<AdsState> {
        &self.status
    }

    /// Whether the PLC is connected and running
    pub fn is_connected(&self) -> bool {
        self.status.is_online()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to on-change notifications of a variable
    ///
    /// Registering a variable twice returns the existing publisher.
    ///
    /// # Errors
    ///
    /// Propagates the connection error; `Error::NotFound` for unknown symbols.
    pub async fn register_notification(
        &self,
        name: &str,
        ty: AdsType,
    ) -> Result<Arc<Publisher<AdsValue>>> {
        if let Some(existing) = self.registry().items.iter().find(|r| r.name == name) {
            if existing.ty != ty {
                warn!(
                    "[{}] {} already registered as {}, ignoring {}",
                    self.name, name, existing.ty, ty
                );
            }
            return Ok(Arc::clone(&existing.publisher));
        }

        let handle = self.connection.add_notification(name, ty).await?;

        let publisher = Arc::new(Publisher::new());
        // Another registration of the same variable may have won the race
        let winner = {
            let mut registry = self.registry();
            let winner = registry
                .items
                .iter()
                .find(|r| r.name == name)
                .map(|r| Arc::clone(&r.publisher));
            if winner.is_none() {
                let index = registry.items.len();
                registry.items.push(Registration {
                    name: name.to_string(),
                    ty,
                    publisher: Arc::clone(&publisher),
                });
                registry.handles.insert(handle, index);
            }
            winner
        };

        match winner {
            Some(existing) => {
                debug!(
                    "[{}] {} was registered concurrently, dropping handle {}",
                    self.name, name, handle
                );
                self.delete_quietly(handle).await;
                Ok(existing)
            }
            None => {
                debug!("[{}] Added notification for {} ({}) as handle {}", self.name, name, ty, handle);
                Ok(publisher)
            }
        }
    }

    /// Names of all registered variables
    pub fn registered(&self) -> Vec<String> {
        self.registry().items.iter().map(|r| r.name.clone()).collect()
    }

    /// Decode a notification sample and publish it to its variable
    ///
    /// Returns `false` if the handle is unknown or the sample did not decode.
    pub fn dispatch(&self, sample: &RawNotification) -> bool {
        let target = {
            let registry = self.registry();
            registry
                .handles
                .get(&sample.handle)
                .and_then(|i| registry.items.get(*i))
                .map(|r| (r.name.clone(), r.ty, Arc::clone(&r.publisher)))
        };

        let Some((name, ty, publisher)) = target else {
            trace!("[{}] Notification for unknown handle {}", self.name, sample.handle);
            return false;
        };

        match codec::decode(ty, &sample.data) {
            Ok(value) => {
                trace!("[{}] {} = {}", self.name, name, value);
                publisher.set_data(value);
                true
            }
            Err(e) => {
                warn!("[{}] Failed to decode notification for {}: {}", self.name, name, e);
                false
            }
        }
    }

    /// Forward connection notifications to [`Self::dispatch`] until cancelled
    pub async fn run_notifications(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        let taken = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut rx = taken.unwrap_or_else(|| self.connection.notifications());
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                received = rx.recv() => match received {
                    Ok(sample) => {
                        self.dispatch(&sample);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[{}] Dropped {} notifications", self.name, skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("[{}] Notification channel closed", self.name);
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Read the PLC state
    pub async fn read_state(&self) -> Result<(AdsState, u16)> {
        self.connection.read_state().await
    }

    /// Read a variable by name
    pub async fn read_by_name(&self, name: &str, ty: AdsType) -> Result<AdsValue> {
        self.connection.read_by_name(name, ty).await
    }

    /// Write a variable by name
    pub async fn write_by_name(&self, name: &str, ty: AdsType, value: &AdsValue) -> Result<()> {
        debug!("[{}] Writing {} = {} ({})", self.name, name, value, ty);
        self.connection.write_by_name(name, ty, value).await
    }

    /// Publish the PLC as online in `state`
    pub fn mark_online(&self, state: AdsState) {
        self.status.set_data(state);
    }

    /// Mark the PLC and all variables offline
    pub fn mark_offline(&self, reason: &str) {
        self.status.mark_offline(reason);
        let publishers: Vec<_> = self
            .registry()
            .items
            .iter()
            .map(|r| Arc::clone(&r.publisher))
            .collect();
        for publisher in publishers {
            publisher.mark_offline(reason);
        }
    }

    /// Delete all notifications on the PLC but keep the registrations
    ///
    /// Used when the PLC leaves RUN; [`Self::reinitialize_notifications`]
    /// restores them.
    pub async fn shutdown_notifications(&self) {
        let handles: Vec<u32> = self.registry().handles.drain().map(|(h, _)| h).collect();
        for handle in handles {
            self.delete_quietly(handle).await;
        }
        self.mark_offline("PLC not running");
    }

    /// Re-create the notifications of every registered variable
    ///
    /// Handles still tracked from before are deleted first. If any
    /// registration fails, the ones added by this call are deleted again so
    /// the PLC holds no notification the hub does not know about.
    ///
    /// # Errors
    ///
    /// The first failing registration.
    pub async fn reinitialize_notifications(&self) -> Result<()> {
        let (stale, items) = {
            let mut registry = self.registry();
            let stale: Vec<u32> = registry.handles.drain().map(|(h, _)| h).collect();
            let items: Vec<(usize, String, AdsType)> = registry
                .items
                .iter()
                .enumerate()
                .map(|(i, r)| (i, r.name.clone(), r.ty))
                .collect();
            (stale, items)
        };
        for handle in stale {
            self.delete_quietly(handle).await;
        }

        let mut added = Vec::with_capacity(items.len());
        for (index, name, ty) in &items {
            match self.connection.add_notification(name, *ty).await {
                Ok(handle) => {
                    self.registry().handles.insert(handle, *index);
                    added.push(handle);
                }
                Err(e) => {
                    warn!(
                        "[{}] Failed to re-register {}: {}, rolling back {} notification(s)",
                        self.name,
                        name,
                        e,
                        added.len()
                    );
                    {
                        let mut registry = self.registry();
                        for handle in &added {
                            registry.handles.remove(handle);
                        }
                    }
                    for handle in added {
                        self.delete_quietly(handle).await;
                    }
                    return Err(e);
                }
            }
        }
        info!("[{}] Re-registered {} notification(s)", self.name, items.len());
        Ok(())
    }

    async fn delete_quietly(&self, handle: u32) {
        if let Err(e) = self.connection.delete_notification(handle).await {
            debug!("[{}] Failed to delete notification {}: {}", self.name, handle, e);
        }
    }

    /// Upload the PLC's symbol table
    pub async fn read_symbols(&self) -> Result<Vec<AdsSymbol>> {
        self.connection.read_symbols().await
    }

    /// Drop the connection and open a new one
    pub async fn reconnect(&self) -> Result<()> {
        self.registry().handles.clear();
        self.connection.reconnect().await
    }

    /// Delete notifications and close the connection
    pub async fn close(&self) {
        self.shutdown_notifications().await;
        self.connection.close().await;
        debug!("[{}] Hub closed", self.name);
    }
}

impl std::fmt::Debug for AdsHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsHub")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("variables", &self.registry().items.len())
            .finish()
    }
}
