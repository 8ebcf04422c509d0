//! Integration host
//!
//! The [`Host`] owns every loaded config entry. It is responsible for:
//! - Creating integrations through the registry and running their setup
//! - Retrying setup while a device is offline
//! - Unloading entries deterministically (cancel, unload, join tasks)
//! - Routing service calls and exposing the entities of loaded entries
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!  EntryStore ───────► │        Host          │ ───── HostEvent ────► daemon / UI
//!                      └──────────────────────┘
//!                          │ create(entry)   │ setup(ctx)
//!                          ▼                 ▼
//!               ┌─────────────────────┐  ┌────────────────────────┐
//!               │ IntegrationRegistry │  │ Integration            │
//!               └─────────────────────┘  │  ctx.spawn(poll loop)  │
//!                                        │  ctx.spawn(monitor)    │
//!                                        └────────────────────────┘
//! ```
//!
//! ## Entry States
//!
//! ```text
//! NotLoaded ── setup ok ──────────────► Loaded ── unload ──► NotLoaded
//!     │
//!     ├── transient error ──► SetupRetry ── retry ok ──► Loaded
//!     │                          │
//!     └── fatal error ──────► SetupError ◄── fatal error
//! ```

use crate::config::{CoordinatorConfig, HostConfig, HubConfig};
use crate::error::{Error, FailureClass, Result};
use crate::registry::IntegrationRegistry;
use crate::traits::{ConfigEntry, Entity, EntryStore, Integration};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a config entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not set up (or unloaded)
    NotLoaded,
    /// Setup succeeded; entities are available
    Loaded,
    /// The device was offline during setup; setup is retried periodically
    SetupRetry,
    /// Setup failed in a way retrying will not fix
    SetupError,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::NotLoaded => "not_loaded",
            EntryState::Loaded => "loaded",
            EntryState::SetupRetry => "setup_retry",
            EntryState::SetupError => "setup_error",
        };
        f.write_str(s)
    }
}

/// Events emitted by the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// An entry finished setup
    EntryLoaded {
        entry_id: String,
        domain: String,
        entities: usize,
    },

    /// Setup hit an offline device and will be retried
    SetupRetry {
        entry_id: String,
        error: String,
        retry_in_secs: u64,
    },

    /// Setup failed permanently
    SetupFailed {
        entry_id: String,
        error: String,
    },

    /// An entry was unloaded
    EntryUnloaded {
        entry_id: String,
    },

    /// An entry was unloaded and deleted from the store
    EntryRemoved {
        entry_id: String,
    },

    /// A background task of an entry ended with an error
    TaskFailed {
        entry_id: String,
        task: String,
        error: String,
    },

    /// Host stopped
    Stopped,
}

/// Send an event, dropping it with a warning when the channel is full
fn emit(events: &mpsc::Sender<HostEvent>, event: HostEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(
                "Event channel full, dropping event {:?}. Consider increasing event_channel_capacity.",
                event
            );
        }
        // Nobody is listening
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Everything an integration instance owns while it is loaded
///
/// Cheap to clone; integrations that need to spawn work after setup keep a
/// clone around.
#[derive(Clone)]
pub struct IntegrationContext {
    entry: Arc<ConfigEntry>,
    token: CancellationToken,
    coordinator: CoordinatorConfig,
    tasks: Arc<Mutex<Option<JoinSet<()>>>>,
    events: mpsc::Sender<HostEvent>,
}

impl IntegrationContext {
    fn new(
        entry: ConfigEntry,
        token: CancellationToken,
        coordinator: CoordinatorConfig,
        events: mpsc::Sender<HostEvent>,
    ) -> Self {
        Self {
            entry: Arc::new(entry),
            token,
            coordinator,
            tasks: Arc::new(Mutex::new(Some(JoinSet::new()))),
            events,
        }
    }

    /// The config entry being set up
    pub fn entry(&self) -> &ConfigEntry {
        &self.entry
    }

    /// Token cancelled when the entry is unloaded
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Default coordinator intervals
    pub fn coordinator_config(&self) -> &CoordinatorConfig {
        &self.coordinator
    }

    /// Whether the entry is being unloaded
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task owned by this entry
    ///
    /// The future must return once [`Self::token`] is cancelled; tasks still
    /// running after the unload timeout are aborted. An error result is
    /// logged and reported as [`HostEvent::TaskFailed`].
    pub fn spawn<F>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let entry_id = self.entry.entry_id.clone();
        let events = self.events.clone();

        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tasks) = guard.as_mut() else {
            warn!("[{}] Entry is unloading, not starting task {}", entry_id, name);
            return;
        };

        tasks.spawn(async move {
            match fut.await {
                Ok(()) => debug!("[{}] Task {} finished", entry_id, name),
                Err(e) if e.class() == FailureClass::Cancelled => {
                    debug!("[{}] Task {} cancelled", entry_id, name)
                }
                Err(e) => {
                    error!("[{}] Task {} failed: {}", entry_id, name, e);
                    emit(
                        &events,
                        HostEvent::TaskFailed {
                            entry_id,
                            task: name,
                            error: e.to_string(),
                        },
                    );
                }
            }
        });
    }

    /// Number of tasks still running
    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, JoinSet::len)
    }

    /// Cancel the token and wait for all tasks, aborting stragglers
    async fn close(&self, timeout: Duration) {
        self.token.cancel();

        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut tasks) = tasks else {
            return;
        };

        let joined = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if joined.is_err() {
            warn!(
                "[{}] {} task(s) did not stop within {:?}; aborting",
                self.entry.entry_id,
                tasks.len(),
                timeout
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

impl std::fmt::Debug for IntegrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationContext")
            .field("entry_id", &self.entry.entry_id)
            .field("cancelled", &self.token.is_cancelled())
            .field("tasks", &self.task_count())
            .finish()
    }
}

struct Runtime {
    integration: Arc<dyn Integration>,
    ctx: IntegrationContext,
    entities: Vec<Arc<dyn Entity>>,
}

struct RetryTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct EntrySlot {
    entry: ConfigEntry,
    state: EntryState,
    runtime: Option<Runtime>,
    retry: Option<RetryTask>,
}

struct HostInner {
    registry: Arc<IntegrationRegistry>,
    store: Arc<dyn EntryStore>,
    config: HostConfig,
    coordinator: CoordinatorConfig,
    root: CancellationToken,
    slots: Mutex<HashMap<String, EntrySlot>>,
    // Serialises setup and unload so an entry is never half-installed
    lifecycle: tokio::sync::Mutex<()>,
    events: mpsc::Sender<HostEvent>,
}

/// Host for loaded config entries
///
/// ## Lifecycle
///
/// 1. Create with [`Host::new()`]
/// 2. Call [`Host::setup_all()`] (or [`Host::setup_entry()`] per entry)
/// 3. Interact through [`Host::entities()`] and [`Host::call_service()`]
/// 4. Call [`Host::shutdown()`] before exiting
///
/// ## Threading
///
/// `Host` is cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Create a new host
    ///
    /// # Returns
    ///
    /// A tuple of (host, event_receiver) where event_receiver yields host events
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        store: Arc<dyn EntryStore>,
        config: &HubConfig,
    ) -> Result<(Self, mpsc::Receiver<HostEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.host.event_channel_capacity);
        let inner = HostInner {
            registry,
            store,
            config: config.host.clone(),
            coordinator: config.coordinator.clone(),
            root: CancellationToken::new(),
            slots: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            events: tx,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    /// The registry used to create integrations
    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.inner.registry
    }

    /// The entry store
    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.inner.store
    }

    /// Set up every entry in the store
    ///
    /// Failing entries do not stop the others; their state is reported in
    /// the returned list.
    pub async fn setup_all(&self) -> Result<Vec<(String, EntryState)>> {
        let entries = self.inner.store.list_entries().await?;
        info!("Setting up {} config entries", entries.len());

        let mut states = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry_id = entry.entry_id.clone();
            let state = match self.setup_entry(entry).await {
                Ok(state) => state,
                Err(e) => {
                    error!("[{}] Setup skipped: {}", entry_id, e);
                    self.entry_state(&entry_id)
                }
            };
            states.push((entry_id, state));
        }
        Ok(states)
    }

    /// Set up one entry
    ///
    /// Returns the resulting state: `Loaded`, `SetupRetry` (device offline,
    /// retried every `setup_retry_secs`) or `SetupError`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if the entry is already loaded or retrying.
    pub async fn setup_entry(&self, entry: ConfigEntry) -> Result<EntryState> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.entry_state(&entry.entry_id) {
            EntryState::Loaded | EntryState::SetupRetry => {
                return Err(Error::invalid_input(format!(
                    "Config entry {} is already set up",
                    entry.entry_id
                )));
            }
            EntryState::NotLoaded | EntryState::SetupError => {}
        }

        debug!("[{}] Setting up {} entry '{}'", entry.entry_id, entry.domain, entry.title);
        match self.inner.attempt(&entry, None).await {
            Ok(runtime) => {
                self.inner.install(entry, runtime);
                Ok(EntryState::Loaded)
            }
            Err(e) => match e.class() {
                FailureClass::Transient => {
                    self.schedule_retry(entry, &e);
                    Ok(EntryState::SetupRetry)
                }
                FailureClass::Fatal => {
                    self.inner.mark_failed(entry, &e);
                    Ok(EntryState::SetupError)
                }
                FailureClass::Cancelled => {
                    debug!("[{}] Setup cancelled", entry.entry_id);
                    Ok(EntryState::NotLoaded)
                }
            },
        }
    }

    fn schedule_retry(&self, entry: ConfigEntry, err: &Error) {
        let retry_in = Duration::from_secs(self.inner.config.setup_retry_secs);
        warn!(
            "[{}] Device not ready ({}); retrying setup in {:?}",
            entry.entry_id, err, retry_in
        );
        emit(
            &self.inner.events,
            HostEvent::SetupRetry {
                entry_id: entry.entry_id.clone(),
                error: err.to_string(),
                retry_in_secs: retry_in.as_secs(),
            },
        );

        let token = self.inner.root.child_token();
        let host = self.clone();
        let retry_entry = entry.clone();
        let retry_token = token.clone();
        let handle = tokio::spawn(async move {
            host.retry_loop(retry_entry, retry_token, retry_in).await;
        });

        let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(
            entry.entry_id.clone(),
            EntrySlot {
                entry,
                state: EntryState::SetupRetry,
                runtime: None,
                retry: Some(RetryTask { token, handle }),
            },
        );
    }

    async fn retry_loop(&self, entry: ConfigEntry, token: CancellationToken, retry_in: Duration) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(retry_in) => {}
            }

            let _lifecycle = self.inner.lifecycle.lock().await;
            if token.is_cancelled() {
                return;
            }

            debug!("[{}] Retrying setup", entry.entry_id);
            match self.inner.attempt(&entry, Some(&token)).await {
                Ok(runtime) => {
                    self.inner.install(entry, runtime);
                    return;
                }
                Err(e) => match e.class() {
                    FailureClass::Transient => {
                        debug!("[{}] Device still not ready: {}", entry.entry_id, e);
                        emit(
                            &self.inner.events,
                            HostEvent::SetupRetry {
                                entry_id: entry.entry_id.clone(),
                                error: e.to_string(),
                                retry_in_secs: retry_in.as_secs(),
                            },
                        );
                    }
                    FailureClass::Fatal => {
                        self.inner.mark_failed(entry, &e);
                        return;
                    }
                    FailureClass::Cancelled => return,
                },
            }
        }
    }

    /// Unload an entry
    ///
    /// Cancels a pending setup retry, or cancels the entry's token, calls
    /// [`Integration::unload`] and waits up to `unload_timeout_secs` for its
    /// tasks. Returns `false` if the entry was not set up.
    pub async fn unload_entry(&self, entry_id: &str) -> Result<bool> {
        // Stop the retry loop before taking the lifecycle lock it may hold
        let retry = {
            let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get_mut(entry_id).and_then(|slot| slot.retry.take())
        };
        let had_retry = retry.is_some();
        if let Some(retry) = retry {
            retry.token.cancel();
            if let Err(e) = retry.handle.await {
                if e.is_panic() {
                    error!("[{}] Setup retry task panicked", entry_id);
                }
            }
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        let slot = {
            let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(entry_id)
        };
        let Some(slot) = slot else {
            return Ok(had_retry);
        };

        if let Some(runtime) = slot.runtime {
            info!("[{}] Unloading {} entry", entry_id, slot.entry.domain);
            self.inner.teardown(&runtime.integration, &runtime.ctx).await;
        }

        emit(
            &self.inner.events,
            HostEvent::EntryUnloaded {
                entry_id: entry_id.to_string(),
            },
        );
        Ok(true)
    }

    /// Unload an entry and set it up again from the stored config
    pub async fn reload_entry(&self, entry_id: &str) -> Result<EntryState> {
        let entry = self
            .inner
            .store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Config entry {}", entry_id)))?;

        self.unload_entry(entry_id).await?;
        self.setup_entry(entry).await
    }

    /// Unload an entry and delete it from the store
    pub async fn remove_entry(&self, entry_id: &str) -> Result<()> {
        self.unload_entry(entry_id).await?;
        self.inner.store.remove_entry(entry_id).await?;
        info!("[{}] Config entry removed", entry_id);
        emit(
            &self.inner.events,
            HostEvent::EntryRemoved {
                entry_id: entry_id.to_string(),
            },
        );
        Ok(())
    }

    /// State of an entry (`NotLoaded` for unknown ids)
    pub fn entry_state(&self, entry_id: &str) -> EntryState {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(entry_id)
            .map_or(EntryState::NotLoaded, |slot| slot.state)
    }

    /// Ids of loaded entries
    pub fn loaded_entries(&self) -> Vec<String> {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.state == EntryState::Loaded)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Entities of all loaded entries
    pub fn entities(&self) -> Vec<Arc<dyn Entity>> {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .filter_map(|slot| slot.runtime.as_ref())
            .flat_map(|runtime| runtime.entities.iter().cloned())
            .collect()
    }

    /// Entities of one entry
    pub fn entry_entities(&self, entry_id: &str) -> Vec<Arc<dyn Entity>> {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(entry_id)
            .and_then(|slot| slot.runtime.as_ref())
            .map(|runtime| runtime.entities.clone())
            .unwrap_or_default()
    }

    /// Look up an entity by unique id
    pub fn entity(&self, unique_id: &str) -> Option<Arc<dyn Entity>> {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .filter_map(|slot| slot.runtime.as_ref())
            .flat_map(|runtime| runtime.entities.iter())
            .find(|entity| entity.unique_id() == unique_id)
            .cloned()
    }

    /// Call a domain service
    ///
    /// If `data` contains an `entry_id` only that entry is targeted,
    /// otherwise every loaded entry of the domain receives the call.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if no loaded entry matches; otherwise the first
    /// error returned by an integration.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let target = data.get("entry_id").and_then(|v| v.as_str());
        let integrations: Vec<(String, Arc<dyn Integration>)> = {
            let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .iter()
                .filter(|(id, slot)| {
                    slot.entry.domain == domain && target.is_none_or(|t| t == id.as_str())
                })
                .filter_map(|(id, slot)| {
                    slot.runtime
                        .as_ref()
                        .map(|rt| (id.clone(), Arc::clone(&rt.integration)))
                })
                .collect()
        };

        if integrations.is_empty() {
            return Err(Error::not_found(format!(
                "No loaded {} entry for service {}",
                domain, service
            )));
        }

        let mut first_error = None;
        for (entry_id, integration) in integrations {
            debug!("[{}] Calling service {}.{}", entry_id, domain, service);
            if let Err(e) = integration.call_service(service, data).await {
                warn!("[{}] Service {}.{} failed: {}", entry_id, domain, service, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unload every entry and flush the store
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = {
            let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.keys().cloned().collect()
        };

        info!("Shutting down {} config entries", ids.len());
        for id in ids {
            if let Err(e) = self.unload_entry(&id).await {
                error!("[{}] Unload failed: {}", id, e);
            }
        }

        self.inner.root.cancel();
        self.inner.store.flush().await?;
        emit(&self.inner.events, HostEvent::Stopped);
        info!("Entry store flushed, host stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("loaded", &self.loaded_entries())
            .finish_non_exhaustive()
    }
}

impl HostInner {
    /// Create the integration and run its setup
    ///
    /// On failure everything the setup started is torn down again.
    async fn attempt(
        &self,
        entry: &ConfigEntry,
        cancel: Option<&CancellationToken>,
    ) -> Result<Runtime> {
        let integration: Arc<dyn Integration> = Arc::from(self.registry.create(entry)?);
        let ctx = IntegrationContext::new(
            entry.clone(),
            self.root.child_token(),
            self.coordinator.clone(),
            self.events.clone(),
        );

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = integration.setup(&ctx) => result,
            },
            None => integration.setup(&ctx).await,
        };

        match result {
            Ok(entities) => Ok(Runtime {
                integration,
                ctx,
                entities,
            }),
            Err(e) => {
                self.teardown(&integration, &ctx).await;
                Err(e)
            }
        }
    }

    async fn teardown(&self, integration: &Arc<dyn Integration>, ctx: &IntegrationContext) {
        ctx.token.cancel();
        if let Err(e) = integration.unload().await {
            warn!("[{}] Integration unload failed: {}", ctx.entry.entry_id, e);
        }
        ctx.close(Duration::from_secs(self.config.unload_timeout_secs))
            .await;
    }

    fn install(&self, entry: ConfigEntry, mut runtime: Runtime) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        let taken: HashSet<String> = slots
            .values()
            .filter_map(|slot| slot.runtime.as_ref())
            .flat_map(|rt| rt.entities.iter().map(|e| e.unique_id().to_string()))
            .collect();
        let mut seen = HashSet::new();
        runtime.entities.retain(|entity| {
            let id = entity.unique_id();
            if taken.contains(id) || !seen.insert(id.to_string()) {
                warn!(
                    "[{}] Ignoring entity with duplicate unique id {}",
                    entry.entry_id, id
                );
                return false;
            }
            true
        });

        info!(
            "[{}] Set up {} entry '{}' with {} entities",
            entry.entry_id,
            entry.domain,
            entry.title,
            runtime.entities.len()
        );
        emit(
            &self.events,
            HostEvent::EntryLoaded {
                entry_id: entry.entry_id.clone(),
                domain: entry.domain.clone(),
                entities: runtime.entities.len(),
            },
        );

        slots.insert(
            entry.entry_id.clone(),
            EntrySlot {
                entry,
                state: EntryState::Loaded,
                runtime: Some(runtime),
                retry: None,
            },
        );
    }

    fn mark_failed(&self, entry: ConfigEntry, err: &Error) {
        error!("[{}] Setup of {} entry failed: {}", entry.entry_id, entry.domain, err);
        emit(
            &self.events,
            HostEvent::SetupFailed {
                entry_id: entry.entry_id.clone(),
                error: err.to_string(),
            },
        );

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(
            entry.entry_id.clone(),
            EntrySlot {
                entry,
                state: EntryState::SetupError,
                runtime: None,
                retry: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_state_display() {
        assert_eq!(EntryState::SetupRetry.to_string(), "setup_retry");
        assert_eq!(EntryState::Loaded.to_string(), "loaded");
    }

    #[tokio::test]
    async fn test_emit_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, HostEvent::Stopped);
        emit(
            &tx,
            HostEvent::EntryUnloaded {
                entry_id: "a".to_string(),
            },
        );
        assert_eq!(rx.recv().await, Some(HostEvent::Stopped));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_close_aborts_stragglers() {
        let (tx, _rx) = mpsc::channel(4);
        let ctx = IntegrationContext::new(
            ConfigEntry::new("mock", "Mock", serde_json::json!({})),
            CancellationToken::new(),
            CoordinatorConfig::default(),
            tx,
        );

        let cooperative = ctx.token().clone();
        ctx.spawn("cooperative", async move {
            cooperative.cancelled().await;
            Ok(())
        });
        ctx.spawn("stubborn", async {
            std::future::pending::<()>().await;
            Ok(())
        });
        assert_eq!(ctx.task_count(), 2);

        ctx.close(Duration::from_secs(1)).await;
        assert_eq!(ctx.task_count(), 0);

        // Spawning after close is ignored
        ctx.spawn("late", async { Ok(()) });
        assert_eq!(ctx.task_count(), 0);
    }
}
