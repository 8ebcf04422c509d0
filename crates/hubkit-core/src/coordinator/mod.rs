//! Polling coordinator
//!
//! A [`Coordinator`] owns one device client, polls it, and republishes the
//! result as a [`Snapshot`] to everything that depends on it (entities,
//! other tasks).
//!
//! ## State Machine
//!
//! ```text
//!             fetch ok                       fetch err (transient)
//!   ┌──────────────────────┐        ┌──────────────────────────────┐
//!   │                      ▼        │                              ▼
//! Offline ──────────────► Online ───┘                           Offline
//!   ▲   (initial state)                                            │
//!   └──────────── retry after `offline_retry` ─────────────────────┘
//! ```
//!
//! A fatal error also moves to Offline but stops the loop; cancellation
//! stops the loop without touching the snapshot.
//!
//! ## Invariant
//!
//! `Snapshot::data` is always the last successfully fetched value (or `None`
//! before the first success). Failures never clear it; they only flip
//! availability to Offline.

use crate::config::CoordinatorConfig;
use crate::error::{Error, FailureClass, Result};
use crate::traits::DeviceClient;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Whether the device answered the last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Last poll (or push) succeeded
    Online,
    /// Last poll failed, or no poll has succeeded yet
    Offline,
}

/// Published state of a device
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Last known good data
    pub data: Option<T>,
    /// Availability according to the last poll
    pub availability: Availability,
    /// Time of the last successful update
    pub last_updated: Option<DateTime<Utc>>,
    /// Error message of the last failed poll, cleared on success
    pub last_error: Option<String>,
}

impl<T> Snapshot<T> {
    /// Snapshot before anything was fetched
    pub fn initial() -> Self {
        Self {
            data: None,
            availability: Availability::Offline,
            last_updated: None,
            last_error: None,
        }
    }

    /// Whether the device is online
    pub fn is_online(&self) -> bool {
        self.availability == Availability::Online
    }
}

/// Result of a single [`Coordinator::refresh`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New data was published
    Updated,
    /// Transient failure; the device is marked offline
    Offline,
    /// Non-retryable failure
    Fatal(String),
    /// The client reported cancellation
    Cancelled,
}

/// Why [`Coordinator::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// The cancellation token fired or the client was cancelled
    Cancelled,
    /// A fatal error stopped polling
    Fatal(String),
}

type Listener<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Handle for a registered listener
///
/// The listener is removed when the handle is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener registered for the lifetime of the publisher
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Snapshot holder with listener fan-out
///
/// Used by [`Coordinator`] for polled devices and directly by push-driven
/// integrations that have no client to poll.
pub struct Publisher<T> {
    state: watch::Sender<Snapshot<T>>,
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> {
    /// Create a publisher holding the initial (offline, empty) snapshot
    pub fn new() -> Self {
        let (state, _) = watch::channel(Snapshot::initial());
        Self {
            state,
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Snapshot<T> {
        self.state.borrow().clone()
    }

    /// Whether the current snapshot is online
    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online()
    }

    /// Publish a snapshot to all listeners and watchers
    pub fn publish(&self, snapshot: Snapshot<T>) {
        self.state.send_replace(snapshot.clone());

        // Call listeners outside the lock so they may (un)subscribe
        let listeners: Vec<Listener<T>> = {
            let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Publish fresh data and mark the device online
    pub fn set_data(&self, data: T) {
        self.publish(Snapshot {
            data: Some(data),
            availability: Availability::Online,
            last_updated: Some(Utc::now()),
            last_error: None,
        });
    }

    /// Mark the device offline, keeping the last known data
    pub fn mark_offline(&self, reason: impl Into<String>) {
        let mut snapshot = self.current();
        snapshot.availability = Availability::Offline;
        snapshot.last_error = Some(reason.into());
        self.publish(snapshot);
    }

    /// Register a listener invoked with every published snapshot
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let id = {
            let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    let mut guard = listeners.lock().unwrap_or_else(|e| e.into_inner());
                    guard.entries.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Receiver that always sees the latest snapshot
    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.state.subscribe()
    }

    /// Stream of snapshots, starting with the current one
    pub fn updates(&self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.state.subscribe())
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-device polling coordinator
///
/// ## Lifecycle
///
/// 1. Create with [`Coordinator::new()`]
/// 2. Optionally call [`Coordinator::first_refresh()`] during setup so an
///    unreachable device fails setup instead of starting offline
/// 3. Spawn [`Coordinator::run()`] with the integration's cancellation token
/// 4. Cancel the token to stop polling
///
/// ## Threading
///
/// Share it with `Arc`. Concurrent refreshes are serialised by a
/// per-device mutex, so a manual refresh never overlaps the poll loop.
pub struct Coordinator<C: DeviceClient> {
    client: Arc<C>,
    update_interval: Duration,
    offline_retry: Duration,
    publisher: Publisher<C::Data>,
    device_lock: tokio::sync::Mutex<()>,
}

impl<C: DeviceClient> Coordinator<C> {
    /// Create a coordinator using intervals from configuration
    pub fn new(client: Arc<C>, config: &CoordinatorConfig) -> Self {
        Self::with_intervals(client, config.update_interval(), config.offline_retry())
    }

    /// Create a coordinator with explicit intervals
    pub fn with_intervals(client: Arc<C>, update_interval: Duration, offline_retry: Duration) -> Self {
        Self {
            client,
            update_interval,
            offline_retry,
            publisher: Publisher::new(),
            device_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Device name (from the client)
    pub fn name(&self) -> &str {
        self.client.name()
    }

    /// The wrapped client
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// The snapshot publisher
    pub fn publisher(&self) -> &Publisher<C::Data> {
        &self.publisher
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Snapshot<C::Data> {
        self.publisher.current()
    }

    /// Last known good data
    pub fn data(&self) -> Option<C::Data> {
        self.publisher.current().data
    }

    /// Whether the last poll succeeded
    pub fn is_online(&self) -> bool {
        self.publisher.is_online()
    }

    /// Register a listener invoked with every published snapshot
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Snapshot<C::Data>) + Send + Sync + 'static,
    {
        self.publisher.subscribe(listener)
    }

    /// Receiver that always sees the latest snapshot
    pub fn watch(&self) -> watch::Receiver<Snapshot<C::Data>> {
        self.publisher.watch()
    }

    /// Stream of snapshots, starting with the current one
    pub fn updates(&self) -> WatchStream<Snapshot<C::Data>> {
        self.publisher.updates()
    }

    /// Publish data received by push notification
    pub fn push(&self, data: C::Data) {
        self.publisher.set_data(data);
    }

    /// Mark the device offline without polling
    pub fn mark_offline(&self, reason: impl Into<String>) {
        self.publisher.mark_offline(reason);
    }

    /// Poll the client once and publish the result
    ///
    /// Never returns an error: failures are reflected in the snapshot and
    /// in the returned [`RefreshOutcome`].
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = self.device_lock.lock().await;

        let previous = self.publisher.current();
        let result = self.client.fetch(previous.data.as_ref()).await;

        match result {
            Ok(data) => {
                if previous.last_error.is_some() && !previous.is_online() {
                    info!("[{}] Device is back online", self.name());
                } else {
                    debug!("[{}] Refresh succeeded", self.name());
                }
                self.publisher.set_data(data);
                RefreshOutcome::Updated
            }
            Err(e) => match e.class() {
                FailureClass::Transient => {
                    if previous.is_online() || previous.last_error.is_none() {
                        warn!("[{}] Device is offline: {}", self.name(), e);
                    } else {
                        debug!("[{}] Device still offline: {}", self.name(), e);
                    }
                    self.publisher.mark_offline(e.to_string());
                    RefreshOutcome::Offline
                }
                FailureClass::Fatal => {
                    error!("[{}] Refresh failed permanently: {}", self.name(), e);
                    self.publisher.mark_offline(e.to_string());
                    RefreshOutcome::Fatal(e.to_string())
                }
                FailureClass::Cancelled => {
                    debug!("[{}] Refresh cancelled", self.name());
                    RefreshOutcome::Cancelled
                }
            },
        }
    }

    /// Refresh once during setup, turning failures into errors
    ///
    /// An offline device yields a transient error so the host retries setup.
    pub async fn first_refresh(&self) -> Result<()> {
        match self.refresh().await {
            RefreshOutcome::Updated => Ok(()),
            RefreshOutcome::Offline => Err(Error::transient(
                self.publisher
                    .current()
                    .last_error
                    .unwrap_or_else(|| format!("{} is offline", self.name())),
            )),
            RefreshOutcome::Fatal(msg) => Err(Error::fatal(msg)),
            RefreshOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Delay before the next poll after `outcome`, `None` to stop
    pub fn next_delay(&self, outcome: &RefreshOutcome) -> Option<Duration> {
        match outcome {
            RefreshOutcome::Updated => Some(self.update_interval),
            RefreshOutcome::Offline => Some(self.offline_retry),
            RefreshOutcome::Fatal(_) | RefreshOutcome::Cancelled => None,
        }
    }

    /// Poll until cancelled or a fatal error occurs
    ///
    /// Cancellation is checked both while a fetch is in flight and while
    /// sleeping; an in-flight fetch is dropped.
    pub async fn run(&self, token: CancellationToken) -> CoordinatorExit {
        debug!("[{}] Coordinator started", self.name());

        loop {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                outcome = self.refresh() => outcome,
            };

            let Some(delay) = self.next_delay(&outcome) else {
                return match outcome {
                    RefreshOutcome::Fatal(msg) => CoordinatorExit::Fatal(msg),
                    _ => {
                        debug!("[{}] Coordinator stopped by client", self.name());
                        CoordinatorExit::Cancelled
                    }
                };
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("[{}] Coordinator cancelled", self.name());
        CoordinatorExit::Cancelled
    }
}
