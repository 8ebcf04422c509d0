//! Long-poll clients for the two player coordinators
//!
//! Both pollers pass the previous answer's etag, so each fetch blocks on the
//! player until something changes. The coordinators therefore run with a
//! zero update interval; the player paces them. After a failed poll the
//! etag is dropped once so a returning player answers immediately.

use crate::api::{PlayerApi, Preset, Status, SyncStatus};
use async_trait::async_trait;
use hubkit_core::{Coordinator, DeviceClient, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wait before polling an unreachable player again
pub const OFFLINE_RETRY: Duration = Duration::from_secs(180);

/// Player identity, grouping and presets
#[derive(Debug, Clone, PartialEq)]
pub struct SyncData {
    pub sync_status: SyncStatus,
    pub presets: Vec<Preset>,
}

/// Etag to send, `None` right after a failure
struct EtagGate {
    stale: AtomicBool,
}

impl EtagGate {
    fn new() -> Self {
        Self {
            stale: AtomicBool::new(false),
        }
    }

    fn etag<'a>(&self, previous: Option<&'a str>) -> Option<&'a str> {
        if self.stale.load(Ordering::SeqCst) {
            None
        } else {
            previous
        }
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        self.stale.store(result.is_err(), Ordering::SeqCst);
        result
    }
}

/// Polls `/Status`
pub struct StatusPoller {
    api: Arc<dyn PlayerApi>,
    name: String,
    gate: EtagGate,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn PlayerApi>) -> Self {
        let name = format!("{} status", api.address());
        Self {
            api,
            name,
            gate: EtagGate::new(),
        }
    }
}

#[async_trait]
impl DeviceClient for StatusPoller {
    type Data = Status;

    async fn fetch(&self, previous: Option<&Status>) -> Result<Status> {
        let etag = self.gate.etag(previous.map(|s| s.etag.as_str()));
        self.gate.record(self.api.status(etag).await)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Polls `/SyncStatus` and reloads presets on every change
pub struct SyncStatusPoller {
    api: Arc<dyn PlayerApi>,
    name: String,
    gate: EtagGate,
}

impl SyncStatusPoller {
    pub fn new(api: Arc<dyn PlayerApi>) -> Self {
        let name = format!("{} sync", api.address());
        Self {
            api,
            name,
            gate: EtagGate::new(),
        }
    }
}

#[async_trait]
impl DeviceClient for SyncStatusPoller {
    type Data = SyncData;

    async fn fetch(&self, previous: Option<&SyncData>) -> Result<SyncData> {
        let etag = self.gate.etag(previous.map(|d| d.sync_status.etag.as_str()));
        let result = async {
            let sync_status = self.api.sync_status(etag).await?;
            let presets = self.api.presets().await?;
            Ok(SyncData {
                sync_status,
                presets,
            })
        }
        .await;
        self.gate.record(result)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Coordinator over `/Status`
pub fn status_coordinator(api: Arc<dyn PlayerApi>) -> Coordinator<StatusPoller> {
    Coordinator::with_intervals(Arc::new(StatusPoller::new(api)), Duration::ZERO, OFFLINE_RETRY)
}

/// Coordinator over `/SyncStatus` and `/Presets`
pub fn sync_coordinator(api: Arc<dyn PlayerApi>) -> Coordinator<SyncStatusPoller> {
    Coordinator::with_intervals(
        Arc::new(SyncStatusPoller::new(api)),
        Duration::ZERO,
        OFFLINE_RETRY,
    )
}
