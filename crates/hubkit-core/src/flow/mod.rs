//! Config flow manager
//!
//! Drives config flows on behalf of a front end (CLI, HTTP API, ...). Each
//! started flow gets an id; submissions are routed to the flow instance until
//! it finishes with a created entry or an abort.
//!
//! ```text
//! start("ads") ──► ShowForm ──► configure(id, input) ──► ShowForm{errors}
//!                                       │                    │
//!                                       ▼                    ▼
//!                               CreateEntry ─► store    configure(id, input) ...
//!                               Abort
//! ```

use crate::error::{Error, Result};
use crate::registry::IntegrationRegistry;
use crate::traits::config_flow::STEP_USER;
use crate::traits::{ConfigEntry, ConfigFlow, EntryStore, FlowResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Abort reason used when the device already has a config entry
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

/// Outcome of a flow step as seen by the caller
#[derive(Debug, Clone)]
pub struct FlowStep {
    /// Id to pass to [`FlowManager::configure`]
    pub flow_id: String,
    /// What the flow returned (after duplicate checking)
    pub result: FlowResult,
    /// The persisted entry when the flow created one
    pub entry: Option<ConfigEntry>,
}

impl FlowStep {
    /// Whether the flow is finished
    pub fn is_done(&self) -> bool {
        !matches!(self.result, FlowResult::ShowForm { .. })
    }
}

struct ActiveFlow {
    domain: String,
    step_id: String,
    flow: Box<dyn ConfigFlow>,
}

/// Manages in-progress config flows
pub struct FlowManager {
    registry: Arc<IntegrationRegistry>,
    store: Arc<dyn EntryStore>,
    flows: Mutex<HashMap<String, ActiveFlow>>,
}

impl FlowManager {
    /// Create a flow manager
    pub fn new(registry: Arc<IntegrationRegistry>, store: Arc<dyn EntryStore>) -> Self {
        Self {
            registry,
            store,
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Start a flow for `domain` and run its initial `user` step
    pub async fn start(&self, domain: &str) -> Result<FlowStep> {
        let flow = self.registry.config_flow(domain)?;
        let flow_id = uuid::Uuid::new_v4().simple().to_string();
        debug!("Starting config flow {} for {}", flow_id, domain);

        let active = ActiveFlow {
            domain: domain.to_string(),
            step_id: STEP_USER.to_string(),
            flow,
        };
        self.advance(flow_id, active, None).await
    }

    /// Submit input to the current step of a flow
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the flow id is unknown or already finished.
    pub async fn configure(&self, flow_id: &str, input: serde_json::Value) -> Result<FlowStep> {
        let active = self
            .flows
            .lock()
            .await
            .remove(flow_id)
            .ok_or_else(|| Error::not_found(format!("Config flow {}", flow_id)))?;
        self.advance(flow_id.to_string(), active, Some(input)).await
    }

    /// Abandon a flow
    pub async fn abort(&self, flow_id: &str) -> bool {
        self.flows.lock().await.remove(flow_id).is_some()
    }

    /// Number of flows waiting for input
    pub async fn in_progress(&self) -> usize {
        self.flows.lock().await.len()
    }

    // The flow is taken out of the map while its step runs so that slow
    // validation of one flow does not block the others.
    async fn advance(
        &self,
        flow_id: String,
        mut active: ActiveFlow,
        input: Option<serde_json::Value>,
    ) -> Result<FlowStep> {
        let step_id = active.step_id.clone();
        let result = active.flow.step(&step_id, input).await?;

        match result {
            FlowResult::ShowForm { ref step_id, .. } => {
                active.step_id = step_id.clone();
                self.flows.lock().await.insert(flow_id.clone(), active);
                Ok(FlowStep {
                    flow_id,
                    result,
                    entry: None,
                })
            }
            FlowResult::CreateEntry {
                title,
                unique_id,
                data,
            } => self.create_entry(flow_id, &active.domain, title, unique_id, data).await,
            FlowResult::Abort { ref reason } => {
                debug!("Config flow {} aborted: {}", flow_id, reason);
                Ok(FlowStep {
                    flow_id,
                    result,
                    entry: None,
                })
            }
        }
    }

    async fn create_entry(
        &self,
        flow_id: String,
        domain: &str,
        title: String,
        unique_id: Option<String>,
        data: serde_json::Value,
    ) -> Result<FlowStep> {
        let mut entry = ConfigEntry::new(domain, title.clone(), data.clone());
        if let Some(uid) = &unique_id {
            if self.store.find_by_unique_id(domain, uid).await?.is_some() {
                info!("{} device {} is already configured", domain, uid);
                return Ok(FlowStep {
                    flow_id,
                    result: FlowResult::abort(ABORT_ALREADY_CONFIGURED),
                    entry: None,
                });
            }
            entry = entry.with_unique_id(uid.clone());
        }

        match self.store.add_entry(entry.clone()).await {
            Ok(()) => {}
            // Lost a race with another flow for the same device
            Err(Error::AlreadyConfigured(_)) => {
                return Ok(FlowStep {
                    flow_id,
                    result: FlowResult::abort(ABORT_ALREADY_CONFIGURED),
                    entry: None,
                });
            }
            Err(e) => return Err(e),
        }

        info!("Created {} config entry {} ({})", domain, entry.entry_id, title);
        Ok(FlowStep {
            flow_id,
            result: FlowResult::CreateEntry {
                title,
                unique_id,
                data,
            },
            entry: Some(entry),
        })
    }
}

impl std::fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowManager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
