//! Config flow for BluOS players

use crate::api::{ApiFactory, DEFAULT_PORT};
use crate::integration::BluesoundEntryData;
use async_trait::async_trait;
use hubkit_core::traits::config_flow::{STEP_USER, apply_defaults};
use hubkit_core::traits::{ConfigFlow, FieldKind, FlowResult, FormField};
use hubkit_core::{Error, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

fn fields() -> Vec<FormField> {
    vec![
        FormField::required("host", FieldKind::String),
        FormField::required("port", FieldKind::Integer).with_default(json!(DEFAULT_PORT)),
    ]
}

/// Asks for host and port and checks the player answers `/SyncStatus`
pub struct BluesoundConfigFlow {
    apis: Arc<dyn ApiFactory>,
}

impl BluesoundConfigFlow {
    pub fn new(apis: Arc<dyn ApiFactory>) -> Self {
        Self { apis }
    }
}

#[async_trait]
impl ConfigFlow for BluesoundConfigFlow {
    async fn step(&mut self, step_id: &str, input: Option<serde_json::Value>) -> Result<FlowResult> {
        if step_id != STEP_USER {
            return Err(Error::invalid_input(format!("Unknown step: {}", step_id)));
        }
        let Some(input) = input else {
            return Ok(FlowResult::form(STEP_USER, fields()));
        };

        let data: BluesoundEntryData = match apply_defaults(&fields(), &input)
            .and_then(|v| serde_json::from_value(v).map_err(Error::from))
        {
            Ok(data) => data,
            Err(e) => return Ok(FlowResult::form_error(STEP_USER, fields(), &e)),
        };

        let api = self.apis.create(&data.host, data.port)?;
        let sync_status = match api.sync_status(None).await {
            Ok(sync_status) => sync_status,
            Err(e) => {
                debug!("Player {}:{} failed validation: {}", data.host, data.port, e);
                return Ok(FlowResult::form_error(STEP_USER, fields(), &e));
            }
        };

        Ok(FlowResult::CreateEntry {
            title: sync_status.name.clone(),
            unique_id: Some(data.unique_id(&sync_status.mac)),
            data: serde_json::to_value(&data)?,
        })
    }
}
