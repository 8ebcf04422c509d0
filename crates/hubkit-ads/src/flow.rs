//! Config flow for ADS PLCs
//!
//! One `user` step asking for the AMS net id and connection settings. The
//! PLC is validated by connecting and reading its state.

use crate::ams::AmsNetId;
use crate::client::Connector;
use crate::integration::{
    AdsEntryData, DEFAULT_PORT, DEFAULT_RETRY_SECS, DEFAULT_TIMEOUT_SECS,
};
use async_trait::async_trait;
use hubkit_core::traits::config_flow::{BASE_ERROR, STEP_USER, apply_defaults};
use hubkit_core::traits::{ConfigFlow, FieldKind, FlowResult, FormField};
use hubkit_core::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Form error for a malformed AMS net id
pub const ERROR_INVALID_NET_ID: &str = "invalid_net_id";

fn fields() -> Vec<FormField> {
    vec![
        FormField::required("device", FieldKind::String),
        FormField::optional("ip_address", FieldKind::String),
        FormField::required("port", FieldKind::Integer).with_default(json!(DEFAULT_PORT)),
        FormField::required("timeout", FieldKind::Integer).with_default(json!(DEFAULT_TIMEOUT_SECS)),
        FormField::required("retry", FieldKind::Integer).with_default(json!(DEFAULT_RETRY_SECS)),
    ]
}

fn field_error(field: &str, key: &str) -> FlowResult {
    let mut errors = HashMap::new();
    errors.insert(field.to_string(), key.to_string());
    FlowResult::ShowForm {
        step_id: STEP_USER.to_string(),
        fields: fields(),
        errors,
    }
}

/// ADS config flow
pub struct AdsConfigFlow {
    connector: Arc<dyn Connector>,
}

impl AdsConfigFlow {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    async fn validate(&self, data: &AdsEntryData) -> Result<()> {
        let params = data.params()?;
        let connection = self.connector.connect(&params).await?;
        let result = connection.read_state().await;
        connection.close().await;

        let (state, _) = result?;
        debug!("PLC {} reachable in state {}", params.net_id, state);
        Ok(())
    }
}

#[async_trait]
impl ConfigFlow for AdsConfigFlow {
    async fn step(&mut self, step_id: &str, input: Option<serde_json::Value>) -> Result<FlowResult> {
        if step_id != STEP_USER {
            return Err(Error::invalid_input(format!("Unknown step: {}", step_id)));
        }
        let Some(input) = input else {
            return Ok(FlowResult::form(STEP_USER, fields()));
        };

        let input = match apply_defaults(&fields(), &input) {
            Ok(input) => input,
            Err(_) => return Ok(field_error("device", "required")),
        };
        let data: AdsEntryData = match serde_json::from_value(input) {
            Ok(data) => data,
            Err(e) => {
                debug!("Rejected ADS form input: {}", e);
                return Ok(field_error(BASE_ERROR, "invalid_input"));
            }
        };
        if data.device.parse::<AmsNetId>().is_err() {
            return Ok(field_error("device", ERROR_INVALID_NET_ID));
        }

        if let Err(e) = self.validate(&data).await {
            return Ok(FlowResult::form_error(STEP_USER, fields(), &e));
        }

        Ok(FlowResult::CreateEntry {
            title: format!("ADS {}", data.device),
            unique_id: Some(data.unique_id()),
            data: serde_json::to_value(&data)?,
        })
    }
}
