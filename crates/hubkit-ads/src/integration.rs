//! ADS integration: entry data, factory and the per-entry runtime

use crate::ams::AmsNetId;
use crate::client::{AdsParams, Connector, TcpConnector};
use crate::convert::convert_value;
use crate::discovery::{AdsTemplate, discover_entities};
use crate::entity::{AdsEntityConfig, build_entity};
use crate::flow::AdsConfigFlow;
use crate::hub::AdsHub;
use crate::monitor::{CHECK_INTERVAL, run_monitor};
use crate::types::AdsType;
use async_trait::async_trait;
use hubkit_core::traits::{ConfigEntry, ConfigFlow, Entity, Integration, IntegrationFactory};
use hubkit_core::{Error, IntegrationContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Integration domain
pub const DOMAIN: &str = "ads";

/// Service writing a PLC variable by name
pub const SERVICE_WRITE_DATA_BY_NAME: &str = "write_data_by_name";

pub const DEFAULT_PORT: u16 = 851;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_RETRY_SECS: u64 = 15;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry() -> u64 {
    DEFAULT_RETRY_SECS
}

/// Data of an ADS config entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsEntryData {
    /// AMS net id of the PLC
    pub device: String,
    /// Router address; derived from the net id when absent
    #[serde(default)]
    pub ip_address: Option<String>,
    /// AMS port of the PLC runtime
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Seconds between reconnect attempts
    #[serde(default = "default_retry")]
    pub retry: u64,
    #[serde(default)]
    pub entities: Vec<AdsEntityConfig>,
    /// Struct templates matched against the PLC symbol table at setup
    #[serde(default)]
    pub templates: Vec<AdsTemplate>,
}

impl AdsEntryData {
    /// Connection parameters
    ///
    /// # Errors
    ///
    /// `Error::Config` for an invalid net id or a zero timeout.
    pub fn params(&self) -> Result<AdsParams> {
        let net_id: AmsNetId = self
            .device
            .parse()
            .map_err(|_| Error::config(format!("Invalid AMS net id: {}", self.device)))?;
        if self.timeout == 0 {
            return Err(Error::config("timeout must be greater than 0"));
        }

        let host = match self.ip_address.as_deref().map(str::trim) {
            Some(ip) if !ip.is_empty() => ip.to_string(),
            _ => net_id.to_ip().to_string(),
        };
        Ok(AdsParams::new(net_id, host, self.port).with_timeout(Duration::from_secs(self.timeout)))
    }

    /// Unique id of the PLC
    pub fn unique_id(&self) -> String {
        format!("{}:{}", self.device, self.port)
    }
}

/// Arguments of `write_data_by_name`
#[derive(Debug, Deserialize)]
struct WriteDataByName {
    adsvar: String,
    adstype: String,
    value: serde_json::Value,
}

/// Factory for ADS entries
pub struct AdsFactory {
    connector: Arc<dyn Connector>,
}

impl AdsFactory {
    /// Factory connecting over AMS/TCP
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    /// Factory using a custom connector
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

impl Default for AdsFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationFactory for AdsFactory {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn create(&self, entry: &ConfigEntry) -> Result<Box<dyn Integration>> {
        let data: AdsEntryData = entry.parse_data()?;
        for entity in &data.entities {
            entity.validate()?;
        }
        for template in &data.templates {
            template.validate()?;
        }
        Ok(Box::new(AdsIntegration {
            name: entry.title.clone(),
            base_id: entry
                .unique_id
                .clone()
                .unwrap_or_else(|| data.unique_id()),
            data,
            connector: Arc::clone(&self.connector),
            hub: Mutex::new(None),
        }))
    }

    fn config_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(AdsConfigFlow::new(Arc::clone(&self.connector)))
    }
}

/// One loaded ADS entry
pub struct AdsIntegration {
    name: String,
    base_id: String,
    data: AdsEntryData,
    connector: Arc<dyn Connector>,
    hub: Mutex<Option<Arc<AdsHub>>>,
}

impl AdsIntegration {
    fn hub(&self) -> Option<Arc<AdsHub>> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Integration for AdsIntegration {
    async fn setup(&self, ctx: &IntegrationContext) -> Result<Vec<Arc<dyn Entity>>> {
        let params = self.data.params()?;
        debug!("[{}] Connecting to {} via {}", self.name, params.net_id, params.host);

        let connection = self.connector.connect(&params).await?;
        let hub = Arc::new(AdsHub::new(self.name.clone(), connection));
        // Stored first so a failed setup still closes the connection
        *self.hub.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&hub));

        let (state, _) = hub.read_state().await.map_err(|e| match e.class() {
            hubkit_core::FailureClass::Fatal => Error::cannot_connect(e.to_string()),
            _ => e,
        })?;
        if state.is_running() {
            hub.mark_online(state);
        }

        let mut configs = self.data.entities.clone();
        for config in discover_entities(&hub, &self.data.templates).await? {
            if configs.iter().any(|c| c.adsvar == config.adsvar) {
                debug!("[{}] {} is configured explicitly, skipping", self.name, config.adsvar);
                continue;
            }
            configs.push(config);
        }

        let mut entities: Vec<Arc<dyn Entity>> = Vec::with_capacity(configs.len());
        for config in &configs {
            let unique_id = format!("{}-{}", self.base_id, config.adsvar);
            entities.push(build_entity(unique_id, config, Arc::clone(&hub)).await?);
        }

        ctx.spawn(
            "notifications",
            Arc::clone(&hub).run_notifications(ctx.token().clone()),
        );
        ctx.spawn(
            "monitor",
            run_monitor(
                Arc::clone(&hub),
                CHECK_INTERVAL,
                Duration::from_secs(self.data.retry),
                ctx.token().clone(),
            ),
        );

        info!(
            "[{}] Connected to PLC {} ({}), {} entities",
            self.name,
            params.net_id,
            state,
            entities.len()
        );
        Ok(entities)
    }

    async fn unload(&self) -> Result<()> {
        let hub = self.hub.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(hub) = hub {
            hub.close().await;
        }
        Ok(())
    }

    async fn call_service(&self, service: &str, data: &serde_json::Value) -> Result<()> {
        if service != SERVICE_WRITE_DATA_BY_NAME {
            return Err(Error::not_found(format!("Unknown service: {}", service)));
        }
        let args: WriteDataByName = serde_json::from_value(data.clone())
            .map_err(|e| Error::invalid_input(format!("Invalid {} data: {}", service, e)))?;
        let ty: AdsType = args.adstype.parse()?;

        let text = match &args.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let value = convert_value(ty, &text)?;

        let hub = self
            .hub()
            .ok_or_else(|| Error::transient(format!("[{}] ADS hub is not connected", self.name)))?;
        hub.write_by_name(&args.adsvar, ty, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_data_defaults_and_params() {
        let data: AdsEntryData =
            serde_json::from_value(json!({"device": "192.168.1.20.1.1"})).unwrap();
        assert_eq!(data.port, 851);
        assert_eq!(data.timeout, 5);
        assert_eq!(data.retry, 15);
        assert_eq!(data.unique_id(), "192.168.1.20.1.1:851");

        let params = data.params().unwrap();
        assert_eq!(params.host, "192.168.1.20");
        assert_eq!(params.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_entry_data_rejects_bad_net_id() {
        let data: AdsEntryData = serde_json::from_value(json!({"device": "plc-1"})).unwrap();
        assert!(matches!(data.params(), Err(Error::Config(_))));
    }

    #[test]
    fn test_create_rejects_invalid_entities() {
        let entry = ConfigEntry::new(
            DOMAIN,
            "PLC",
            json!({
                "device": "10.0.0.5.1.1",
                "entities": [{"platform": "switch", "name": "Pump", "adsvar": "GVL.pump", "adstype": "INT"}]
            }),
        );
        assert!(AdsFactory::new().create(&entry).is_err());

        let entry = ConfigEntry::new(
            DOMAIN,
            "PLC",
            json!({
                "device": "10.0.0.5.1.1",
                "templates": [{"platform": "light", "struct": "ST_Light", "adstype": "REAL"}]
            }),
        );
        assert!(AdsFactory::new().create(&entry).is_err());
    }
}
