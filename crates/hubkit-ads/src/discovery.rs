//! Entity discovery from the PLC symbol table
//!
//! A template names a PLC struct type and the members that hold an entity's
//! state. Every symbol of that type in the uploaded symbol table becomes one
//! entity whose variables are `{symbol}.{member}`:
//!
//! ```text
//! template  { platform: light, struct: ST_Light, brightness_field: nLevel }
//! symbol    GVL.Kitchen : ST_Light
//! entity    light "Kitchen"  GVL.Kitchen.bState / GVL.Kitchen.nLevel
//! ```

use crate::ams::AdsSymbol;
use crate::entity::AdsEntityConfig;
use crate::hub::AdsHub;
use crate::types::{AdsType, AdsValue};
use hubkit_core::traits::Platform;
use hubkit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Value member of sensor structs unless configured
pub const DEFAULT_VALUE_FIELD: &str = "nValue";

/// State member of every other struct unless configured
pub const DEFAULT_STATE_FIELD: &str = "bState";

/// Maps instances of one PLC struct type to entities of one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsTemplate {
    pub platform: Platform,
    /// PLC type name of the struct, e.g. `ST_Light`
    #[serde(rename = "struct")]
    pub type_name: String,
    /// Member holding the entity value
    #[serde(default)]
    pub field: Option<String>,
    /// Type of the value member; REAL for sensors and BOOL otherwise
    #[serde(default)]
    pub adstype: Option<AdsType>,
    /// STRING member holding the display name
    #[serde(default)]
    pub name_field: Option<String>,
    /// Brightness member of light structs
    #[serde(default)]
    pub brightness_field: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub factor: Option<f64>,
}

impl AdsTemplate {
    /// Template with default members
    pub fn new(platform: Platform, type_name: impl Into<String>) -> Self {
        Self {
            platform,
            type_name: type_name.into(),
            field: None,
            adstype: None,
            name_field: None,
            brightness_field: None,
            unit: None,
            factor: None,
        }
    }

    fn value_field(&self) -> &str {
        match (&self.field, self.platform) {
            (Some(field), _) => field,
            (None, Platform::Sensor) => DEFAULT_VALUE_FIELD,
            (None, _) => DEFAULT_STATE_FIELD,
        }
    }

    fn value_type(&self) -> AdsType {
        match (self.adstype, self.platform) {
            (Some(ty), _) => ty,
            (None, Platform::Sensor) => AdsType::Real,
            (None, _) => AdsType::Bool,
        }
    }

    /// Whether `symbol` is an instance of this template's struct
    pub fn matches(&self, symbol: &AdsSymbol) -> bool {
        symbol
            .type_name
            .trim()
            .eq_ignore_ascii_case(self.type_name.trim())
    }

    /// Entity config for the struct instance `symbol`
    pub fn entity_config(&self, symbol: &str, name: impl Into<String>) -> AdsEntityConfig {
        let mut config = AdsEntityConfig::new(
            self.platform,
            name,
            format!("{}.{}", symbol, self.value_field()),
            self.value_type(),
        );
        config.unit = self.unit.clone();
        config.factor = self.factor;
        config.adsvar_brightness = self
            .brightness_field
            .as_ref()
            .map(|field| format!("{}.{}", symbol, field));
        config
    }

    /// Check the template by validating the config it produces
    pub fn validate(&self) -> Result<()> {
        if self.type_name.trim().is_empty() {
            return Err(Error::config(format!(
                "{} template needs a struct type name",
                self.platform
            )));
        }
        self.entity_config(&self.type_name, self.type_name.clone())
            .validate()
    }
}

/// Pair every symbol with the first template it matches
pub fn match_symbols<'a>(
    symbols: &'a [AdsSymbol],
    templates: &'a [AdsTemplate],
) -> Vec<(&'a AdsTemplate, &'a AdsSymbol)> {
    symbols
        .iter()
        .filter_map(|symbol| {
            templates
                .iter()
                .find(|t| t.matches(symbol))
                .map(|t| (t, symbol))
        })
        .collect()
}

/// Last path segment of a symbol, `GVL.Kitchen` -> `Kitchen`
fn short_name(symbol: &str) -> &str {
    symbol.rsplit('.').next().unwrap_or(symbol)
}

async fn display_name(hub: &AdsHub, template: &AdsTemplate, symbol: &str) -> String {
    let Some(field) = &template.name_field else {
        return short_name(symbol).to_string();
    };
    let var = format!("{}.{}", symbol, field);
    match hub.read_by_name(&var, AdsType::String).await {
        Ok(AdsValue::Text(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => short_name(symbol).to_string(),
        Err(e) => {
            debug!("[{}] Failed to read {}: {}", hub.name(), var, e);
            short_name(symbol).to_string()
        }
    }
}

/// Upload the symbol table and build an entity config per matching struct
///
/// No upload happens without templates.
///
/// # Errors
///
/// Propagates the upload error.
pub async fn discover_entities(
    hub: &AdsHub,
    templates: &[AdsTemplate],
) -> Result<Vec<AdsEntityConfig>> {
    if templates.is_empty() {
        return Ok(Vec::new());
    }

    let symbols = hub.read_symbols().await?;
    let matched = match_symbols(&symbols, templates);
    if matched.is_empty() {
        warn!(
            "[{}] None of {} symbol(s) matched the configured templates",
            hub.name(),
            symbols.len()
        );
        return Ok(Vec::new());
    }

    let mut configs = Vec::with_capacity(matched.len());
    for (template, symbol) in matched {
        let name = display_name(hub, template, &symbol.name).await;
        debug!(
            "[{}] {} {} discovered as {} '{}'",
            hub.name(),
            symbol.type_name,
            symbol.name,
            template.platform,
            name
        );
        configs.push(template.entity_config(&symbol.name, name));
    }
    info!("[{}] Discovered {} entities from symbols", hub.name(), configs.len());
    Ok(configs)
}
