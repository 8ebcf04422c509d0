//! ADS entities backed by PLC variables
//!
//! Sensors, binary sensors and switches map one variable each. A light has a
//! BOOL state variable and optionally an integer brightness variable; a valve
//! is a BOOL that reads TRUE while open.

use crate::hub::AdsHub;
use crate::types::{AdsType, AdsValue};
use async_trait::async_trait;
use hubkit_core::traits::{Entity, EntityValue, Platform, Settable, Switchable, check_range};
use hubkit_core::{Error, Publisher, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_MIN_BRIGHTNESS: i64 = 0;
pub const DEFAULT_MAX_BRIGHTNESS: i64 = 255;

/// One entity as configured in a config entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsEntityConfig {
    pub platform: Platform,
    pub name: String,
    /// PLC symbol name, e.g. `GVL.temperature`
    pub adsvar: String,
    #[serde(default = "default_adstype")]
    pub adstype: AdsType,
    #[serde(default)]
    pub unit: Option<String>,
    /// Divisor applied to numeric sensor values
    #[serde(default)]
    pub factor: Option<f64>,
    /// Brightness variable of a dimmable light
    #[serde(default)]
    pub adsvar_brightness: Option<String>,
    #[serde(default = "default_brightness_type")]
    pub brightness_type: AdsType,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: i64,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: i64,
}

fn default_adstype() -> AdsType {
    AdsType::Int
}

fn default_brightness_type() -> AdsType {
    AdsType::UInt
}

fn default_min_brightness() -> i64 {
    DEFAULT_MIN_BRIGHTNESS
}

fn default_max_brightness() -> i64 {
    DEFAULT_MAX_BRIGHTNESS
}

impl AdsEntityConfig {
    /// Config with every optional field at its default
    pub fn new(
        platform: Platform,
        name: impl Into<String>,
        adsvar: impl Into<String>,
        adstype: AdsType,
    ) -> Self {
        Self {
            platform,
            name: name.into(),
            adsvar: adsvar.into(),
            adstype,
            unit: None,
            factor: None,
            adsvar_brightness: None,
            brightness_type: default_brightness_type(),
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
        }
    }

    /// Check the combination of platform and type
    pub fn validate(&self) -> Result<()> {
        match self.platform {
            Platform::BinarySensor | Platform::Switch | Platform::Light | Platform::Valve
                if self.adstype != AdsType::Bool =>
            {
                Err(Error::config(format!(
                    "{} {} must be BOOL, not {}",
                    self.platform, self.adsvar, self.adstype
                )))
            }
            Platform::Light => self.validate_brightness(),
            Platform::Sensor | Platform::BinarySensor | Platform::Switch | Platform::Valve => {
                if matches!(self.factor, Some(f) if f == 0.0) {
                    return Err(Error::config(format!("factor of {} must not be 0", self.adsvar)));
                }
                Ok(())
            }
            other => Err(Error::config(format!(
                "Platform {} is not supported by ADS",
                other
            ))),
        }
    }

    fn validate_brightness(&self) -> Result<()> {
        let Some(var) = &self.adsvar_brightness else {
            return Ok(());
        };
        let Some((lo, hi)) = self.brightness_type.int_range() else {
            return Err(Error::config(format!(
                "brightness {} must be an integer type, not {}",
                var, self.brightness_type
            )));
        };
        if self.min_brightness >= self.max_brightness
            || self.min_brightness < lo
            || self.max_brightness > hi
        {
            return Err(Error::config(format!(
                "brightness range {}..={} of {} does not fit {}",
                self.min_brightness, self.max_brightness, var, self.brightness_type
            )));
        }
        Ok(())
    }
}

/// State shared by all ADS entities
struct Binding {
    unique_id: String,
    name: String,
    adsvar: String,
    hub: Arc<AdsHub>,
    values: Arc<Publisher<AdsValue>>,
}

impl Binding {
    fn new(
        unique_id: String,
        config: &AdsEntityConfig,
        hub: Arc<AdsHub>,
        values: Arc<Publisher<AdsValue>>,
    ) -> Self {
        Self {
            unique_id,
            name: config.name.clone(),
            adsvar: config.adsvar.clone(),
            hub,
            values,
        }
    }

    fn on(&self) -> EntityValue {
        match self.raw().and_then(|v| v.as_bool()) {
            Some(on) => EntityValue::Bool(on),
            None => EntityValue::Unknown,
        }
    }

    async fn write_bool(&self, on: bool) -> Result<()> {
        self.hub
            .write_by_name(&self.adsvar, AdsType::Bool, &AdsValue::Bool(on))
            .await
    }

    fn available(&self) -> bool {
        self.hub.is_connected() && self.values.current().data.is_some()
    }

    fn raw(&self) -> Option<AdsValue> {
        self.values.current().data
    }
}

/// Read-only PLC value
pub struct AdsSensor {
    binding: Binding,
    unit: Option<String>,
    factor: Option<f64>,
}

impl AdsSensor {
    pub fn new(
        unique_id: String,
        config: &AdsEntityConfig,
        hub: Arc<AdsHub>,
        values: Arc<Publisher<AdsValue>>,
    ) -> Self {
        Self {
            binding: Binding::new(unique_id, config, hub, values),
            unit: config.unit.clone(),
            factor: config.factor,
        }
    }
}

impl Entity for AdsSensor {
    fn unique_id(&self) -> &str {
        &self.binding.unique_id
    }

    fn name(&self) -> &str {
        &self.binding.name
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn available(&self) -> bool {
        self.binding.available()
    }

    fn value(&self) -> EntityValue {
        let Some(raw) = self.binding.raw() else {
            return EntityValue::Unknown;
        };
        match (self.factor, raw.as_f64()) {
            (Some(factor), Some(v)) if !matches!(raw, AdsValue::Bool(_)) => {
                EntityValue::Float(v / factor)
            }
            _ => EntityValue::from(&raw),
        }
    }

    fn attributes(&self) -> serde_json::Value {
        json!({
            "adsvar": self.binding.adsvar,
            "unit_of_measurement": self.unit,
        })
    }
}

/// Read-only BOOL value
pub struct AdsBinarySensor {
    binding: Binding,
}

impl AdsBinarySensor {
    pub fn new(
        unique_id: String,
        config: &AdsEntityConfig,
        hub: Arc<AdsHub>,
        values: Arc<Publisher<AdsValue>>,
    ) -> Self {
        Self {
            binding: Binding::new(unique_id, config, hub, values),
        }
    }
}

impl Entity for AdsBinarySensor {
    fn unique_id(&self) -> &str {
        &self.binding.unique_id
    }

    fn name(&self) -> &str {
        &self.binding.name
    }

    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn available(&self) -> bool {
        self.binding.available()
    }

    fn value(&self) -> EntityValue {
        self.binding.on()
    }

    fn attributes(&self) -> serde_json::Value {
        json!({ "adsvar": self.binding.adsvar })
    }
}

/// BOOL variable that can be written
///
/// The state follows notifications only; a write is reflected once the PLC
/// reports the change.
pub struct AdsSwitch {
    binding: Binding,
}

impl AdsSwitch {
    pub fn new(
        unique_id: String,
        config: &AdsEntityConfig,
        hub: Arc<AdsHub>,
        values: Arc<Publisher<AdsValue>>,
    ) -> Self {
        Self {
            binding: Binding::new(unique_id, config, hub, values),
        }
    }
}

impl Entity for AdsSwitch {
    fn unique_id(&self) -> &str {
        &self.binding.unique_id
    }

    fn name(&self) -> &str {
        &self.binding.name
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn available(&self) -> bool {
        self.binding.available()
    }

    fn value(&self) -> EntityValue {
        self.binding.on()
    }

    fn attributes(&self) -> serde_json::Value {
        json!({ "adsvar": self.binding.adsvar })
    }

    fn as_switchable(&self) -> Option<&dyn Switchable> {
        Some(self)
    }
}

#[async_trait]
impl Switchable for AdsSwitch {
    async fn turn_on(&self) -> Result<()> {
        self.binding.write_bool(true).await
    }

    async fn turn_off(&self) -> Result<()> {
        self.binding.write_bool(false).await
    }
}

/// Brightness variable of a dimmable light
struct Dimmer {
    adsvar: String,
    ty: AdsType,
    values: Arc<Publisher<AdsValue>>,
    min: i64,
    max: i64,
}

/// BOOL lamp, dimmable when a brightness variable is configured
///
/// Brightness is written as is; switching on or off only touches the state
/// variable so the PLC keeps the last level.
pub struct AdsLight {
    binding: Binding,
    dimmer: Option<Dimmer>,
}

impl AdsLight {
    fn brightness(&self) -> Option<i64> {
        let raw = self.dimmer.as_ref()?.values.current().data?;
        raw.as_f64().map(|v| v as i64)
    }
}

impl Entity for AdsLight {
    fn unique_id(&self) -> &str {
        &self.binding.unique_id
    }

    fn name(&self) -> &str {
        &self.binding.name
    }

    fn platform(&self) -> Platform {
        Platform::Light
    }

    fn available(&self) -> bool {
        self.binding.available()
    }

    fn value(&self) -> EntityValue {
        self.binding.on()
    }

    fn attributes(&self) -> serde_json::Value {
        json!({
            "adsvar": self.binding.adsvar,
            "adsvar_brightness": self.dimmer.as_ref().map(|d| &d.adsvar),
            "brightness": self.brightness(),
        })
    }

    fn as_switchable(&self) -> Option<&dyn Switchable> {
        Some(self)
    }

    fn as_settable(&self) -> Option<&dyn Settable> {
        self.dimmer.as_ref().map(|_| self as &dyn Settable)
    }
}

#[async_trait]
impl Switchable for AdsLight {
    async fn turn_on(&self) -> Result<()> {
        self.binding.write_bool(true).await
    }

    async fn turn_off(&self) -> Result<()> {
        self.binding.write_bool(false).await
    }
}

#[async_trait]
impl Settable for AdsLight {
    fn min_value(&self) -> f64 {
        self.dimmer.as_ref().map_or(0.0, |d| d.min as f64)
    }

    fn max_value(&self) -> f64 {
        self.dimmer.as_ref().map_or(0.0, |d| d.max as f64)
    }

    async fn set_value(&self, value: f64) -> Result<()> {
        let Some(dimmer) = &self.dimmer else {
            return Err(Error::invalid_input(format!(
                "{} has no brightness variable",
                self.binding.unique_id
            )));
        };
        check_range(self, value)?;
        self.binding
            .hub
            .write_by_name(&dimmer.adsvar, dimmer.ty, &AdsValue::Int(value.round() as i64))
            .await
    }
}

/// Valve driven by a BOOL variable that is TRUE while open
pub struct AdsValve {
    binding: Binding,
}

impl AdsValve {
    pub fn new(
        unique_id: String,
        config: &AdsEntityConfig,
        hub: Arc<AdsHub>,
        values: Arc<Publisher<AdsValue>>,
    ) -> Self {
        Self {
            binding: Binding::new(unique_id, config, hub, values),
        }
    }
}

impl Entity for AdsValve {
    fn unique_id(&self) -> &str {
        &self.binding.unique_id
    }

    fn name(&self) -> &str {
        &self.binding.name
    }

    fn platform(&self) -> Platform {
        Platform::Valve
    }

    fn available(&self) -> bool {
        self.binding.available()
    }

    fn value(&self) -> EntityValue {
        self.binding.on()
    }

    fn attributes(&self) -> serde_json::Value {
        let open = self.binding.raw().and_then(|v| v.as_bool());
        json!({
            "adsvar": self.binding.adsvar,
            "is_closed": open.map(|o| !o),
        })
    }

    fn as_switchable(&self) -> Option<&dyn Switchable> {
        Some(self)
    }
}

#[async_trait]
impl Switchable for AdsValve {
    /// Open the valve
    async fn turn_on(&self) -> Result<()> {
        self.binding.write_bool(true).await
    }

    /// Close the valve
    async fn turn_off(&self) -> Result<()> {
        self.binding.write_bool(false).await
    }
}

/// Register the variables of `config` with the hub and build its entity
///
/// # Errors
///
/// `Error::Config` for an invalid config; registration errors of the hub.
pub async fn build_entity(
    unique_id: String,
    config: &AdsEntityConfig,
    hub: Arc<AdsHub>,
) -> Result<Arc<dyn Entity>> {
    config.validate()?;
    let values = hub
        .register_notification(&config.adsvar, config.adstype)
        .await?;

    Ok(match config.platform {
        Platform::BinarySensor => Arc::new(AdsBinarySensor::new(unique_id, config, hub, values)),
        Platform::Switch => Arc::new(AdsSwitch::new(unique_id, config, hub, values)),
        Platform::Valve => Arc::new(AdsValve::new(unique_id, config, hub, values)),
        Platform::Light => {
            let dimmer = match &config.adsvar_brightness {
                Some(var) => Some(Dimmer {
                    adsvar: var.clone(),
                    ty: config.brightness_type,
                    values: hub
                        .register_notification(var, config.brightness_type)
                        .await?,
                    min: config.min_brightness,
                    max: config.max_brightness,
                }),
                None => None,
            };
            Arc::new(AdsLight {
                binding: Binding::new(unique_id, config, hub, values),
                dimmer,
            })
        }
        _ => Arc::new(AdsSensor::new(unique_id, config, hub, values)),
    })
}
