// # Entity Traits
//
// Entities are the typed views an integration exposes to the host: a sensor
// value, a switch, a number, a media player. Each entity is a plain struct
// implementing the base `Entity` trait plus whichever capability traits it
// supports (`Switchable`, `Settable`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The kind of view an entity provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Read-only measured value
    Sensor,
    /// Read-only on/off value
    BinarySensor,
    /// On/off value that can be commanded
    Switch,
    /// Numeric value that can be set
    Number,
    /// Media playback device
    MediaPlayer,
    /// Lamp that switches and may dim
    Light,
    /// Open/closed flow control
    Valve,
}

impl Platform {
    /// Platform name as used in logs and entity ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
            Platform::BinarySensor => "binary_sensor",
            Platform::Switch => "switch",
            Platform::Number => "number",
            Platform::MediaPlayer => "media_player",
            Platform::Light => "light",
            Platform::Valve => "valve",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current value of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntityValue {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
    /// No value received yet
    Unknown,
}

impl EntityValue {
    /// Interpret the value as on/off, if it has a sensible boolean reading
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntityValue::Bool(b) => Some(*b),
            EntityValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interpret the value as a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EntityValue::Int(i) => Some(*i as f64),
            EntityValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Point-in-time state of an entity, as reported to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Stable unique id
    pub unique_id: String,
    /// Human readable name
    pub name: String,
    /// Entity platform
    pub platform: Platform,
    /// Whether the backing device is reachable
    pub available: bool,
    /// Current value
    pub value: EntityValue,
    /// Extra platform-specific attributes
    pub attributes: serde_json::Value,
}

/// Base trait that all entities implement
pub trait Entity: Send + Sync {
    /// Stable unique id (unique within the host)
    fn unique_id(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    /// The platform this entity belongs to
    fn platform(&self) -> Platform;

    /// Whether the backing device is currently reachable
    fn available(&self) -> bool;

    /// Current value
    fn value(&self) -> EntityValue;

    /// Extra attributes (defaults to an empty object)
    fn attributes(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    /// On/off control, if this entity supports it
    fn as_switchable(&self) -> Option<&dyn Switchable> {
        None
    }

    /// Numeric control, if this entity supports it
    fn as_settable(&self) -> Option<&dyn Settable> {
        None
    }

    /// Capture the full state of this entity
    fn snapshot(&self) -> EntityState {
        let available = self.available();
        EntityState {
            unique_id: self.unique_id().to_string(),
            name: self.name().to_string(),
            platform: self.platform(),
            available,
            value: if available {
                self.value()
            } else {
                EntityValue::Unknown
            },
            attributes: self.attributes(),
        }
    }
}

/// Entities that can be switched on and off
#[async_trait]
pub trait Switchable: Entity {
    /// Current on/off state, `None` if unknown
    fn is_on(&self) -> Option<bool> {
        self.value().as_bool()
    }

    /// Switch on
    async fn turn_on(&self) -> Result<(), crate::Error>;

    /// Switch off
    async fn turn_off(&self) -> Result<(), crate::Error>;
}

/// Entities with a numeric value that can be set
#[async_trait]
pub trait Settable: Entity {
    /// Lowest accepted value
    fn min_value(&self) -> f64 {
        0.0
    }

    /// Highest accepted value
    fn max_value(&self) -> f64 {
        100.0
    }

    /// Set a new value
    async fn set_value(&self, value: f64) -> Result<(), crate::Error>;
}

/// Reject values outside a [`Settable`]'s range
pub fn check_range(entity: &dyn Settable, value: f64) -> Result<(), crate::Error> {
    if value.is_nan() || value < entity.min_value() || value > entity.max_value() {
        return Err(crate::Error::invalid_input(format!(
            "{} out of range {}..={} for {}",
            value,
            entity.min_value(),
            entity.max_value(),
            entity.unique_id()
        )));
    }
    Ok(())
}
