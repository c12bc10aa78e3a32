//! Entity abstraction for sonicd
//!
//! All entities (sensors, switches, numbers) implement the Entity trait. The engine only ever
//! sees an entity through its descriptor and its current state; how the state is derived is up
//! to the integration that owns it.

use serde::Serialize;

use super::state::EntityState;

/// Kind of entity, which decides how a UI renders it and which commands it accepts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Sensor,
    Number,
    Switch,
}

/// What a sensor measures, matching Home Assistant's sensor device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    Duration,
    Pressure,
    SignalStrength,
    Temperature,
    Timestamp,
    Volume,
    VolumeFlowRate,
}

/// Entities that are not primary readings are grouped into a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// Declared bounds of a number entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl NumberRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: 1.0,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Static description of an entity, reported to the engine once on discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDescriptor {
    /// Entity ID (e.g., "sensor.kitchen_water_pressure")
    pub entity_id: String,

    /// Stable identifier that survives renames
    pub unique_id: String,

    /// Human-readable name
    pub name: String,

    pub platform: Platform,

    /// Device this entity belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<EntityCategory>,

    /// Bounds for number entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<NumberRange>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl EntityDescriptor {
    pub fn new(platform: Platform, entity_id: String, unique_id: String, name: String) -> Self {
        Self {
            entity_id,
            unique_id,
            name,
            platform,
            device_id: None,
            unit: None,
            device_class: None,
            category: None,
            range: None,
            icon: None,
        }
    }
}

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Static description of the entity
    fn descriptor(&self) -> &EntityDescriptor;

    /// Current state, as it should be stored by the engine
    fn state(&self) -> EntityState;

    fn entity_id(&self) -> &str {
        &self.descriptor().entity_id
    }
}
