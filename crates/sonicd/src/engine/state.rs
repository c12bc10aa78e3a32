use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use super::device::Device;
use super::entity::EntityDescriptor;

/// A displayable entity value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl StateValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Integer(v) => Some(*v as f64),
            StateValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Integer(v)
    }
}

impl From<u64> for StateValue {
    fn from(v: u64) -> Self {
        StateValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(v: DateTime<Utc>) -> Self {
        StateValue::Timestamp(v)
    }
}

/// State of a single entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EntityState {
    /// Current value; `None` when there is nothing to display.
    pub value: Option<StateValue>,

    /// Extra attributes attached to the value.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// False while the owning integration cannot reach the device.
    pub available: bool,
}

impl EntityState {
    pub fn new(value: Option<StateValue>, available: bool) -> Self {
        Self {
            value,
            attributes: BTreeMap::new(),
            available,
        }
    }
}

/// An entity as tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub descriptor: EntityDescriptor,

    /// Integration that owns this entity and receives its commands.
    pub integration: String,

    /// `None` until the first state report arrives.
    pub state: Option<EntityState>,

    pub last_changed: Option<DateTime<Utc>>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub devices: BTreeMap<String, Device>,
    pub entities: BTreeMap<String, EntityRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_serializes_untagged() {
        let values = vec![
            StateValue::from(true),
            StateValue::from(42_u64),
            StateValue::from(2.5),
            StateValue::from("external"),
            StateValue::from(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[true,42,2.5,"external","2023-11-14T22:13:20Z"]"#);
    }

    #[test]
    fn test_large_unsigned_values_saturate() {
        assert_eq!(StateValue::from(u64::MAX), StateValue::Integer(i64::MAX));
    }
}
