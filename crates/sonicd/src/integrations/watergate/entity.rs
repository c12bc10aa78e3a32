use std::collections::HashMap;

use super::client::ClientError;
use super::coordinator::Coordinator;
use super::number::AutoShutOffNumber;
use super::number::NUMBERS;
use super::sensor::AutoShutOffEventSensor;
use super::sensor::SonicSensor;
use super::sensor::SENSORS;
use super::switch::AutoShutOffSwitch;
use crate::engine::CommandError;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;

/// Naming shared by every entity of one valve
#[derive(Debug, Clone)]
pub struct DeviceContext {
    /// Configuration entry name, e.g. "kitchen"
    pub entry: String,
    pub device_id: String,
}

impl DeviceContext {
    pub fn new(entry: &str) -> Self {
        Self {
            entry: entry.to_string(),
            device_id: format!("watergate_{}", entry),
        }
    }

    /// Descriptor for entity `key`, e.g. `sensor.kitchen_water_pressure`
    pub fn descriptor(&self, platform: Platform, key: &str, name: &str) -> EntityDescriptor {
        let mut descriptor = EntityDescriptor::new(
            platform,
            format!("{}.{}_{}", platform, self.entry, key),
            format!("{}.{}", self.device_id, key),
            name.to_string(),
        );
        descriptor.device_id = Some(self.device_id.clone());
        descriptor
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("{value} is outside the allowed range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("{0} is not a whole number")]
    InvalidValue(f64),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("entity {entity_id} does not support {command}")]
    Unsupported {
        entity_id: String,
        command: &'static str,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<EntityError> for CommandError {
    fn from(e: EntityError) -> Self {
        match e {
            EntityError::OutOfRange { .. } | EntityError::InvalidValue(_) => {
                CommandError::Rejected(e.to_string())
            }
            EntityError::UnknownEntity(entity_id) => CommandError::UnknownEntity(entity_id),
            EntityError::Unsupported { entity_id, command } => {
                CommandError::Unsupported { entity_id, command }
            }
            EntityError::Client(e) => CommandError::Device(e.to_string()),
        }
    }
}

/// One entity of a valve
#[derive(Debug)]
pub enum WatergateEntity {
    Sensor(SonicSensor),
    Event(AutoShutOffEventSensor),
    Number(AutoShutOffNumber),
    Switch(AutoShutOffSwitch),
}

impl WatergateEntity {
    fn as_entity(&self) -> &dyn Entity {
        match self {
            WatergateEntity::Sensor(e) => e,
            WatergateEntity::Event(e) => e,
            WatergateEntity::Number(e) => e,
            WatergateEntity::Switch(e) => e,
        }
    }

    fn handle_coordinator_update(&mut self, coordinator: &Coordinator) {
        match self {
            WatergateEntity::Sensor(e) => e.handle_coordinator_update(coordinator),
            WatergateEntity::Event(e) => e.handle_coordinator_update(coordinator),
            WatergateEntity::Number(e) => e.handle_coordinator_update(coordinator),
            WatergateEntity::Switch(e) => e.handle_coordinator_update(coordinator),
        }
    }
}

impl Entity for WatergateEntity {
    fn descriptor(&self) -> &EntityDescriptor {
        self.as_entity().descriptor()
    }

    fn state(&self) -> EntityState {
        self.as_entity().state()
    }
}

/// All entities of one valve, in registration order
#[derive(Debug)]
pub struct EntitySet {
    entities: Vec<WatergateEntity>,
    index: HashMap<String, usize>,
}

impl EntitySet {
    pub fn build(ctx: &DeviceContext) -> Self {
        let mut entities: Vec<WatergateEntity> = SENSORS
            .iter()
            .map(|description| WatergateEntity::Sensor(SonicSensor::new(ctx, description)))
            .collect();
        entities.push(WatergateEntity::Event(AutoShutOffEventSensor::new(ctx)));
        entities.extend(NUMBERS.iter().map(|description| {
            WatergateEntity::Number(AutoShutOffNumber::new(ctx, description))
        }));
        entities.push(WatergateEntity::Switch(AutoShutOffSwitch::new(ctx)));

        let index = entities
            .iter()
            .enumerate()
            .map(|(i, entity)| (entity.entity_id().to_string(), i))
            .collect();

        Self { entities, index }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatergateEntity> {
        self.entities.iter()
    }

    #[cfg(test)]
    pub fn get(&self, entity_id: &str) -> Option<&WatergateEntity> {
        self.index.get(entity_id).map(|&i| &self.entities[i])
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut WatergateEntity> {
        self.index.get(entity_id).map(|&i| &mut self.entities[i])
    }

    pub fn number_mut(&mut self, entity_id: &str) -> Result<&mut AutoShutOffNumber, EntityError> {
        match self.get_mut(entity_id) {
            Some(WatergateEntity::Number(number)) => Ok(number),
            Some(_) => Err(EntityError::Unsupported {
                entity_id: entity_id.to_string(),
                command: "set_value",
            }),
            None => Err(EntityError::UnknownEntity(entity_id.to_string())),
        }
    }

    pub fn switch_mut(&mut self, entity_id: &str) -> Result<&mut AutoShutOffSwitch, EntityError> {
        match self.get_mut(entity_id) {
            Some(WatergateEntity::Switch(switch)) => Ok(switch),
            Some(_) => Err(EntityError::Unsupported {
                entity_id: entity_id.to_string(),
                command: "turn_on",
            }),
            None => Err(EntityError::UnknownEntity(entity_id.to_string())),
        }
    }

    /// Let every entity re-derive its state from the coordinator
    ///
    /// Returns the entities whose state changed, with their new state.
    pub fn handle_coordinator_update(
        &mut self,
        coordinator: &Coordinator,
    ) -> Vec<(String, EntityState)> {
        let mut changed = Vec::new();
        for entity in &mut self.entities {
            let before = entity.state();
            entity.handle_coordinator_update(coordinator);
            let after = entity.state();
            if before != after {
                changed.push((entity.entity_id().to_string(), after));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::integrations::watergate::client::Endpoint;
    use crate::integrations::watergate::client::MockDeviceClient;

    #[test]
    fn test_entity_naming() {
        let ctx = DeviceContext::new("kitchen");
        let descriptor = ctx.descriptor(Platform::Sensor, "water_pressure", "Water pressure");
        assert_eq!(descriptor.entity_id, "sensor.kitchen_water_pressure");
        assert_eq!(descriptor.unique_id, "watergate_kitchen.water_pressure");
        assert_eq!(descriptor.device_id.as_deref(), Some("watergate_kitchen"));
    }

    #[test]
    fn test_build_registers_every_entity_once() {
        let set = EntitySet::build(&DeviceContext::new("kitchen"));
        assert_eq!(set.len(), SENSORS.len() + 1 + NUMBERS.len() + 1);

        let platforms: Vec<Platform> = set.iter().map(|e| e.descriptor().platform).collect();
        assert_eq!(
            platforms.iter().filter(|p| **p == Platform::Number).count(),
            2
        );
        assert_eq!(
            platforms.iter().filter(|p| **p == Platform::Switch).count(),
            1
        );

        for entity in set.iter() {
            assert!(set.get(entity.entity_id()).is_some());
            assert!(!entity.state().available);
        }
        assert!(set.get("switch.kitchen_auto_shut_off").is_some());
        assert!(set.get("number.kitchen_auto_shut_off_volume").is_some());
        assert!(set.get("sensor.kitchen_auto_shut_off_event").is_some());
    }

    #[test]
    fn test_command_lookup_checks_platform() {
        let mut set = EntitySet::build(&DeviceContext::new("kitchen"));
        assert!(set.number_mut("number.kitchen_auto_shut_off_duration").is_ok());
        assert!(matches!(
            set.number_mut("switch.kitchen_auto_shut_off"),
            Err(EntityError::Unsupported { .. })
        ));
        assert!(matches!(
            set.switch_mut("switch.kitchen_nope"),
            Err(EntityError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_entity_errors_map_to_command_errors() {
        let err: CommandError = EntityError::OutOfRange {
            value: 2000.0,
            min: 50.0,
            max: 1000.0,
        }
        .into();
        assert_eq!(
            err,
            CommandError::Rejected("2000 is outside the allowed range [50, 1000]".to_string())
        );

        let err: CommandError = EntityError::Client(ClientError::Status {
            endpoint: Endpoint::AutoShutOff,
            status: 500,
        })
        .into();
        assert_eq!(
            err,
            CommandError::Device("auto_shut_off returned HTTP 500".to_string())
        );
    }

    #[tokio::test]
    async fn test_fan_out_reports_changes_and_availability() {
        let client = Arc::new(MockDeviceClient::populated());
        let coordinator = Coordinator::new(
            "kitchen".to_string(),
            client.clone(),
            Duration::from_secs(120),
        );
        let mut set = EntitySet::build(&DeviceContext::new("kitchen"));

        coordinator.refresh().await.unwrap();
        let changed = set.handle_coordinator_update(&coordinator);
        assert_eq!(changed.len(), set.len());
        assert!(changed.iter().all(|(_, state)| state.available));

        // Nothing new to report.
        coordinator.refresh().await.unwrap();
        assert!(set.handle_coordinator_update(&coordinator).is_empty());

        client.fail(Some(Endpoint::Telemetry));
        let _ = coordinator.refresh().await;
        let changed = set.handle_coordinator_update(&coordinator);
        assert_eq!(changed.len(), set.len());
        assert!(changed.iter().all(|(_, state)| !state.available));

        // Values from the last good snapshot are kept while unavailable.
        let pressure = set.get("sensor.kitchen_water_pressure").unwrap().state();
        assert_eq!(pressure.value.and_then(|v| v.as_f64()), Some(3200.0));
    }
}
