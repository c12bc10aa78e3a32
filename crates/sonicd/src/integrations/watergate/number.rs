use super::coordinator::Coordinator;
use super::entity::DeviceContext;
use super::entity::EntityError;
use super::models::AutoShutOffPatch;
use super::models::AutoShutOffState;
use crate::engine::Entity;
use crate::engine::EntityCategory;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::NumberRange;
use crate::engine::Platform;
use crate::engine::StateValue;

/// A writable auto shut-off threshold
pub struct NumberDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub range: NumberRange,
    pub value_fn: fn(&AutoShutOffState) -> u32,
    pub patch_fn: fn(u32) -> AutoShutOffPatch,
}

impl std::fmt::Debug for NumberDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumberDescription")
            .field("key", &self.key)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

pub const NUMBERS: &[NumberDescription] = &[
    NumberDescription {
        key: "auto_shut_off_volume",
        name: "Auto Shut off volume",
        unit: "L",
        range: NumberRange::new(50.0, 1000.0),
        value_fn: |state| state.volume_threshold,
        patch_fn: |volume| AutoShutOffPatch {
            volume_threshold: Some(volume),
            ..AutoShutOffPatch::EMPTY
        },
    },
    NumberDescription {
        key: "auto_shut_off_duration",
        name: "Auto Shut off duration",
        unit: "min",
        range: NumberRange::new(5.0, 500.0),
        value_fn: |state| state.duration_threshold,
        patch_fn: |duration| AutoShutOffPatch {
            duration_threshold: Some(duration),
            ..AutoShutOffPatch::EMPTY
        },
    },
];

#[derive(Debug)]
pub struct AutoShutOffNumber {
    descriptor: EntityDescriptor,
    description: &'static NumberDescription,
    value: Option<u32>,
    available: bool,
}

impl AutoShutOffNumber {
    pub fn new(ctx: &DeviceContext, description: &'static NumberDescription) -> Self {
        let mut descriptor = ctx.descriptor(Platform::Number, description.key, description.name);
        descriptor.unit = Some(description.unit.to_string());
        descriptor.category = Some(EntityCategory::Config);
        descriptor.range = Some(description.range);
        Self {
            descriptor,
            description,
            value: None,
            available: false,
        }
    }

    pub fn handle_coordinator_update(&mut self, coordinator: &Coordinator) {
        self.available = coordinator.last_update_success();
        self.value = coordinator.data().and_then(|data| {
            data.auto_shut_off_state
                .as_ref()
                .map(self.description.value_fn)
        });
    }

    /// Check `value` against the declared bounds and build the patch that applies it
    pub fn prepare(&self, value: f64) -> Result<(u32, AutoShutOffPatch), EntityError> {
        let range = self.description.range;
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(EntityError::InvalidValue(value));
        }
        if !range.contains(value) {
            return Err(EntityError::OutOfRange {
                value,
                min: range.min,
                max: range.max,
            });
        }

        // In range, so it fits.
        let value = value as u32;
        Ok((value, (self.description.patch_fn)(value)))
    }

    /// Show a value the device has accepted, ahead of the next poll
    pub fn apply_optimistic(&mut self, value: u32) {
        self.value = Some(value);
    }
}

impl Entity for AutoShutOffNumber {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn state(&self) -> EntityState {
        EntityState::new(self.value.map(|v| StateValue::from(i64::from(v))), self.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(key: &str) -> AutoShutOffNumber {
        let description = NUMBERS.iter().find(|d| d.key == key).unwrap();
        AutoShutOffNumber::new(&DeviceContext::new("kitchen"), description)
    }

    #[test]
    fn test_volume_patch() {
        let volume = number("auto_shut_off_volume");
        assert_eq!(volume.descriptor().entity_id, "number.kitchen_auto_shut_off_volume");

        let (value, patch) = volume.prepare(200.0).unwrap();
        assert_eq!(value, 200);
        assert_eq!(
            patch,
            AutoShutOffPatch {
                volume_threshold: Some(200),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_duration_bounds_are_inclusive() {
        let duration = number("auto_shut_off_duration");
        assert_eq!(
            duration.prepare(5.0).unwrap().1.duration_threshold,
            Some(5)
        );
        assert_eq!(
            duration.prepare(500.0).unwrap().1.duration_threshold,
            Some(500)
        );
        assert!(matches!(
            duration.prepare(4.0),
            Err(EntityError::OutOfRange { min, max, .. }) if min == 5.0 && max == 500.0
        ));
        assert!(matches!(
            duration.prepare(501.0),
            Err(EntityError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_non_integral_values() {
        let volume = number("auto_shut_off_volume");
        assert!(matches!(
            volume.prepare(100.5),
            Err(EntityError::InvalidValue(_))
        ));
        assert!(matches!(
            volume.prepare(f64::NAN),
            Err(EntityError::InvalidValue(_))
        ));
        assert!(matches!(
            volume.prepare(f64::INFINITY),
            Err(EntityError::InvalidValue(_))
        ));
        assert!(matches!(
            volume.prepare(49.0),
            Err(EntityError::OutOfRange { .. })
        ));
        assert!(matches!(
            volume.prepare(1001.0),
            Err(EntityError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_apply_optimistic_updates_state() {
        let mut volume = number("auto_shut_off_volume");
        assert_eq!(volume.state().value, None);
        volume.apply_optimistic(300);
        assert_eq!(volume.state().value, Some(StateValue::Integer(300)));
    }
}
