use super::coordinator::Coordinator;
use super::entity::DeviceContext;
use super::models::AutoShutOffPatch;
use crate::engine::Entity;
use crate::engine::EntityCategory;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::StateValue;

/// Enables or disables auto shut-off
#[derive(Debug)]
pub struct AutoShutOffSwitch {
    descriptor: EntityDescriptor,
    is_on: bool,
    available: bool,
}

impl AutoShutOffSwitch {
    pub fn new(ctx: &DeviceContext) -> Self {
        let mut descriptor = ctx.descriptor(Platform::Switch, "auto_shut_off", "Auto Shut off");
        descriptor.category = Some(EntityCategory::Config);
        descriptor.icon = Some("mdi:water-pump".to_string());
        Self {
            descriptor,
            is_on: false,
            available: false,
        }
    }

    /// Off when the device does not report an auto shut-off state
    pub fn handle_coordinator_update(&mut self, coordinator: &Coordinator) {
        self.available = coordinator.last_update_success();
        self.is_on = coordinator
            .data()
            .and_then(|data| data.auto_shut_off_state.as_ref().map(|state| state.enabled))
            .unwrap_or(false);
    }

    pub fn patch_for(on: bool) -> AutoShutOffPatch {
        AutoShutOffPatch {
            enabled: Some(on),
            ..AutoShutOffPatch::EMPTY
        }
    }

    /// Show a state the device has accepted, ahead of the next poll
    pub fn apply_optimistic(&mut self, on: bool) {
        self.is_on = on;
    }
}

impl Entity for AutoShutOffSwitch {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn state(&self) -> EntityState {
        EntityState::new(Some(StateValue::from(self.is_on)), self.available)
    }
}
