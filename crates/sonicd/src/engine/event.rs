use super::state::EntityState;

/// Engine-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary and broadcasts it to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    EntityStateChanged {
        entity_id: String,
        old_state: Option<EntityState>,
        new_state: EntityState,
    },
    DeviceRegistered {
        device_id: String,
    },
}
