//! Type-safe message system for sonicd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::device::Device;
use super::entity::EntityDescriptor;
use super::state::EntityState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// A device was discovered, or its details changed
    DeviceDiscovered(Device),

    /// An entity was discovered and registered
    EntityDiscovered {
        descriptor: EntityDescriptor,
        integration_name: String,
    },

    /// An entity was removed
    EntityRemoved { entity_id: String },

    /// An entity's state changed
    EntityStateChanged {
        entity_id: String,
        state: EntityState,
    },

    /// An integration accepts callbacks on this webhook id
    WebhookRegistered {
        webhook_id: String,
        integration_name: String,
    },
}

/// Reply channel for commands whose outcome the caller waits for.
pub type CommandReply = oneshot::Sender<Result<(), CommandError>>;

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Set a number entity to a new value
    SetNumber {
        entity_id: String,
        value: f64,
        reply: CommandReply,
    },

    /// Turn a switch entity on or off
    SetSwitch {
        entity_id: String,
        on: bool,
        reply: CommandReply,
    },

    /// Fetch fresh data from the device outside the regular schedule
    Refresh,
}

/// Why a command could not be carried out.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown webhook: {0}")]
    UnknownWebhook(String),

    #[error("entity {entity_id} does not support {command}")]
    Unsupported {
        entity_id: String,
        command: &'static str,
    },

    /// The command was refused before anything was sent to the device
    #[error("{0}")]
    Rejected(String),

    /// The device could not be reached or refused the update
    #[error("device error: {0}")]
    Device(String),

    #[error("integration {0} is not available")]
    Unavailable(String),
}
