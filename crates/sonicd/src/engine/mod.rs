mod device;
mod engine;
mod entity;
mod event;
mod integration;
mod message;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use device::Device;
pub use engine::Engine;
pub use entity::DeviceClass;
pub use entity::Entity;
pub use entity::EntityCategory;
pub use entity::EntityDescriptor;
pub use entity::NumberRange;
pub use entity::Platform;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::CommandError;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::EntityRecord;
pub use state::EntityState;
pub use state::State;
pub use state::StateValue;
