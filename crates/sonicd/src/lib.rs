pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::CommandError;
pub use engine::Device;
pub use engine::Engine;
pub use engine::EntityRecord;
pub use engine::EntityState;
pub use engine::Event;
pub use engine::State;
pub use engine::StateValue;
pub use integrations::watergate::probe::validate_connection;
pub use integrations::watergate::WatergateConfig;
