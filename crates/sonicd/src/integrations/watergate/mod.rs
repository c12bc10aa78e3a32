mod client;
mod config;
mod coordinator;
mod entity;
mod models;
mod number;
pub mod probe;
mod sensor;
mod switch;
#[allow(clippy::module_inception)]
mod watergate;

pub use config::Config as WatergateConfig;
use linkme::distributed_slice;
use tracing::error;
pub use watergate::WatergateIntegration;

use crate::engine;

/// One integration per configured valve; an entry that cannot be set up is skipped
#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_watergate(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let mut integrations: Vec<Box<dyn engine::Integration>> = Vec::new();
    for (entry, config) in &ctx.config.integrations.watergate {
        match WatergateIntegration::new(entry, config) {
            Ok(integration) => integrations.push(Box::new(integration)),
            Err(e) => error!("Skipping watergate valve {}: {}", entry, e),
        }
    }
    Ok(integrations)
}
