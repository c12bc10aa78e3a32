//! One-shot reachability check used before a valve is added to the configuration.

use std::time::Duration;

use tracing::error;
use tracing::info;

use super::client::DeviceClient;
use super::client::HttpDeviceClient;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a valve answers at `address`
pub async fn validate_connection(address: &str) -> bool {
    match HttpDeviceClient::new(address, PROBE_TIMEOUT) {
        Ok(client) => probe_with(&client).await,
        Err(e) => {
            error!("Cannot connect to {}: {}", address, e);
            false
        }
    }
}

/// Fetch the device state once; any failure or an empty answer counts as unreachable
pub async fn probe_with(client: &dyn DeviceClient) -> bool {
    match client.get_device_state().await {
        Ok(Some(state)) => {
            info!(
                "Found valve (firmware {})",
                state.firmware_version.as_deref().unwrap_or("unknown")
            );
            true
        }
        Ok(None) => {
            error!("Device did not report its state");
            false
        }
        Err(e) => {
            error!("Failed to validate connection: {}", e);
            false
        }
    }
}
