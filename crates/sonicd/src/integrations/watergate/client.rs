use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::trace;

use super::models::AutoShutOffPatch;
use super::models::AutoShutOffReport;
use super::models::AutoShutOffState;
use super::models::DeviceState;
use super::models::NetworkingData;
use super::models::TelemetryData;

/// Path of the local API below the device address
const API_PREFIX: &str = "/api/sonic";

/// Endpoints of the valve's local API
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Endpoint {
    DeviceState,
    Telemetry,
    Networking,
    AutoShutOff,
    AutoShutOffReport,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::DeviceState => "/",
            Endpoint::Telemetry => "/telemetry",
            Endpoint::Networking => "/networking",
            Endpoint::AutoShutOff => "/auto-shut-off",
            Endpoint::AutoShutOffReport => "/auto-shut-off/report",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid device address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: Endpoint, status: u16 },
}

/// Trait for the valve's local API
///
/// Read calls return `Ok(None)` when the firmware does not implement an endpoint.
/// This trait allows for mocking the device for testing purposes.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn get_device_state(&self) -> Result<Option<DeviceState>, ClientError>;

    async fn get_telemetry(&self) -> Result<Option<TelemetryData>, ClientError>;

    async fn get_networking(&self) -> Result<Option<NetworkingData>, ClientError>;

    async fn get_auto_shut_off_state(&self) -> Result<Option<AutoShutOffState>, ClientError>;

    async fn get_auto_shut_off_report(&self) -> Result<Option<AutoShutOffReport>, ClientError>;

    /// Update the auto shut-off configuration; only the fields set in `patch` change
    async fn patch_auto_shut_off(&self, patch: &AutoShutOffPatch) -> Result<(), ClientError>;
}

/// reqwest-backed client for one valve
pub struct HttpDeviceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpDeviceClient {
    /// Create a client for the valve at `address`
    ///
    /// `address` is a host or host:port; an explicit `http://` or `https://` scheme is kept.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url(address)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client` and an already resolved base URL
    /// (e.g. `http://192.168.1.50/api/sonic`).
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.path()
        )
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<Option<T>, ClientError> {
        let url = self.url(endpoint);
        debug!("GET {}", url);

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if is_absent(status) {
            trace!("{} not available on this device ({})", endpoint, status);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        Ok(Some(resp.json().await?))
    }
}

/// Statuses that mean the firmware has nothing to report, rather than a failure
fn is_absent(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED | StatusCode::NO_CONTENT
    )
}

pub(super) fn base_url(address: &str) -> Result<Url, ClientError> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(ClientError::InvalidAddress {
            address: address.to_string(),
            reason: "address is empty".to_string(),
        });
    }

    let full = if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}{}", address, API_PREFIX)
    } else {
        format!("http://{}{}", address, API_PREFIX)
    };

    let url = Url::parse(&full).map_err(|e| ClientError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ClientError::InvalidAddress {
            address: address.to_string(),
            reason: "address has no host".to_string(),
        });
    }
    Ok(url)
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn get_device_state(&self) -> Result<Option<DeviceState>, ClientError> {
        self.get(Endpoint::DeviceState).await
    }

    async fn get_telemetry(&self) -> Result<Option<TelemetryData>, ClientError> {
        self.get(Endpoint::Telemetry).await
    }

    async fn get_networking(&self) -> Result<Option<NetworkingData>, ClientError> {
        self.get(Endpoint::Networking).await
    }

    async fn get_auto_shut_off_state(&self) -> Result<Option<AutoShutOffState>, ClientError> {
        self.get(Endpoint::AutoShutOff).await
    }

    async fn get_auto_shut_off_report(&self) -> Result<Option<AutoShutOffReport>, ClientError> {
        self.get(Endpoint::AutoShutOffReport).await
    }

    async fn patch_auto_shut_off(&self, patch: &AutoShutOffPatch) -> Result<(), ClientError> {
        let url = self.url(Endpoint::AutoShutOff);
        debug!("PATCH {} {:?}", url, patch);

        let resp = self.http.patch(&url).json(patch).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint: Endpoint::AutoShutOff,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Mock device for testing
///
/// Serves whatever records are stored in it; `failing` makes one endpoint answer with a
/// communication error.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockDeviceClient {
    pub device_state: std::sync::Mutex<Option<DeviceState>>,
    pub telemetry: std::sync::Mutex<Option<TelemetryData>>,
    pub networking: std::sync::Mutex<Option<NetworkingData>>,
    pub auto_shut_off: std::sync::Mutex<Option<AutoShutOffState>>,
    pub report: std::sync::Mutex<Option<AutoShutOffReport>>,
    pub failing: std::sync::Mutex<Option<Endpoint>>,
    pub fail_patch: std::sync::atomic::AtomicBool,
    pub calls: std::sync::Mutex<Vec<Endpoint>>,
    pub patches: std::sync::Mutex<Vec<AutoShutOffPatch>>,
}

#[cfg(test)]
impl MockDeviceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that reports every record
    pub fn populated() -> Self {
        use super::models::TelemetryField;
        use super::models::WaterMeter;

        let client = Self::new();
        *client.device_state.lock().unwrap() = Some(DeviceState {
            valve_state: Some("open".to_string()),
            water_flow_indicator: Some(true),
            mqtt_status: Some(true),
            wifi_status: Some(true),
            power_supply: Some("external".to_string()),
            firmware_version: Some("1.4.2".to_string()),
            uptime: Some(86_400_000),
            water_meter: Some(WaterMeter {
                volume: Some(1_250_000),
                duration: Some(3_600_000),
            }),
            serial_number: Some("SN-0001".to_string()),
        });
        *client.telemetry.lock().unwrap() = Some(TelemetryData {
            flow: Some(2500.0),
            pressure: Some(3200.0),
            water_temperature: Some(14.5),
            errors: std::collections::BTreeSet::from([TelemetryField::Other]),
        });
        *client.networking.lock().unwrap() = Some(NetworkingData {
            mqtt_connected: Some(true),
            wifi_connected: Some(true),
            ip: Some("192.168.1.50".to_string()),
            gateway: Some("192.168.1.1".to_string()),
            subnet: Some("255.255.255.0".to_string()),
            ssid: Some("home".to_string()),
            rssi: Some(-61),
            wifi_uptime: Some(7_200_000),
            mqtt_uptime: Some(7_100_000),
        });
        *client.auto_shut_off.lock().unwrap() = Some(AutoShutOffState {
            enabled: true,
            volume_threshold: 100,
            duration_threshold: 30,
        });
        *client.report.lock().unwrap() = Some(AutoShutOffReport {
            event_type: "VOLUME_THRESHOLD".to_string(),
            volume: 1500,
            duration: 30,
            timestamp: 1_700_000_000,
        });
        client
    }

    pub fn fail(&self, endpoint: Option<Endpoint>) {
        *self.failing.lock().unwrap() = endpoint;
    }

    fn serve<T: Clone>(
        &self,
        endpoint: Endpoint,
        record: &std::sync::Mutex<Option<T>>,
    ) -> Result<Option<T>, ClientError> {
        self.calls.lock().unwrap().push(endpoint);
        if *self.failing.lock().unwrap() == Some(endpoint) {
            return Err(ClientError::Status {
                endpoint,
                status: 503,
            });
        }
        Ok(record.lock().unwrap().clone())
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceClient for MockDeviceClient {
    async fn get_device_state(&self) -> Result<Option<DeviceState>, ClientError> {
        self.serve(Endpoint::DeviceState, &self.device_state)
    }

    async fn get_telemetry(&self) -> Result<Option<TelemetryData>, ClientError> {
        self.serve(Endpoint::Telemetry, &self.telemetry)
    }

    async fn get_networking(&self) -> Result<Option<NetworkingData>, ClientError> {
        self.serve(Endpoint::Networking, &self.networking)
    }

    async fn get_auto_shut_off_state(&self) -> Result<Option<AutoShutOffState>, ClientError> {
        self.serve(Endpoint::AutoShutOff, &self.auto_shut_off)
    }

    async fn get_auto_shut_off_report(&self) -> Result<Option<AutoShutOffReport>, ClientError> {
        self.serve(Endpoint::AutoShutOffReport, &self.report)
    }

    async fn patch_auto_shut_off(&self, patch: &AutoShutOffPatch) -> Result<(), ClientError> {
        if self.fail_patch.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ClientError::Status {
                endpoint: Endpoint::AutoShutOff,
                status: 500,
            });
        }
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::body_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    async fn setup() -> (MockServer, HttpDeviceClient) {
        let server = MockServer::start().await;
        let base_url = Url::parse(&format!("{}{}", server.uri(), API_PREFIX)).unwrap();
        let client = HttpDeviceClient::with_client(reqwest::Client::new(), base_url);
        (server, client)
    }

    #[test]
    fn test_base_url_from_address() {
        assert_eq!(
            base_url("192.168.1.50").unwrap().as_str(),
            "http://192.168.1.50/api/sonic"
        );
        assert_eq!(
            base_url("sonic.local:8080/").unwrap().as_str(),
            "http://sonic.local:8080/api/sonic"
        );
        assert_eq!(
            base_url("https://sonic.local").unwrap().as_str(),
            "https://sonic.local/api/sonic"
        );
        assert!(matches!(
            base_url(""),
            Err(ClientError::InvalidAddress { .. })
        ));
        assert!(matches!(
            base_url("not a host"),
            Err(ClientError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_device_state() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/sonic/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "valveState": "open",
                "waterFlowIndicator": false,
                "powerSupply": "battery",
                "firmwareVersion": "1.4.2",
                "uptime": 1234,
                "waterMeter": { "volume": 1500, "duration": 60000 },
                "serialNumber": "SN-0001"
            })))
            .mount(&server)
            .await;

        let state = client.get_device_state().await.unwrap().unwrap();
        assert_eq!(state.valve_state.as_deref(), Some("open"));
        assert_eq!(state.power_supply.as_deref(), Some("battery"));
        assert_eq!(state.uptime, Some(1234));
        assert_eq!(state.water_meter.unwrap().duration, Some(60000));
    }

    #[tokio::test]
    async fn test_get_telemetry_and_networking() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/sonic/telemetry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "flow": 2500,
                "pressure": 1013,
                "waterTemperature": 12.5,
                "errors": ["flow"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sonic/networking"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "192.168.1.50",
                "ssid": "home",
                "rssi": -70,
                "wifiUptime": 5000
            })))
            .mount(&server)
            .await;

        let telemetry = client.get_telemetry().await.unwrap().unwrap();
        assert_eq!(telemetry.valid_flow(), None);
        assert_eq!(telemetry.valid_pressure(), Some(1013.0));

        let networking = client.get_networking().await.unwrap().unwrap();
        assert_eq!(networking.rssi, Some(-70));
        assert_eq!(networking.wifi_uptime, Some(5000));
        assert_eq!(networking.gateway, None);
    }

    #[tokio::test]
    async fn test_unsupported_endpoints_are_absent() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/sonic/auto-shut-off/report"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sonic/auto-shut-off"))
            .respond_with(ResponseTemplate::new(501))
            .mount(&server)
            .await;
        // No body at all, not even an empty object.
        Mock::given(method("GET"))
            .and(path("/api/sonic/networking"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert_eq!(client.get_auto_shut_off_report().await.unwrap(), None);
        assert_eq!(client.get_auto_shut_off_state().await.unwrap(), None);
        assert_eq!(client.get_networking().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_error_is_a_status_error() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/sonic/telemetry"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client.get_telemetry().await;
        assert!(
            matches!(
                result,
                Err(ClientError::Status {
                    endpoint: Endpoint::Telemetry,
                    status: 500
                })
            ),
            "expected Status error, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_request_error() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/api/sonic/networking"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            client.get_networking().await,
            Err(ClientError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_sends_only_set_fields() {
        let (server, client) = setup().await;

        Mock::given(method("PATCH"))
            .and(path("/api/sonic/auto-shut-off"))
            .and(body_json(json!({ "durationThreshold": 45 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client
            .patch_auto_shut_off(&AutoShutOffPatch {
                duration_threshold: Some(45),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_patch_is_an_error() {
        let (server, client) = setup().await;

        Mock::given(method("PATCH"))
            .and(path("/api/sonic/auto-shut-off"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let result = client
            .patch_auto_shut_off(&AutoShutOffPatch {
                enabled: Some(false),
                ..Default::default()
            })
            .await;
        assert!(matches!(
            result,
            Err(ClientError::Status {
                endpoint: Endpoint::AutoShutOff,
                status: 400
            })
        ));
    }
}
