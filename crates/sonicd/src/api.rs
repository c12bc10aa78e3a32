use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::Device;
use crate::engine::Engine;
use crate::engine::EntityRecord;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Body of POST /v1/entities/:entity_id/set
#[derive(Debug, Deserialize)]
struct SetValueRequest {
    value: f64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommandError::UnknownEntity(_) | CommandError::UnknownWebhook(_) => {
                StatusCode::NOT_FOUND
            }
            CommandError::Unsupported { .. } => StatusCode::BAD_REQUEST,
            CommandError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CommandError::Device(_) => StatusCode::BAD_GATEWAY,
            CommandError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> Json<Vec<EntityRecord>> {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.entities.values().cloned().collect())
}

/// Handler for GET /v1/entities/:entity_id
#[tracing::instrument(skip(state))]
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityRecord>, CommandError> {
    let snapshot = state.engine.state_snapshot();
    snapshot
        .entities
        .get(&entity_id)
        .cloned()
        .map(Json)
        .ok_or(CommandError::UnknownEntity(entity_id))
}

/// Handler for GET /v1/devices
#[tracing::instrument(skip(state))]
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.devices.values().cloned().collect())
}

/// Handler for POST /v1/entities/:entity_id/set
#[tracing::instrument(skip(state))]
async fn set_value(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(request): Json<SetValueRequest>,
) -> Result<StatusCode, CommandError> {
    state.engine.set_number(&entity_id, request.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/entities/:entity_id/turn_on
#[tracing::instrument(skip(state))]
async fn turn_on(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, CommandError> {
    state.engine.set_switch(&entity_id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/entities/:entity_id/turn_off
#[tracing::instrument(skip(state))]
async fn turn_off(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, CommandError> {
    state.engine.set_switch(&entity_id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/webhook/:webhook_id
///
/// The refresh runs in the background; the caller only learns that it was requested.
#[tracing::instrument(skip(state))]
async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(webhook_id): Path<String>,
) -> Result<StatusCode, CommandError> {
    state.engine.trigger_webhook(&webhook_id)?;
    Ok(StatusCode::ACCEPTED)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:entity_id", get(get_entity))
        .route("/v1/entities/:entity_id/set", post(set_value))
        .route("/v1/entities/:entity_id/turn_on", post(turn_on))
        .route("/v1/entities/:entity_id/turn_off", post(turn_off))
        .route("/v1/devices", get(list_devices))
        .route("/v1/webhook/:webhook_id", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `engine` - The engine whose state is exposed and which receives commands
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
///
/// # Returns
/// Returns Ok(()) if the server shuts down gracefully, or an error if startup fails
pub async fn serve(
    engine: Arc<Engine>,
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::testing::number_descriptor;
    use crate::engine::testing::sensor_descriptor;
    use crate::engine::testing::switch_descriptor;
    use crate::engine::testing::FakeIntegration;
    use crate::engine::EntityDescriptor;
    use crate::engine::EntityState;
    use crate::engine::FromIntegrationMessage;
    use crate::engine::StateValue;

    const SENSOR: &str = "sensor.kitchen_water_pressure";
    const NUMBER: &str = "number.kitchen_auto_shut_off_volume";
    const SWITCH: &str = "switch.kitchen_auto_shut_off";

    struct Harness {
        router: Router,
        fake_switched: Arc<std::sync::Mutex<Vec<bool>>>,
        fake_refreshes: Arc<std::sync::atomic::AtomicUsize>,
        engine: Arc<Engine>,
    }

    fn discover(engine: &Engine, descriptor: EntityDescriptor) {
        engine.handle_event(FromIntegrationMessage::EntityDiscovered {
            descriptor,
            integration_name: "fake".to_string(),
        });
    }

    fn harness() -> Harness {
        let mut engine = Engine::new();
        let fake = FakeIntegration::default();
        let fake_switched = fake.switched.clone();
        let fake_refreshes = fake.refreshes.clone();
        engine.register_integration("fake".to_string(), Box::new(fake));

        discover(&engine, sensor_descriptor(SENSOR));
        discover(&engine, number_descriptor(NUMBER));
        discover(&engine, switch_descriptor(SWITCH));
        engine.handle_event(FromIntegrationMessage::EntityStateChanged {
            entity_id: SENSOR.to_string(),
            state: EntityState::new(Some(StateValue::Float(3200.0)), true),
        });
        engine.handle_event(FromIntegrationMessage::WebhookRegistered {
            webhook_id: "abc123".to_string(),
            integration_name: "fake".to_string(),
        });

        let engine = Arc::new(engine);
        let router = create_router(Arc::new(AppState {
            version: "test",
            engine: engine.clone(),
        }));
        Harness {
            router,
            fake_switched,
            fake_refreshes,
            engine,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_ping_and_info() {
        let h = harness();
        let (status, body) = call(&h.router, "GET", "/v1/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));

        let (status, body) = call(&h.router, "GET", "/v1/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "test");
        assert!(body["hostname"].is_string());
    }

    #[tokio::test]
    async fn test_entities() {
        let h = harness();
        let (status, body) = call(&h.router, "GET", "/v1/entities", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let uri = format!("/v1/entities/{}", SENSOR);
        let (status, body) = call(&h.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["descriptor"]["platform"], "sensor");
        assert_eq!(body["state"]["value"], 3200.0);
        assert_eq!(body["state"]["available"], true);
        assert_eq!(body["integration"], "fake");

        let (status, body) = call(&h.router, "GET", "/v1/entities/sensor.nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown entity: sensor.nope");

        let (status, body) = call(&h.router, "GET", "/v1/devices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_set_value_maps_errors() {
        let h = harness();
        let uri = format!("/v1/entities/{}/set", NUMBER);

        let (status, _) = call(&h.router, "POST", &uri, Some(json!({ "value": 200 }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // The fake integration refuses values above 1000 as a device failure.
        let (status, _) = call(&h.router, "POST", &uri, Some(json!({ "value": 5000 }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = call(
            &h.router,
            "POST",
            &format!("/v1/entities/{}/set", SENSOR),
            Some(json!({ "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &h.router,
            "POST",
            "/v1/entities/number.nope/set",
            Some(json!({ "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_switch_commands() {
        let h = harness();
        let turn_off = format!("/v1/entities/{}/turn_off", SWITCH);
        let turn_on = format!("/v1/entities/{}/turn_on", SWITCH);
        let (status, _) = call(&h.router, "POST", &turn_off, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&h.router, "POST", &turn_on, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(h.fake_switched.lock().unwrap().as_slice(), &[false, true]);
    }

    #[tokio::test]
    async fn test_webhook() {
        let h = harness();
        let (status, _) = call(&h.router, "POST", "/v1/webhook/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&h.router, "POST", "/v1/webhook/abc123", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        h.engine.shutdown().await;
        assert_eq!(
            h.fake_refreshes.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_unavailable_integration() {
        let h = harness();
        h.engine.shutdown().await;
        let turn_on = format!("/v1/entities/{}/turn_on", SWITCH);
        let (status, _) = call(&h.router, "POST", &turn_on, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
