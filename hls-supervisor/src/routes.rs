use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use config_manager::{CameraConfig, CameraStore, ConfigError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::args::TranscodeOptions;
use crate::error::StreamError;
use crate::probe::{self, ProbeReport};
use crate::registry::{StopOutcome, StreamRegistry};
use crate::status::StreamSnapshot;

/// Shared state for the control endpoints.
pub struct ControlState {
    pub registry: Arc<StreamRegistry>,
    /// Camera configurations for requests that name only an id
    pub cameras: Arc<CameraStore>,
    pub probe_timeout: Duration,
}

impl ControlState {
    pub fn new(registry: Arc<StreamRegistry>, cameras: Arc<CameraStore>) -> Self {
        Self {
            registry,
            cameras,
            probe_timeout: probe::DEFAULT_PROBE_TIMEOUT,
        }
    }

    fn camera(&self, camera_id: &str) -> Result<CameraConfig, StreamError> {
        self.cameras
            .get(camera_id)?
            .ok_or_else(|| StreamError::NotFound(format!("camera {}", camera_id)))
    }
}

/// Create the control router.
///
/// | Endpoint | Description |
/// |----------|-------------|
/// | `GET /streams` | All stream snapshots |
/// | `GET /streams/{id}` | One snapshot |
/// | `POST /streams/{id}/start` | Start or reuse a stream |
/// | `POST /streams/{id}/stop` | Stop a stream and remove its files |
/// | `POST /cameras/{id}/probe` | Check that a camera answers RTSP |
pub fn control_router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/streams", get(list_streams_handler))
        .route("/streams/{id}", get(stream_status_handler))
        .route("/streams/{id}/start", post(start_stream_handler))
        .route("/streams/{id}/stop", post(stop_stream_handler))
        .route("/cameras/{id}/probe", post(probe_camera_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Inline camera; looked up in the camera store when absent
    pub camera: Option<CameraConfig>,
    pub quality: Option<String>,
    pub options: TranscodeOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub public_url: String,
    pub quality: String,
    pub message: String,
}

async fn list_streams_handler(State(state): State<Arc<ControlState>>) -> Json<Vec<StreamSnapshot>> {
    Json(state.registry.snapshots())
}

async fn stream_status_handler(
    Path(id): Path<String>,
    State(state): State<Arc<ControlState>>,
) -> Result<Json<StreamSnapshot>, ApiErrorResponse> {
    state
        .registry
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| StreamError::NotFound(format!("stream {}", id)).into())
}

async fn start_stream_handler(
    Path(id): Path<String>,
    State(state): State<Arc<ControlState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiErrorResponse> {
    let camera = match request.camera {
        Some(camera) => camera,
        None => state.camera(&id)?,
    };
    let quality = request
        .quality
        .or_else(|| state.cameras.quality(&id).map(str::to_string));

    let started = state
        .registry
        .start_stream_with(&id, &camera, quality.as_deref(), request.options)
        .await?;

    Ok(Json(StartResponse {
        success: true,
        public_url: started.public_url,
        quality: started.quality,
        message: started.message,
    }))
}

async fn stop_stream_handler(
    Path(id): Path<String>,
    State(state): State<Arc<ControlState>>,
) -> Json<StopOutcome> {
    Json(state.registry.stop_stream(&id).await)
}

async fn probe_camera_handler(
    Path(id): Path<String>,
    State(state): State<Arc<ControlState>>,
) -> Result<Json<ProbeReport>, ApiErrorResponse> {
    let camera = state.camera(&id)?;
    let report = probe::test_connection(&camera, state.probe_timeout).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Error response wrapper for StreamError
pub struct ApiErrorResponse(StreamError);

impl From<StreamError> for ApiErrorResponse {
    fn from(e: StreamError) -> Self {
        ApiErrorResponse(e)
    }
}

impl From<ConfigError> for ApiErrorResponse {
    fn from(e: ConfigError) -> Self {
        ApiErrorResponse(e.into())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            StreamError::ConfigurationInvalid(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            StreamError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()),
        };

        tracing::warn!("Control request failed: {}", self.0);

        (
            status,
            Json(ErrorBody {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, FakeLauncher};
    use axum::body::Body;
    use axum::http::Request;
    use config_manager::StreamingConfig;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _temp_dir: TempDir,
        launcher: Arc<FakeLauncher>,
        router: Router,
    }

    fn harness() -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = StreamRegistry::new(
            StreamingConfig::default().with_output_dir(temp_dir.path()),
            launcher.clone(),
        )
        .unwrap();

        let mut cameras = CameraStore::default();
        cameras.insert("porch", &CameraConfig::new("192.168.1.20", 554, "/live"));

        let state = ControlState::new(Arc::new(registry), Arc::new(cameras));
        Harness {
            _temp_dir: temp_dir,
            launcher,
            router: control_router(Arc::new(state)),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_start_status_stop() {
        let h = harness();

        let camera = json!({ "camera": { "ip": "192.168.1.100", "port": 554, "path": "/stream" }, "quality": "low" });
        let (status, body) = send(&h.router, "POST", "/streams/cam1/start", Some(camera)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["publicUrl"], "/hls/stream_cam1.m3u8");
        assert_eq!(body["quality"], "low");

        let (status, body) = send(&h.router, "GET", "/streams", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&h.router, "GET", "/streams/cam1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cameraId"], "cam1");
        assert_eq!(body["maxAttempts"], 5);

        let (status, body) = send(&h.router, "POST", "/streams/cam1/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&h.router, "GET", "/streams/cam1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (_, body) = send(&h.router, "POST", "/streams/cam1/stop", None).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_start_uses_camera_store() {
        let h = harness();

        let (status, body) = send(&h.router, "POST", "/streams/porch/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["publicUrl"], "/hls/stream_porch.m3u8");
        assert_eq!(body["quality"], "medium");

        let (status, _) = send(&h.router, "POST", "/streams/garage/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_camera_is_bad_request() {
        let h = harness();

        let camera = json!({ "camera": { "ip": "192.168.1.100", "port": 0, "path": "/stream" } });
        let (status, body) = send(&h.router, "POST", "/streams/cam1/start", Some(camera)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("port"));

        let (_, body) = send(&h.router, "GET", "/streams", None).await;
        assert!(body.as_array().unwrap().is_empty());
        assert_eq!(h.launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_probe_unknown_camera() {
        let h = harness();
        let (status, _) = send(&h.router, "POST", "/cameras/garage/probe", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
