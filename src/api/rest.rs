use crate::config::ApiConfig;
use crate::db::PlateStore;
use crate::error::Error;
use crate::services::{DetectionEvent, DetectionIngestor, IngestOutcome};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const WEBHOOK_ACK: &str = "Webhook received and acknowledged.";

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<DetectionIngestor>,
    pub store: Arc<dyn PlateStore>,
    /// Ingestions started by requests, awaited on shutdown
    pub tasks: TaskTracker,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(
        config: &ApiConfig,
        ingestor: Arc<DetectionIngestor>,
        store: Arc<dyn PlateStore>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            config: config.clone(),
            state: AppState {
                ingestor,
                store,
                tasks,
            },
        }
    }

    /// Serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state.clone());

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid API address {}: {}", addr, e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add_plate_data_with_image", post(add_plate_data))
        .route("/webhook", post(unifi_webhook))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Ingest in the background; callers are never told the outcome.
fn dispatch(state: &AppState, event: DetectionEvent) {
    let ingestor = state.ingestor.clone();
    state.tasks.spawn(async move {
        let raw = event.raw_plate.clone();
        match ingestor.ingest(event).await {
            Ok(IngestOutcome::Rejected(reason)) => {
                debug!("Pushed plate {:?} rejected: {}", raw, reason)
            }
            Ok(outcome) => debug!("Pushed plate {:?}: {:?}", raw, outcome),
            Err(e) => warn!("Dropping pushed detection {:?}: {:#}", raw, e),
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub plate_number: String,
    /// Defaults to the time the request arrives
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Acknowledged even when the body is unusable; the sender has no retry.
async fn add_plate_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PushRequest>, JsonRejection>,
) -> Json<Value> {
    match payload {
        Ok(Json(request)) => {
            info!("Plate pushed: {}", request.plate_number);
            let capture_time = request.timestamp.unwrap_or_else(Utc::now);
            dispatch(&state, DetectionEvent::new(&request.plate_number, capture_time));
        }
        Err(e) => warn!("Pushed plate body not understood: {}", e.body_text()),
    }

    Json(json!({ "message": "Data processed" }))
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    alarm: Option<Alarm>,
    /// Milliseconds since the epoch
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct Alarm {
    #[serde(default)]
    triggers: Vec<Trigger>,
    #[serde(default)]
    thumbnail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Trigger {
    #[serde(default)]
    value: Option<String>,
}

/// Decode a base64 image, with or without a `data:` URL prefix
fn decode_thumbnail(thumbnail: &str) -> Option<Vec<u8>> {
    let encoded = match thumbnail.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data)?,
        None => thumbnail,
    };

    match STANDARD.decode(encoded.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            warn!("Ignoring undecodable webhook thumbnail: {}", e);
            None
        }
    }
}

/// UniFi Protect license plate alarm
async fn unifi_webhook(
    State(state): State<AppState>,
    payload: std::result::Result<Json<WebhookPayload>, JsonRejection>,
) -> &'static str {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(e) => {
            warn!("Webhook body not understood: {}", e.body_text());
            return WEBHOOK_ACK;
        }
    };

    let alarm = payload.alarm.unwrap_or_default();
    let plate = alarm
        .triggers
        .into_iter()
        .next()
        .and_then(|t| t.value)
        .map(|v| {
            v.chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase()
        })
        .filter(|v| !v.is_empty());

    let Some(plate) = plate else {
        warn!("Webhook received, but no plate data was found");
        return WEBHOOK_ACK;
    };
    info!("Webhook plate: {}", plate);

    let capture_time = payload
        .timestamp
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let mut event = DetectionEvent::new(&plate, capture_time);
    if let Some(image) = alarm.thumbnail.as_deref().and_then(decode_thumbnail) {
        event = event.with_snapshot(image);
    }
    dispatch(&state, event);

    WEBHOOK_ACK
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.store.health_check().await?;
    Ok(Json(json!({ "status": "ok", "pending_ingestions": state.tasks.len() })))
}
