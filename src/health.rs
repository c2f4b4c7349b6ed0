//! Health checks and the Telegram webhook endpoint.
//!
//! The server runs in both delivery modes. It reads a shared "running" flag
//! and, in webhook mode, hands parsed updates to the dispatch worker through
//! a bounded queue. It never touches conversation state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use teloxide::types::Update;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const SERVICE_NAME: &str = "mindmate-bot";
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeliveryMode {
    Polling,
    Webhook,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Polling => "polling",
            DeliveryMode::Webhook => "webhook",
        }
    }
}

/// Where webhook updates go.
#[derive(Clone)]
pub struct WebhookIntake {
    tx: mpsc::Sender<Update>,
    secret: Option<String>,
}

impl WebhookIntake {
    pub fn new(tx: mpsc::Sender<Update>, secret: Option<String>) -> Self {
        Self { tx, secret }
    }
}

#[derive(Clone)]
pub struct HttpState {
    running: Arc<AtomicBool>,
    mode: DeliveryMode,
    webhook: Option<WebhookIntake>,
    features: Vec<String>,
}

impl HttpState {
    pub fn new(mode: DeliveryMode, running: Arc<AtomicBool>) -> Self {
        Self {
            running,
            mode,
            webhook: None,
            features: Vec::new(),
        }
    }

    pub fn with_webhook(mut self, intake: WebhookIntake) -> Self {
        self.webhook = Some(intake);
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }
}

/// JSON body for `/` (summary) and `/health` (detailed).
pub fn status_payload(state: &HttpState, detailed: bool) -> Value {
    let running = state.running.load(Ordering::SeqCst);
    let mut payload = json!({
        "status": if running { "healthy" } else { "degraded" },
        "service": SERVICE_NAME,
        "mode": state.mode.as_str(),
        "bot_running": running,
    });

    if detailed {
        let mut endpoints = vec!["GET /", "GET /health"];
        if state.mode == DeliveryMode::Webhook {
            endpoints.push("POST /webhook");
        }
        payload["version"] = json!(env!("CARGO_PKG_VERSION"));
        payload["features"] = json!(state.features);
        payload["endpoints"] = json!(endpoints);
    }
    payload
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Bind `0.0.0.0:port` and serve until the process exits.
pub async fn serve(port: u16, state: HttpState) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("🩺 Health server listening on port {}", port);
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: HttpState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn root(State(state): State<HttpState>) -> Json<Value> {
    Json(status_payload(&state, false))
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    Json(status_payload(&state, true))
}

async fn webhook(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
    let Some(intake) = state.webhook else {
        return (StatusCode::NOT_FOUND, "Webhook disabled");
    };

    if let Some(expected) = intake.secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("Rejected webhook call with a wrong secret token");
            return (StatusCode::UNAUTHORIZED, "Wrong secret token");
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Malformed webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let update_id = update.id.0;
    match intake.tx.try_send(update) {
        Ok(()) => {
            debug!("Queued webhook update {}", update_id);
            (StatusCode::OK, "Ok")
        }
        Err(e) => {
            warn!("Dropping webhook update {}: {}", update_id, e);
            (StatusCode::SERVICE_UNAVAILABLE, "Busy")
        }
    }
}
