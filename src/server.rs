//! Inbound webhook server.
//!
//! One route per device webhook id. Gateways retry aggressively on
//! non-2xx responses, so every outcome answers 200 with a status body.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::debounce::{DebounceKey, DebounceQueue};
use crate::pipeline::extract_message;
use crate::store::traits::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub queue: DebounceQueue,
}

/// Build the webhook router.
pub fn webhook_routes(db: Arc<dyn Database>, queue: DebounceQueue) -> Router {
    let state = AppState { db, queue };

    Router::new()
        .route("/health", get(health))
        .route("/webhook/{webhook_id}", post(handle_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let device = match state.db.get_device_by_webhook_id(&webhook_id).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            debug!(webhook_id, "Webhook for unknown device");
            return ignored("unknown webhook id");
        }
        Err(e) => {
            warn!(webhook_id, error = %e, "Device lookup failed");
            return ignored("device lookup failed");
        }
    };

    // Some WAHA deployments post to the generic route; the nested
    // payload object gives the shape away.
    let provider = if payload.get("payload").is_some_and(|p| p.is_object()) {
        "waha"
    } else {
        device.provider.as_str()
    };

    match extract_message(provider, &payload) {
        Some(message) => {
            let key = DebounceKey {
                device_id: device.device_id.clone(),
                phone: message.phone.clone(),
            };
            state.queue.enqueue(key, message.text, message.push_name).await;
            (StatusCode::OK, Json(json!({"status": "queued"})))
        }
        None => ignored("no processable message"),
    }
}

fn ignored(reason: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "ignored", "reason": reason})),
    )
}
