//! Intake endpoints for the dispatch service. The webhook body is treated as
//! a trigger hint; validation beyond the ticket id stays deliberately loose.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use super::TicketEvent;

pub(super) struct WebhookServerState {
    pub(super) event_tx: UnboundedSender<TicketEvent>,
}

pub(super) fn build_webhook_router(state: Arc<WebhookServerState>) -> Router {
    Router::new()
        .route("/", get(handle_banner))
        .route("/webhook", post(handle_ticket_webhook))
        .with_state(state)
}

async fn handle_banner() -> impl IntoResponse {
    (StatusCode::OK, "deskhand dispatch service running")
}

#[derive(Debug, Deserialize)]
struct TicketWebhookPayload {
    ticket_id: Option<u64>,
    requester_id: Option<u64>,
}

async fn handle_ticket_webhook(
    State(state): State<Arc<WebhookServerState>>,
    body: String,
) -> impl IntoResponse {
    let payload: TicketWebhookPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":{"code":"invalid_payload","message":error.to_string()}})),
            )
                .into_response();
        }
    };
    let Some(ticket_id) = payload.ticket_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(
                json!({"error":{"code":"missing_ticket_id","message":"webhook payload carries no ticket_id"}}),
            ),
        )
            .into_response();
    };

    let event = TicketEvent {
        ticket_id,
        requester_id: payload.requester_id,
    };
    if state.event_tx.send(event).is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error":{"code":"queue_closed","message":"dispatch workers are not running"}})),
        )
            .into_response();
    }
    (StatusCode::OK, "queued").into_response()
}
