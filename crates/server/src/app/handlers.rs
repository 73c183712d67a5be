use super::error::HttpResult;
use super::types::*;
use super::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};
use whatsbridge_link::{BulkReport, ConnectionStatus, SendReceipt, StatusUpdate};
use whatsbridge_whatsapp::{MediaKind, OutgoingMessage};

const LIVE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        status: "running",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        connected: state.status.is_connected(),
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "whatsapp-bot",
        connected: state.status.is_connected(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.status.snapshot())
}

/// Asks the client itself rather than trusting the status record.
pub async fn connected(State(state): State<AppState>) -> Json<LiveCheckResponse> {
    let (connected, error) =
        match tokio::time::timeout(LIVE_CHECK_TIMEOUT, state.client.is_connected()).await {
            Ok(Ok(live)) => (live, None),
            Ok(Err(e)) => {
                warn!("Live connection check failed: {}", e);
                (false, Some(e.to_string()))
            }
            Err(_) => {
                warn!("Live connection check timed out");
                (false, Some("Timed out checking the connection".to_string()))
            }
        };

    Json(LiveCheckResponse {
        connected,
        checked_at: Utc::now(),
        error,
    })
}

fn sent(receipt: SendReceipt, what: &str) -> Json<SendMessageResponse> {
    Json(SendMessageResponse {
        status: "success",
        message: format!("{} sent successfully", what),
        phone_number: receipt.phone_number,
        message_id: receipt.message_id,
    })
}

pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> HttpResult<Json<SendMessageResponse>> {
    let Json(req) = body?;
    let receipt = state
        .dispatcher
        .send(&req.phone_number, &OutgoingMessage::Text(req.message))
        .await?;
    Ok(sent(receipt, "Message"))
}

async fn send_media(
    state: AppState,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
    kind: MediaKind,
) -> HttpResult<Json<SendMessageResponse>> {
    let Json(req) = body?;
    let (phone, media) = req.into_media(kind);
    let receipt = state
        .dispatcher
        .send(&phone, &OutgoingMessage::Media(media))
        .await?;

    let what = match kind {
        MediaKind::Image => "Image",
        MediaKind::Audio => "Audio",
        MediaKind::Document => "Document",
    };
    Ok(sent(receipt, what))
}

pub async fn send_image(
    State(state): State<AppState>,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
) -> HttpResult<Json<SendMessageResponse>> {
    send_media(state, body, MediaKind::Image).await
}

pub async fn send_audio(
    State(state): State<AppState>,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
) -> HttpResult<Json<SendMessageResponse>> {
    send_media(state, body, MediaKind::Audio).await
}

pub async fn send_document(
    State(state): State<AppState>,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
) -> HttpResult<Json<SendMessageResponse>> {
    send_media(state, body, MediaKind::Document).await
}

pub async fn send_bulk(
    State(state): State<AppState>,
    body: Result<Json<SendBulkRequest>, JsonRejection>,
) -> HttpResult<Json<BulkReport>> {
    let Json(req) = body?;
    let report = state
        .dispatcher
        .send_bulk(&req.phone_numbers, &req.message)
        .await;
    Ok(Json(report))
}

/// Only flips the local record; the underlying session stays up.
pub async fn disconnect(State(state): State<AppState>) -> Json<ActionResponse> {
    state.status.apply(StatusUpdate::DisconnectedByUser);
    info!("Marked disconnected by user");
    Json(ActionResponse {
        status: "success",
        message: "Disconnected successfully",
    })
}

pub async fn restart(State(state): State<AppState>) -> Json<ActionResponse> {
    warn!("Restart requested, shutting down");
    state.restart.store(true, Ordering::SeqCst);
    state.shutdown.cancel();
    Json(ActionResponse {
        status: "success",
        message: "Restarting",
    })
}
