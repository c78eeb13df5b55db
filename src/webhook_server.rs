// HTTP server for Midtrans payment and Iris payout notifications

use crate::ledger::donation::DonationService;
use crate::ledger::withdrawal::WithdrawalService;
use crate::midtrans::errors::WebhookError;
use crate::midtrans::webhook;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct WebhookState {
    pub donations: Arc<DonationService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub server_key: String,
    pub iris_merchant_key: String,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/api/midtrans/notification", post(handle_midtrans_notification))
        .route("/api/midtrans/iris/notification", post(handle_iris_notification))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_webhook_server(port: u16, state: WebhookState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting webhook HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn error_response(e: WebhookError) -> (StatusCode, String) {
    let status_code =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status_code.is_server_error() {
        error!("Notification processing failed: {}", e);
    } else {
        warn!("Notification rejected: {}", e);
    }
    (status_code, e.to_string())
}

async fn handle_midtrans_notification(
    State(state): State<WebhookState>,
    body: Bytes,
) -> impl IntoResponse {
    match webhook::handle_notification(&body, &state.server_key, &state.donations).await {
        Ok(_) => (StatusCode::OK, "OK".to_string()),
        Err(e) => error_response(e),
    }
}

async fn handle_iris_notification(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match webhook::handle_iris_notification(
        &body,
        &headers,
        &state.iris_merchant_key,
        &state.withdrawals,
    )
    .await
    {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => error_response(e),
    }
}
