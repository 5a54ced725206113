//! Inbound gateway webhook — the push half of reconciliation.
//!
//! Applies the same transition as the poller; the store's pending-guard is
//! the only synchronization needed between the two. The HTTP status tells
//! the gateway whether to retry delivery: internal failures are 500
//! (retry), everything we understood — including an unknown or already
//! final payment — is 200 (don't retry).

use crate::billing::gateway::parse_notification;
use crate::billing::reconcile::Reconciler;
use crate::core::AppResult;
use crate::storage::{get_connection, payments};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What ingesting one notification amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// This notification performed the terminal transition.
    Applied,
    /// The record was already terminal (poller got there first, or the
    /// gateway re-delivered). A no-op, not an error.
    AlreadyFinal,
    /// Structurally valid but non-terminal event; nothing to do.
    Ignored,
    /// No local payment with this external id. Logged and ignored — it may
    /// belong to another system or predate this deployment.
    UnknownPayment,
    /// Payload didn't parse as a gateway notification.
    Malformed,
    /// Internal error (database unavailable etc.) — distinct from
    /// "payment not recognized" so the gateway knows to retry.
    Failed,
}

/// Ingest one raw notification payload.
pub async fn ingest_notification(reconciler: &Reconciler, raw: &str) -> WebhookOutcome {
    let Some(note) = parse_notification(raw) else {
        log::warn!("Rejected malformed gateway notification ({} bytes)", raw.len());
        return WebhookOutcome::Malformed;
    };

    if !note.status.is_terminal() {
        log::debug!("Ignoring non-terminal notification '{}' for {}", note.event, note.external_id);
        return WebhookOutcome::Ignored;
    }

    let payment = match lookup(reconciler, &note.external_id) {
        Ok(Some(p)) => p,
        Ok(None) => {
            log::warn!("Notification for unknown external id {}, ignoring", note.external_id);
            return WebhookOutcome::UnknownPayment;
        }
        Err(e) => {
            log::error!("Webhook lookup failed for {}: {}", note.external_id, e);
            return WebhookOutcome::Failed;
        }
    };

    match reconciler.apply_gateway_status(&payment, note.status, None).await {
        Ok(true) => WebhookOutcome::Applied,
        Ok(false) => WebhookOutcome::AlreadyFinal,
        Err(e) => {
            log::error!("Webhook transition failed for payment {}: {}", payment.id, e);
            WebhookOutcome::Failed
        }
    }
}

fn lookup(reconciler: &Reconciler, external_id: &str) -> AppResult<Option<crate::billing::types::Payment>> {
    let conn = get_connection(reconciler.db_pool())?;
    payments::get_by_external_id(&conn, external_id)
}

pub fn router(reconciler: Arc<Reconciler>) -> Router {
    Router::new()
        .route("/webhook/yookassa", post(handle))
        .with_state(reconciler)
}

async fn handle(State(reconciler): State<Arc<Reconciler>>, body: String) -> StatusCode {
    match ingest_notification(&reconciler, &body).await {
        WebhookOutcome::Malformed => StatusCode::BAD_REQUEST,
        WebhookOutcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

/// Run the webhook server until the token is cancelled.
pub async fn serve(bind: &str, reconciler: Arc<Reconciler>, cancel: CancellationToken) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("Webhook server listening on {}", bind);
    axum::serve(listener, router(reconciler))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
