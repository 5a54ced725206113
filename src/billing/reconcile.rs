//! Background reconciliation against the payment gateway.
//!
//! The gateway is the source of truth; polling guarantees eventual
//! consistency when the webhook path is missed, delayed, or not configured
//! at all. Both paths converge on [`Reconciler::apply_gateway_status`],
//! whose store-level `pending`-guard makes the race harmless: whoever lands
//! first performs the transition and the notification, the other no-ops.

use crate::billing::gateway::{CreatePaymentRequest, PaymentGateway};
use crate::billing::notify::Dispatcher;
use crate::billing::types::{Payment, PaymentStatus, Product};
use crate::channel::ChannelService;
use crate::core::AppResult;
use crate::storage::{get_connection, payments, DbPool};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Tunables injected at construction (no ambient config lookup).
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Seconds between ticks.
    pub poll_interval_secs: u64,
    /// Only pending payments younger than this are reconciled. Older ones
    /// are presumed abandoned and left pending (no auto-expiry).
    pub pending_window_hours: i64,
}

pub struct Reconciler {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<Dispatcher>,
    channel: Arc<ChannelService>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<Dispatcher>,
        channel: Arc<ChannelService>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            dispatcher,
            channel,
            config,
        }
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    /// Start the polling loop. Cancelling the token stops the loop between
    /// ticks; a tick already in flight runs to completion, and the store's
    /// single-statement updates mean an abandoned tick can never leave a
    /// payment half-written.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
            log::info!(
                "Payment reconciler started (interval: {}s, window: {}h)",
                self.config.poll_interval_secs,
                self.config.pending_window_hours
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("Payment reconciler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_tick().await {
                            // A bad tick must never kill the loop.
                            log::error!("Reconciliation tick failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// One reconciliation pass over recent pending payments.
    pub async fn run_tick(&self) -> AppResult<()> {
        let now = Utc::now();
        let window = Duration::hours(self.config.pending_window_hours);
        let pending = {
            let conn = get_connection(&self.db_pool)?;
            payments::pending_within(&conn, window, now)?
        };

        if pending.is_empty() {
            return Ok(());
        }
        log::info!("Reconciling {} pending payment(s)", pending.len());

        for payment in pending {
            // Creation never completed — nothing to reconcile yet.
            let Some(external_id) = payment.external_id.clone() else {
                continue;
            };

            match self.gateway.fetch_payment(&external_id).await {
                Ok(remote) => {
                    if let Err(e) = self
                        .apply_gateway_status(&payment, remote.status, remote.payment_method_id.as_deref())
                        .await
                    {
                        log::error!("Failed to apply status for payment {}: {}", payment.id, e);
                    }
                }
                // Per-item isolation: one unreachable query must not abort
                // the rest of the batch.
                Err(e) => log::warn!("Gateway query failed for payment {}: {}", payment.id, e),
            }
        }

        Ok(())
    }

    /// The single source of truth for "is this update allowed".
    ///
    /// Applies a gateway-observed status to the local record. Non-terminal
    /// and unchanged statuses are ignored. Returns whether this call
    /// performed the transition; notifications fire only in that case, and
    /// only after the write is durable.
    pub async fn apply_gateway_status(
        &self,
        payment: &Payment,
        status: PaymentStatus,
        payment_method_id: Option<&str>,
    ) -> AppResult<bool> {
        if !status.is_terminal() || status == payment.status {
            return Ok(false);
        }

        let applied = {
            let conn = get_connection(&self.db_pool)?;
            payments::apply_terminal_status(&conn, &payment.id, status, Utc::now())?
        };
        if !applied {
            log::debug!("Payment {} already terminal, skipping", payment.id);
            return Ok(false);
        }

        log::info!("Payment {} → {}", payment.id, status);

        if status == PaymentStatus::Succeeded {
            let finalized = {
                let conn = get_connection(&self.db_pool)?;
                payments::get_payment(&conn, &payment.id)?
            };
            let Some(finalized) = finalized else {
                log::error!("Payment {} vanished after transition", payment.id);
                return Ok(true);
            };

            if finalized.product == Product::ChannelSubscription {
                let method_id = match payment_method_id {
                    Some(id) => Some(id.to_string()),
                    // The webhook payload carries no payment method; ask the
                    // gateway so auto-renewal can be set up. Best-effort.
                    None => self.lookup_payment_method(&finalized).await,
                };
                self.channel
                    .finalize_subscription(&finalized, method_id.as_deref())
                    .await;
            } else {
                self.dispatcher.dispatch(&finalized).await;
            }
        }

        Ok(true)
    }

    async fn lookup_payment_method(&self, payment: &Payment) -> Option<String> {
        let external_id = payment.external_id.as_deref()?;
        match self.gateway.fetch_payment(external_id).await {
            Ok(remote) => remote.payment_method_id,
            Err(e) => {
                log::warn!("Could not fetch payment method for {}: {}", payment.id, e);
                None
            }
        }
    }
}

/// Open a payment: record it locally first, then ask the gateway.
///
/// The local record exists before the gateway call, so a crash or transport
/// failure leaves a pending record with no external id — the poller skips
/// it, and the user can simply start a new attempt (which gets a fresh
/// idempotency key and a fresh record).
pub async fn start_payment(
    db_pool: &DbPool,
    gateway: &dyn PaymentGateway,
    new: payments::NewPayment,
    description: String,
    return_url: String,
    receipt_email: Option<String>,
) -> AppResult<Payment> {
    let mut payment = {
        let conn = get_connection(db_pool)?;
        payments::create_payment(&conn, &new)?
    };

    let request = CreatePaymentRequest {
        amount: payment.amount,
        currency: payment.currency.clone(),
        description,
        return_url,
        receipt_email,
        metadata: json!({ "payment_id": payment.id }),
        save_payment_method: payment.product == Product::ChannelSubscription,
    };

    match gateway.create_payment(&request).await {
        Ok(remote) => {
            let conn = get_connection(db_pool)?;
            payments::attach_gateway_details(&conn, &payment.id, &remote.external_id, remote.confirmation_url.as_deref())?;
            payment.external_id = Some(remote.external_id);
            payment.confirmation_url = remote.confirmation_url;
            Ok(payment)
        }
        Err(e) => {
            // Keep the record pending: the gateway may or may not have a
            // record, and the external id is unknown either way.
            log::error!("Gateway create failed for payment {}: {}", payment.id, e);
            Err(e)
        }
    }
}
