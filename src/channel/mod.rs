//! Gated channel subscriptions: finalization, expiry, reminders, renewal.
//!
//! Subscription payments are finalized here instead of the notification
//! dispatcher because success must additionally mint a single-use invite
//! link and open (or extend) the subscription row.
//!
//! Sweep state machine per row: `active` → `expired` (ends_at passed,
//! membership revoked) or → extended in place on successful auto-renewal.
//! Reminders fire at configured days-before thresholds, at most once per
//! threshold per subscription window.

use crate::billing::gateway::PaymentGateway;
use crate::billing::notify::Messenger;
use crate::billing::types::{Payment, PaymentStatus, Product};
use crate::core::AppResult;
use crate::storage::payments::{self, NewPayment};
use crate::storage::subscriptions::{self, Subscription};
use crate::storage::{get_connection, DbPool};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Gated channel id. None disables channel membership management
    /// (subscriptions still get recorded, logged once at startup).
    pub channel_id: Option<i64>,
    pub period_days: i64,
    /// Days-before-expiry reminder thresholds, largest first.
    pub reminder_days: Vec<i64>,
    pub sweep_interval_secs: u64,
    pub admin_chat_id: Option<i64>,
}

pub struct ChannelService {
    db_pool: Arc<DbPool>,
    messenger: Arc<dyn Messenger>,
    gateway: Arc<dyn PaymentGateway>,
    config: ChannelConfig,
}

impl ChannelService {
    pub fn new(
        db_pool: Arc<DbPool>,
        messenger: Arc<dyn Messenger>,
        gateway: Arc<dyn PaymentGateway>,
        config: ChannelConfig,
    ) -> Self {
        if config.channel_id.is_none() {
            log::warn!("CHANNEL_ID not set — gated channel features are disabled");
        }
        Self {
            db_pool,
            messenger,
            gateway,
            config,
        }
    }

    fn period(&self) -> Duration {
        Duration::days(self.config.period_days)
    }

    /// Finalize a succeeded subscription payment: mint an invite link and
    /// open a subscription (or extend the user's current one). Called from
    /// the reconciliation path after the status write is durable; messaging
    /// failures are logged and never undo anything.
    pub async fn finalize_subscription(&self, payment: &Payment, payment_method_id: Option<&str>) {
        let invite_link = match self.config.channel_id {
            Some(channel_id) => match self.messenger.create_invite_link(channel_id).await {
                Ok(link) => Some(link),
                Err(e) => {
                    log::error!("Failed to create invite link for payment {}: {}", payment.id, e);
                    None
                }
            },
            None => None,
        };

        let result = self.open_or_extend(payment, invite_link.as_deref(), payment_method_id);
        if let Err(e) = result {
            log::error!("Failed to record subscription for payment {}: {}", payment.id, e);
            return;
        }

        let text = match &invite_link {
            Some(link) => format!(
                "🎉 Подписка на закрытый канал оформлена!\nВаша персональная ссылка (одноразовая): {}",
                link
            ),
            None => "🎉 Подписка оформлена! Ссылка на канал придёт отдельным сообщением.".to_string(),
        };
        if let Err(e) = self.messenger.send_message(payment.user_id, &text).await {
            log::error!("Failed to send invite to user {}: {}", payment.user_id, e);
        }

        if let Some(admin) = self.config.admin_chat_id {
            let text = format!(
                "💰 Подписка: {} {} от пользователя {} (платёж {})",
                payment.amount_rub(),
                payment.currency,
                payment.user_id,
                payment.id
            );
            if let Err(e) = self.messenger.send_message(admin, &text).await {
                log::error!("Failed to send admin alert for subscription {}: {}", payment.id, e);
            }
        }
    }

    fn open_or_extend(&self, payment: &Payment, invite_link: Option<&str>, payment_method_id: Option<&str>) -> AppResult<()> {
        let conn = get_connection(&self.db_pool)?;
        // A repeat purchase while still active extends the current window
        // instead of opening a parallel grant.
        if let Some(existing) = subscriptions::active_for_user(&conn, payment.user_id, Utc::now())? {
            subscriptions::extend(&conn, existing.id, self.period(), &payment.id)?;
            log::info!("Extended subscription {} for user {}", existing.id, payment.user_id);
        } else {
            let sub = subscriptions::create_subscription(
                &conn,
                payment.user_id,
                invite_link,
                self.period(),
                Some(&payment.id),
                payment_method_id,
            )?;
            log::info!("Opened subscription {} for user {}", sub.id, payment.user_id);
        }
        Ok(())
    }

    /// Start the hourly sweep loop.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(self.config.sweep_interval_secs));
            log::info!(
                "Subscription sweep started (interval: {}s, reminders at {:?} days)",
                self.config.sweep_interval_secs,
                self.config.reminder_days
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("Subscription sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_sweeps(Utc::now()).await {
                            log::error!("Subscription sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// One sweep pass: reminders first (so a sub expiring right now still
    /// got its last reminder on a previous pass), then expiry/renewal.
    pub async fn run_sweeps(&self, now: DateTime<Utc>) -> AppResult<()> {
        self.run_reminder_sweep(now).await?;
        self.run_expiry_sweep(now).await?;
        Ok(())
    }

    /// Send at most one reminder per subscription per pass, for the most
    /// imminent unmet threshold; all thresholds the window has already
    /// passed get marked so they don't fire late on the next pass.
    pub async fn run_reminder_sweep(&self, now: DateTime<Utc>) -> AppResult<()> {
        let mut thresholds = self.config.reminder_days.clone();
        thresholds.sort_unstable(); // most imminent first
        let mut handled: HashSet<i64> = HashSet::new();

        for days_before in thresholds {
            let due = {
                let conn = get_connection(&self.db_pool)?;
                subscriptions::expiring_within(&conn, now, days_before)?
            };

            for sub in due {
                if handled.contains(&sub.id) || sub.was_reminded(days_before) {
                    continue;
                }
                handled.insert(sub.id);

                let text = format!(
                    "⏳ Подписка на закрытый канал заканчивается {}. Продлите её, чтобы не потерять доступ.",
                    sub.ends_at.format("%d.%m.%Y")
                );
                if let Err(e) = self.messenger.send_message(sub.user_id, &text).await {
                    // Delivery failure: don't mark, the next pass retries.
                    log::warn!("Reminder to user {} failed: {}", sub.user_id, e);
                    continue;
                }

                let conn = get_connection(&self.db_pool)?;
                // Mark every threshold this window has already crossed.
                for passed in self.config.reminder_days.iter().filter(|d| **d >= days_before) {
                    if sub.ends_at <= now + Duration::days(*passed) {
                        subscriptions::mark_reminded(&conn, sub.id, *passed)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Expire or renew subscriptions whose window has closed.
    pub async fn run_expiry_sweep(&self, now: DateTime<Utc>) -> AppResult<()> {
        let expired = {
            let conn = get_connection(&self.db_pool)?;
            subscriptions::expired_active(&conn, now)?
        };

        for sub in expired {
            let renewed = if sub.auto_renew && sub.payment_method_id.is_some() {
                self.attempt_renewal(&sub).await
            } else {
                false
            };
            if !renewed {
                // Per-item isolation: a failure here must not stop the batch.
                if let Err(e) = self.expire(&sub).await {
                    log::error!("Failed to expire subscription {}: {}", sub.id, e);
                }
            }
        }
        Ok(())
    }

    /// Charge the saved payment method. On success the window is extended
    /// in place and reminder flags reset. A still-pending charge stays a
    /// pending payment for the reconciler to settle (the caller revokes for
    /// now; a later success re-opens access through finalization). Only a
    /// declined charge or a transport error marks the payment failed.
    async fn attempt_renewal(&self, sub: &Subscription) -> bool {
        let Some(method_id) = sub.payment_method_id.as_deref() else {
            return false;
        };
        let amount = match self.renewal_amount(sub) {
            Some(a) => a,
            None => {
                log::warn!("Subscription {}: no originating payment to price renewal from", sub.id);
                return false;
            }
        };

        let local = {
            let conn = match get_connection(&self.db_pool) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("Renewal of subscription {}: pool error: {}", sub.id, e);
                    return false;
                }
            };
            match payments::create_payment(
                &conn,
                &NewPayment {
                    user_id: sub.user_id,
                    amount,
                    currency: "RUB".into(),
                    product: Product::ChannelSubscription,
                    chat_id: None,
                    message_id: None,
                },
            ) {
                Ok(p) => p,
                Err(e) => {
                    log::error!("Renewal of subscription {}: create failed: {}", sub.id, e);
                    return false;
                }
            }
        };

        let charge = self
            .gateway
            .create_recurring(amount, "Продление подписки на закрытый канал", method_id)
            .await;

        match charge {
            Ok(remote) if remote.status == PaymentStatus::Succeeded => {
                let result: AppResult<()> = (|| {
                    let conn = get_connection(&self.db_pool)?;
                    payments::attach_gateway_details(&conn, &local.id, &remote.external_id, None)?;
                    payments::apply_terminal_status(&conn, &local.id, PaymentStatus::Succeeded, Utc::now())?;
                    subscriptions::extend(&conn, sub.id, self.period(), &local.id)?;
                    Ok(())
                })();
                if let Err(e) = result {
                    log::error!("Renewal of subscription {}: bookkeeping failed: {}", sub.id, e);
                    return false;
                }
                log::info!("Renewed subscription {} for user {}", sub.id, sub.user_id);
                let _ = self
                    .messenger
                    .send_message(sub.user_id, "✅ Подписка на закрытый канал продлена.")
                    .await;
                true
            }
            Ok(remote) if remote.status == PaymentStatus::Pending => {
                // Not settled yet. Attach the external id and leave the
                // local record pending; the reconciler applies whatever the
                // gateway decides, and a success re-opens the subscription
                // through finalization.
                log::info!(
                    "Renewal charge for subscription {} is still pending, leaving it to reconciliation",
                    sub.id
                );
                let result: AppResult<()> = (|| {
                    let conn = get_connection(&self.db_pool)?;
                    payments::attach_gateway_details(&conn, &local.id, &remote.external_id, None)
                })();
                if let Err(e) = result {
                    log::error!("Renewal of subscription {}: attach failed: {}", sub.id, e);
                }
                false
            }
            Ok(remote) => {
                log::warn!(
                    "Renewal charge for subscription {} came back '{}', revoking",
                    sub.id,
                    remote.status
                );
                self.mark_renewal_failed(&local.id, Some(&remote.external_id), remote.status);
                false
            }
            Err(e) => {
                log::warn!("Renewal charge for subscription {} failed: {}, revoking", sub.id, e);
                self.mark_renewal_failed(&local.id, None, PaymentStatus::Failed);
                false
            }
        }
    }

    fn mark_renewal_failed(&self, payment_id: &str, external_id: Option<&str>, status: PaymentStatus) {
        let result: AppResult<()> = (|| {
            let conn = get_connection(&self.db_pool)?;
            if let Some(external_id) = external_id {
                payments::attach_gateway_details(&conn, payment_id, external_id, None)?;
            }
            payments::apply_terminal_status(&conn, payment_id, status, Utc::now())?;
            Ok(())
        })();
        if let Err(e) = result {
            log::error!("Failed to mark renewal payment {} as failed: {}", payment_id, e);
        }
    }

    /// Renewal price comes from the originating payment.
    fn renewal_amount(&self, sub: &Subscription) -> Option<i64> {
        let payment_id = sub.payment_id.as_deref()?;
        let conn = get_connection(&self.db_pool).ok()?;
        payments::get_payment(&conn, payment_id).ok()?.map(|p| p.amount)
    }

    /// Revoke membership, deactivate the row, send one expiry notice.
    async fn expire(&self, sub: &Subscription) -> AppResult<()> {
        if let Some(channel_id) = self.config.channel_id {
            if let Err(e) = self.messenger.remove_channel_member(channel_id, sub.user_id).await {
                // The user may have left on their own; revocation failure
                // must not keep the row active.
                log::warn!("Could not remove user {} from channel: {}", sub.user_id, e);
            }
        }

        {
            let conn = get_connection(&self.db_pool)?;
            subscriptions::deactivate(&conn, sub.id)?;
        }
        log::info!("Expired subscription {} for user {}", sub.id, sub.user_id);

        if let Err(e) = self
            .messenger
            .send_message(
                sub.user_id,
                "😔 Подписка на закрытый канал закончилась. Оформите новую, чтобы вернуться.",
            )
            .await
        {
            log::warn!("Expiry notice to user {} failed: {}", sub.user_id, e);
        }
        Ok(())
    }
}
