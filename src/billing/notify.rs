//! Notification dispatch for finalized payments.
//!
//! The [`Messenger`] trait keeps this module off teloxide: the reconciler
//! and sweeps emit plain calls, the Telegram layer provides the transport.
//! Dispatch is best-effort by design — the status transition is already
//! durable when we get here, and a delivery failure must never make a
//! reconciled payment look unreconciled. Failures are logged, not retried.

use crate::billing::types::{Payment, Product, Tariff};
use crate::core::AppResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use teloxide::prelude::*;
use teloxide::types::{InputFile, UserId};

/// Outbound messaging surface used by the dispatcher and sweeps.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()>;

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()>;

    /// Mint a fresh single-use invite link for the gated channel.
    async fn create_invite_link(&self, channel_id: i64) -> AppResult<String>;

    /// Remove a user from the gated channel (ban + immediate unban, so a
    /// future subscription lets them rejoin with a new link).
    async fn remove_channel_member(&self, channel_id: i64, user_id: i64) -> AppResult<()>;
}

/// Production messenger backed by a teloxide `Bot`.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()> {
        self.bot
            .send_document(ChatId(chat_id), InputFile::file(path))
            .caption(caption.to_string())
            .await?;
        Ok(())
    }

    async fn create_invite_link(&self, channel_id: i64) -> AppResult<String> {
        let link = self
            .bot
            .create_chat_invite_link(ChatId(channel_id))
            .member_limit(1)
            .await?;
        Ok(link.invite_link)
    }

    async fn remove_channel_member(&self, channel_id: i64, user_id: i64) -> AppResult<()> {
        let user = UserId(user_id as u64);
        self.bot.ban_chat_member(ChatId(channel_id), user).await?;
        self.bot.unban_chat_member(ChatId(channel_id), user).await?;
        Ok(())
    }
}

/// Produces exactly one user notification and one admin alert per finalized
/// payment. Callers invoke it only when their terminal-status transition
/// actually applied, which is what makes "exactly once" hold across the
/// racing poller and webhook paths.
pub struct Dispatcher {
    messenger: std::sync::Arc<dyn Messenger>,
    admin_chat_id: Option<i64>,
    guides_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(messenger: std::sync::Arc<dyn Messenger>, admin_chat_id: Option<i64>, guides_dir: PathBuf) -> Self {
        Self {
            messenger,
            admin_chat_id,
            guides_dir,
        }
    }

    /// Notify the user and the admin about a succeeded payment.
    pub async fn dispatch(&self, payment: &Payment) {
        match &payment.product {
            Product::Course { slug, tariff } => {
                let mut text = format!(
                    "🎉 Оплата прошла! Курс «{}» открыт — заходите в бот обучения и начинайте первый модуль.",
                    slug
                );
                if *tariff == Tariff::WithSupport {
                    text.push_str("\n\n🤝 Ваш тариф включает сопровождение: куратор напишет вам в течение дня.");
                }
                self.send_user(payment, &text).await;
            }
            Product::MiniCourse { slug } => {
                let text = format!(
                    "🎉 Оплата прошла! Мини-курс «{}» уже доступен в боте обучения.",
                    slug
                );
                self.send_user(payment, &text).await;
            }
            Product::Consultation { kind, option } => {
                let text = format!(
                    "✅ Оплата консультации «{}» ({}) получена. Специалист свяжется с вами в ближайшее время.",
                    kind, option
                );
                self.send_user(payment, &text).await;
            }
            Product::Guide { guide_id } => {
                self.deliver_guide(payment, guide_id).await;
            }
            Product::ChannelSubscription => {
                // Subscription finalization mints an invite link and sends
                // its own message — see channel::ChannelService.
                log::debug!("dispatch: channel subscription {} handled by subscription flow", payment.id);
                return;
            }
        }

        self.alert_admin(payment).await;
    }

    async fn deliver_guide(&self, payment: &Payment, guide_id: &str) {
        let path = self.guides_dir.join(format!("{}.pdf", guide_id));
        if path.exists() {
            let caption = "📕 Ваш гайд. Спасибо за покупку!";
            if let Err(e) = self.messenger.send_document(payment.user_id, &path, caption).await {
                log::error!("Failed to deliver guide {} to user {}: {}", guide_id, payment.user_id, e);
            }
        } else {
            // Missing file is a content problem, not a payment problem.
            log::error!("Guide file not found: {}", path.display());
            self.send_user(
                payment,
                "✅ Оплата получена! Гайд придёт отдельным сообщением в ближайшее время.",
            )
            .await;
        }
    }

    async fn send_user(&self, payment: &Payment, text: &str) {
        if let Err(e) = self.messenger.send_message(payment.user_id, text).await {
            log::error!(
                "Failed to notify user {} about payment {}: {}",
                payment.user_id,
                payment.id,
                e
            );
        }
    }

    async fn alert_admin(&self, payment: &Payment) {
        let Some(admin_chat_id) = self.admin_chat_id else {
            return;
        };
        let text = format!(
            "💰 Оплата: {} {} от пользователя {}\nПродукт: {}\nПлатёж: {}",
            payment.amount_rub(),
            payment.currency,
            payment.user_id,
            payment.product.type_tag(),
            payment.id,
        );
        if let Err(e) = self.messenger.send_message(admin_chat_id, &text).await {
            log::error!("Failed to send admin alert for payment {}: {}", payment.id, e);
        }
    }
}
