use once_cell::sync::Lazy;
use std::env;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: kursbot.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "kursbot.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kursbot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kursbot.log".to_string()));

/// Sales bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Directory with guide PDF files delivered after a guide purchase
/// Read from GUIDES_DIR environment variable
pub static GUIDES_DIR: Lazy<String> = Lazy::new(|| env::var("GUIDES_DIR").unwrap_or_else(|_| "guides".to_string()));

/// Billing / payment gateway configuration
pub mod billing {
    use super::{env, Lazy};

    /// YooKassa shop id. Required — startup fails without it.
    pub static SHOP_ID: Lazy<String> = Lazy::new(|| env::var("KURSBOT_SHOP_ID").unwrap_or_else(|_| String::new()));

    /// YooKassa secret key. Required — startup fails without it.
    pub static SECRET_KEY: Lazy<String> =
        Lazy::new(|| env::var("KURSBOT_SECRET_KEY").unwrap_or_else(|_| String::new()));

    /// Gateway API base URL. Overridable for staging/tests.
    pub static API_URL: Lazy<String> =
        Lazy::new(|| env::var("KURSBOT_GATEWAY_URL").unwrap_or_else(|_| "https://api.yookassa.ru/v3".to_string()));

    /// Redirect URL the gateway sends the user back to after checkout.
    pub static RETURN_URL: Lazy<String> =
        Lazy::new(|| env::var("KURSBOT_RETURN_URL").unwrap_or_else(|_| "https://t.me".to_string()));

    /// Interval between reconciliation ticks, in seconds.
    pub static POLL_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
        env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60)
    });

    /// Recency window for pending payments, in hours. Pending records older
    /// than this are presumed abandoned and left alone by the poller.
    pub static PENDING_WINDOW_HOURS: Lazy<i64> = Lazy::new(|| {
        env::var("PENDING_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24)
    });

    /// Bind address for the inbound webhook server (e.g. "0.0.0.0:8080").
    /// When unset the webhook path is disabled and polling is the only
    /// reconciliation channel.
    pub static WEBHOOK_BIND: Lazy<Option<String>> = Lazy::new(|| env::var("KURSBOT_WEBHOOK_BIND").ok());
}

/// Gated channel / subscription configuration
pub mod channel {
    use super::{env, Lazy};

    /// Telegram id of the gated channel. Optional — when unset, channel
    /// subscription features are disabled (logged once at startup).
    pub static CHANNEL_ID: Lazy<Option<i64>> = Lazy::new(|| env::var("CHANNEL_ID").ok().and_then(|v| v.parse().ok()));

    /// Subscription period in days.
    pub static SUBSCRIPTION_PERIOD_DAYS: Lazy<i64> = Lazy::new(|| {
        env::var("SUBSCRIPTION_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    });

    /// Days-before-expiry thresholds for reminder messages.
    /// Read from REMINDER_DAYS as a comma-separated list, default "3,1".
    pub static REMINDER_DAYS: Lazy<Vec<i64>> = Lazy::new(|| {
        let raw = env::var("REMINDER_DAYS").unwrap_or_else(|_| "3,1".to_string());
        let mut days: Vec<i64> = raw.split(',').filter_map(|p| p.trim().parse().ok()).collect();
        days.sort_unstable_by(|a, b| b.cmp(a));
        days.dedup();
        days
    });

    /// Interval between subscription sweep runs, in seconds.
    pub static SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
        env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600)
    });
}

/// Admin notification configuration
pub mod admin {
    use super::{env, Lazy};

    /// Chat id that receives admin alerts (payment confirmations, sweep
    /// failures). Optional — alerts are skipped when unset.
    pub static ADMIN_CHAT_ID: Lazy<Option<i64>> =
        Lazy::new(|| env::var("ADMIN_CHAT_ID").ok().and_then(|v| v.parse().ok()));
}

/// Validate that required credentials are present.
///
/// Gateway credentials are mandatory: without them no payment can be
/// created or reconciled, so the process refuses to start. Optional
/// features (gated channel, admin alerts) degrade instead.
pub fn ensure_required() -> anyhow::Result<()> {
    if BOT_TOKEN.is_empty() {
        anyhow::bail!("BOT_TOKEN (or TELOXIDE_TOKEN) is not set");
    }
    if billing::SHOP_ID.is_empty() || billing::SECRET_KEY.is_empty() {
        anyhow::bail!("KURSBOT_SHOP_ID / KURSBOT_SECRET_KEY are not set — payment gateway credentials are required");
    }
    Ok(())
}
