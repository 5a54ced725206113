use anyhow::Result;
use chrono::Utc;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use kursbot::billing::{webhook, Dispatcher, Messenger, PaymentGateway, TelegramMessenger, YookassaClient};
use kursbot::channel::{ChannelConfig, ChannelService};
use kursbot::cli::{Cli, Commands};
use kursbot::core::{config, init_logger};
use kursbot::storage::create_pool;
use kursbot::{Reconciler, ReconcilerConfig};

/// Main entry point for the bot backend.
///
/// Wires every service explicitly at startup (no global service handles)
/// and dispatches to the requested subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env before any config is read.
    let _ = dotenv();

    // Catch panics from spawned tasks so they get logged instead of
    // silently terminating the process.
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH)?;

    // Credentials fail fast; optional features degrade inside the services.
    config::ensure_required()?;

    let pool = Arc::new(create_pool(&config::DATABASE_PATH)?);

    let bot = Bot::new(config::BOT_TOKEN.clone());
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(YookassaClient::new(
        &config::billing::API_URL,
        &config::billing::SHOP_ID,
        &config::billing::SECRET_KEY,
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        messenger.clone(),
        *config::admin::ADMIN_CHAT_ID,
        PathBuf::from(config::GUIDES_DIR.clone()),
    ));
    let channel = Arc::new(ChannelService::new(
        pool.clone(),
        messenger.clone(),
        gateway.clone(),
        ChannelConfig {
            channel_id: *config::channel::CHANNEL_ID,
            period_days: *config::channel::SUBSCRIPTION_PERIOD_DAYS,
            reminder_days: config::channel::REMINDER_DAYS.clone(),
            sweep_interval_secs: *config::channel::SWEEP_INTERVAL_SECS,
            admin_chat_id: *config::admin::ADMIN_CHAT_ID,
        },
    ));
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        gateway.clone(),
        dispatcher.clone(),
        channel.clone(),
        ReconcilerConfig {
            poll_interval_secs: *config::billing::POLL_INTERVAL_SECS,
            pending_window_hours: *config::billing::PENDING_WINDOW_HOURS,
        },
    ));

    match cli.command {
        Some(Commands::Reconcile) => {
            log::info!("Running a single reconciliation tick");
            reconciler.run_tick().await?;
            return Ok(());
        }
        Some(Commands::Sweep) => {
            log::info!("Running a single subscription sweep");
            channel.run_sweeps(Utc::now()).await?;
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let cancel = CancellationToken::new();
    let mut handles = vec![
        reconciler.clone().start(cancel.clone()),
        channel.clone().start(cancel.clone()),
    ];

    if let Some(bind) = config::billing::WEBHOOK_BIND.clone() {
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = webhook::serve(&bind, reconciler, cancel).await {
                log::error!("Webhook server failed: {}", e);
            }
        }));
    } else {
        log::info!("KURSBOT_WEBHOOK_BIND not set — polling is the only reconciliation channel");
    }

    signal::ctrl_c().await?;
    log::info!("Shutdown signal received, stopping services");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    log::info!("Shutdown complete");

    Ok(())
}
