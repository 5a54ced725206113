//! Kursbot — backend for a Telegram course/consultation business.
//!
//! The interesting parts live in `billing` (payment gateway client,
//! reconciliation poller, webhook ingestion, notification dispatch),
//! `channel` (gated-channel subscription sweeps) and `content` (drip
//! unlock computation). `core` and `storage` carry configuration, errors,
//! logging and the SQLite layer.

pub mod billing;
pub mod channel;
pub mod cli;
pub mod content;
pub mod core;
pub mod storage;

// Re-export commonly used types for convenience
pub use billing::{Dispatcher, PaymentGateway, Reconciler, ReconcilerConfig};
pub use channel::{ChannelConfig, ChannelService};
pub use core::{config, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
