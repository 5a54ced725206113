//! Database access: connection pool, payments, subscriptions, settings

pub mod db;
pub mod payments;
pub mod subscriptions;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
