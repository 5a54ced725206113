//! Payment lifecycle: gateway client, reconciliation, webhook ingestion,
//! notification dispatch.

pub mod gateway;
pub mod notify;
pub mod reconcile;
pub mod types;
pub mod webhook;

// Re-exports for convenience
pub use gateway::{CreatePaymentRequest, PaymentGateway, YookassaClient};
pub use notify::{Dispatcher, Messenger, TelegramMessenger};
pub use reconcile::{start_payment, Reconciler, ReconcilerConfig};
pub use types::{GatewayPayment, Payment, PaymentStatus, Product, Tariff};
pub use webhook::{ingest_notification, WebhookOutcome};
