//! Shared fixtures: on-disk SQLite pool, scripted gateway, recording messenger.

#![allow(dead_code)]

use async_trait::async_trait;
use kursbot::billing::{
    CreatePaymentRequest, Dispatcher, GatewayPayment, Messenger, PaymentGateway, PaymentStatus, Reconciler,
    ReconcilerConfig,
};
use kursbot::channel::{ChannelConfig, ChannelService};
use kursbot::core::{AppError, AppResult};
use kursbot::storage::{create_pool, DbPool};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const ADMIN_CHAT: i64 = 999;
pub const CHANNEL: i64 = 555;

/// Pool over a real SQLite file; the TempDir keeps it alive for the test.
pub fn test_pool() -> (Arc<DbPool>, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("test.sqlite");
    let pool = create_pool(path.to_str().expect("utf8 path")).expect("pool");
    (Arc::new(pool), dir)
}

/// A `GatewayPayment` in the given status.
pub fn remote(external_id: &str, status: PaymentStatus) -> GatewayPayment {
    GatewayPayment {
        external_id: external_id.to_string(),
        status,
        paid: status == PaymentStatus::Succeeded,
        amount: 500_000,
        currency: "RUB".into(),
        confirmation_url: Some("https://pay.example/checkout".into()),
        payment_method_id: None,
    }
}

/// Scripted gateway: per-external-id queues of fetch responses. The last
/// queued response is sticky, so repeated polling of a settled payment
/// keeps seeing the settled state.
#[derive(Default)]
pub struct MockGateway {
    fetch_responses: Mutex<HashMap<String, VecDeque<Result<GatewayPayment, String>>>>,
    create_responses: Mutex<VecDeque<Result<GatewayPayment, String>>>,
    recurring_responses: Mutex<VecDeque<Result<GatewayPayment, String>>>,
    counter: AtomicU64,
}

impl MockGateway {
    pub fn queue_fetch(&self, external_id: &str, response: Result<GatewayPayment, String>) {
        self.fetch_responses
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn queue_create(&self, response: Result<GatewayPayment, String>) {
        self.create_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_recurring(&self, response: Result<GatewayPayment, String>) {
        self.recurring_responses.lock().unwrap().push_back(response);
    }
}

fn to_app(result: Result<GatewayPayment, String>) -> AppResult<GatewayPayment> {
    result.map_err(AppError::Gateway)
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(&self, _req: &CreatePaymentRequest) -> AppResult<GatewayPayment> {
        if let Some(response) = self.create_responses.lock().unwrap().pop_front() {
            return to_app(response);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(remote(&format!("mock-{}", n), PaymentStatus::Pending))
    }

    async fn fetch_payment(&self, external_id: &str) -> AppResult<GatewayPayment> {
        let mut map = self.fetch_responses.lock().unwrap();
        let queue = map
            .get_mut(external_id)
            .ok_or_else(|| AppError::Gateway(format!("no scripted response for {}", external_id)))?;
        let response = if queue.len() > 1 {
            queue.pop_front().expect("non-empty queue")
        } else {
            queue.front().cloned().expect("non-empty queue")
        };
        to_app(response)
    }

    async fn cancel_payment(&self, _external_id: &str) -> AppResult<bool> {
        Ok(true)
    }

    async fn create_recurring(
        &self,
        _amount: i64,
        _description: &str,
        _payment_method_id: &str,
    ) -> AppResult<GatewayPayment> {
        let response = self
            .recurring_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::Gateway("no scripted recurring response".into()))?;
        to_app(response)
    }
}

/// Records every outbound call instead of talking to Telegram.
#[derive(Default)]
pub struct RecordingMessenger {
    pub messages: Mutex<Vec<(i64, String)>>,
    pub documents: Mutex<Vec<(i64, PathBuf, String)>>,
    pub removed: Mutex<Vec<(i64, i64)>>,
    invite_counter: AtomicU64,
}

impl RecordingMessenger {
    pub fn messages_to(&self, chat_id: i64) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn total_messages(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.messages.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()> {
        self.documents
            .lock()
            .unwrap()
            .push((chat_id, path.to_path_buf(), caption.to_string()));
        Ok(())
    }

    async fn create_invite_link(&self, channel_id: i64) -> AppResult<String> {
        let n = self.invite_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://t.me/+invite{}-{}", channel_id, n))
    }

    async fn remove_channel_member(&self, channel_id: i64, user_id: i64) -> AppResult<()> {
        self.removed.lock().unwrap().push((channel_id, user_id));
        Ok(())
    }
}

pub struct Stack {
    pub pool: Arc<DbPool>,
    pub gateway: Arc<MockGateway>,
    pub messenger: Arc<RecordingMessenger>,
    pub reconciler: Arc<Reconciler>,
    pub channel: Arc<ChannelService>,
    _dir: TempDir,
}

/// Full service stack over a scripted gateway and recording messenger,
/// wired the same way `main` does it.
pub fn build_stack() -> Stack {
    let (pool, dir) = test_pool();
    let gateway = Arc::new(MockGateway::default());
    let messenger = Arc::new(RecordingMessenger::default());

    let dispatcher = Arc::new(Dispatcher::new(
        messenger.clone(),
        Some(ADMIN_CHAT),
        PathBuf::from("guides"),
    ));
    let channel = Arc::new(ChannelService::new(
        pool.clone(),
        messenger.clone(),
        gateway.clone(),
        ChannelConfig {
            channel_id: Some(CHANNEL),
            period_days: 30,
            reminder_days: vec![3, 1],
            sweep_interval_secs: 3600,
            admin_chat_id: Some(ADMIN_CHAT),
        },
    ));
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        gateway.clone(),
        dispatcher,
        channel.clone(),
        ReconcilerConfig {
            poll_interval_secs: 60,
            pending_window_hours: 24,
        },
    ));

    Stack {
        pool,
        gateway,
        messenger,
        reconciler,
        channel,
        _dir: dir,
    }
}
