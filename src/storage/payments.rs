//! Payment record persistence.
//!
//! The single interesting operation here is [`apply_terminal_status`]: both
//! the reconciliation poller and the webhook path funnel through it, and its
//! `WHERE status = 'pending'` guard is what makes the two paths safe to race
//! — the second writer matches zero rows and becomes a no-op.

use crate::billing::types::{Payment, PaymentStatus, Product};
use crate::core::{AppError, AppResult};
use crate::storage::db::{ts_from_str, ts_to_str};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

/// Fields needed to open a new payment record.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: i64,
    /// Amount in kopecks.
    pub amount: i64,
    pub currency: String,
    pub product: Product,
    pub chat_id: Option<i64>,
    pub message_id: Option<i32>,
}

/// Insert a new `pending` payment. The gateway has no record of it yet;
/// `external_id` stays NULL until [`attach_gateway_details`].
pub fn create_payment(conn: &Connection, new: &NewPayment) -> AppResult<Payment> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let (tag, primary, secondary) = new.product.to_columns();

    conn.execute(
        "INSERT INTO payments (id, user_id, amount, currency, status, product_type, product_ref, product_opt,
                               created_at, chat_id, message_id)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            new.user_id,
            new.amount,
            new.currency,
            tag,
            primary,
            secondary,
            ts_to_str(created_at),
            new.chat_id,
            new.message_id,
        ],
    )?;

    Ok(Payment {
        id,
        user_id: new.user_id,
        amount: new.amount,
        currency: new.currency.clone(),
        status: PaymentStatus::Pending,
        product: new.product.clone(),
        external_id: None,
        confirmation_url: None,
        created_at,
        paid_at: None,
        chat_id: new.chat_id,
        message_id: new.message_id,
    })
}

/// Store the gateway-assigned id and checkout URL once creation succeeds.
pub fn attach_gateway_details(
    conn: &Connection,
    payment_id: &str,
    external_id: &str,
    confirmation_url: Option<&str>,
) -> AppResult<()> {
    let changed = conn.execute(
        "UPDATE payments SET external_id = ?1, confirmation_url = ?2
         WHERE id = ?3 AND external_id IS NULL",
        params![external_id, confirmation_url, payment_id],
    )?;
    if changed == 0 {
        log::warn!(
            "attach_gateway_details: payment {} already has an external id, ignoring",
            payment_id
        );
    }
    Ok(())
}

/// Remember the invoice message coordinates for later in-place edits.
pub fn set_message_coords(conn: &Connection, payment_id: &str, chat_id: i64, message_id: i32) -> AppResult<()> {
    conn.execute(
        "UPDATE payments SET chat_id = ?1, message_id = ?2 WHERE id = ?3",
        params![chat_id, message_id, payment_id],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, payment_id: &str) -> AppResult<Option<Payment>> {
    query_one(conn, "SELECT * FROM payments WHERE id = ?1", payment_id)
}

pub fn get_by_external_id(conn: &Connection, external_id: &str) -> AppResult<Option<Payment>> {
    query_one(conn, "SELECT * FROM payments WHERE external_id = ?1", external_id)
}

fn query_one(conn: &Connection, sql: &str, key: &str) -> AppResult<Option<Payment>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(payment_from_row(row)?)),
        None => Ok(None),
    }
}

/// Pending payments created within `window` of `now`, oldest first.
/// Older pending records are presumed abandoned and are not returned;
/// no expiry transition is performed for them.
pub fn pending_within(conn: &Connection, window: Duration, now: DateTime<Utc>) -> AppResult<Vec<Payment>> {
    let cutoff = ts_to_str(now - window);
    let mut stmt = conn.prepare(
        "SELECT * FROM payments WHERE status = 'pending' AND created_at >= ?1 ORDER BY created_at ASC",
    )?;
    let mut rows = stmt.query([cutoff])?;
    let mut payments = Vec::new();
    while let Some(row) = rows.next()? {
        match payment_from_row(row) {
            Ok(p) => payments.push(p),
            // A malformed row must not poison the whole batch.
            Err(e) => log::error!("Skipping malformed payment row: {}", e),
        }
    }
    Ok(payments)
}

/// All payments of a user, newest first.
pub fn payments_for_user(conn: &Connection, user_id: i64) -> AppResult<Vec<Payment>> {
    let mut stmt = conn.prepare("SELECT * FROM payments WHERE user_id = ?1 ORDER BY created_at DESC")?;
    let mut rows = stmt.query([user_id])?;
    let mut payments = Vec::new();
    while let Some(row) = rows.next()? {
        payments.push(payment_from_row(row)?);
    }
    Ok(payments)
}

/// Apply a terminal status to a pending payment. Returns `Ok(true)` when
/// this call performed the transition and `Ok(false)` when the record was
/// already terminal (idempotent no-op).
///
/// `status` and `paid_at` are written in one statement, so a cancelled
/// caller can never leave the record half-updated.
pub fn apply_terminal_status(
    conn: &Connection,
    payment_id: &str,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    if !status.is_terminal() {
        return Err(AppError::Validation(format!(
            "apply_terminal_status called with non-terminal status '{}'",
            status
        )));
    }

    let paid_at = if status == PaymentStatus::Succeeded {
        Some(ts_to_str(now))
    } else {
        None
    };

    let changed = conn.execute(
        "UPDATE payments SET status = ?1, paid_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![status.as_str(), paid_at, payment_id],
    )?;
    Ok(changed == 1)
}

fn payment_from_row(row: &Row<'_>) -> AppResult<Payment> {
    let id: String = row.get("id")?;
    let raw_status: String = row.get("status")?;
    let status = PaymentStatus::parse(&raw_status)
        .ok_or_else(|| AppError::Validation(format!("payment {}: unknown status '{}'", id, raw_status)))?;

    let tag: String = row.get("product_type")?;
    let product = Product::from_columns(&tag, row.get("product_ref")?, row.get("product_opt")?)?;

    let raw_created: String = row.get("created_at")?;
    let created_at = ts_from_str(&raw_created)
        .ok_or_else(|| AppError::Validation(format!("payment {}: bad created_at '{}'", id, raw_created)))?;
    let paid_at = row
        .get::<_, Option<String>>("paid_at")?
        .and_then(|raw| ts_from_str(&raw));

    Ok(Payment {
        id,
        user_id: row.get("user_id")?,
        amount: row.get("amount")?,
        currency: row.get("currency")?,
        status,
        product,
        external_id: row.get("external_id")?,
        confirmation_url: row.get("confirmation_url")?,
        created_at,
        paid_at,
        chat_id: row.get("chat_id")?,
        message_id: row.get("message_id")?,
    })
}
