//! Channel subscription persistence.
//!
//! Reminder state is a comma-separated list of days-before thresholds that
//! were already sent ("3,1"), so each configured threshold fires at most
//! once per subscription window. Renewal clears the list, opening a fresh
//! reminder window.

use crate::core::{AppError, AppResult};
use crate::storage::db::{ts_from_str, ts_to_str};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub invite_link: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub payment_id: Option<String>,
    /// Thresholds (days before expiry) already reminded about.
    pub reminders_sent: Vec<i64>,
    pub payment_method_id: Option<String>,
    pub auto_renew: bool,
}

impl Subscription {
    pub fn was_reminded(&self, days_before: i64) -> bool {
        self.reminders_sent.contains(&days_before)
    }
}

/// Create an active subscription starting now.
pub fn create_subscription(
    conn: &Connection,
    user_id: i64,
    invite_link: Option<&str>,
    period: Duration,
    payment_id: Option<&str>,
    payment_method_id: Option<&str>,
) -> AppResult<Subscription> {
    let starts_at = Utc::now();
    let ends_at = starts_at + period;
    conn.execute(
        "INSERT INTO subscriptions (user_id, invite_link, starts_at, ends_at, is_active,
                                    payment_id, payment_method_id, auto_renew)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)",
        params![
            user_id,
            invite_link,
            ts_to_str(starts_at),
            ts_to_str(ends_at),
            payment_id,
            payment_method_id,
            payment_method_id.is_some() as i64,
        ],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Subscription {
        id,
        user_id,
        invite_link: invite_link.map(str::to_string),
        starts_at,
        ends_at,
        is_active: true,
        payment_id: payment_id.map(str::to_string),
        reminders_sent: Vec::new(),
        payment_method_id: payment_method_id.map(str::to_string),
        auto_renew: payment_method_id.is_some(),
    })
}

/// The user's active, not-yet-expired subscription, if any.
pub fn active_for_user(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> AppResult<Option<Subscription>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM subscriptions WHERE user_id = ?1 AND is_active = 1 AND ends_at > ?2
         ORDER BY ends_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![user_id, ts_to_str(now)])?;
    match rows.next()? {
        Some(row) => Ok(Some(subscription_from_row(row)?)),
        None => Ok(None),
    }
}

/// Active subscriptions whose `ends_at` has passed — the expiry sweep input.
pub fn expired_active(conn: &Connection, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
    query_many(
        conn,
        "SELECT * FROM subscriptions WHERE is_active = 1 AND ends_at < ?1",
        &[&ts_to_str(now)],
    )
}

/// Active subscriptions expiring within `days_before` days of `now`
/// (but not yet expired) — the reminder sweep input.
pub fn expiring_within(conn: &Connection, now: DateTime<Utc>, days_before: i64) -> AppResult<Vec<Subscription>> {
    let horizon = now + Duration::days(days_before);
    query_many(
        conn,
        "SELECT * FROM subscriptions WHERE is_active = 1 AND ends_at > ?1 AND ends_at <= ?2",
        &[&ts_to_str(now), &ts_to_str(horizon)],
    )
}

fn query_many(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> AppResult<Vec<Subscription>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut subs = Vec::new();
    while let Some(row) = rows.next()? {
        match subscription_from_row(row) {
            Ok(sub) => subs.push(sub),
            Err(e) => log::error!("Skipping malformed subscription row: {}", e),
        }
    }
    Ok(subs)
}

/// Record that the `days_before` reminder was sent.
pub fn mark_reminded(conn: &Connection, subscription_id: i64, days_before: i64) -> AppResult<()> {
    let current: String = conn.query_row(
        "SELECT reminders_sent FROM subscriptions WHERE id = ?1",
        [subscription_id],
        |row| row.get(0),
    )?;
    let mut sent = parse_reminders(&current);
    if !sent.contains(&days_before) {
        sent.push(days_before);
    }
    let joined = sent.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    conn.execute(
        "UPDATE subscriptions SET reminders_sent = ?1 WHERE id = ?2",
        params![joined, subscription_id],
    )?;
    Ok(())
}

/// Deactivate a subscription (expiry or failed renewal).
pub fn deactivate(conn: &Connection, subscription_id: i64) -> AppResult<()> {
    conn.execute(
        "UPDATE subscriptions SET is_active = 0 WHERE id = ?1",
        [subscription_id],
    )?;
    Ok(())
}

/// Extend a renewed subscription in place: push `ends_at` out by `period`
/// and clear reminder flags so the new window gets its own reminders.
pub fn extend(conn: &Connection, subscription_id: i64, period: Duration, payment_id: &str) -> AppResult<()> {
    let raw_ends: String = conn.query_row(
        "SELECT ends_at FROM subscriptions WHERE id = ?1",
        [subscription_id],
        |row| row.get(0),
    )?;
    let ends_at = ts_from_str(&raw_ends)
        .ok_or_else(|| AppError::Validation(format!("subscription {}: bad ends_at '{}'", subscription_id, raw_ends)))?;
    conn.execute(
        "UPDATE subscriptions SET ends_at = ?1, reminders_sent = '', is_active = 1, payment_id = ?2
         WHERE id = ?3",
        params![ts_to_str(ends_at + period), payment_id, subscription_id],
    )?;
    Ok(())
}

fn parse_reminders(raw: &str) -> Vec<i64> {
    raw.split(',').filter_map(|p| p.trim().parse().ok()).collect()
}

fn subscription_from_row(row: &Row<'_>) -> AppResult<Subscription> {
    let id: i64 = row.get("id")?;
    let raw_starts: String = row.get("starts_at")?;
    let raw_ends: String = row.get("ends_at")?;
    let starts_at = ts_from_str(&raw_starts)
        .ok_or_else(|| AppError::Validation(format!("subscription {}: bad starts_at '{}'", id, raw_starts)))?;
    let ends_at = ts_from_str(&raw_ends)
        .ok_or_else(|| AppError::Validation(format!("subscription {}: bad ends_at '{}'", id, raw_ends)))?;
    let raw_reminders: String = row.get("reminders_sent")?;

    Ok(Subscription {
        id,
        user_id: row.get("user_id")?,
        invite_link: row.get("invite_link")?,
        starts_at,
        ends_at,
        is_active: row.get::<_, i64>("is_active")? != 0,
        payment_id: row.get("payment_id")?,
        reminders_sent: parse_reminders(&raw_reminders),
        payment_method_id: row.get("payment_method_id")?,
        auto_renew: row.get::<_, i64>("auto_renew")? != 0,
    })
}
