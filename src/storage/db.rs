use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and ensures the
/// schema is up to date on the first connection.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    if let Err(e) = init_schema(&conn) {
        log::error!("Failed to initialize schema: {}", e);
    }

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Create tables if they don't exist. Safe to run on every startup.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            telegram_id   INTEGER PRIMARY KEY,
            username      TEXT,
            first_seen_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payments (
            id               TEXT PRIMARY KEY,
            user_id          INTEGER NOT NULL,
            amount           INTEGER NOT NULL,
            currency         TEXT NOT NULL DEFAULT 'RUB',
            status           TEXT NOT NULL DEFAULT 'pending',
            product_type     TEXT NOT NULL,
            product_ref      TEXT,
            product_opt      TEXT,
            external_id      TEXT UNIQUE,
            confirmation_url TEXT,
            created_at       TEXT NOT NULL,
            paid_at          TEXT,
            chat_id          INTEGER,
            message_id       INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_payments_status_created ON payments(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id);

        CREATE TABLE IF NOT EXISTS subscriptions (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id            INTEGER NOT NULL,
            invite_link        TEXT,
            starts_at          TEXT NOT NULL,
            ends_at            TEXT NOT NULL,
            is_active          INTEGER NOT NULL DEFAULT 1,
            payment_id         TEXT,
            reminders_sent     TEXT NOT NULL DEFAULT '',
            payment_method_id  TEXT,
            auto_renew         INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_active_ends ON subscriptions(is_active, ends_at);

        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

/// Serialize a UTC timestamp for storage.
///
/// Fixed-width RFC 3339 ("2026-08-29T12:00:00Z") so string comparison in
/// SQL matches chronological order.
pub fn ts_to_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp back into UTC.
pub fn ts_from_str(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Record a user on first contact; updates the username on repeat calls.
pub fn upsert_user(conn: &Connection, telegram_id: i64, username: Option<&str>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (telegram_id, username, first_seen_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(telegram_id) DO UPDATE SET username = COALESCE(?2, username)",
        rusqlite::params![telegram_id, username, ts_to_str(Utc::now())],
    )?;
    Ok(())
}

/// Flat key-value settings store.
pub fn get_setting(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
        [key, value],
    )?;
    Ok(())
}
