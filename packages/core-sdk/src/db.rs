use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};

/** \brief Key under which the bearer token is stored. */
pub const AUTH_TOKEN_KEY: &str = "puter-auth-token";
const TELEMETRY_KEY: &str = "telemetry_enabled";
const DEFAULT_DB_PATH: &str = "puterchat.db";

/**
 * \brief Open the default database (`PUTERCHAT_DB`, or puterchat.db in the working directory).
 */
pub fn open_default_db() -> Result<Connection> {
    let path = std::env::var("PUTERCHAT_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    open_db(path)
}

/**
 * \brief Open a database file at `path`.
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Create the key-value table.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief Insert or overwrite a config value.
 */
pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

/**
 * \brief Read a config value; None when the key was never written.
 */
pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key=?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(Into::into)
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_config(conn, key)?
        .map(|s| s == "1")
        .unwrap_or(default))
}

/**
 * \brief Read the persisted bearer token.
 */
pub fn get_auth_token(conn: &Connection) -> Result<Option<String>> {
    get_config(conn, AUTH_TOKEN_KEY)
}

/**
 * \brief Overwrite the persisted bearer token.
 */
pub fn set_auth_token(conn: &Connection, token: &str) -> Result<()> {
    set_config(conn, AUTH_TOKEN_KEY, token)
}

/**
 * \brief Read the telemetry switch.
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, TELEMETRY_KEY, false)
}

/**
 * \brief Update the telemetry switch.
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, TELEMETRY_KEY, enabled)
}

/**
 * \brief Retry helper for SQLite lock contention.
 * \details Retries `database is locked`/`database table is locked` with linear backoff, at most 6 attempts.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
