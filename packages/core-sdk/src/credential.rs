use anyhow::Result;
use rusqlite::Connection;

use crate::db;

/**
 * \brief Bearer token holder backed by the local key-value table.
 * \details Presence is the only state that matters; the token is never validated.
 * An empty string counts as unset.
 */
pub struct CredentialStore {
    conn: Connection,
    token: Option<String>,
}

impl CredentialStore {
    /**
     * \brief Read the persisted token. A missing entry is not an error.
     */
    pub fn load(conn: Connection) -> Result<Self> {
        db::migrate(&conn)?;
        let token = db::get_auth_token(&conn)?.filter(|t| !t.is_empty());
        Ok(Self { conn, token })
    }

    /**
     * \brief Overwrite both the persisted and the in-memory token.
     */
    pub fn save(&mut self, token: &str) -> Result<()> {
        db::set_auth_token(&self.conn, token)?;
        self.token = Some(token.to_string()).filter(|t| !t.is_empty());
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.token.is_some()
    }
}
