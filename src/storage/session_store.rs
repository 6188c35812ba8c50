use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::common::{Session, User};
use crate::error::Result;

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";

/// Lưu token và thông tin user, cùng key với app web/mobile.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO client_state (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM client_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.get(AUTH_TOKEN_KEY)
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let user_json = serde_json::to_string(&session.user)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let upsert = "INSERT OR REPLACE INTO client_state (key, value, updated_at)
                      VALUES (?1, ?2, strftime('%s', 'now'))";
        tx.execute(upsert, params![AUTH_TOKEN_KEY, session.token])?;
        match &session.refresh_token {
            Some(refresh) => tx.execute(upsert, params![REFRESH_TOKEN_KEY, refresh])?,
            None => tx.execute(
                "DELETE FROM client_state WHERE key = ?1",
                params![REFRESH_TOKEN_KEY],
            )?,
        };
        tx.execute(upsert, params![USER_KEY, user_json])?;
        tx.commit()?;
        Ok(())
    }

    /// Cần có cả token lẫn user.
    pub fn load_session(&self) -> Result<Option<Session>> {
        let (Some(token), Some(user_json)) = (self.get(AUTH_TOKEN_KEY)?, self.get(USER_KEY)?)
        else {
            return Ok(None);
        };
        let user = match serde_json::from_str::<User>(&user_json) {
            Ok(user) => user,
            Err(err) => {
                log::warn!("Stored user profile is unreadable ({err}); ignoring stored session");
                return Ok(None);
            }
        };
        Ok(Some(Session {
            user,
            token,
            refresh_token: self.get(REFRESH_TOKEN_KEY)?,
        }))
    }

    pub fn clear(&self) -> Result<()> {
        self.conn().execute(
            "DELETE FROM client_state WHERE key IN (?1, ?2, ?3)",
            params![AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY],
        )?;
        Ok(())
    }
}
