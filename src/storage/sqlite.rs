//! SQLite storage implementation.
//!
//! The refresh path and the tick-cursor path both write `user_automations`
//! rows; each uses a per-column update statement so orthogonal fields are
//! never clobbered.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::models::{AutomationState, AutomationTemplate, UserAutomation};
use crate::error::{Error, Result};

/// SQLite-based metadata store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS user_automations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                automation_id TEXT NOT NULL,
                provider TEXT NOT NULL DEFAULT '',
                access_token TEXT,
                refresh_token TEXT,
                token_expiry TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                parameters TEXT NOT NULL DEFAULT '{}',
                automation_data TEXT NOT NULL DEFAULT '{}',
                run_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                UNIQUE(user_id, automation_id)
            );

            CREATE TABLE IF NOT EXISTS automation_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS developer_keys (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_user_automations_active
                ON user_automations(is_active);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace a full row.
    pub async fn save_user_automation(&self, record: &UserAutomation) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO user_automations
                (id, user_id, automation_id, provider, access_token, refresh_token,
                 token_expiry, is_active, parameters, automation_data, run_count, last_run_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.id,
                record.user_id,
                record.automation_id,
                record.provider,
                record.access_token,
                record.refresh_token,
                record.token_expiry.map(|t| t.to_rfc3339()),
                record.is_active as i64,
                serde_json::to_string(&record.parameters)?,
                serde_json::to_string(&record.automation_data)?,
                record.run_count as i64,
                record.last_run_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Load the row for one (user, automation) pair.
    pub async fn get_user_automation(
        &self,
        user_id: &str,
        automation_id: &str,
    ) -> Result<Option<UserAutomation>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM user_automations WHERE user_id = ?1 AND automation_id = ?2",
            params![user_id, automation_id],
            row_to_user_automation,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All rows with `is_active = true` (re-installed at startup).
    pub async fn list_active(&self) -> Result<Vec<UserAutomation>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM user_automations WHERE is_active = 1")?;
        let rows = stmt
            .query_map([], row_to_user_automation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update only the token columns (the refresh path's statement).
    pub async fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            r#"
            UPDATE user_automations
            SET access_token = ?2,
                refresh_token = COALESCE(?3, refresh_token),
                token_expiry = ?4
            WHERE id = ?1
            "#,
            params![
                id,
                access_token,
                refresh_token,
                token_expiry.map(|t| t.to_rfc3339())
            ],
        )?;
        if updated == 0 {
            return Err(Error::Storage(format!("user_automation not found: {}", id)));
        }
        Ok(())
    }

    /// Update only the polling-state columns (the tick's statement).
    /// Increments the run counter and stamps the run time.
    pub async fn update_poll_state(
        &self,
        id: &str,
        automation_data: &AutomationState,
        last_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            r#"
            UPDATE user_automations
            SET automation_data = ?2,
                run_count = run_count + 1,
                last_run_at = ?3
            WHERE id = ?1
            "#,
            params![
                id,
                serde_json::to_string(automation_data)?,
                last_run_at.to_rfc3339()
            ],
        )?;
        if updated == 0 {
            return Err(Error::Storage(format!("user_automation not found: {}", id)));
        }
        Ok(())
    }

    /// Flip the active flag.
    pub async fn set_active(&self, id: &str, is_active: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE user_automations SET is_active = ?2 WHERE id = ?1",
            params![id, is_active as i64],
        )?;
        Ok(())
    }

    /// Store an automation template.
    pub async fn save_template(&self, template: &AutomationTemplate) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO automation_templates (id, name, definition, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                template.id,
                template.name,
                template.definition,
                template.created_at.to_rfc3339(),
                template.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load a template by id.
    pub async fn get_template(&self, id: &str) -> Result<Option<AutomationTemplate>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, definition, created_at, updated_at FROM automation_templates WHERE id = ?1",
            params![id],
            |row| {
                Ok(AutomationTemplate {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    definition: row.get(2)?,
                    created_at: parse_timestamp(row.get::<_, String>(3)?),
                    updated_at: parse_timestamp(row.get::<_, String>(4)?),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Store a developer key.
    pub async fn set_developer_key(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO developer_keys (name, value, created_at) VALUES (?1, ?2, ?3)",
            params![name, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// All developer keys as a name -> secret map.
    pub async fn developer_keys(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT name, value FROM developer_keys")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_user_automation(row: &Row<'_>) -> rusqlite::Result<UserAutomation> {
    let token_expiry: Option<String> = row.get("token_expiry")?;
    let last_run_at: Option<String> = row.get("last_run_at")?;
    let parameters: String = row.get("parameters")?;
    let automation_data: String = row.get("automation_data")?;

    Ok(UserAutomation {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        automation_id: row.get("automation_id")?,
        provider: row.get("provider")?,
        access_token: row.get("access_token")?,
        refresh_token: row.get("refresh_token")?,
        token_expiry: token_expiry.map(parse_timestamp),
        is_active: row.get::<_, i64>("is_active")? != 0,
        parameters: serde_json::from_str(&parameters).unwrap_or_default(),
        automation_data: serde_json::from_str(&automation_data).unwrap_or_default(),
        run_count: row.get::<_, i64>("run_count")? as u64,
        last_run_at: last_run_at.map(parse_timestamp),
    })
}
