//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incremental polling state persisted after every tick.
///
/// `processed_files` is append-only within a polling series and
/// `last_poll_time` is non-decreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationState {
    #[serde(default, rename = "lastPollTime")]
    pub last_poll_time: Option<DateTime<Utc>>,

    #[serde(default, rename = "processedFiles")]
    pub processed_files: Vec<String>,

    #[serde(default, rename = "lastRun")]
    pub last_run: Option<DateTime<Utc>>,

    #[serde(default, rename = "totalProcessed")]
    pub total_processed: u64,
}

/// One row per (user, automation) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAutomation {
    pub id: String,
    pub user_id: String,
    pub automation_id: String,

    /// OAuth provider owning the tokens ("google", "tiktok", ...)
    pub provider: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,

    pub is_active: bool,

    /// User configuration substituted into the template
    pub parameters: Value,

    pub automation_data: AutomationState,

    pub run_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl UserAutomation {
    pub fn new(user_id: &str, automation_id: &str, provider: &str) -> Self {
        Self {
            id: format!("{}:{}", user_id, automation_id),
            user_id: user_id.to_string(),
            automation_id: automation_id.to_string(),
            provider: provider.to_string(),
            access_token: None,
            refresh_token: None,
            token_expiry: None,
            is_active: false,
            parameters: Value::Object(Default::default()),
            automation_data: AutomationState::default(),
            run_count: 0,
            last_run_at: None,
        }
    }
}

/// A stored automation template: the workflow JSON instantiated per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationTemplate {
    pub id: String,
    pub name: String,
    /// Workflow definition (JSON)
    pub definition: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automation_state_serde_names() {
        let state = AutomationState {
            last_poll_time: Some("2026-01-01T00:00:00Z".parse().unwrap()),
            processed_files: vec!["F1".to_string()],
            last_run: None,
            total_processed: 3,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("lastPollTime").is_some());
        assert!(value.get("processedFiles").is_some());
        assert_eq!(value["totalProcessed"], 3);
    }
}
