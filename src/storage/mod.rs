//! Metadata store: user automations, templates, and developer keys.

mod models;
mod sqlite;

pub use models::{AutomationState, AutomationTemplate, UserAutomation};
pub use sqlite::SqliteStore;
