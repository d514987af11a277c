//! Persistent store for Herald: tasks, task events, OAuth tokens, and
//! authorization codes, backed by SQLite with versioned migrations.

mod records;
mod sqlite;

pub use records::{AuthCodeRecord, TaskEventRecord, TaskFilter, TaskRecord, TokenRecord};
pub use sqlite::SqliteStore;

use std::time::Duration;

use herald_types::HeraldError;

/// The persistence contract.
///
/// One writer at a time; reads may be concurrent. Lookup of a missing key
/// returns [`HeraldError::NotFound`], distinct from I/O failures.
pub trait Store: Send + Sync {
    // Tasks
    fn create_task(&self, record: &TaskRecord) -> Result<(), HeraldError>;
    fn get_task(&self, id: &str) -> Result<TaskRecord, HeraldError>;
    fn update_task(&self, record: &TaskRecord) -> Result<(), HeraldError>;
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, HeraldError>;
    /// Find a linked task by its Claude Code session id (herald_push dedup).
    fn get_linked_task_by_session(&self, session_id: &str) -> Result<TaskRecord, HeraldError>;

    // Task events (append-only)
    fn add_event(&self, event: &TaskEventRecord) -> Result<(), HeraldError>;
    fn list_events(&self, task_id: &str, limit: usize) -> Result<Vec<TaskEventRecord>, HeraldError>;

    // OAuth tokens
    fn store_token(&self, record: &TokenRecord) -> Result<(), HeraldError>;
    /// Fails for expired and revoked tokens as well as missing ones.
    fn get_token(&self, token_hash: &str) -> Result<TokenRecord, HeraldError>;
    fn revoke_token(&self, token_hash: &str) -> Result<(), HeraldError>;

    // OAuth authorization codes
    fn store_auth_code(&self, record: &AuthCodeRecord) -> Result<(), HeraldError>;
    /// Atomically mark the code used and return it. The second consume of
    /// the same code always fails, even under concurrent callers.
    fn consume_auth_code(&self, code_hash: &str) -> Result<AuthCodeRecord, HeraldError>;

    // Analytics
    /// Mean wall-clock duration over completed tasks of the project,
    /// together with the sample count.
    fn average_task_duration(&self, project: &str) -> Result<(Duration, usize), HeraldError>;

    // Maintenance
    /// Delete expired/revoked tokens, expired/used codes, and task rows
    /// past the retention window.
    fn cleanup(&self) -> Result<(), HeraldError>;
}
