//! Record types persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    /// `dispatched` or `linked`.
    pub kind: String,
    pub project: String,
    pub prompt: String,
    pub context: String,
    pub status: String,
    pub priority: String,
    pub session_id: String,
    pub pid: i64,
    pub git_branch: String,
    pub output: String,
    pub progress: String,
    pub error: String,
    pub cost_usd: f64,
    pub turns: i64,
    pub files_modified: Vec<String>,
    pub timeout_minutes: i64,
    pub dry_run: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Status to match; empty or `all` means no status filter.
    pub status: String,
    pub project: String,
    /// Only tasks created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// 0 = no limit.
    pub limit: usize,
}

/// A timestamped lifecycle event, appended for the audit trail.
#[derive(Debug, Clone)]
pub struct TaskEventRecord {
    pub id: i64,
    pub task_id: String,
    pub event_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted OAuth token. Only the hash of the token ever reaches disk.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_hash: String,
    /// `access` or `refresh`.
    pub token_type: String,
    pub client_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted authorization code (hashed, single-use).
#[derive(Debug, Clone)]
pub struct AuthCodeRecord {
    pub code_hash: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
