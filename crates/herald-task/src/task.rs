//! The task record.
//!
//! All mutable state sits behind one `RwLock`; readers get consistent
//! copies via [`Task::snapshot`]. The terminal signal is a watch channel
//! closed exactly once, no matter how often `set_status` runs.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// External Claude Code session registered for monitoring only.
    Linked,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Failed | Status::Cancelled | Status::Linked
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
            Status::Linked => "linked",
        }
    }

    /// Parse a status name; unknown strings come back as `None`.
    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "pending" => Some(Status::Pending),
            "queued" => Some(Status::Queued),
            "running" => Some(Status::Running),
            "completed" => Some(Status::Completed),
            "failed" => Some(Status::Failed),
            "cancelled" => Some(Status::Cancelled),
            "linked" => Some(Status::Linked),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering weight for listings. No preemption is attached to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn weight(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Parse a priority name, defaulting unknown values to `Normal`.
    pub fn parse(s: &str) -> Priority {
        match s {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the task came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Started by Herald through the executor.
    Dispatched,
    /// Pushed from an external Claude Code session; never executed here.
    Linked,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Dispatched => "dispatched",
            TaskKind::Linked => "linked",
        }
    }
}

/// New task id: `herald-` + 8 lowercase hex chars.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    format!(
        "herald-{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

struct TaskState {
    status: Status,
    session_id: String,
    pid: i32,
    git_branch: String,
    output: Vec<u8>,
    output_total: usize,
    progress: String,
    error: String,
    cost_usd: f64,
    turns: i64,
    files_modified: Vec<String>,
    context: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// One Claude Code execution unit (or a linked external session).
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub project: String,
    pub prompt: String,
    pub priority: Priority,
    pub timeout_minutes: u64,
    pub dry_run: bool,
    pub allowed_tools: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Remote MCP session to target with notifications. Empty = broadcast.
    pub mcp_session_id: String,

    max_output_size: usize,
    state: RwLock<TaskState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Task {
    /// Create a pending dispatched task. `max_output_size` caps the
    /// in-memory output buffer (0 = unlimited).
    pub fn new(
        project: &str,
        prompt: &str,
        priority: Priority,
        timeout_minutes: u64,
        max_output_size: usize,
    ) -> Self {
        let timeout_minutes = if timeout_minutes == 0 { 30 } else { timeout_minutes };
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            id: generate_id(),
            kind: TaskKind::Dispatched,
            project: project.to_string(),
            prompt: prompt.to_string(),
            priority,
            timeout_minutes,
            dry_run: false,
            allowed_tools: Vec::new(),
            created_at: Utc::now(),
            mcp_session_id: String::new(),
            max_output_size,
            state: RwLock::new(TaskState {
                status: Status::Pending,
                session_id: String::new(),
                pid: 0,
                git_branch: String::new(),
                output: Vec::new(),
                output_total: 0,
                progress: String::new(),
                error: String::new(),
                cost_usd: 0.0,
                turns: 0,
                files_modified: Vec::new(),
                context: String::new(),
                started_at: None,
                completed_at: None,
            }),
            done_tx,
            done_rx,
        }
    }

    /// Create a linked task for an external session. Linked tasks are
    /// terminal from birth: their done signal closes immediately.
    pub fn new_linked(project: &str, session_id: &str, summary: &str) -> Self {
        let mut task = Self::new(project, "", Priority::Normal, 30, 0);
        task.kind = TaskKind::Linked;
        {
            let mut state = task.state.write().unwrap();
            state.status = Status::Linked;
            state.session_id = session_id.to_string();
            state.output = summary.as_bytes().to_vec();
            state.output_total = summary.len();
            state.completed_at = Some(Utc::now());
        }
        task.done_tx.send_replace(true);
        task
    }

    /// A receiver that resolves once the task reaches a terminal state.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.read().unwrap().status.is_terminal()
    }

    pub fn status(&self) -> Status {
        self.state.read().unwrap().status
    }

    /// Advance the status, stamping `started_at` / `completed_at` and
    /// closing the done signal on the first terminal transition.
    pub fn set_status(&self, status: Status) {
        let mut state = self.state.write().unwrap();
        state.status = status;
        match status {
            Status::Running => {
                if state.started_at.is_none() {
                    state.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => {
                if state.completed_at.is_none() {
                    state.completed_at = Some(Utc::now());
                }
                // send_replace is idempotent; waiters wake on the first
                // transition to true.
                self.done_tx.send_replace(true);
            }
            _ => {}
        }
    }

    pub fn set_progress(&self, message: &str) {
        self.state.write().unwrap().progress = message.to_string();
    }

    pub fn set_error(&self, message: &str) {
        self.state.write().unwrap().error = message.to_string();
    }

    pub fn set_session_id(&self, session_id: &str) {
        self.state.write().unwrap().session_id = session_id.to_string();
    }

    pub fn set_pid(&self, pid: i32) {
        self.state.write().unwrap().pid = pid;
    }

    pub fn pid(&self) -> i32 {
        self.state.read().unwrap().pid
    }

    pub fn set_cost(&self, usd: f64) {
        self.state.write().unwrap().cost_usd = usd;
    }

    pub fn set_turns(&self, turns: i64) {
        self.state.write().unwrap().turns = turns;
    }

    pub fn set_git_branch(&self, branch: &str) {
        self.state.write().unwrap().git_branch = branch.to_string();
    }

    pub fn set_context(&self, context: &str) {
        self.state.write().unwrap().context = context.to_string();
    }

    pub fn set_files_modified(&self, files: Vec<String>) {
        self.state.write().unwrap().files_modified = files;
    }

    /// Replace the output buffer (linked-task updates).
    pub fn set_output(&self, output: &str) {
        let mut state = self.state.write().unwrap();
        state.output = output.as_bytes().to_vec();
        state.output_total = output.len();
    }

    /// Append bytes to the bounded buffer. When the cap is exceeded,
    /// leading bytes are dropped so only the last `max_output_size`
    /// remain; the total counter keeps growing regardless.
    pub fn append_output(&self, text: &str) {
        let mut state = self.state.write().unwrap();
        let data = text.as_bytes();
        state.output_total += data.len();
        state.output.extend_from_slice(data);

        if self.max_output_size > 0 && state.output.len() > self.max_output_size {
            let excess = state.output.len() - self.max_output_size;
            state.output.drain(..excess);
        }
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.state.read().unwrap().output).into_owned()
    }

    /// Total bytes ever appended, before any trimming.
    pub fn output_total_bytes(&self) -> usize {
        self.state.read().unwrap().output_total
    }

    /// Read-consistent copy of the task's fields.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.read().unwrap();
        TaskSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            project: self.project.clone(),
            prompt: self.prompt.clone(),
            context: state.context.clone(),
            status: state.status,
            priority: self.priority,
            session_id: state.session_id.clone(),
            pid: state.pid,
            git_branch: state.git_branch.clone(),
            output: String::from_utf8_lossy(&state.output).into_owned(),
            output_total_bytes: state.output_total,
            progress: state.progress.clone(),
            error: state.error.clone(),
            cost_usd: state.cost_usd,
            turns: state.turns,
            files_modified: state.files_modified.clone(),
            timeout_minutes: self.timeout_minutes,
            dry_run: self.dry_run,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }
}

/// A read-only copy of a task's state at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub kind: TaskKind,
    pub project: String,
    pub prompt: String,
    pub context: String,
    pub status: Status,
    pub priority: Priority,
    pub session_id: String,
    pub pid: i32,
    pub git_branch: String,
    pub output: String,
    pub output_total_bytes: usize,
    pub progress: String,
    pub error: String,
    pub cost_usd: f64,
    pub turns: i64,
    pub files_modified: Vec<String>,
    pub timeout_minutes: u64,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Elapsed time from start to completion (or to now while running).
    pub fn duration(&self) -> chrono::Duration {
        let Some(started) = self.started_at else {
            return chrono::Duration::zero();
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        end - started
    }

    /// Human-readable duration like `3m 12s`.
    pub fn format_duration(&self) -> String {
        let d = self.duration();
        let secs = d.num_seconds();
        if secs < 1 {
            return "< 1s".to_string();
        }
        let minutes = secs / 60;
        let seconds = secs % 60;
        if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else {
            format!("{seconds}s")
        }
    }
}

/// Criteria for in-memory task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Empty or `all` disables the status filter.
    pub status: String,
    pub project: String,
    /// Tasks created strictly before this instant are excluded.
    pub since: Option<DateTime<Utc>>,
    /// 0 = no limit. Applied after ordering.
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_format() {
        let id = generate_id();
        assert!(id.starts_with("herald-"));
        assert_eq!(id.len(), "herald-".len() + 8);
        assert!(id["herald-".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn priority_weights_order() {
        assert!(Priority::Urgent.weight() > Priority::High.weight());
        assert!(Priority::High.weight() > Priority::Normal.weight());
        assert!(Priority::Normal.weight() > Priority::Low.weight());
        assert_eq!(Priority::parse("bogus"), Priority::Normal);
    }

    #[test]
    fn status_transitions_stamp_timestamps() {
        let task = Task::new("proj", "prompt", Priority::Normal, 30, 0);
        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Pending);
        assert!(snap.started_at.is_none());
        assert!(snap.completed_at.is_none());

        task.set_status(Status::Running);
        assert!(task.snapshot().started_at.is_some());
        assert!(task.snapshot().completed_at.is_none());

        task.set_status(Status::Completed);
        let snap = task.snapshot();
        assert!(snap.completed_at.is_some());
        assert!(snap.status.is_terminal());
    }

    #[test]
    fn done_signal_closes_exactly_once() {
        let task = Task::new("proj", "prompt", Priority::Normal, 30, 0);
        let mut rx = task.done();
        assert!(!*rx.borrow());

        task.set_status(Status::Failed);
        assert!(*rx.borrow_and_update());

        // Repeated terminal transitions do not disturb observers.
        task.set_status(Status::Failed);
        task.set_status(Status::Cancelled);
        assert!(*task.done().borrow());
    }

    #[tokio::test]
    async fn done_signal_wakes_waiters() {
        let task = std::sync::Arc::new(Task::new("proj", "p", Priority::Normal, 30, 0));
        let waiter = task.clone();
        let handle = tokio::spawn(async move {
            let mut rx = waiter.done();
            rx.wait_for(|&done| done).await.unwrap();
            waiter.status()
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.set_status(Status::Completed);

        let status = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn bounded_output_keeps_tail() {
        let task = Task::new("proj", "prompt", Priority::Normal, 30, 10);
        task.append_output("12345");
        task.append_output("67890");
        task.append_output("ABCDE");

        assert_eq!(task.output(), "67890ABCDE");
        assert_eq!(task.output_total_bytes(), 15);
    }

    #[test]
    fn unlimited_output_never_trims() {
        let task = Task::new("proj", "prompt", Priority::Normal, 30, 0);
        let chunk = "x".repeat(4096);
        for _ in 0..10 {
            task.append_output(&chunk);
        }
        assert_eq!(task.output().len(), 40960);
        assert_eq!(task.output_total_bytes(), 40960);
    }

    #[test]
    fn single_oversized_append_is_trimmed() {
        let task = Task::new("proj", "prompt", Priority::Normal, 30, 4);
        task.append_output("abcdefgh");
        assert_eq!(task.output(), "efgh");
        assert_eq!(task.output_total_bytes(), 8);
    }

    #[test]
    fn linked_task_is_terminal_from_birth() {
        let task = Task::new_linked("proj", "ses_ext", "did some work");
        assert_eq!(task.status(), Status::Linked);
        assert!(task.is_terminal());
        assert!(*task.done().borrow());

        let snap = task.snapshot();
        assert_eq!(snap.session_id, "ses_ext");
        assert_eq!(snap.output, "did some work");
        assert!(snap.completed_at.is_some());
    }

    #[test]
    fn zero_timeout_defaults() {
        let task = Task::new("proj", "prompt", Priority::Normal, 0, 0);
        assert_eq!(task.timeout_minutes, 30);
    }

    #[test]
    fn duration_formatting() {
        let mut snap = Task::new("p", "p", Priority::Normal, 30, 0).snapshot();
        assert_eq!(snap.format_duration(), "< 1s");

        let start = Utc::now();
        snap.started_at = Some(start);
        snap.completed_at = Some(start + chrono::Duration::seconds(45));
        assert_eq!(snap.format_duration(), "45s");

        snap.completed_at = Some(start + chrono::Duration::seconds(192));
        assert_eq!(snap.format_duration(), "3m 12s");
    }
}
