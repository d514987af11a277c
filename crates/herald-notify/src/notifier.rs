//! Notification event model and fan-out hub.

use std::sync::Arc;

/// A task lifecycle notification.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// `task.started`, `task.progress`, `task.completed`, `task.failed`,
    /// or `task.cancelled`.
    pub event_type: String,
    pub task_id: String,
    pub project: String,
    pub message: String,
    /// Remote MCP session to target. Empty means broadcast to all.
    pub mcp_session_id: String,
}

/// Something that can deliver task lifecycle notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Fans one event out to every registered notifier. Each notifier is
/// invoked independently; one failing delivery does not affect others.
pub struct Hub {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Hub {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn notify(&self, event: &Event) {
        for notifier in &self.notifiers {
            notifier.notify(event);
        }
    }
}
