//! MCP notification delivery with per-task progress debouncing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::debug;

use crate::notifier::{Event, Notifier};

/// Abstraction over the MCP session transport.
pub trait McpSender: Send + Sync {
    /// Deliver to one session. An error triggers broadcast fallback.
    fn send_to_session(&self, session_id: &str, method: &str, params: Value) -> Result<(), String>;
    fn broadcast(&self, method: &str, params: Value);
}

impl<T: McpSender + ?Sized> McpSender for std::sync::Arc<T> {
    fn send_to_session(&self, session_id: &str, method: &str, params: Value) -> Result<(), String> {
        (**self).send_to_session(session_id, method, params)
    }

    fn broadcast(&self, method: &str, params: Value) {
        (**self).broadcast(method, params)
    }
}

/// Pushes task updates to the remote client as MCP notifications.
///
/// `task.progress` is debounced per task id; start and terminal events
/// are never debounced, and terminal events drop the debounce entry.
pub struct McpNotifier<S: McpSender> {
    sender: S,
    debounce: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl<S: McpSender> McpNotifier<S> {
    pub fn new(sender: S, debounce: Duration) -> Self {
        let debounce = if debounce.is_zero() {
            Duration::from_secs(3)
        } else {
            debounce
        };
        Self {
            sender,
            debounce,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn send_progress(&self, event: &Event) {
        {
            let mut last_sent = self.last_sent.lock().unwrap();
            if let Some(last) = last_sent.get(&event.task_id) {
                if last.elapsed() < self.debounce {
                    return;
                }
            }
            last_sent.insert(event.task_id.clone(), Instant::now());
        }

        let params = json!({
            "progressToken": event.task_id,
            "progress": -1,
            "total": 1,
            "message": event.message,
        });
        self.send(event, "notifications/progress", params);
    }

    fn send_message(&self, event: &Event, level: &str) {
        let params = json!({
            "level": level,
            "logger": "herald",
            "data": {
                "type": event.event_type,
                "task_id": event.task_id,
                "project": event.project,
                "message": event.message,
            },
        });
        self.send(event, "notifications/message", params);
    }

    fn send(&self, event: &Event, method: &str, params: Value) {
        if !event.mcp_session_id.is_empty() {
            if let Err(e) =
                self.sender
                    .send_to_session(&event.mcp_session_id, method, params.clone())
            {
                debug!(
                    session_id = %event.mcp_session_id,
                    method,
                    error = %e,
                    "session notification failed, falling back to broadcast"
                );
                self.sender.broadcast(method, params);
            }
            return;
        }
        self.sender.broadcast(method, params);
    }

    fn clear_debounce(&self, task_id: &str) {
        self.last_sent.lock().unwrap().remove(task_id);
    }
}

impl<S: McpSender> Notifier for McpNotifier<S> {
    fn notify(&self, event: &Event) {
        match event.event_type.as_str() {
            "task.progress" => self.send_progress(event),
            "task.started" => self.send_message(event, "info"),
            "task.completed" => {
                self.clear_debounce(&event.task_id);
                self.send_message(event, "info");
            }
            "task.failed" => {
                self.clear_debounce(&event.task_id);
                self.send_message(event, "error");
            }
            "task.cancelled" => {
                self.clear_debounce(&event.task_id);
                self.send_message(event, "warning");
            }
            other => debug!(event_type = other, "unknown notification event type"),
        }
    }
}
