//! Push notifications for task lifecycle events.
//!
//! Progress events are debounced per task; terminal events always go out
//! immediately and clear the debounce entry. Delivery targets a specific
//! remote session when the event names one, falling back to broadcast.

mod mcp;
mod notifier;

pub use mcp::{McpNotifier, McpSender};
pub use notifier::{Event, Hub, Notifier};
