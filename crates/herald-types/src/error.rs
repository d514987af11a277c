//! Error type shared across all Herald crates.

/// Errors that can occur across the Herald runtime.
///
/// Each variant corresponds to a subsystem: configuration, persistent
/// store, authorization, child-process execution, task supervision, or
/// the HTTP/MCP surface. `NotFound` is kept separate from `Store` so a
/// missing row can be told apart from an I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    /// Configuration loading or validation error. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// SQLite read/write failure.
    #[error("store error: {0}")]
    Store(String),

    /// Lookup of a key that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// OAuth / token signing failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Child-process spawn or stream failure.
    #[error("executor error: {0}")]
    Executor(String),

    /// Task lifecycle error (admission, cancellation, state).
    #[error("task error: {0}")]
    Task(String),

    /// HTTP surface or MCP transport error.
    #[error("server error: {0}")]
    Server(String),
}

impl HeraldError {
    /// True when this error is a missing-key lookup rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HeraldError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            HeraldError::Config("missing field".into()).to_string(),
            "configuration error: missing field"
        );
        assert_eq!(
            HeraldError::Store("db locked".into()).to_string(),
            "store error: db locked"
        );
        assert_eq!(
            HeraldError::NotFound("task herald-abc".into()).to_string(),
            "not found: task herald-abc"
        );
        assert_eq!(
            HeraldError::Task("limit reached".into()).to_string(),
            "task error: limit reached"
        );
    }

    #[test]
    fn not_found_is_distinguishable() {
        assert!(HeraldError::NotFound("x".into()).is_not_found());
        assert!(!HeraldError::Store("x".into()).is_not_found());
    }
}
