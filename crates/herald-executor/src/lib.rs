//! Child-process execution of Claude Code tasks.
//!
//! Spawns `claude` in print mode with `--output-format stream-json`,
//! stages the prompt through a file piped to stdin, parses the NDJSON
//! stream from stdout, and reaps the child with TERM-then-KILL
//! escalation on cancellation.

mod claude;
mod kill;
mod prompt;
mod stream;

pub use claude::{ClaudeExecutor, ExecError, ExecRequest, ExecResult, Executor, ProgressFn};
pub use kill::graceful_kill;
pub use prompt::{cleanup_prompt_dir, write_prompt_file};
pub use stream::{
    extract_output, extract_progress, parse_stream, parse_stream_line, ContentBlock, StreamEvent,
    StreamMessage, StreamSummary,
};
