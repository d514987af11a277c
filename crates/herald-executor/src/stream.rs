//! Parser for Claude Code's `--output-format stream-json` NDJSON stream.
//!
//! One JSON object per line. Malformed JSON, blank lines, and unknown
//! event kinds are skipped; parsing never halts on bad input. Legitimate
//! text blocks can run to hundreds of kilobytes, so the per-line cap is
//! deliberately large.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Maximum accepted line length. Anything longer is discarded, not fatal.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Progress strings are truncated at this many characters.
const PROGRESS_LIMIT: usize = 200;

/// A single event from the stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub message: Option<StreamMessage>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub num_turns: i64,
}

/// The `message` payload of an `assistant` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// A content block inside an assistant message. Only `text` and
/// `tool_use` are interpreted; other kinds are carried but ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub name: String,
}

/// Parse one line of the stream. Returns `Ok(None)` for blank lines and
/// an error for malformed JSON.
pub fn parse_stream_line(line: &[u8]) -> Result<Option<StreamEvent>, serde_json::Error> {
    let trimmed = trim_ascii(line);
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(trimmed).map(Some)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Concatenated text of all `text` blocks in an assistant event.
pub fn extract_output(event: &StreamEvent) -> String {
    let Some(message) = &event.message else {
        return String::new();
    };
    let mut out = String::new();
    for block in &message.content {
        if block.block_type == "text" {
            out.push_str(&block.text);
        }
    }
    out
}

/// A short human-readable progress string for an assistant event:
/// truncated text for `text` blocks, `Using tool: <name>` for `tool_use`.
pub fn extract_progress(event: &StreamEvent) -> String {
    let Some(message) = &event.message else {
        return String::new();
    };
    for block in &message.content {
        match block.block_type.as_str() {
            "text" if !block.text.is_empty() => return truncate_chars(&block.text, PROGRESS_LIMIT),
            "tool_use" if !block.name.is_empty() => {
                return format!("Using tool: {}", block.name);
            }
            _ => {}
        }
    }
    String::new()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    format!("{truncated}...")
}

/// Accumulated outcome of a parsed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub session_id: String,
    pub output: String,
    pub cost_usd: f64,
    pub turns: i64,
    /// From the `result` event, milliseconds. 0 when absent.
    pub duration_ms: i64,
}

/// Read the stream to EOF, folding events into a [`StreamSummary`] and
/// invoking `on_progress(event_type, message)` for assistant progress.
///
/// The session id is captured only from `system`/`init`. Oversize lines
/// are skipped whole.
pub async fn parse_stream<R, F>(task_id: &str, reader: R, mut on_progress: F) -> StreamSummary
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str, &str),
{
    let mut summary = StreamSummary::default();
    let mut reader = reader;
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(task_id, error = %e, "stream read error");
                break;
            }
        }

        if line.len() > MAX_LINE_BYTES {
            warn!(task_id, bytes = line.len(), "skipping oversize stream line");
            continue;
        }

        let event = match parse_stream_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                debug!(task_id, error = %e, "skipping malformed stream line");
                continue;
            }
        };

        match event.event_type.as_str() {
            "system" => {
                if event.subtype == "init" && !event.session_id.is_empty() {
                    summary.session_id = event.session_id.clone();
                    debug!(task_id, session_id = %event.session_id, "session initialized");
                }
            }
            "assistant" => {
                let output = extract_output(&event);
                if !output.is_empty() {
                    summary.output.push_str(&output);
                }
                let progress = extract_progress(&event);
                if !progress.is_empty() {
                    on_progress("progress", &progress);
                }
            }
            "result" => {
                summary.cost_usd = event.cost_usd;
                summary.turns = event.num_turns;
                summary.duration_ms = event.duration_ms;
            }
            _ => {}
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_init_extracts_session_id() {
        let line = br#"{"type":"system","subtype":"init","session_id":"ses_abc123","tools":["Read","Write"]}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(event.event_type, "system");
        assert_eq!(event.subtype, "init");
        assert_eq!(event.session_id, "ses_abc123");
    }

    #[test]
    fn assistant_text_extracts_content() {
        let line = br#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"I'll fix the auth bug."}]}}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        let message = event.message.as_ref().unwrap();
        assert_eq!(message.content.len(), 1);
        assert_eq!(message.content[0].block_type, "text");
        assert_eq!(message.content[0].text, "I'll fix the auth bug.");
    }

    #[test]
    fn tool_use_extracts_name() {
        let line = br#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Write","input":{"file_path":"auth.rs"}}]}}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        let message = event.message.as_ref().unwrap();
        assert_eq!(message.content[0].block_type, "tool_use");
        assert_eq!(message.content[0].name, "Write");
    }

    #[test]
    fn result_extracts_accounting() {
        let line = br#"{"type":"result","subtype":"success","session_id":"ses_abc","cost_usd":0.34,"duration_ms":45000,"num_turns":5}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(event.event_type, "result");
        assert!((event.cost_usd - 0.34).abs() < 1e-9);
        assert_eq!(event.duration_ms, 45000);
        assert_eq!(event.num_turns, 5);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_stream_line(b"{this is not json}").is_err());
        assert!(parse_stream_line(b"not even json").is_err());
    }

    #[test]
    fn blank_lines_are_none() {
        assert!(parse_stream_line(b"").unwrap().is_none());
        assert!(parse_stream_line(b"   \t  ").unwrap().is_none());
    }

    #[test]
    fn unknown_event_kind_still_parses() {
        let event = parse_stream_line(br#"{"type":"unknown_event","subtype":"foo"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "unknown_event");
        assert_eq!(event.subtype, "foo");
    }

    #[test]
    fn extract_output_collects_all_text_blocks() {
        let line = br#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Part 1. "},{"type":"tool_use","name":"Read"},{"type":"text","text":"Part 2."}]}}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(extract_output(&event), "Part 1. Part 2.");
    }

    #[test]
    fn extract_output_empty_without_message() {
        assert_eq!(extract_output(&StreamEvent::default()), "");
    }

    #[test]
    fn extract_progress_truncates_long_text() {
        let long_text = "a".repeat(300);
        let event = StreamEvent {
            message: Some(StreamMessage {
                role: "assistant".into(),
                content: vec![ContentBlock {
                    block_type: "text".into(),
                    text: long_text,
                    name: String::new(),
                }],
            }),
            ..Default::default()
        };
        let progress = extract_progress(&event);
        assert_eq!(progress.len(), 203); // 200 chars + "..."
        assert!(progress.ends_with("..."));
    }

    #[test]
    fn extract_progress_for_tool_use() {
        let event = StreamEvent {
            message: Some(StreamMessage {
                role: "assistant".into(),
                content: vec![ContentBlock {
                    block_type: "tool_use".into(),
                    text: String::new(),
                    name: "Edit".into(),
                }],
            }),
            ..Default::default()
        };
        assert_eq!(extract_progress(&event), "Using tool: Edit");
    }

    #[tokio::test]
    async fn full_conversation_stream() {
        let stream = [
            r#"{"type":"system","subtype":"init","session_id":"ses_test123"}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"I'll fix the bug."}]}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Edit"}]}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Done, the fix is applied."}]}}"#,
            r#"{"type":"result","subtype":"success","cost_usd":0.42,"duration_ms":30000,"num_turns":3}"#,
        ]
        .join("\n");

        let mut progress = Vec::new();
        let summary = parse_stream("test-task", stream.as_bytes(), |kind, msg| {
            progress.push(format!("{kind}:{msg}"));
        })
        .await;

        assert_eq!(summary.session_id, "ses_test123");
        assert!((summary.cost_usd - 0.42).abs() < 1e-9);
        assert_eq!(summary.turns, 3);
        assert!(summary.output.contains("I'll fix the bug."));
        assert!(summary.output.contains("Done, the fix is applied."));
        assert!(progress.contains(&"progress:I'll fix the bug.".to_string()));
        assert!(progress.contains(&"progress:Using tool: Edit".to_string()));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        // The parsed result must equal parsing only the valid lines.
        let stream = [
            r#"{"type":"system","subtype":"init","session_id":"ses_mixed"}"#,
            "{broken}",
            "",
            "not json at all",
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"valid output"}]}}"#,
            r#"{"type":"result","subtype":"success","cost_usd":0.50,"num_turns":2}"#,
        ]
        .join("\n");

        let mut progress_calls = 0;
        let summary = parse_stream("test-task", stream.as_bytes(), |_, _| {
            progress_calls += 1;
        })
        .await;

        assert_eq!(summary.session_id, "ses_mixed");
        assert_eq!(summary.output, "valid output");
        assert!((summary.cost_usd - 0.50).abs() < 1e-9);
        assert_eq!(summary.turns, 2);
        assert_eq!(progress_calls, 1);
    }

    #[tokio::test]
    async fn session_id_only_from_init_subtype() {
        let stream = [
            r#"{"type":"system","subtype":"status","session_id":"ses_wrong"}"#,
            r#"{"type":"system","subtype":"init","session_id":"ses_right"}"#,
        ]
        .join("\n");

        let summary = parse_stream("test-task", stream.as_bytes(), |_, _| {}).await;
        assert_eq!(summary.session_id, "ses_right");
    }

    #[tokio::test]
    async fn empty_stream_produces_empty_summary() {
        let summary = parse_stream("test-task", &b""[..], |_, _| {}).await;
        assert_eq!(summary, StreamSummary::default());
    }

    #[tokio::test]
    async fn large_text_block_parses() {
        // A multi-hundred-kilobyte text block is legitimate output.
        let big = "x".repeat(400 * 1024);
        let stream = format!(
            "{}\n",
            serde_json::json!({
                "type": "assistant",
                "message": {"role": "assistant", "content": [{"type": "text", "text": big}]}
            })
        );

        let summary = parse_stream("test-task", stream.as_bytes(), |_, _| {}).await;
        assert_eq!(summary.output.len(), 400 * 1024);
    }
}
