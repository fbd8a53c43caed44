//! Sequence-numbered run events and their wire decoding.
//!
//! Events arrive as JSON objects from either delivery channel. Decoding is
//! lenient about field naming (both `kind` and `type` discriminators are
//! accepted, as are the older `text` / `extension_id` spellings) but strict
//! about structure: an item that cannot be turned into a [`RunEvent`] is a
//! [`MalformedEvent`] and is dropped by [`decode_batch`] without affecting the
//! rest of the batch.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Maximum characters shown for a tool argument summary before truncation.
pub const SUMMARY_MAX_CHARS: usize = 72;

/// One immutable, sequence-numbered fact about a run's progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Strictly increasing, unique per run.
    pub sequence: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Event body, discriminated by `kind` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Agent text output.
    Text { id: String, content: String },
    /// Agent-initiated tool invocation.
    ToolCall(ToolCall),
    /// Result of a prior tool call.
    ToolResult(ToolResult),
    /// Progress message emitted while a tool call is executing.
    Notification(Notification),
    /// Terminal summary for the run.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
    },
    /// One line of plain process output.
    RawLine { stream: LogStream, line: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Namespaced as `prefix__basename`.
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub status: ToolStatus,
    #[serde(default)]
    pub output: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub source_id: String,
    pub message: String,
}

/// Output stream a raw line was captured from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Anything else the worker reported (for example `stdin` echoes).
    Other(String),
}

impl LogStream {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Other(name) => name,
        }
    }

    /// True for the streams shown in a plain log view.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Stdout | Self::Stderr)
    }
}

impl From<&str> for LogStream {
    fn from(value: &str) -> Self {
        match value {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for LogStream {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<LogStream> for String {
    fn from(value: LogStream) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunEvent {
    pub fn new(sequence: u64, payload: EventPayload) -> Self {
        Self { sequence, payload }
    }

    pub fn text(sequence: u64, id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            sequence,
            EventPayload::Text {
                id: id.into(),
                content: content.into(),
            },
        )
    }

    pub fn tool_call(
        sequence: u64,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self::new(
            sequence,
            EventPayload::ToolCall(ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }),
        )
    }

    pub fn tool_result(
        sequence: u64,
        call_id: impl Into<String>,
        status: ToolStatus,
        output: impl Into<String>,
    ) -> Self {
        Self::new(
            sequence,
            EventPayload::ToolResult(ToolResult {
                call_id: call_id.into(),
                status,
                output: output.into(),
            }),
        )
    }

    pub fn notification(
        sequence: u64,
        source_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            sequence,
            EventPayload::Notification(Notification {
                source_id: source_id.into(),
                message: message.into(),
            }),
        )
    }

    pub fn complete(sequence: u64, total_tokens: Option<u64>) -> Self {
        Self::new(sequence, EventPayload::Complete { total_tokens })
    }

    pub fn raw_line(sequence: u64, stream: impl Into<LogStream>, line: impl Into<String>) -> Self {
        Self::new(
            sequence,
            EventPayload::RawLine {
                stream: stream.into(),
                line: line.into(),
            },
        )
    }

    /// Wire name of this event's kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            EventPayload::Text { .. } => "text",
            EventPayload::ToolCall(_) => "tool_call",
            EventPayload::ToolResult(_) => "tool_result",
            EventPayload::Notification(_) => "notification",
            EventPayload::Complete { .. } => "complete",
            EventPayload::RawLine { .. } => "raw_line",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.payload, EventPayload::Complete { .. })
    }
}

impl ToolCall {
    /// Name with any `prefix__` namespace removed.
    pub fn base_name(&self) -> &str {
        self.name
            .rsplit("__")
            .next()
            .filter(|base| !base.is_empty())
            .unwrap_or(self.name.as_str())
    }

    /// Human-readable label: base name with underscores as spaces.
    pub fn label(&self) -> String {
        self.base_name().replace('_', " ")
    }

    /// The most descriptive argument: `command`, then `path`, then the first
    /// string-valued argument.
    pub fn argument_summary(&self) -> Option<&str> {
        fn non_empty(value: &Value) -> Option<&str> {
            value.as_str().filter(|s| !s.is_empty())
        }
        self.arguments
            .get("command")
            .and_then(non_empty)
            .or_else(|| self.arguments.get("path").and_then(non_empty))
            .or_else(|| self.arguments.values().find_map(non_empty))
    }

    /// [`Self::argument_summary`] truncated for single-line display.
    pub fn short_summary(&self) -> Option<Cow<'_, str>> {
        self.argument_summary()
            .map(|summary| truncate_chars(summary, SUMMARY_MAX_CHARS))
    }
}

/// Truncates to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}\u{2026}", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}

/// An item that could not be decoded into a [`RunEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event: {reason}")]
pub struct MalformedEvent {
    /// Sequence number, when the item carried a readable one.
    pub sequence: Option<u64>,
    pub reason: String,
}

impl MalformedEvent {
    fn new(sequence: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            sequence,
            reason: reason.into(),
        }
    }
}

/// Result of decoding a batch: the good events in input order and the
/// failures that were dropped.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub events: Vec<RunEvent>,
    pub malformed: Vec<MalformedEvent>,
}

/// Decodes every item, dropping (and logging) malformed ones.
pub fn decode_batch(values: impl IntoIterator<Item = Value>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for value in values {
        match decode_event(&value) {
            Ok(event) => batch.events.push(event),
            Err(err) => {
                warn!(
                    event = "transcript.malformed_event",
                    domain = "transcript",
                    sequence = err.sequence,
                    reason = %err.reason,
                    "dropping malformed run event"
                );
                batch.malformed.push(err);
            }
        }
    }
    batch
}

/// Decodes one JSON text payload (for example an SSE `data:` field).
pub fn decode_json(text: &str) -> Result<RunEvent, MalformedEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MalformedEvent::new(None, format!("invalid JSON: {e}")))?;
    decode_event(&value)
}

/// Only `error` marks a failed call; anything else counts as success, but
/// values other than `ok` are logged so bad wire data stays visible.
fn tool_status(raw: Option<&str>) -> ToolStatus {
    match raw {
        Some("error") => ToolStatus::Error,
        Some("ok") => ToolStatus::Ok,
        other => {
            debug!(
                event = "transcript.unknown_tool_status",
                domain = "decode",
                status = other.unwrap_or("<missing>"),
                "treating unrecognized tool_result status as ok"
            );
            ToolStatus::Ok
        }
    }
}

/// Decodes one JSON value into a [`RunEvent`].
pub fn decode_event(value: &Value) -> Result<RunEvent, MalformedEvent> {
    let obj = value
        .as_object()
        .ok_or_else(|| MalformedEvent::new(None, "event is not a JSON object"))?;
    let sequence = obj
        .get("sequence")
        .and_then(Value::as_u64)
        .ok_or_else(|| MalformedEvent::new(None, "missing or invalid sequence"))?;
    let malformed = |reason: &str| MalformedEvent::new(Some(sequence), reason);

    let kind = obj
        .get("kind")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str);

    let payload = match kind {
        Some("text") => EventPayload::Text {
            id: str_field(obj, &["id"])
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| sequence.to_string()),
            content: str_field(obj, &["content", "text"])
                .ok_or_else(|| malformed("text event without content"))?
                .to_string(),
        },
        Some("message") => {
            let content_type = str_field(obj, &["content_type"]).unwrap_or("text");
            if content_type != "text" {
                return Err(malformed(&format!(
                    "unsupported message content type {content_type}"
                )));
            }
            EventPayload::Text {
                id: str_field(obj, &["id"])
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| sequence.to_string()),
                content: str_field(obj, &["text", "content"])
                    .ok_or_else(|| malformed("message event without text"))?
                    .to_string(),
            }
        }
        Some("tool_call") => {
            let arguments = match obj.get("arguments") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => return Err(malformed("tool_call arguments must be an object")),
            };
            EventPayload::ToolCall(ToolCall {
                id: str_field(obj, &["id"])
                    .ok_or_else(|| malformed("tool_call without id"))?
                    .to_string(),
                name: str_field(obj, &["name"])
                    .ok_or_else(|| malformed("tool_call without name"))?
                    .to_string(),
                arguments,
            })
        }
        Some("tool_result") => {
            let status = tool_status(str_field(obj, &["status"]));
            let output = match obj.get("output") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            };
            EventPayload::ToolResult(ToolResult {
                call_id: str_field(obj, &["call_id", "id"])
                    .ok_or_else(|| malformed("tool_result without call_id"))?
                    .to_string(),
                status,
                output,
            })
        }
        Some("notification") => EventPayload::Notification(Notification {
            source_id: str_field(obj, &["source_id", "extension_id"])
                .ok_or_else(|| malformed("notification without source_id"))?
                .to_string(),
            message: str_field(obj, &["message"])
                .ok_or_else(|| malformed("notification without message"))?
                .to_string(),
        }),
        Some("complete") => EventPayload::Complete {
            total_tokens: obj.get("total_tokens").and_then(Value::as_u64),
        },
        Some("raw_line") | None => {
            let Some(line) = str_field(obj, &["line"]) else {
                return Err(malformed(if kind.is_some() {
                    "raw_line without line"
                } else {
                    "missing event kind"
                }));
            };
            EventPayload::RawLine {
                stream: LogStream::from(str_field(obj, &["stream"]).unwrap_or("stdout")),
                line: line.to_string(),
            }
        }
        Some(other) => return Err(malformed(&format!("unknown event kind {other}"))),
    };

    Ok(RunEvent { sequence, payload })
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
}
