use serde_json::Value;
use tracing::{debug, warn};
use transcript_core::{RunEvent, decode_batch, decode_json};

use crate::errors::SourceError;
use crate::model::RunId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Maps one SSE frame to at most one event.
///
/// `log`, `event` and unnamed frames carry a JSON event; `ping` frames and
/// unknown names are skipped. A frame whose payload cannot be decoded is
/// logged and dropped rather than failing the stream.
pub(crate) fn map_frame_to_event(run_id: &RunId, frame: &SseFrame) -> Option<RunEvent> {
    match frame.event.as_deref() {
        None | Some("log") | Some("event") | Some("message") => {}
        Some("ping") => return None,
        Some(other) => {
            debug!(
                event = "sse.unknown_frame",
                domain = "http",
                run_id = %run_id,
                frame = other,
                "skipping unrecognized SSE frame"
            );
            return None;
        }
    }
    if frame.data.trim().is_empty() {
        return None;
    }
    match decode_json(&frame.data) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(
                event = "transcript.malformed_event",
                domain = "http",
                run_id = %run_id,
                reason = %err.reason,
                "dropping undecodable SSE frame"
            );
            None
        }
    }
}

/// Decodes a pull response body: a JSON array of events, optionally wrapped
/// as `{"logs": [...]}` or `{"events": [...]}`.
pub(crate) fn decode_page(run_id: &RunId, body: Value) -> Result<Vec<RunEvent>, SourceError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut object) => match object
            .remove("logs")
            .or_else(|| object.remove("events"))
        {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SourceError::protocol(
                    run_id,
                    "log page object has no logs/events array",
                ));
            }
        },
        other => {
            return Err(SourceError::protocol(
                run_id,
                format!("expected a JSON array of events, got {}", json_kind(&other)),
            ));
        }
    };
    let mut batch = decode_batch(items);
    // Servers return ascending pages, but the reconciler does not rely on it.
    batch.events.sort_by_key(|event| event.sequence);
    Ok(batch.events)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use transcript_core::{EventPayload, LogStream};

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"event: log\ndata: {\"stream\":\"stdout\",\"line\":\"hel";
        let part2 = b"lo\",\"sequence\":4}\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("log"));

        let event = map_frame_to_event(&RunId::new("r"), &frames[0]).expect("event");
        assert_eq!(event, RunEvent::raw_line(4, "stdout", "hello"));
    }

    #[test]
    fn ping_and_comment_frames_produce_no_events() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push_chunk(b": keep-alive\r\n\r\nevent: ping\r\ndata: \r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("ping"));
        assert!(map_frame_to_event(&RunId::new("r"), &frames[0]).is_none());
    }

    #[test]
    fn structured_frames_and_garbage_frames() {
        let run = RunId::new("r");
        let tool = SseFrame {
            event: Some("event".into()),
            data: json!({
                "sequence": 9,
                "kind": "tool_call",
                "id": "c1",
                "name": "developer__shell",
                "arguments": {"command": "ls"}
            })
            .to_string(),
        };
        let event = map_frame_to_event(&run, &tool).expect("tool call");
        assert!(matches!(event.payload, EventPayload::ToolCall(ref call) if call.id == "c1"));

        let garbage = SseFrame {
            event: Some("log".into()),
            data: "{oops".into(),
        };
        assert!(map_frame_to_event(&run, &garbage).is_none());
    }

    #[test]
    fn decode_page_accepts_arrays_and_wrapped_arrays() {
        let run = RunId::new("r");
        let page = decode_page(
            &run,
            json!([
                {"stream": "stdout", "line": "b", "sequence": 2},
                {"stream": "stderr", "line": "a", "sequence": 1},
                {"line": "no sequence"}
            ]),
        )
        .expect("page");
        let seqs: Vec<u64> = page.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(matches!(
            page[0].payload,
            EventPayload::RawLine { stream: LogStream::Stderr, .. }
        ));

        let wrapped = decode_page(&run, json!({"logs": [{"line": "x", "sequence": 5}]}))
            .expect("wrapped");
        assert_eq!(wrapped.len(), 1);

        let err = decode_page(&run, json!("nope")).expect_err("not a page");
        assert!(matches!(err, SourceError::Protocol { .. }));
    }
}
