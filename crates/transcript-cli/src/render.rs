//! Terminal rendering for `run-tail`.
//!
//! Output is append-only. A block is printed once it can no longer change in
//! a way that matters to a reader: tool calls are held back until their
//! result arrives (or the run stops being live), and nothing after a held-back
//! block is printed before it. Printed blocks are remembered by key, so a
//! block that shows up late (a gap filled below already printed output) is
//! printed once with a marker, and anything added to a printed tool call is
//! printed as an update line.

use std::collections::HashMap;
use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::debug;
use transcript_core::{LogLine, LogStream, ToolBlock, TranscriptBlock};
use transcript_live::{RunInfo, TranscriptView};

const LATE_MARKER: &str = "↑ arrived late";

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable transcript.
    Text,
    /// One JSON object per block. Updated blocks are emitted again.
    Json,
}

/// A block kind that knows how to print itself.
pub trait Render: Serialize + Clone + PartialEq {
    /// Identity of the block across successive views.
    fn key(&self) -> String;

    /// False while the block may still change (a pending tool call).
    fn is_settled(&self) -> bool {
        true
    }

    fn write_text(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Writes what changed since `printed` was written.
    fn write_update(&self, _printed: &Self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

impl Render for TranscriptBlock {
    fn key(&self) -> String {
        match self {
            TranscriptBlock::Text { id, .. } => format!("text:{id}"),
            TranscriptBlock::Tool(tool) => format!("tool:{}", tool.call.id),
            TranscriptBlock::Complete { .. } => "complete".to_string(),
        }
    }

    fn is_settled(&self) -> bool {
        !matches!(self, TranscriptBlock::Tool(tool) if tool.is_pending())
    }

    fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
        match self {
            TranscriptBlock::Text { content, .. } => writeln!(out, "{content}\n"),
            TranscriptBlock::Tool(tool) => write_tool(out, tool),
            TranscriptBlock::Complete { total_tokens } => match total_tokens {
                Some(tokens) => {
                    writeln!(out, "── run complete · {} tokens", group_thousands(*tokens))
                }
                None => writeln!(out, "── run complete"),
            },
        }
    }

    fn write_update(&self, printed: &Self, out: &mut dyn Write) -> io::Result<()> {
        let (TranscriptBlock::Tool(now), TranscriptBlock::Tool(before)) = (self, printed) else {
            return Ok(());
        };
        let label = now.call.label();
        for note in now.notifications.iter().skip(before.notifications.len()) {
            writeln!(out, "  ↳ {label} · {}", note.message)?;
        }
        if before.result.is_none()
            && let Some(result) = &now.result
        {
            writeln!(out, "  ↳ {label} {}", result_marker(now))?;
            for line in result.output.lines() {
                writeln!(out, "    {line}")?;
            }
        }
        Ok(())
    }
}

impl Render for LogLine {
    fn key(&self) -> String {
        format!("line:{}", self.sequence)
    }

    fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
        match self.stream {
            LogStream::Stderr => writeln!(out, "stderr| {}", self.line),
            _ => writeln!(out, "{}", self.line),
        }
    }
}

fn result_marker(tool: &ToolBlock) -> &'static str {
    match (&tool.result, tool.is_error()) {
        (None, _) => "…",
        (Some(_), true) => "✗",
        (Some(_), false) => "✓",
    }
}

fn write_tool(out: &mut dyn Write, tool: &ToolBlock) -> io::Result<()> {
    let marker = result_marker(tool);
    match tool.call.short_summary() {
        Some(summary) => writeln!(out, "{marker} {}  {summary}", tool.call.label())?,
        None => writeln!(out, "{marker} {}", tool.call.label())?,
    }
    for note in &tool.notifications {
        writeln!(out, "    · {}", note.message)?;
    }
    match &tool.result {
        Some(result) => {
            for line in result.output.lines() {
                writeln!(out, "    {line}")?;
            }
        }
        None => writeln!(out, "    (no result)")?,
    }
    writeln!(out)
}

/// Prints successive views of one transcript without repeating itself.
pub struct TailPrinter<W: Write, B> {
    out: W,
    format: OutputFormat,
    printed: HashMap<String, B>,
}

impl<W: Write, B: Render> TailPrinter<W, B> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            printed: HashMap::new(),
        }
    }

    /// Blocks printed so far.
    pub fn printed(&self) -> usize {
        self.printed.len()
    }

    /// Prints blocks that became settled since the last call, and updates to
    /// blocks already printed. Once the view is no longer live everything
    /// left is printed.
    pub fn render(&mut self, view: &TranscriptView<B>) -> io::Result<()> {
        self.print_from(view, !view.is_live)
    }

    /// Prints every remaining block regardless of state, for when following
    /// stops early.
    pub fn flush_all(&mut self, view: &TranscriptView<B>) -> io::Result<()> {
        self.print_from(view, true)
    }

    fn print_from(&mut self, view: &TranscriptView<B>, force: bool) -> io::Result<()> {
        let keys = block_keys(&view.blocks);
        let last_printed = keys.iter().rposition(|key| self.printed.contains_key(key));
        let mut holding = false;

        for (index, (block, key)) in view.blocks.iter().zip(keys).enumerate() {
            if let Some(previous) = self.printed.get_mut(&key) {
                if *previous != *block {
                    match self.format {
                        OutputFormat::Text => block.write_update(previous, &mut self.out)?,
                        OutputFormat::Json => write_json(&mut self.out, block)?,
                    }
                    *previous = block.clone();
                }
                continue;
            }
            if holding || (!force && !block.is_settled()) {
                holding = true;
                continue;
            }
            if last_printed.is_some_and(|last| index < last) {
                debug!(
                    event = "render.late_block",
                    domain = "cli",
                    key = %key,
                    position = index,
                    "block arrived after later blocks were printed"
                );
                if self.format == OutputFormat::Text {
                    writeln!(self.out, "{LATE_MARKER}")?;
                }
            }
            match self.format {
                OutputFormat::Text => block.write_text(&mut self.out)?,
                OutputFormat::Json => write_json(&mut self.out, block)?,
            }
            self.printed.insert(key, block.clone());
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Keys for a block list; repeated keys get an occurrence suffix.
fn block_keys<B: Render>(blocks: &[B]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    blocks
        .iter()
        .map(|block| {
            let key = block.key();
            let count = seen.entry(key.clone()).or_default();
            *count += 1;
            if *count == 1 {
                key
            } else {
                format!("{key}#{count}")
            }
        })
        .collect()
}

fn write_json<B: Serialize>(out: &mut impl Write, block: &B) -> io::Result<()> {
    serde_json::to_writer(&mut *out, block).map_err(io::Error::other)?;
    writeln!(out)
}

/// One-line description of a run for the header.
pub fn describe_run(info: &RunInfo, now: DateTime<Utc>) -> String {
    let mut line = format!("run {}", info.id);
    if let Some(name) = info.name.as_deref().filter(|name| !name.is_empty()) {
        line.push_str(&format!(" ({name})"));
    }
    line.push_str(&format!(" · {}", info.status));
    if let Some(started) = info.started_at {
        let local = started.with_timezone(&Local);
        line.push_str(&format!(" · started {}", local.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(elapsed) = info.elapsed(now) {
        line.push_str(&format!(" · {}", format_elapsed(elapsed)));
    }
    line
}

fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, s) => format!("{h}h {m:02}m {s:02}s"),
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use transcript_core::{EventLog, RunEvent, RunStatus, ToolStatus, build, build_plain};
    use transcript_live::ChannelState;

    fn view<B>(blocks: Vec<B>, is_live: bool) -> TranscriptView<B> {
        TranscriptView {
            blocks,
            is_live,
            state: if is_live {
                ChannelState::Streaming
            } else {
                ChannelState::Settled
            },
            highest_sequence: 0,
        }
    }

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn text_of<B: Render>(printer: TailPrinter<Vec<u8>, B>) -> String {
        String::from_utf8(printer.into_inner()).expect("utf8")
    }

    #[test]
    fn pending_tool_holds_back_later_blocks_while_live() {
        let mut log = EventLog::new();
        log.ingest([
            RunEvent::text(1, "m1", "Listing files."),
            RunEvent::tool_call(2, "c1", "developer__shell", args(json!({"command": "ls -la"}))),
            RunEvent::text(3, "m2", "Still waiting."),
        ]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build(log.events()), true)).expect("render");
        assert_eq!(printer.printed(), 1);

        log.ingest([
            RunEvent::notification(4, "c1", "spawned"),
            RunEvent::tool_result(5, "c1", ToolStatus::Ok, "a.txt\nb.txt"),
            RunEvent::complete(6, Some(12345)),
        ]);
        printer.render(&view(build(log.events()), true)).expect("render");
        assert_eq!(printer.printed(), 4);

        let text = text_of(printer);
        assert!(text.starts_with("Listing files.\n"));
        assert!(text.contains("✓ shell  ls -la\n    · spawned\n    a.txt\n    b.txt\n"));
        assert!(text.ends_with("── run complete · 12,345 tokens\n"));
    }

    #[test]
    fn settled_view_flushes_pending_tools() {
        let events = vec![RunEvent::tool_call(
            1,
            "c1",
            "developer__read_file",
            args(json!({"path": "/tmp/notes.md"})),
        )];
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build(&events), false)).expect("render");
        let text = text_of(printer);
        assert!(text.contains("… read file  /tmp/notes.md"));
        assert!(text.contains("(no result)"));
    }

    #[test]
    fn error_results_are_marked() {
        let events = vec![
            RunEvent::tool_call(1, "c1", "x__write_file", args(json!({"path": "/etc/passwd"}))),
            RunEvent::tool_result(2, "c1", ToolStatus::Error, "permission denied"),
        ];
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build(&events), true)).expect("render");
        assert!(text_of(printer).starts_with("✗ write file  /etc/passwd\n"));
    }

    #[test]
    fn plain_lines_print_in_order_with_stderr_marked() {
        let events = vec![
            RunEvent::raw_line(1, "stdout", "compiling"),
            RunEvent::raw_line(2, "stderr", "warning: unused"),
        ];
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build_plain(&events), true)).expect("render");
        assert_eq!(text_of(printer), "compiling\nstderr| warning: unused\n");
    }

    #[test]
    fn json_format_emits_one_object_per_block() {
        let events = vec![RunEvent::text(1, "m1", "hi"), RunEvent::complete(2, None)];
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Json);
        printer.render(&view(build(&events), false)).expect("render");
        let text = text_of(printer);
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "text");
        assert_eq!(lines[1]["type"], "complete");
    }

    #[test]
    fn describes_run_header() {
        let info = RunInfo {
            id: "r-42".into(),
            name: Some("nightly".into()),
            status: RunStatus::Running,
            started_at: Some("2025-03-01T10:00:00Z".parse().expect("start")),
            completed_at: None,
        };
        let now = "2025-03-01T11:02:03Z".parse().expect("now");
        let line = describe_run(&info, now);
        assert!(line.starts_with("run r-42 (nightly) · running · started "));
        assert!(line.ends_with(" · 1h 02m 03s"));
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn gap_filled_line_is_printed_once_with_marker() {
        let mut log = EventLog::new();
        log.ingest([
            RunEvent::raw_line(1, "stdout", "one"),
            RunEvent::raw_line(3, "stdout", "three"),
        ]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build_plain(log.events()), true)).expect("render");

        log.ingest([RunEvent::raw_line(2, "stdout", "two")]);
        let settled = view(build_plain(log.events()), false);
        printer.render(&settled).expect("render");
        printer.render(&settled).expect("render again");

        assert_eq!(printer.printed(), 3);
        assert_eq!(text_of(printer), "one\nthree\n↑ arrived late\ntwo\n");
    }

    #[test]
    fn late_tool_block_does_not_repeat_later_blocks() {
        let mut log = EventLog::new();
        log.ingest([
            RunEvent::text(1, "m1", "first"),
            RunEvent::text(4, "m2", "second"),
        ]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build(log.events()), true)).expect("render");

        log.ingest([
            RunEvent::tool_call(2, "c1", "dev__shell", args(json!({"command": "make"}))),
            RunEvent::tool_result(3, "c1", ToolStatus::Ok, "built"),
        ]);
        printer.render(&view(build(log.events()), false)).expect("render");

        let text = text_of(printer);
        assert_eq!(
            text,
            "first\n\nsecond\n\n↑ arrived late\n✓ shell  make\n    built\n\n"
        );
        assert_eq!(text.matches("second").count(), 1);
    }

    #[test]
    fn notifications_after_the_result_are_printed_as_updates() {
        let mut log = EventLog::new();
        log.ingest([
            RunEvent::tool_call(1, "c1", "dev__shell", args(json!({"command": "make"}))),
            RunEvent::tool_result(2, "c1", ToolStatus::Ok, "done"),
        ]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.render(&view(build(log.events()), true)).expect("render");

        log.ingest([RunEvent::notification(3, "c1", "late note")]);
        printer.render(&view(build(log.events()), false)).expect("render");

        assert_eq!(
            text_of(printer),
            "✓ shell  make\n    done\n\n  ↳ shell · late note\n"
        );
    }

    #[test]
    fn result_after_flush_is_printed_as_update() {
        let mut log = EventLog::new();
        log.ingest([RunEvent::tool_call(1, "c1", "dev__shell", args(json!({"command": "sleep 9"})))]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Text);
        printer.flush_all(&view(build(log.events()), true)).expect("flush");

        log.ingest([RunEvent::tool_result(2, "c1", ToolStatus::Error, "killed")]);
        printer.render(&view(build(log.events()), false)).expect("render");

        assert_eq!(
            text_of(printer),
            "… shell  sleep 9\n    (no result)\n\n  ↳ shell ✗\n    killed\n"
        );
    }

    #[test]
    fn json_format_re_emits_updated_blocks() {
        let mut log = EventLog::new();
        log.ingest([
            RunEvent::tool_call(1, "c1", "dev__shell", Default::default()),
            RunEvent::tool_result(2, "c1", ToolStatus::Ok, "ok"),
        ]);
        let mut printer = TailPrinter::new(Vec::new(), OutputFormat::Json);
        printer.render(&view(build(log.events()), true)).expect("render");
        log.ingest([RunEvent::notification(3, "c1", "late")]);
        printer.render(&view(build(log.events()), false)).expect("render");

        let text = text_of(printer);
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["call"]["id"], "c1");
        assert_eq!(lines[1]["notifications"][0]["message"], "late");
    }
}
