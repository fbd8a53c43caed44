//! Plain log projection: stdout/stderr lines in sequence order.

use serde::Serialize;

use crate::event::{EventPayload, LogStream, RunEvent};
use crate::log::EventLog;
use crate::projection::Projection;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub sequence: u64,
    pub stream: LogStream,
    pub line: String,
}

impl LogLine {
    fn from_event(event: &RunEvent) -> Option<Self> {
        match &event.payload {
            EventPayload::RawLine { stream, line } if stream.is_output() => Some(Self {
                sequence: event.sequence,
                stream: stream.clone(),
                line: line.clone(),
            }),
            _ => None,
        }
    }
}

/// Output lines of an ordered event sequence. Structured events and streams
/// other than stdout/stderr are skipped.
pub fn build_plain<'a, I>(events: I) -> Vec<LogLine>
where
    I: IntoIterator<Item = &'a RunEvent>,
{
    events.into_iter().filter_map(LogLine::from_event).collect()
}

/// Incremental [`build_plain`].
#[derive(Debug, Default)]
pub struct PlainLogBuilder {
    lines: Vec<LogLine>,
    cursor: Option<u64>,
    seen_backfills: u64,
}

impl PlainLogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_lines(self) -> Vec<LogLine> {
        self.lines
    }
}

impl Projection for PlainLogBuilder {
    type Block = LogLine;

    fn sync(&mut self, log: &EventLog) {
        if log.backfill_count() != self.seen_backfills {
            self.seen_backfills = log.backfill_count();
            self.lines = build_plain(log.events());
        } else {
            let tail = match self.cursor {
                Some(cursor) => build_plain(log.after(cursor)),
                None => build_plain(log.events()),
            };
            self.lines.extend(tail);
        }
        if !log.is_empty() {
            self.cursor = Some(log.highest_sequence());
        }
    }

    fn blocks(&self) -> &[LogLine] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(view: &[LogLine]) -> Vec<&str> {
        view.iter().map(|l| l.line.as_str()).collect()
    }

    #[test]
    fn keeps_only_stdout_and_stderr() {
        let events = vec![
            RunEvent::raw_line(1, "stdout", "building"),
            RunEvent::raw_line(2, "stdin", "y"),
            RunEvent::text(3, "m", "structured"),
            RunEvent::raw_line(4, "stderr", "warning: unused"),
        ];
        let plain = build_plain(&events);
        assert_eq!(lines(&plain), vec!["building", "warning: unused"]);
        assert_eq!(plain[1].stream, LogStream::Stderr);
        assert_eq!(plain[1].sequence, 4);
    }

    #[test]
    fn incremental_matches_full_projection_across_backfill() {
        let mut log = EventLog::new();
        let mut builder = PlainLogBuilder::new();

        log.ingest([
            RunEvent::raw_line(1, "stdout", "one"),
            RunEvent::raw_line(3, "stdout", "three"),
        ]);
        builder.sync(&log);
        assert_eq!(lines(builder.blocks()), vec!["one", "three"]);

        log.ingest([RunEvent::raw_line(4, "stderr", "four")]);
        builder.sync(&log);
        assert_eq!(lines(builder.blocks()), vec!["one", "three", "four"]);

        log.ingest([RunEvent::raw_line(2, "stdout", "two")]);
        builder.sync(&log);
        assert_eq!(builder.blocks(), build_plain(log.events()).as_slice());
        assert_eq!(lines(builder.blocks()), vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn sync_without_changes_is_a_no_op() {
        let mut log = EventLog::new();
        log.ingest([RunEvent::raw_line(1, "stdout", "only")]);
        let mut builder = PlainLogBuilder::new();
        builder.sync(&log);
        builder.sync(&log);
        assert_eq!(builder.into_lines().len(), 1);
    }
}
