//! Sequence reconciler: the ordered, deduplicated event log for one run.
//!
//! Events from any channel are merged by sequence value, never by arrival
//! position, so overlapping deliveries are idempotent and gaps heal as soon as
//! the missing sequences show up. Gaps are not reported.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::event::RunEvent;

/// Outcome of one [`EventLog::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events inserted into the log.
    pub accepted: usize,
    /// Events discarded because their sequence was already held.
    pub duplicates: usize,
    /// Accepted events that landed below the highest sequence held at the
    /// time, i.e. filled a gap.
    pub backfilled: usize,
}

impl IngestReport {
    pub fn changed(&self) -> bool {
        self.accepted > 0
    }
}

/// Ordered event log for a single run, keyed by sequence.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: BTreeMap<u64, RunEvent>,
    revision: u64,
    backfills: u64,
    completion: Option<u64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `events` into the log. Sequences already present are dropped as
    /// duplicates; the log stays sorted after every call.
    pub fn ingest<I>(&mut self, events: I) -> IngestReport
    where
        I: IntoIterator<Item = RunEvent>,
    {
        let mut report = IngestReport::default();
        for event in events {
            let sequence = event.sequence;
            if self.events.contains_key(&sequence) {
                report.duplicates += 1;
                continue;
            }
            if sequence < self.highest_sequence() {
                report.backfilled += 1;
            }
            if event.is_complete() && self.completion.is_none_or(|held| sequence < held) {
                self.completion = Some(sequence);
            }
            self.events.insert(sequence, event);
            report.accepted += 1;
        }
        if report.changed() {
            self.revision += 1;
            self.backfills += report.backfilled as u64;
        }
        report
    }

    /// Highest sequence held, or 0 for an empty log.
    pub fn highest_sequence(&self) -> u64 {
        self.events.last_key_value().map_or(0, |(seq, _)| *seq)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.events.contains_key(&sequence)
    }

    /// All events in ascending sequence order.
    pub fn events(&self) -> impl Iterator<Item = &RunEvent> + '_ {
        self.events.values()
    }

    /// Events with a sequence strictly greater than `sequence`.
    pub fn after(&self, sequence: u64) -> impl Iterator<Item = &RunEvent> + '_ {
        self.events
            .range((Bound::Excluded(sequence), Bound::Unbounded))
            .map(|(_, event)| event)
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.events.keys().copied().collect()
    }

    /// Bumped on every ingest that accepted at least one event.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Total number of gap-filling insertions so far. Incremental projections
    /// compare this to decide whether appending the tail is still valid.
    pub fn backfill_count(&self) -> u64 {
        self.backfills
    }

    /// Sequence of the earliest `complete` event, if any.
    pub fn completion(&self) -> Option<u64> {
        self.completion
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(seq: u64) -> RunEvent {
        RunEvent::text(seq, format!("t{seq}"), format!("line {seq}"))
    }

    fn batch(seqs: &[u64]) -> Vec<RunEvent> {
        seqs.iter().copied().map(text).collect()
    }

    #[test]
    fn empty_log_reports_zero_highest_sequence() {
        let log = EventLog::new();
        assert_eq!(log.highest_sequence(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn ingest_is_idempotent() {
        let events = batch(&[1, 2, 3, 5]);
        let mut once = EventLog::new();
        once.ingest(events.clone());

        let mut twice = EventLog::new();
        twice.ingest(events.clone());
        let second = twice.ingest(events);

        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 4);
        assert_eq!(once.sequences(), twice.sequences());
        assert_eq!(
            once.events().collect::<Vec<_>>(),
            twice.events().collect::<Vec<_>>()
        );
        assert_eq!(twice.revision(), 1);
    }

    #[test]
    fn ingest_order_does_not_matter() {
        let orders: [&[u64]; 4] = [&[1, 2, 3, 4], &[4, 3, 2, 1], &[2, 4, 1, 3], &[3, 1, 4, 2]];
        for order in orders {
            let mut log = EventLog::new();
            for seq in order {
                log.ingest([text(*seq)]);
            }
            assert_eq!(log.sequences(), vec![1, 2, 3, 4], "order {order:?}");
            assert_eq!(log.highest_sequence(), 4);
        }
    }

    #[test]
    fn gap_heals_when_missing_sequence_arrives() {
        let mut log = EventLog::new();
        log.ingest(batch(&[1, 3]));
        assert_eq!(log.sequences(), vec![1, 3]);

        let report = log.ingest(batch(&[2]));
        assert_eq!(report.accepted, 1);
        assert_eq!(report.backfilled, 1);
        assert_eq!(log.sequences(), vec![1, 2, 3]);
        assert_eq!(log.backfill_count(), 1);
    }

    #[test]
    fn overlapping_ranges_merge_without_duplicates() {
        let mut log = EventLog::new();
        log.ingest(batch(&[1, 2, 3, 4, 5]));
        let report = log.ingest(batch(&[4, 5, 6, 7]));
        assert_eq!(report, IngestReport { accepted: 2, duplicates: 2, backfilled: 0 });
        assert_eq!(log.sequences(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn after_yields_strict_tail() {
        let mut log = EventLog::new();
        log.ingest(batch(&[1, 2, 3, 4]));
        let tail: Vec<u64> = log.after(2).map(|e| e.sequence).collect();
        assert_eq!(tail, vec![3, 4]);
        assert_eq!(log.after(4).count(), 0);
    }

    #[test]
    fn events_after_complete_still_merge() {
        let mut log = EventLog::new();
        log.ingest([text(1), RunEvent::complete(2, Some(10))]);
        assert_eq!(log.completion(), Some(2));

        let report = log.ingest([text(3)]);
        assert!(report.changed());
        assert_eq!(log.sequences(), vec![1, 2, 3]);
        assert_eq!(log.completion(), Some(2));
    }
}
