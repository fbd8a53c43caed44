//! Structured transcript projection: text messages, tool cards and the
//! completion banner.
//!
//! [`build`] is the reference algorithm over a complete ordered event list.
//! [`TranscriptBuilder`] produces the same blocks incrementally, keeping the
//! result and notification indices between syncs so long runs are not
//! reprocessed from the start on every new event.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::event::{EventPayload, Notification, RunEvent, ToolCall, ToolResult, ToolStatus};
use crate::log::EventLog;
use crate::projection::Projection;

/// One renderable unit of a structured transcript.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptBlock {
    Text { id: String, content: String },
    Tool(ToolBlock),
    Complete { total_tokens: Option<u64> },
}

/// A tool call together with everything known about it so far.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolBlock {
    pub call: ToolCall,
    /// `None` while the call is still executing.
    pub result: Option<ToolResult>,
    /// Progress notifications in arrival order.
    pub notifications: Vec<Notification>,
}

impl ToolBlock {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|result| result.status == ToolStatus::Error)
    }
}

/// Builds the block list for an ordered event sequence.
///
/// Results and notifications only annotate tool blocks; a result whose call is
/// absent is ignored until the call shows up. The first result per call wins.
/// Blocks stop at the first `complete` event, although results and
/// notifications delivered after it still annotate earlier tool blocks.
pub fn build<'a, I>(events: I) -> Vec<TranscriptBlock>
where
    I: IntoIterator<Item = &'a RunEvent>,
{
    let events: Vec<&RunEvent> = events.into_iter().collect();

    let mut results: HashMap<&str, &ToolResult> = HashMap::new();
    let mut notifications: HashMap<&str, Vec<&Notification>> = HashMap::new();
    for event in &events {
        match &event.payload {
            EventPayload::ToolResult(result) => {
                results.entry(result.call_id.as_str()).or_insert(result);
            }
            EventPayload::Notification(note) => {
                notifications
                    .entry(note.source_id.as_str())
                    .or_default()
                    .push(note);
            }
            _ => {}
        }
    }

    let mut blocks = Vec::new();
    for event in &events {
        match &event.payload {
            EventPayload::Text { id, content } => blocks.push(TranscriptBlock::Text {
                id: id.clone(),
                content: content.clone(),
            }),
            EventPayload::ToolCall(call) => blocks.push(TranscriptBlock::Tool(ToolBlock {
                call: call.clone(),
                result: results.get(call.id.as_str()).map(|r| (*r).clone()),
                notifications: notifications
                    .get(call.id.as_str())
                    .map(|notes| notes.iter().map(|n| (*n).clone()).collect())
                    .unwrap_or_default(),
            })),
            EventPayload::Complete { total_tokens } => {
                blocks.push(TranscriptBlock::Complete {
                    total_tokens: *total_tokens,
                });
                break;
            }
            EventPayload::ToolResult(_)
            | EventPayload::Notification(_)
            | EventPayload::RawLine { .. } => {}
        }
    }
    blocks
}

/// Incremental [`build`].
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    blocks: Vec<TranscriptBlock>,
    results: HashMap<String, ToolResult>,
    notifications: HashMap<String, Vec<Notification>>,
    /// Block indices per call id.
    calls: HashMap<String, Vec<usize>>,
    cursor: Option<u64>,
    seen_backfills: u64,
    completed: bool,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_blocks(self) -> Vec<TranscriptBlock> {
        self.blocks
    }

    /// Results and notifications referencing calls that have not appeared.
    pub fn orphans(&self) -> usize {
        let results = self
            .results
            .keys()
            .filter(|id| !self.calls.contains_key(*id))
            .count();
        let notes: usize = self
            .notifications
            .iter()
            .filter(|(id, _)| !self.calls.contains_key(*id))
            .map(|(_, notes)| notes.len())
            .sum();
        results + notes
    }

    fn reset(&mut self) {
        let seen_backfills = self.seen_backfills;
        *self = Self {
            seen_backfills,
            ..Self::default()
        };
    }

    fn apply(&mut self, event: &RunEvent) {
        match &event.payload {
            EventPayload::Text { id, content } => {
                if !self.completed {
                    self.blocks.push(TranscriptBlock::Text {
                        id: id.clone(),
                        content: content.clone(),
                    });
                }
            }
            EventPayload::ToolCall(call) => {
                if self.completed {
                    return;
                }
                let index = self.blocks.len();
                self.blocks.push(TranscriptBlock::Tool(ToolBlock {
                    call: call.clone(),
                    result: self.results.get(&call.id).cloned(),
                    notifications: self
                        .notifications
                        .get(&call.id)
                        .cloned()
                        .unwrap_or_default(),
                }));
                self.calls.entry(call.id.clone()).or_default().push(index);
            }
            EventPayload::ToolResult(result) => {
                if self.results.contains_key(&result.call_id) {
                    debug!(
                        event = "transcript.duplicate_result",
                        domain = "transcript",
                        call_id = %result.call_id,
                        sequence = event.sequence,
                        "ignoring second result for tool call"
                    );
                    return;
                }
                self.results
                    .insert(result.call_id.clone(), result.clone());
                self.annotate(&result.call_id, |tool| tool.result = Some(result.clone()));
            }
            EventPayload::Notification(note) => {
                self.notifications
                    .entry(note.source_id.clone())
                    .or_default()
                    .push(note.clone());
                self.annotate(&note.source_id, |tool| tool.notifications.push(note.clone()));
            }
            EventPayload::Complete { total_tokens } => {
                if !self.completed {
                    self.blocks.push(TranscriptBlock::Complete {
                        total_tokens: *total_tokens,
                    });
                    self.completed = true;
                }
            }
            EventPayload::RawLine { .. } => {}
        }
    }

    fn annotate(&mut self, call_id: &str, mut update: impl FnMut(&mut ToolBlock)) {
        let Some(indices) = self.calls.get(call_id) else {
            return;
        };
        for &index in indices {
            if let Some(TranscriptBlock::Tool(tool)) = self.blocks.get_mut(index) {
                update(tool);
            }
        }
    }
}

impl Projection for TranscriptBuilder {
    type Block = TranscriptBlock;

    fn sync(&mut self, log: &EventLog) {
        if log.backfill_count() != self.seen_backfills {
            debug!(
                event = "transcript.rebuild",
                domain = "transcript",
                events = log.len(),
                "gap filled below projected tail; rebuilding transcript"
            );
            self.seen_backfills = log.backfill_count();
            self.reset();
        }
        let tail: Vec<&RunEvent> = match self.cursor {
            Some(cursor) => log.after(cursor).collect(),
            None => log.events().collect(),
        };
        for event in tail {
            self.apply(event);
            self.cursor = Some(event.sequence);
        }
    }

    fn blocks(&self) -> &[TranscriptBlock] {
        &self.blocks
    }
}
