//! Event model and projections for a live run transcript.
//!
//! Everything in this crate is synchronous and I/O free: events are decoded
//! from JSON, merged into an [`EventLog`] by sequence, and projected into
//! either structured [`TranscriptBlock`]s or plain [`LogLine`]s. The live
//! delivery machinery sits in `transcript-live`.

pub mod event;
pub mod log;
pub mod observability;
pub mod plain;
pub mod projection;
pub mod status;
pub mod transcript;

pub use event::{
    DecodedBatch, EventPayload, LogStream, MalformedEvent, Notification, RunEvent, ToolCall,
    ToolResult, ToolStatus, decode_batch, decode_event, decode_json,
};
pub use log::{EventLog, IngestReport};
pub use observability::init_observability;
pub use plain::{LogLine, PlainLogBuilder, build_plain};
pub use projection::Projection;
pub use status::RunStatus;
pub use transcript::{ToolBlock, TranscriptBlock, TranscriptBuilder, build};
