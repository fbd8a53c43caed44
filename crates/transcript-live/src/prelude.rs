//! Common imports for following a run.
pub use crate::{
    ChannelState, HttpRunService, JsonlArtifactSource, ObservationHandle, ObserveError,
    ObserveOptions, Observer, RunId, ServerConfig, SourceError, StatusWatch, TranscriptView,
    DEFAULT_STATUS_INTERVAL,
};
pub use transcript_core::{LogLine, PlainLogBuilder, RunStatus, TranscriptBlock, TranscriptBuilder};
