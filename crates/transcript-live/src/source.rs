use std::pin::Pin;

use futures::Stream;
use transcript_core::{RunEvent, RunStatus};

use crate::errors::SourceError;
use crate::model::RunId;

/// Ascending events from an open push channel. The stream ending, or yielding
/// an `Err`, means the channel is closed for good.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RunEvent, SourceError>> + Send + 'static>>;

/// Paged request/response access to a run's event log.
#[async_trait::async_trait]
pub trait PullSource: Send + Sync {
    /// Events with a sequence strictly greater than `after_sequence`, in
    /// ascending order. An empty page means nothing newer is known yet.
    async fn fetch_since(
        &self,
        run_id: &RunId,
        after_sequence: u64,
    ) -> Result<Vec<RunEvent>, SourceError>;
}

/// Server-pushed event delivery.
#[async_trait::async_trait]
pub trait PushSource: Send + Sync {
    async fn open_stream(&self, run_id: &RunId) -> Result<EventStream, SourceError>;
}

/// Lookup of the externally reported run status.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn run_status(&self, run_id: &RunId) -> Result<RunStatus, SourceError>;
}
