//! Live delivery for run transcripts.
//!
//! An [`Observer`] follows one run through a pull source (paged fetch) and an
//! optional push source (server-sent events), fails over from push to polling
//! when the stream drops, and republishes a projected [`TranscriptView`] after
//! every change.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use transcript_live::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ObserveError> {
//! let service = Arc::new(HttpRunService::from_env()?);
//! let run_id = RunId::new("3f0c9a");
//! let status = StatusWatch::start(service.clone(), run_id.clone(), DEFAULT_STATUS_INTERVAL).await?;
//!
//! let observer = Observer::builder()
//!     .pull(service.clone())
//!     .push(service)
//!     .build()?;
//! let mut handle = observer.observe::<TranscriptBuilder>(run_id, status.receiver());
//! while let Some(view) = handle.changed().await {
//!     println!("{} blocks, live={}", view.blocks.len(), view.is_live);
//! }
//! # Ok(())
//! # }
//! ```

/// Channel state machine deciding between push and pull.
pub mod arbitrator;
/// Public error types.
pub mod errors;
/// Offline JSON-lines artifact source.
pub mod file;
/// HTTP run service adapters.
pub mod http;
/// Identifiers, run records and observation options.
pub mod model;
/// The observation loop and its handle.
pub mod observer;
/// Common imports for typical usage.
pub mod prelude;
/// Published view of a projection.
pub mod presenter;
/// Source adapter contracts.
pub mod source;
/// Background polling of the run status.
pub mod status_watch;

pub use arbitrator::{ChannelArbitrator, ChannelState};
pub use errors::{ObserveError, SourceError};
pub use file::JsonlArtifactSource;
pub use http::{HttpRunService, ServerConfig};
pub use model::{ObserveOptions, RunId, RunInfo};
pub use observer::{CancelHandle, ObservationHandle, ObservationReport, Observer, ObserverBuilder};
pub use presenter::TranscriptView;
pub use source::{EventStream, PullSource, PushSource, StatusSource};
pub use status_watch::{DEFAULT_STATUS_INTERVAL, StatusWatch};
