//! Offline pull source over a JSON-lines run artifact.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use transcript_core::{RunEvent, decode_json};

use crate::errors::{ObserveError, SourceError};
use crate::model::RunId;
use crate::source::PullSource;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Serves events from a file with one JSON event per line.
///
/// The file is re-read on every fetch, so a file that is still being appended
/// to can be followed by polling it. Pages are capped at `page_size` events.
#[derive(Clone, Debug)]
pub struct JsonlArtifactSource {
    path: PathBuf,
    page_size: usize,
}

impl JsonlArtifactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Result<Self, ObserveError> {
        if page_size == 0 {
            return Err(ObserveError::Validation(
                "page_size must be greater than 0".into(),
            ));
        }
        self.page_size = page_size;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self, run_id: &RunId) -> Result<Vec<RunEvent>, SourceError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::transport(
                run_id,
                format!("failed to read {}: {e}", self.path.display()),
            )
        })?;
        let mut events = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_json(line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    event = "transcript.malformed_event",
                    domain = "file",
                    path = %self.path.display(),
                    line = index + 1,
                    reason = %err.reason,
                    "skipping malformed artifact line"
                ),
            }
        }
        events.sort_by_key(|event| event.sequence);
        Ok(events)
    }
}

#[async_trait::async_trait]
impl PullSource for JsonlArtifactSource {
    async fn fetch_since(
        &self,
        run_id: &RunId,
        after_sequence: u64,
    ) -> Result<Vec<RunEvent>, SourceError> {
        let page: Vec<RunEvent> = self
            .read_all(run_id)
            .await?
            .into_iter()
            .filter(|event| event.sequence > after_sequence)
            .take(self.page_size)
            .collect();
        debug!(
            event = "file.page",
            domain = "file",
            run_id = %run_id,
            after_sequence,
            events = page.len(),
            "served artifact page"
        );
        Ok(page)
    }
}
