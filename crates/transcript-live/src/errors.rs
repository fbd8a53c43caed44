use crate::model::RunId;

/// Errors returned by an event source adapter.
///
/// None of these reach the rendered view: the observation loop logs them and
/// either retries on the next tick or fails over to polling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network failure or non-2xx response.
    #[error("transport error ({run_id}): {message}")]
    Transport {
        run_id: RunId,
        message: String,
        status_code: Option<u16>,
    },
    /// The push stream failed or could not be opened.
    #[error("stream error ({run_id}): {message}")]
    Stream { run_id: RunId, message: String },
    /// The response body had the wrong shape.
    #[error("protocol error ({run_id}): {message}")]
    Protocol { run_id: RunId, message: String },
}

impl SourceError {
    pub fn transport(run_id: impl Into<RunId>, message: impl Into<String>) -> Self {
        Self::Transport {
            run_id: run_id.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn http_status(
        run_id: impl Into<RunId>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::Transport {
            run_id: run_id.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn stream(run_id: impl Into<RunId>, message: impl Into<String>) -> Self {
        Self::Stream {
            run_id: run_id.into(),
            message: message.into(),
        }
    }

    pub fn protocol(run_id: impl Into<RunId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            run_id: run_id.into(),
            message: message.into(),
        }
    }

    /// Returns the run associated with this error.
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Transport { run_id, .. }
            | Self::Stream { run_id, .. }
            | Self::Protocol { run_id, .. } => run_id,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Stream { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Stream { .. } => "stream",
            Self::Protocol { .. } => "protocol",
        }
    }
}

/// Top-level error type for the public observation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserveError {
    /// Invalid adapter or client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to a builder.
    #[error("validation error: {0}")]
    Validation(String),
    /// An adapter call failed outside the observation loop.
    #[error(transparent)]
    Source(SourceError),
    /// The observation task panicked or was aborted.
    #[error("observation task failed: {0}")]
    Task(String),
}

impl From<SourceError> for ObserveError {
    fn from(value: SourceError) -> Self {
        ObserveError::Source(value)
    }
}
