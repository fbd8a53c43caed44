use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally reported lifecycle status of a run.
///
/// Only the active/terminal split matters to observation. Statuses this crate
/// does not recognize are kept verbatim and treated as not active.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Unknown(String),
}

impl RunStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "assigned" => Self::Assigned,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "timeout" => Self::Timeout,
            _ => Self::Unknown(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Unknown(value) => value,
        }
    }

    /// The run's event log can still grow.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Assigned | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for RunStatus {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
