use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use transcript_core::RunStatus;

/// Server-assigned identifier of a run.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&RunId> for RunId {
    fn from(value: &RunId) -> Self {
        value.clone()
    }
}

/// Run record as reported by the server.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunInfo {
    pub id: RunId,
    #[serde(default)]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunInfo {
    /// Wall-clock duration, up to `now` for a run that has not finished.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        Some(end - started)
    }
}

/// Tuning knobs for an observation.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ObserveOptions {
    /// Delay between pull requests while in the polling state.
    pub poll_interval: Duration,
    /// Upper bound on pages requested by a single catch-up.
    pub max_pages_per_fetch: usize,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_pages_per_fetch: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_options_defaults() {
        let options = ObserveOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(2));
        assert_eq!(options.max_pages_per_fetch, 100);
    }

    #[test]
    fn run_info_decodes_server_record() {
        let info: RunInfo = serde_json::from_value(serde_json::json!({
            "id": "run-7",
            "name": "nightly",
            "status": "running",
            "started_at": "2025-03-01T10:00:00Z",
            "completed_at": null
        }))
        .expect("run info");
        assert_eq!(info.status, RunStatus::Running);
        let now = "2025-03-01T10:01:30Z".parse::<DateTime<Utc>>().expect("now");
        assert_eq!(info.elapsed(now), Some(chrono::Duration::seconds(90)));
    }
}
