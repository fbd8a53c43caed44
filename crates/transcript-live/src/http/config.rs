use std::time::Duration;

use crate::errors::ObserveError;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_API_KEY: &str = "admin";
const DEFAULT_WORKSPACE: &str = "default";

/// Connection settings for the run service.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Base URL of the server, without the `/api/v1` suffix.
    pub base_url: String,
    /// Bearer token. Also sent as the `token` query parameter on the event
    /// stream, which cannot carry headers in every client.
    pub api_key: String,
    /// Sent as `X-Workspace-ID` (and `workspace_id` on the event stream).
    pub workspace_id: String,
    /// Whole-request timeout for pull and status calls.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// The event stream is treated as failed after this long without bytes.
    /// The server pings every 30 s.
    pub stream_idle_timeout: Duration,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: DEFAULT_API_KEY.to_string(),
            workspace_id: DEFAULT_WORKSPACE.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(90),
        }
    }

    /// Builds a config from `ORCH_API_URL`, `ORCH_API_KEY` and
    /// `ORCH_WORKSPACE_ID`, falling back to local defaults.
    pub fn from_env() -> Result<Self, ObserveError> {
        let base_url = env_or("ORCH_API_URL", DEFAULT_BASE_URL);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ObserveError::Config(format!(
                "ORCH_API_URL must be an http(s) URL, got {base_url:?}"
            )));
        }
        Ok(Self::new(base_url)
            .api_key(env_or("ORCH_API_KEY", DEFAULT_API_KEY))
            .workspace_id(env_or("ORCH_WORKSPACE_ID", DEFAULT_WORKSPACE)))
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    fn api_base(&self) -> String {
        format!("{}/api/v1", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn run_url(&self, run_id: &str) -> String {
        format!("{}/runs/{run_id}", self.api_base())
    }

    pub(crate) fn logs_url(&self, run_id: &str) -> String {
        format!("{}/logs", self.run_url(run_id))
    }

    pub(crate) fn stream_url(&self, run_id: &str) -> String {
        format!("{}/logs/stream", self.run_url(run_id))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_ignore_trailing_slash() {
        let config = ServerConfig::new("https://orch.example.com/");
        assert_eq!(
            config.logs_url("r1"),
            "https://orch.example.com/api/v1/runs/r1/logs"
        );
        assert_eq!(
            config.stream_url("r1"),
            "https://orch.example.com/api/v1/runs/r1/logs/stream"
        );
        assert_eq!(config.run_url("r1"), "https://orch.example.com/api/v1/runs/r1");
    }

    #[test]
    fn defaults_match_local_server() {
        let config = ServerConfig::new(DEFAULT_BASE_URL);
        assert_eq!(config.api_key, "admin");
        assert_eq!(config.workspace_id, "default");
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(90));
    }
}
