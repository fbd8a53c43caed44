//! Which delivery channel is authoritative for a run right now.

use tracing::{debug, info};
use transcript_core::RunStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Push channel open; pull used only for catch-up.
    Streaming,
    /// Push channel failed; pull on a fixed interval.
    Polling,
    /// The run is terminal; no more fetching.
    Settled,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Polling => "polling",
            Self::Settled => "settled",
        }
    }
}

/// State machine over [`ChannelState`].
///
/// Transitions only move forward: Streaming → Polling → Settled, with Settled
/// reachable from either live state. A failed push channel is never retried
/// within the same observation.
#[derive(Clone, Debug)]
pub struct ChannelArbitrator {
    state: ChannelState,
}

impl ChannelArbitrator {
    pub fn new(status: &RunStatus) -> Self {
        let state = if status.is_active() {
            ChannelState::Streaming
        } else {
            ChannelState::Settled
        };
        Self { state }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, ChannelState::Streaming | ChannelState::Polling)
    }

    /// Push channel errored or closed. Returns true if the state changed.
    pub fn on_push_failure(&mut self) -> bool {
        if self.state != ChannelState::Streaming {
            return false;
        }
        self.transition(ChannelState::Polling, "push channel closed");
        true
    }

    /// New external status. Returns true if the state changed.
    pub fn on_status(&mut self, status: &RunStatus) -> bool {
        if status.is_active() || self.state == ChannelState::Settled {
            return false;
        }
        self.transition(ChannelState::Settled, "run status is terminal");
        true
    }

    /// A `complete` event reached the log. Returns true if the state changed.
    pub fn on_complete(&mut self) -> bool {
        if self.state == ChannelState::Settled {
            return false;
        }
        self.transition(ChannelState::Settled, "complete event received");
        true
    }

    fn transition(&mut self, next: ChannelState, reason: &str) {
        let from = self.state;
        self.state = next;
        if next == ChannelState::Polling {
            info!(
                event = "transcript.failover",
                domain = "channel",
                from = from.as_str(),
                to = next.as_str(),
                reason,
                "switching to polling"
            );
        } else {
            debug!(
                event = "transcript.channel_transition",
                domain = "channel",
                from = from.as_str(),
                to = next.as_str(),
                reason,
                "channel state changed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_follows_status() {
        assert_eq!(
            ChannelArbitrator::new(&RunStatus::Running).state(),
            ChannelState::Streaming
        );
        assert_eq!(
            ChannelArbitrator::new(&RunStatus::Queued).state(),
            ChannelState::Streaming
        );
        let settled = ChannelArbitrator::new(&RunStatus::Completed);
        assert_eq!(settled.state(), ChannelState::Settled);
        assert!(!settled.is_live());
    }

    #[test]
    fn push_failure_is_one_way() {
        let mut arbitrator = ChannelArbitrator::new(&RunStatus::Running);
        assert!(arbitrator.on_push_failure());
        assert_eq!(arbitrator.state(), ChannelState::Polling);
        assert!(arbitrator.is_live());
        assert!(!arbitrator.on_push_failure());
        assert_eq!(arbitrator.state(), ChannelState::Polling);
    }

    #[test]
    fn terminal_status_settles_from_any_live_state() {
        let mut streaming = ChannelArbitrator::new(&RunStatus::Running);
        assert!(!streaming.on_status(&RunStatus::Running));
        assert!(streaming.on_status(&RunStatus::Failed));
        assert_eq!(streaming.state(), ChannelState::Settled);

        let mut polling = ChannelArbitrator::new(&RunStatus::Assigned);
        polling.on_push_failure();
        assert!(polling.on_status(&RunStatus::Cancelled));
        assert_eq!(polling.state(), ChannelState::Settled);
        assert!(!polling.on_push_failure());
    }

    #[test]
    fn settled_ignores_everything() {
        let mut arbitrator = ChannelArbitrator::new(&RunStatus::Timeout);
        assert!(!arbitrator.on_status(&RunStatus::Completed));
        assert!(!arbitrator.on_complete());
        assert!(!arbitrator.on_push_failure());
        assert_eq!(arbitrator.state(), ChannelState::Settled);
    }

    #[test]
    fn complete_event_settles() {
        let mut arbitrator = ChannelArbitrator::new(&RunStatus::Running);
        assert!(arbitrator.on_complete());
        assert!(!arbitrator.is_live());
    }
}
