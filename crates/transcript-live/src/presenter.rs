use tokio::sync::watch;
use transcript_core::{EventLog, Projection};

use crate::arbitrator::ChannelState;

/// Read model handed to the rendering surface.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptView<B> {
    /// Blocks in projection order.
    pub blocks: Vec<B>,
    /// True while the channel state is Streaming or Polling.
    pub is_live: bool,
    pub state: ChannelState,
    /// Highest sequence in the log, 0 before any event arrived.
    pub highest_sequence: u64,
}

impl<B> TranscriptView<B> {
    pub fn empty(state: ChannelState) -> Self {
        Self {
            blocks: Vec::new(),
            is_live: !matches!(state, ChannelState::Settled),
            state,
            highest_sequence: 0,
        }
    }
}

/// Keeps a projection in step with the log and publishes views.
pub(crate) struct Presenter<P: Projection> {
    projection: P,
    synced_revision: Option<u64>,
    tx: watch::Sender<TranscriptView<P::Block>>,
}

impl<P: Projection> Presenter<P> {
    pub(crate) fn new(state: ChannelState) -> (Self, watch::Receiver<TranscriptView<P::Block>>) {
        let (tx, rx) = watch::channel(TranscriptView::empty(state));
        (
            Self {
                projection: P::default(),
                synced_revision: None,
                tx,
            },
            rx,
        )
    }

    /// Re-derives the view if the log or the state changed since the last
    /// publish. Observers are only woken when the view actually differs.
    pub(crate) fn publish(&mut self, log: &EventLog, state: ChannelState) {
        if self.synced_revision != Some(log.revision()) {
            self.projection.sync(log);
            self.synced_revision = Some(log.revision());
        }
        let is_live = !matches!(state, ChannelState::Settled);
        let blocks = self.projection.blocks();
        let highest_sequence = log.highest_sequence();
        self.tx.send_if_modified(|view| {
            if view.state == state
                && view.highest_sequence == highest_sequence
                && view.blocks.as_slice() == blocks
            {
                return false;
            }
            view.blocks = blocks.to_vec();
            view.is_live = is_live;
            view.state = state;
            view.highest_sequence = highest_sequence;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcript_core::{RunEvent, TranscriptBlock, TranscriptBuilder};

    #[test]
    fn publishes_blocks_and_liveness() {
        let (mut presenter, mut rx) = Presenter::<TranscriptBuilder>::new(ChannelState::Streaming);
        assert!(rx.borrow().is_live);
        assert!(rx.borrow().blocks.is_empty());

        let mut log = EventLog::new();
        log.ingest([RunEvent::text(1, "m", "hello")]);
        presenter.publish(&log, ChannelState::Streaming);
        assert!(rx.has_changed().expect("sender alive"));
        {
            let view = rx.borrow_and_update();
            assert_eq!(view.highest_sequence, 1);
            assert!(matches!(&view.blocks[0], TranscriptBlock::Text { content, .. } if content == "hello"));
        }

        presenter.publish(&log, ChannelState::Settled);
        let view = rx.borrow_and_update();
        assert!(!view.is_live);
        assert_eq!(view.state, ChannelState::Settled);
    }

    #[test]
    fn unchanged_view_does_not_wake_receivers() {
        let (mut presenter, mut rx) = Presenter::<TranscriptBuilder>::new(ChannelState::Polling);
        let mut log = EventLog::new();
        log.ingest([RunEvent::text(1, "m", "hello")]);
        presenter.publish(&log, ChannelState::Polling);
        rx.borrow_and_update();

        log.ingest([RunEvent::text(1, "m", "hello")]);
        presenter.publish(&log, ChannelState::Polling);
        assert!(!rx.has_changed().expect("sender alive"));
    }
}
