//! Polls the external run status and republishes it as a watch channel for
//! [`Observer::observe`](crate::observer::Observer::observe).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use transcript_core::RunStatus;

use crate::errors::SourceError;
use crate::model::RunId;
use crate::source::StatusSource;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// A running status poller. Polling stops once a terminal status is seen or
/// every receiver is gone; dropping the watch aborts it.
pub struct StatusWatch {
    rx: watch::Receiver<RunStatus>,
    task: JoinHandle<()>,
}

impl StatusWatch {
    /// Fetches the current status, then keeps polling every `interval` in the
    /// background. Only the first fetch can fail; later failures are logged
    /// and the last known status is kept.
    pub async fn start(
        source: Arc<dyn StatusSource>,
        run_id: RunId,
        interval: Duration,
    ) -> Result<Self, SourceError> {
        let initial = source.run_status(&run_id).await?;
        let (tx, rx) = watch::channel(initial.clone());
        let task = tokio::spawn(poll_status(source, run_id, interval, tx, initial));
        Ok(Self { rx, task })
    }

    pub fn receiver(&self) -> watch::Receiver<RunStatus> {
        self.rx.clone()
    }

    pub fn current(&self) -> RunStatus {
        self.rx.borrow().clone()
    }
}

impl Drop for StatusWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_status(
    source: Arc<dyn StatusSource>,
    run_id: RunId,
    interval: Duration,
    tx: watch::Sender<RunStatus>,
    mut last: RunStatus,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while last.is_active() {
        tokio::select! {
            _ = tx.closed() => return,
            _ = ticker.tick() => {}
        }
        match source.run_status(&run_id).await {
            Ok(status) if status != last => {
                debug!(
                    event = "status.changed",
                    domain = "status",
                    run_id = %run_id,
                    from = %last,
                    to = %status,
                    "run status changed"
                );
                last = status.clone();
                if tx.send(status).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => warn!(
                event = "status.fetch_failed",
                domain = "status",
                run_id = %run_id,
                error = %err,
                "run status request failed; keeping last known status"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedStatus {
        replies: Mutex<VecDeque<Result<RunStatus, SourceError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStatus {
        fn new(replies: Vec<Result<RunStatus, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl StatusSource for ScriptedStatus {
        async fn run_status(&self, _run_id: &RunId) -> Result<RunStatus, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Ok(RunStatus::Running))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_changes_until_terminal() {
        let source = ScriptedStatus::new(vec![
            Ok(RunStatus::Queued),
            Ok(RunStatus::Running),
            Err(SourceError::transport("r", "timeout")),
            Ok(RunStatus::Completed),
        ]);
        let watch = StatusWatch::start(source.clone(), RunId::new("r"), DEFAULT_STATUS_INTERVAL)
            .await
            .expect("start");
        let mut rx = watch.receiver();
        assert_eq!(*rx.borrow_and_update(), RunStatus::Queued);

        rx.changed().await.expect("running");
        assert_eq!(*rx.borrow_and_update(), RunStatus::Running);
        rx.changed().await.expect("completed");
        assert_eq!(*rx.borrow_and_update(), RunStatus::Completed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn initial_failure_is_returned() {
        let source = ScriptedStatus::new(vec![Err(SourceError::http_status("r", "not found", 404))]);
        let result = StatusWatch::start(source, RunId::new("r"), DEFAULT_STATUS_INTERVAL).await;
        assert!(matches!(
            result,
            Err(SourceError::Transport { status_code: Some(404), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_initial_status_never_polls() {
        let source = ScriptedStatus::new(vec![Ok(RunStatus::Failed)]);
        let watch = StatusWatch::start(source.clone(), RunId::new("r"), DEFAULT_STATUS_INTERVAL)
            .await
            .expect("start");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(watch.current(), RunStatus::Failed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
