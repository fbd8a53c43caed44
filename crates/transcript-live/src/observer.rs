//! The observation loop: one task per run that owns the event log, decides
//! which channel to trust, and republishes the projected view on every change.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use transcript_core::{EventLog, IngestReport, Projection, RunEvent, RunStatus};

use crate::arbitrator::{ChannelArbitrator, ChannelState};
use crate::errors::{ObserveError, SourceError};
use crate::model::{ObserveOptions, RunId};
use crate::presenter::{Presenter, TranscriptView};
use crate::source::{EventStream, PullSource, PushSource};

/// Entry point for following runs. Cheap to clone; one observer can follow
/// any number of runs concurrently.
#[derive(Clone)]
pub struct Observer {
    pull: Arc<dyn PullSource>,
    push: Option<Arc<dyn PushSource>>,
    options: ObserveOptions,
}

impl Observer {
    pub fn builder() -> ObserverBuilder {
        ObserverBuilder::default()
    }

    pub fn options(&self) -> &ObserveOptions {
        &self.options
    }

    /// Starts following `run_id` on the current tokio runtime.
    ///
    /// `status` is the externally reported run status; its current value picks
    /// the initial channel state and any later terminal value settles the
    /// observation. Dropping the returned handle stops the task.
    pub fn observe<P: Projection>(
        &self,
        run_id: impl Into<RunId>,
        status: watch::Receiver<RunStatus>,
    ) -> ObservationHandle<P::Block> {
        let run_id = run_id.into();
        let observation_id = uuid::Uuid::new_v4();
        let initial = status.borrow().clone();
        let arbitrator = ChannelArbitrator::new(&initial);
        let (presenter, view) = Presenter::<P>::new(arbitrator.state());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        info!(
            event = "transcript.observe_start",
            domain = "observer",
            observation_id = %observation_id,
            run_id = %run_id,
            status = %initial,
            state = arbitrator.state().as_str(),
            "starting observation"
        );

        let observation = Observation {
            observation_id,
            run_id: run_id.clone(),
            pull: self.pull.clone(),
            push: self.push.clone(),
            options: self.options.clone(),
            log: EventLog::new(),
            arbitrator,
            presenter,
            report: ObservationReport::new(observation_id, run_id.clone()),
        };
        let task = tokio::spawn(observation.run(status, cancel_rx));

        ObservationHandle {
            observation_id,
            run_id,
            view,
            cancel: CancelHandle { tx: cancel_tx },
            task: Some(task),
        }
    }
}

/// Builder used to register sources before creating an [`Observer`].
#[derive(Default)]
pub struct ObserverBuilder {
    pull: Option<Arc<dyn PullSource>>,
    push: Option<Arc<dyn PushSource>>,
    options: ObserveOptions,
}

impl ObserverBuilder {
    /// Sets the pull source. Required.
    pub fn pull(mut self, source: Arc<dyn PullSource>) -> Self {
        self.pull = Some(source);
        self
    }

    /// Sets the push source. Without one, live observations poll from the
    /// start.
    pub fn push(mut self, source: Arc<dyn PushSource>) -> Self {
        self.push = Some(source);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn max_pages_per_fetch(mut self, pages: usize) -> Self {
        self.options.max_pages_per_fetch = pages;
        self
    }

    pub fn options(mut self, options: ObserveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Observer, ObserveError> {
        let Some(pull) = self.pull else {
            return Err(ObserveError::Config("a pull source is required".into()));
        };
        if self.options.poll_interval.is_zero() {
            return Err(ObserveError::Validation(
                "poll_interval must be greater than 0".into(),
            ));
        }
        if self.options.max_pages_per_fetch == 0 {
            return Err(ObserveError::Validation(
                "max_pages_per_fetch must be greater than 0".into(),
            ));
        }
        Ok(Observer {
            pull,
            push: self.push,
            options: self.options,
        })
    }
}

/// Handle used to stop an observation from elsewhere.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Summary returned when an observation task ends.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ObservationReport {
    pub observation_id: uuid::Uuid,
    pub run_id: RunId,
    pub final_state: ChannelState,
    pub cancelled: bool,
    /// Events held in the log at the end.
    pub events: usize,
    pub highest_sequence: u64,
    pub pushed: usize,
    pub pulled: usize,
    pub duplicates: usize,
    pub pages: usize,
    pub fetch_errors: usize,
    pub push_failures: usize,
}

impl ObservationReport {
    fn new(observation_id: uuid::Uuid, run_id: RunId) -> Self {
        Self {
            observation_id,
            run_id,
            final_state: ChannelState::Streaming,
            cancelled: false,
            events: 0,
            highest_sequence: 0,
            pushed: 0,
            pulled: 0,
            duplicates: 0,
            pages: 0,
            fetch_errors: 0,
            push_failures: 0,
        }
    }
}

/// Live handle for one observation.
///
/// Read the current view with [`view`](Self::view) or wait for the next one
/// with [`changed`](Self::changed). The task is cancelled when the handle is
/// dropped.
pub struct ObservationHandle<B> {
    observation_id: uuid::Uuid,
    run_id: RunId,
    view: watch::Receiver<TranscriptView<B>>,
    cancel: CancelHandle,
    task: Option<JoinHandle<ObservationReport>>,
}

impl<B: Clone> ObservationHandle<B> {
    pub fn observation_id(&self) -> uuid::Uuid {
        self.observation_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Latest published view.
    pub fn view(&self) -> TranscriptView<B> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptView<B>> {
        self.view.clone()
    }

    /// Waits for a view this handle has not seen yet. Returns `None` once the
    /// task has ended and its final view was already returned.
    pub async fn changed(&mut self) -> Option<TranscriptView<B>> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Waits for the task to end and returns its report.
    pub async fn join(mut self) -> Result<ObservationReport, ObserveError> {
        let Some(task) = self.task.take() else {
            return Err(ObserveError::Task("observation already joined".into()));
        };
        task.await.map_err(|e| ObserveError::Task(e.to_string()))
    }
}

impl<B> Drop for ObservationHandle<B> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Channel {
    Push,
    Pull,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

struct Observation<P: Projection> {
    observation_id: uuid::Uuid,
    run_id: RunId,
    pull: Arc<dyn PullSource>,
    push: Option<Arc<dyn PushSource>>,
    options: ObserveOptions,
    log: EventLog,
    arbitrator: ChannelArbitrator,
    presenter: Presenter<P>,
    report: ObservationReport,
}

impl<P: Projection> Observation<P> {
    async fn run(
        mut self,
        mut status_rx: watch::Receiver<RunStatus>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> ObservationReport {
        status_rx.borrow_and_update();

        // The initial fetch primes the log whatever the state; for a run that
        // is already terminal it is also the only fetch.
        if !self.catch_up_unless_cancelled(&mut cancel_rx).await {
            return self.finish(true);
        }
        self.note_completion();
        if !self.arbitrator.is_live() {
            return self.finish(false);
        }

        let mut stream = match self.open_push(&mut cancel_rx).await {
            Some(opened) => opened,
            None => return self.finish(true),
        };
        let mut ticker: Option<Interval> = None;
        let mut status_open = true;
        self.publish();

        while self.arbitrator.is_live() {
            if self.arbitrator.state() == ChannelState::Polling && ticker.is_none() {
                ticker = Some(poll_ticker(self.options.poll_interval));
            }

            tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel_rx) => {
                    return self.finish(true);
                }
                changed = status_rx.changed(), if status_open => {
                    match changed {
                        Ok(()) => {
                            let status = status_rx.borrow_and_update().clone();
                            debug!(
                                event = "transcript.status_update",
                                domain = "observer",
                                run_id = %self.run_id,
                                status = %status,
                                "run status changed"
                            );
                            self.arbitrator.on_status(&status);
                        }
                        Err(_) => {
                            debug!(
                                event = "transcript.status_closed",
                                domain = "observer",
                                run_id = %self.run_id,
                                "status signal closed; relying on complete event"
                            );
                            status_open = false;
                        }
                    }
                }
                next = next_pushed(&mut stream) => {
                    match next {
                        Some(Ok(event)) => {
                            self.ingest(vec![event], Channel::Push);
                        }
                        Some(Err(err)) => {
                            stream = None;
                            self.push_failed(&err.to_string());
                        }
                        None => {
                            stream = None;
                            self.push_failed("push stream ended");
                        }
                    }
                }
                _ = next_tick(&mut ticker) => {
                    if !self.catch_up_unless_cancelled(&mut cancel_rx).await {
                        return self.finish(true);
                    }
                }
            }

            self.note_completion();
            self.publish();
        }

        drop(stream);
        drop(ticker);

        // Entered Settled while live: re-read the whole run once so anything
        // the live channels skipped below the highest sequence is filled in,
        // then nothing more.
        let reconciled = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel_rx) => false,
            _ = self.reconcile() => true,
        };
        self.finish(!reconciled)
    }

    /// Opens the push channel if the arbitrator is streaming. `None` means the
    /// observation was cancelled while connecting.
    async fn open_push(
        &mut self,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Option<Option<EventStream>> {
        if self.arbitrator.state() != ChannelState::Streaming {
            return Some(None);
        }
        let Some(push) = self.push.clone() else {
            self.push_failed("no push source configured");
            return Some(None);
        };
        let opened = tokio::select! {
            biased;
            _ = wait_cancelled(cancel_rx) => return None,
            opened = push.open_stream(&self.run_id) => opened,
        };
        match opened {
            Ok(stream) => {
                debug!(
                    event = "transcript.push_open",
                    domain = "observer",
                    run_id = %self.run_id,
                    "push channel open"
                );
                Some(Some(stream))
            }
            Err(err) => {
                self.push_failed(&err.to_string());
                Some(None)
            }
        }
    }

    fn push_failed(&mut self, reason: &str) {
        self.report.push_failures += 1;
        warn!(
            event = "transcript.push_closed",
            domain = "observer",
            run_id = %self.run_id,
            reason,
            "push channel unavailable"
        );
        self.arbitrator.on_push_failure();
    }

    /// Returns false if cancellation interrupted the fetch.
    async fn catch_up_unless_cancelled(&mut self, cancel_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = wait_cancelled(cancel_rx) => false,
            _ = self.catch_up() => true,
        }
    }

    /// Pulls pages after the highest held sequence until a page is empty or
    /// adds nothing, bounded by `max_pages_per_fetch`. A failed request ends
    /// the catch-up without moving the cursor, so the next one retries the
    /// same range.
    async fn catch_up(&mut self) {
        for _ in 0..self.options.max_pages_per_fetch {
            let after = self.log.highest_sequence();
            let page = match self.pull.fetch_since(&self.run_id, after).await {
                Ok(page) => page,
                Err(err) => {
                    self.fetch_failed(after, &err);
                    return;
                }
            };
            self.report.pages += 1;
            if page.is_empty() || !self.ingest(page, Channel::Pull).changed() {
                return;
            }
        }
        debug!(
            event = "transcript.catch_up_capped",
            domain = "observer",
            run_id = %self.run_id,
            pages = self.options.max_pages_per_fetch,
            highest_sequence = self.log.highest_sequence(),
            "page limit reached; continuing on next fetch"
        );
    }

    /// Pages through the run from sequence 0, advancing by the highest
    /// sequence of each page rather than the log's, so gaps below the highest
    /// held sequence are requested again. Duplicates are dropped by the log.
    async fn reconcile(&mut self) {
        let mut cursor = 0;
        for _ in 0..self.options.max_pages_per_fetch {
            let page = match self.pull.fetch_since(&self.run_id, cursor).await {
                Ok(page) => page,
                Err(err) => {
                    self.fetch_failed(cursor, &err);
                    return;
                }
            };
            self.report.pages += 1;
            let Some(last) = page.iter().map(|event| event.sequence).max() else {
                break;
            };
            let report = self.ingest(page, Channel::Pull);
            if report.backfilled > 0 {
                info!(
                    event = "transcript.gap_filled",
                    domain = "observer",
                    run_id = %self.run_id,
                    backfilled = report.backfilled,
                    "reconcile recovered events missed while live"
                );
            }
            if last <= cursor {
                break;
            }
            cursor = last;
        }
    }

    fn fetch_failed(&mut self, after: u64, err: &SourceError) {
        self.report.fetch_errors += 1;
        warn!(
            event = "transcript.fetch_failed",
            domain = "observer",
            run_id = %self.run_id,
            after_sequence = after,
            error_kind = err.kind(),
            error = %err,
            "pull request failed; will retry"
        );
    }

    fn ingest(&mut self, events: Vec<RunEvent>, channel: Channel) -> IngestReport {
        let received = events.len();
        let report = self.log.ingest(events);
        match channel {
            Channel::Push => self.report.pushed += report.accepted,
            Channel::Pull => self.report.pulled += report.accepted,
        }
        self.report.duplicates += report.duplicates;
        debug!(
            event = "transcript.ingest",
            domain = "observer",
            run_id = %self.run_id,
            channel = channel.as_str(),
            received,
            accepted = report.accepted,
            duplicates = report.duplicates,
            backfilled = report.backfilled,
            highest_sequence = self.log.highest_sequence(),
            "merged events"
        );
        report
    }

    fn note_completion(&mut self) {
        if self.log.is_complete() {
            self.arbitrator.on_complete();
        }
    }

    fn publish(&mut self) {
        self.presenter.publish(&self.log, self.arbitrator.state());
    }

    fn finish(mut self, cancelled: bool) -> ObservationReport {
        self.publish();
        self.report.final_state = self.arbitrator.state();
        self.report.cancelled = cancelled;
        self.report.events = self.log.len();
        self.report.highest_sequence = self.log.highest_sequence();
        info!(
            event = "transcript.observe_end",
            domain = "observer",
            observation_id = %self.observation_id,
            run_id = %self.run_id,
            state = self.report.final_state.as_str(),
            cancelled,
            events = self.report.events,
            pushed = self.report.pushed,
            pulled = self.report.pulled,
            duplicates = self.report.duplicates,
            fetch_errors = self.report.fetch_errors,
            "observation finished"
        );
        self.report
    }
}

fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender also counts as cancellation.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

async fn next_pushed(stream: &mut Option<EventStream>) -> Option<Result<RunEvent, SourceError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
