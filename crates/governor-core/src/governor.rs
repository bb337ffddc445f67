//! The watch loop.
//!
//! One [`Governor`] watches one model. Each feed tick walks the same path:
//!
//! ```text
//! Watching --(notification)--> Translating --> Buffering --> Dispatching
//!    ^                                             |              |
//!    +---------------------------------------------+--------------+
//!                                                  |
//!                                  (fatal store error) --> Terminated
//! ```
//!
//! Events wait in an in-memory queue until the store accepts them. An event
//! leaves the queue only after its own append succeeded, so a locked store
//! never drops anything: the remainder stays queued, in order, for the next
//! flush. The governor application is woken once per flush that recorded at
//! least one event, however many events that was.
//!
//! The first notification after the watch opens is the watcher's initial
//! view of the whole model, not a change, and is discarded.
//!
//! Events that were appended but whose dispatch never happened (crash in
//! between) are not re-announced on restart: the store is not rescanned at
//! startup. Only the governor's next wake-up picks them up.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use governor_store::{EventStore, StoreError};
use governor_types::{ChangeNotification, Event};
use tracing::{debug, error, info, trace, warn};

use crate::config::GovernorConfig;
use crate::dispatcher::{ActionDispatcher, DispatchError, DispatchOutcome};
use crate::model::{ChangeFeed, FeedError, Model, ModelError};
use crate::translator;

/// Errors that end the watch loop.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    /// The change feed failed or closed.
    #[error("change feed error: {0}")]
    Feed(#[from] FeedError),

    /// The known-unit snapshot could not be taken.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The event store failed with something other than lock contention.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    /// Waiting for the feed.
    Watching,
    /// Turning deltas into events.
    Translating,
    /// Appending queued events to the store.
    Buffering,
    /// Waking the governor application.
    Dispatching,
    /// Stopped after a fatal error or shutdown.
    Terminated,
}

/// What one flush of the pending queue achieved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlushOutcome {
    /// Events durably appended during this flush.
    pub appended: usize,
    /// Whether the flush stopped because the store was locked.
    pub locked: bool,
    /// Events still queued afterwards.
    pub remaining: usize,
    /// Dispatch result, if a dispatch was attempted.
    pub dispatch: Option<Result<DispatchOutcome, DispatchError>>,
}

/// What one feed tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Deltas in the notification.
    pub deltas: usize,
    /// Events produced from them.
    pub translated: usize,
    /// The flush that followed.
    pub flush: FlushOutcome,
}

/// How a [`Governor::run`] ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorExit {
    /// Feed ticks processed, not counting the discarded baseline.
    pub ticks: u64,
    /// Events that were still queued (and are lost) at exit.
    pub pending: usize,
}

/// What woke the loop up.
enum Wake {
    Notification(Result<ChangeNotification, FeedError>),
    Retry,
    Shutdown,
}

/// The watch loop for one model.
pub struct Governor<F, M> {
    feed: F,
    model: M,
    config: GovernorConfig,
    dispatcher: ActionDispatcher,
    pending: VecDeque<Event>,
    state: GovernorState,
    ticks: u64,
}

impl<F: ChangeFeed, M: Model> Governor<F, M> {
    /// Build a loop over `feed` and `model`.
    pub fn new(feed: F, model: M, config: GovernorConfig) -> Self {
        let dispatcher = ActionDispatcher::new(config.dispatch_timeout);
        Self {
            feed,
            model,
            config,
            dispatcher,
            pending: VecDeque::new(),
            state: GovernorState::Watching,
            ticks: 0,
        }
    }

    /// Current state.
    pub const fn state(&self) -> GovernorState {
        self.state
    }

    /// Events waiting for the store, oldest first.
    pub const fn pending(&self) -> &VecDeque<Event> {
        &self.pending
    }

    /// Watch until `shutdown` completes or a fatal error occurs.
    ///
    /// Discards the first notification as the baseline, then processes
    /// every later one with [`process`](Self::process). When events are
    /// queued and [`GovernorConfig::retry_interval`] is set, a quiet feed
    /// triggers a [`flush`](Self::flush) on its own. On shutdown one last
    /// flush is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError`] if the feed fails, the unit snapshot
    /// cannot be taken, or the store fails with anything but lock
    /// contention.
    pub async fn run<S>(&mut self, shutdown: S) -> Result<GovernorExit, GovernorError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            application = self.config.application,
            action = self.config.action,
            store = %self.config.store.path().display(),
            "watching model for unit changes"
        );

        self.transition(GovernorState::Watching);
        let wake = tokio::select! {
            biased;
            () = &mut shutdown => Wake::Shutdown,
            result = self.feed.next() => Wake::Notification(result),
        };
        match wake {
            Wake::Notification(result) => {
                let baseline = self.feed_result(result)?;
                debug!(deltas = baseline.len(), "baseline notification discarded");
            }
            Wake::Retry | Wake::Shutdown => return Ok(self.stop().await),
        }

        loop {
            self.transition(GovernorState::Watching);
            let retry = self.retry_interval();
            let wake = tokio::select! {
                biased;
                () = &mut shutdown => Wake::Shutdown,
                result = self.feed.next() => Wake::Notification(result),
                () = tokio::time::sleep(retry.unwrap_or_default()), if retry.is_some() => Wake::Retry,
            };

            match wake {
                Wake::Shutdown => return Ok(self.stop().await),
                Wake::Retry => {
                    debug!(pending = self.pending.len(), "feed idle, retrying pending events");
                    self.flush().await?;
                }
                Wake::Notification(result) => {
                    let notification = self.feed_result(result)?;
                    self.process(&notification).await?;
                }
            }
        }
    }

    /// Handle one notification: translate it against a fresh unit snapshot,
    /// queue the resulting events and flush.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Model`] if the snapshot fails and
    /// [`GovernorError::Store`] on a fatal store error.
    pub async fn process(
        &mut self,
        notification: &ChangeNotification,
    ) -> Result<TickSummary, GovernorError> {
        self.ticks = self.ticks.saturating_add(1);
        self.transition(GovernorState::Translating);

        let known_units = match self.model.known_units().await {
            Ok(units) => units,
            Err(e) => {
                self.transition(GovernorState::Terminated);
                return Err(e.into());
            }
        };
        let events = translator::translate_notification(notification, &known_units);
        let translated = events.len();
        for event in events {
            info!(event = %event, "unit membership changed");
            self.pending.push_back(event);
        }

        let flush = self.flush().await?;
        trace!(
            tick = self.ticks,
            deltas = notification.len(),
            translated,
            appended = flush.appended,
            "tick complete"
        );
        Ok(TickSummary {
            deltas: notification.len(),
            translated,
            flush,
        })
    }

    /// Append queued events to the store, oldest first, and wake the
    /// governor if any were recorded.
    ///
    /// Stops at the first [`StoreError::Locked`], leaving that event and
    /// everything after it queued.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Store`] on any store error other than lock
    /// contention; the loop is then terminated.
    pub async fn flush(&mut self) -> Result<FlushOutcome, GovernorError> {
        if self.pending.is_empty() {
            return Ok(FlushOutcome::default());
        }
        self.transition(GovernorState::Buffering);

        let mut store = match EventStore::open(&self.config.store).await {
            Ok(store) => store,
            Err(e) if e.is_locked() => {
                warn!(pending = self.pending.len(), error = %e, "waiting for event store to unlock");
                return Ok(FlushOutcome {
                    appended: 0,
                    locked: true,
                    remaining: self.pending.len(),
                    dispatch: None,
                });
            }
            Err(e) => return Err(self.fatal(e)),
        };

        let mut appended: usize = 0;
        let mut locked = false;
        while let Some(event) = self.pending.front() {
            match store.append(event).await {
                Ok(id) => {
                    debug!(id, event = %event, "event recorded");
                    self.pending.pop_front();
                    appended = appended.saturating_add(1);
                }
                Err(e) if e.is_locked() => {
                    warn!(pending = self.pending.len(), error = %e, "waiting for event store to unlock");
                    locked = true;
                    break;
                }
                Err(e) => {
                    store.close().await;
                    return Err(self.fatal(e));
                }
            }
        }
        // Release the lock before waking the governor, which reads the store.
        store.close().await;

        let dispatch = if appended > 0 {
            Some(self.dispatch().await)
        } else {
            None
        };

        Ok(FlushOutcome {
            appended,
            locked,
            remaining: self.pending.len(),
            dispatch,
        })
    }

    async fn dispatch(&mut self) -> Result<DispatchOutcome, DispatchError> {
        self.transition(GovernorState::Dispatching);
        let result = self
            .dispatcher
            .trigger(
                &self.model,
                &self.config.application,
                &self.config.action,
                &self.config.action_params,
            )
            .await;

        match &result {
            Ok(DispatchOutcome::Triggered { unit, receipt }) => info!(
                unit,
                action = self.config.action,
                operation = receipt.operation,
                "governor woken"
            ),
            Ok(DispatchOutcome::ApplicationAbsent) => debug!(
                application = self.config.application,
                "governor application not deployed, events left for later"
            ),
            Err(e) => warn!(
                application = self.config.application,
                error = %e,
                "failed to wake governor, events stay recorded"
            ),
        }
        result
    }

    fn retry_interval(&self) -> Option<Duration> {
        if self.pending.is_empty() {
            None
        } else {
            self.config.retry_interval
        }
    }

    fn feed_result(
        &mut self,
        result: Result<ChangeNotification, FeedError>,
    ) -> Result<ChangeNotification, GovernorError> {
        result.map_err(|e| {
            self.transition(GovernorState::Terminated);
            error!(error = %e, "change feed failed");
            GovernorError::Feed(e)
        })
    }

    fn fatal(&mut self, err: StoreError) -> GovernorError {
        self.transition(GovernorState::Terminated);
        error!(pending = self.pending.len(), error = %err, "event store failed");
        GovernorError::Store(err)
    }

    async fn stop(&mut self) -> GovernorExit {
        info!(pending = self.pending.len(), "shutdown requested");
        if !self.pending.is_empty()
            && let Err(e) = self.flush().await
        {
            warn!(error = %e, "final flush failed");
        }
        self.transition(GovernorState::Terminated);
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "exiting with unrecorded events");
        }
        GovernorExit {
            ticks: self.ticks,
            pending: self.pending.len(),
        }
    }

    fn transition(&mut self, next: GovernorState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "state transition");
            self.state = next;
        }
    }
}
