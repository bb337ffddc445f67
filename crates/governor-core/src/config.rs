//! Configuration for the watch loop.
//!
//! Built once at startup by the host process and passed into
//! [`Governor::new`](crate::Governor::new); nothing here is read from
//! process-wide state.

use std::time::Duration;

use governor_store::StoreConfig;

use crate::model::ActionParams;

/// Action run on the governor leader to announce new events.
pub const DEFAULT_ACTION: &str = "governor-event";

/// Default bound on a single action dispatch.
const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

/// Settings for a [`Governor`](crate::Governor).
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    /// Application whose leader receives the wake-up action.
    pub application: String,
    /// Name of the wake-up action.
    pub action: String,
    /// Parameters passed to the wake-up action.
    pub action_params: ActionParams,
    /// Location and lock behavior of the event store.
    pub store: StoreConfig,
    /// Upper bound on one dispatch (leader lookup plus action enqueue).
    pub dispatch_timeout: Duration,
    /// When events are pending and the feed stays quiet this long, retry
    /// the store without waiting for a notification. `None` retries only
    /// on the next notification.
    pub retry_interval: Option<Duration>,
}

impl GovernorConfig {
    /// Configuration with defaults for everything but the target
    /// application and the store location.
    pub fn new(application: impl Into<String>, store: StoreConfig) -> Self {
        Self {
            application: application.into(),
            action: DEFAULT_ACTION.to_owned(),
            action_params: ActionParams::new(),
            store,
            dispatch_timeout: Duration::from_millis(DEFAULT_DISPATCH_TIMEOUT_MS),
            retry_interval: None,
        }
    }

    /// Set the wake-up action name.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Set the dispatch bound.
    #[must_use]
    pub const fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Enable or disable the idle retry.
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Option<Duration>) -> Self {
        self.retry_interval = interval;
        self
    }
}
