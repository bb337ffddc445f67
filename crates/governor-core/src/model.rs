//! Seams to the systems the broker observes and acts on.
//!
//! [`ChangeFeed`] is the streaming source of model deltas; [`Model`] answers
//! questions about the current model and runs actions on units. Both are
//! implemented over the Juju API by the broker binary and by in-memory fakes
//! in tests.

use std::collections::BTreeSet;
use std::future::Future;

use governor_types::ChangeNotification;

/// Keyword parameters passed to a remote action.
pub type ActionParams = serde_json::Map<String, serde_json::Value>;

/// Errors raised by a [`ChangeFeed`]. All of them end the watch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The connection carrying the feed is gone.
    #[error("change feed closed: {0}")]
    Closed(String),

    /// The watcher reported an error.
    #[error("change feed error: {0}")]
    Watcher(String),

    /// A notification could not be decoded.
    #[error("undecodable change notification: {0}")]
    Decode(String),
}

/// Errors raised by a [`Model`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The request could not be delivered or its response was lost.
    #[error("model connection error: {0}")]
    Connection(String),

    /// The controller rejected the request.
    #[error("model API error ({code}): {message}")]
    Api {
        /// Error code reported by the controller (may be empty).
        code: String,
        /// Error message reported by the controller.
        message: String,
    },

    /// A unit name could not be turned into an addressable entity.
    #[error("invalid unit: {0}")]
    InvalidUnit(String),

    /// A response could not be decoded.
    #[error("undecodable model response: {0}")]
    Decode(String),
}

/// Leadership status of one unit of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Unit name (`governor/0`).
    pub name: String,
    /// Whether the unit currently reports itself as the leader.
    pub leader: bool,
}

impl UnitStatus {
    /// Build a unit status.
    pub fn new(name: impl Into<String>, leader: bool) -> Self {
        Self {
            name: name.into(),
            leader,
        }
    }
}

/// Acknowledgement of an enqueued action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReceipt {
    /// Operation id the controller assigned (empty if it reported none).
    pub operation: String,
    /// Tags of the actions created by the operation.
    pub actions: Vec<String>,
}

/// A blocking-pull source of model change notifications.
pub trait ChangeFeed: Send {
    /// Wait for the next notification.
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// before it completes must not lose the notification it was waiting
    /// for. The next call picks it up instead.
    ///
    /// # Errors
    ///
    /// Any [`FeedError`] means the feed cannot continue.
    fn next(&mut self) -> impl Future<Output = Result<ChangeNotification, FeedError>> + Send;
}

/// Read access to the governed model plus the ability to run actions.
pub trait Model: Send + Sync {
    /// Names of the units currently known to be in the model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the unit set cannot be obtained.
    fn known_units(&self) -> impl Future<Output = Result<BTreeSet<String>, ModelError>> + Send;

    /// Current units of `application` with their leadership flags, or
    /// `None` if the application is not deployed in the model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the status query fails.
    fn application_units(
        &self,
        application: &str,
    ) -> impl Future<Output = Result<Option<Vec<UnitStatus>>, ModelError>> + Send;

    /// Enqueue `action` with `params` on `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the action cannot be enqueued.
    fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> impl Future<Output = Result<ActionReceipt, ModelError>> + Send;
}
