//! Leader resolution and remote action dispatch.
//!
//! The governor application is woken by running an action on its leader
//! unit. Leadership can move between ticks, so the leader is looked up on
//! every dispatch and never cached. The whole attempt runs under a timeout
//! so a stuck controller cannot stall the watch loop indefinitely.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::model::{ActionParams, ActionReceipt, Model, ModelError, UnitStatus};

/// Result of a dispatch attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The action was enqueued on the leader.
    Triggered {
        /// Leader unit that received the action.
        unit: String,
        /// Controller acknowledgement.
        receipt: ActionReceipt,
    },
    /// The application is not deployed (yet). Nothing to wake.
    ApplicationAbsent,
}

/// Errors from a dispatch attempt. None of them are fatal to the loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No unit of the application currently reports leadership.
    #[error("application {application} has no leader unit")]
    NoLeader {
        /// Application that was targeted.
        application: String,
    },

    /// The status query or the action enqueue failed.
    #[error("remote call failed: {0}")]
    Remote(#[from] ModelError),

    /// The attempt did not finish in time.
    #[error("dispatch to {application} timed out after {timeout_ms}ms")]
    Timeout {
        /// Application that was targeted.
        application: String,
        /// The bound that was exceeded.
        timeout_ms: u128,
    },
}

/// Runs actions on the current leader of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDispatcher {
    timeout: Duration,
}

impl ActionDispatcher {
    /// Create a dispatcher that bounds each attempt by `timeout`.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `action` with `params` on the leader of `application`.
    ///
    /// Returns [`DispatchOutcome::ApplicationAbsent`] without contacting any
    /// unit if the application is not in the model.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoLeader`] if no unit reports leadership,
    /// [`DispatchError::Remote`] if a remote call fails, and
    /// [`DispatchError::Timeout`] if the attempt exceeds the bound.
    pub async fn trigger<M: Model>(
        &self,
        model: &M,
        application: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<DispatchOutcome, DispatchError> {
        timeout(self.timeout, dispatch(model, application, action, params))
            .await
            .unwrap_or_else(|_| {
                Err(DispatchError::Timeout {
                    application: application.to_owned(),
                    timeout_ms: self.timeout.as_millis(),
                })
            })
    }
}

async fn dispatch<M: Model>(
    model: &M,
    application: &str,
    action: &str,
    params: &ActionParams,
) -> Result<DispatchOutcome, DispatchError> {
    let Some(units) = model.application_units(application).await? else {
        debug!(application, "application not in model, nothing to wake");
        return Ok(DispatchOutcome::ApplicationAbsent);
    };

    let leader = select_leader(application, &units)?;
    debug!(application, unit = leader, action, "dispatching action to leader");
    let receipt = model.run_action(leader, action, params).await?;

    Ok(DispatchOutcome::Triggered {
        unit: leader.to_owned(),
        receipt,
    })
}

/// Pick the leader among `units`.
///
/// If more than one unit claims leadership (a transient split during an
/// election), the lowest-numbered one wins.
///
/// # Errors
///
/// Returns [`DispatchError::NoLeader`] if no unit claims leadership.
pub fn select_leader<'a>(
    application: &str,
    units: &'a [UnitStatus],
) -> Result<&'a str, DispatchError> {
    let claimants: Vec<&str> = units
        .iter()
        .filter(|u| u.leader)
        .map(|u| u.name.as_str())
        .collect();
    let Some(chosen) = claimants.iter().copied().min_by_key(|name| unit_order(*name)) else {
        return Err(DispatchError::NoLeader {
            application: application.to_owned(),
        });
    };

    if claimants.len() > 1 {
        warn!(
            application,
            claimants = ?claimants,
            chosen,
            "multiple units report leadership, using the lowest-numbered"
        );
    }
    Ok(chosen)
}

/// Ordering key for unit names: unit number first, then the full name.
fn unit_order(name: &str) -> (u64, &str) {
    let number = name
        .rsplit_once('/')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(u64::MAX);
    (number, name)
}
