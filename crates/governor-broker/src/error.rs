//! Error types for the broker binary.
//!
//! [`BrokerError`] is the top-level error that `main` propagates; any of
//! its variants ends the process with a non-zero exit status so the
//! supervisor restarts it.

use crate::config::ConfigError;
use crate::rpc::RpcError;

/// Top-level error for the broker binary.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The Juju API could not be reached or refused the session.
    #[error("Juju API error: {source}")]
    Rpc {
        /// The underlying RPC error.
        #[from]
        source: RpcError,
    },

    /// The configured model does not exist or is not visible to the user.
    #[error("model {model} not found on the controller")]
    ModelNotFound {
        /// The model name that was looked up.
        model: String,
    },

    /// No configured endpoint accepted a session.
    #[error("no controller endpoint configured")]
    NoEndpoint,

    /// The watch loop stopped on a fatal error.
    #[error("governor loop error: {source}")]
    Governor {
        /// The underlying loop error.
        #[from]
        source: governor_core::GovernorError,
    },
}
