//! Watch-to-event-to-action pipeline for the governor broker.
//!
//! The broker turns unit membership changes in a Juju model into durable
//! governance events and wakes the governor application once they are
//! recorded.
//!
//! # Architecture
//!
//! ```text
//! ChangeFeed --> translator --> pending queue --> EventStore::append
//!                                                      |
//!                              (>= 1 event recorded)   v
//!                                          ActionDispatcher::trigger
//! ```
//!
//! The external world is reached only through the [`ChangeFeed`] and
//! [`Model`] traits, so the loop can be driven by the Juju API in
//! production and by scripted fakes in tests.
//!
//! # Modules
//!
//! - [`model`] -- Collaborator seams and their error types
//! - [`translator`] -- Delta-to-event rules
//! - [`dispatcher`] -- Leader resolution and action dispatch
//! - [`governor`] -- The watch loop and its per-tick state machine
//! - [`config`] -- Loop configuration

pub mod config;
pub mod dispatcher;
pub mod governor;
pub mod model;
pub mod translator;

pub use config::GovernorConfig;
pub use dispatcher::{ActionDispatcher, DispatchError, DispatchOutcome};
pub use governor::{FlushOutcome, Governor, GovernorError, GovernorExit, GovernorState, TickSummary};
pub use model::{ActionParams, ActionReceipt, ChangeFeed, FeedError, Model, ModelError, UnitStatus};
