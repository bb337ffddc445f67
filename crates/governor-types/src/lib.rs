//! Shared type definitions for the governor broker.
//!
//! The broker watches a Juju model for unit membership changes and records
//! each change as an [`Event`] before waking the governor application. This
//! crate holds the data that crosses crate boundaries: the events themselves,
//! the raw change-feed deltas they are derived from, and the entity tag
//! helpers used when addressing units over the Juju API.
//!
//! # Modules
//!
//! - [`event`] -- Governance events (`unit_added`, `unit_removed`)
//! - [`delta`] -- All-watcher deltas and change notifications
//! - [`tag`] -- Juju entity tag conversions

pub mod delta;
pub mod event;
pub mod tag;

// Re-export all public types at crate root for convenience.
pub use delta::{ChangeKind, ChangeNotification, Delta, UNIT_ENTITY};
pub use event::{Event, EventName, EventPayload};
pub use tag::{TagError, unit_tag, user_tag};
