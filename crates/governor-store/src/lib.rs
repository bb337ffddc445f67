//! Durable event buffer for the governor broker.
//!
//! Events observed by the broker are appended to an SQLite file under the
//! storage root (`<root>/gs_db`) before the governor application is woken
//! up. The governor later drains them in insertion order. SQLite's
//! single-writer lock is shared with that consumer, so lock contention is an
//! expected, recoverable condition and is reported separately from every
//! other failure.
//!
//! # Modules
//!
//! - [`store`] -- [`EventStore`] (`open` / `append` / `drain` / `close`)
//! - [`error`] -- [`StoreError`] and lock classification

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{EventStore, StoreConfig, StoredEvent};
