//! Governance events produced from unit membership changes.
//!
//! An [`Event`] is an immutable value: it is built once by the change
//! translator, buffered until it has been durably appended to the event
//! store, and never modified afterwards. The serialized form matches the
//! record the governor charm consumes:
//!
//! ```json
//! {"event_name": "unit_added", "event_data": {"unit_name": "mysql/1"}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of membership change an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// A unit joined the model.
    UnitAdded,
    /// A unit left the model.
    UnitRemoved,
}

impl EventName {
    /// Wire name of the event, as stored and delivered to the governor.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnitAdded => "unit_added",
            Self::UnitRemoved => "unit_removed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event data carried alongside the [`EventName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventPayload {
    /// Name of the unit the event is about (e.g. `mysql/1`).
    pub unit_name: String,
}

/// A governance event awaiting (or past) durable recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event_name")]
    name: EventName,
    #[serde(rename = "event_data")]
    payload: EventPayload,
}

impl Event {
    /// Build an event of the given kind for a unit.
    pub fn new(name: EventName, unit_name: impl Into<String>) -> Self {
        Self {
            name,
            payload: EventPayload {
                unit_name: unit_name.into(),
            },
        }
    }

    /// A `unit_added` event.
    pub fn unit_added(unit_name: impl Into<String>) -> Self {
        Self::new(EventName::UnitAdded, unit_name)
    }

    /// A `unit_removed` event.
    pub fn unit_removed(unit_name: impl Into<String>) -> Self {
        Self::new(EventName::UnitRemoved, unit_name)
    }

    /// The kind of change this event reports.
    pub const fn name(&self) -> EventName {
        self.name
    }

    /// The event data.
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Shorthand for `payload().unit_name`.
    pub fn unit_name(&self) -> &str {
        &self.payload.unit_name
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.payload.unit_name)
    }
}
