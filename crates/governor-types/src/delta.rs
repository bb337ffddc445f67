//! All-watcher deltas and the notifications that carry them.
//!
//! The Juju all-watcher reports model changes as a batch of deltas per
//! `Next` call. Each delta is a three-element JSON array:
//!
//! ```json
//! ["unit", "change", {"name": "mysql/1", "application": "mysql", ...}]
//! ```
//!
//! Only the entity kind, the change kind and the entity's `name` matter to
//! the broker; the rest of `data` is carried through untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity kind reported for unit deltas.
pub const UNIT_ENTITY: &str = "unit";

/// What happened to the entity a [`Delta`] describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeKind {
    /// The entity was created or one of its fields changed.
    Change,
    /// The entity was removed from the model.
    Remove,
    /// Any change kind the broker does not act on.
    Other(String),
}

impl ChangeKind {
    /// Wire name of the change kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Change => "change",
            Self::Remove => "remove",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for ChangeKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "change" => Self::Change,
            "remove" => Self::Remove,
            _ => Self::Other(kind),
        }
    }
}

impl From<ChangeKind> for String {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Change => "change".to_owned(),
            ChangeKind::Remove => "remove".to_owned(),
            ChangeKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Array form of a delta as it appears on the wire.
#[derive(Serialize, Deserialize)]
struct RawDelta(String, ChangeKind, serde_json::Value);

/// A single reported change to model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDelta", into = "RawDelta")]
pub struct Delta {
    /// Entity kind (`unit`, `application`, `machine`, ...).
    pub entity: String,
    /// Change kind.
    pub change: ChangeKind,
    /// Entity fields as reported by the watcher.
    pub data: serde_json::Value,
}

impl From<RawDelta> for Delta {
    fn from(RawDelta(entity, change, data): RawDelta) -> Self {
        Self {
            entity,
            change,
            data,
        }
    }
}

impl From<Delta> for RawDelta {
    fn from(delta: Delta) -> Self {
        Self(delta.entity, delta.change, delta.data)
    }
}

impl Delta {
    /// Build a delta from its parts.
    pub fn new(entity: impl Into<String>, change: ChangeKind, data: serde_json::Value) -> Self {
        Self {
            entity: entity.into(),
            change,
            data,
        }
    }

    /// A `change` delta for the named unit.
    pub fn unit_change(name: &str) -> Self {
        Self::new(UNIT_ENTITY, ChangeKind::Change, serde_json::json!({ "name": name }))
    }

    /// A `remove` delta for the named unit.
    pub fn unit_remove(name: &str) -> Self {
        Self::new(UNIT_ENTITY, ChangeKind::Remove, serde_json::json!({ "name": name }))
    }

    /// Whether this delta describes a unit.
    pub fn is_unit(&self) -> bool {
        self.entity == UNIT_ENTITY
    }

    /// The entity's `name` field, if present and a string.
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(serde_json::Value::as_str)
    }
}

/// One batch of deltas returned by a single feed read, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Deltas in the order the watcher reported them.
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

impl ChangeNotification {
    /// Wrap a list of deltas.
    pub const fn new(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }

    /// Number of deltas in the notification.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Whether the notification carries no deltas.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Iterate the deltas in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, Delta> {
        self.deltas.iter()
    }
}

impl<'a> IntoIterator for &'a ChangeNotification {
    type Item = &'a Delta;
    type IntoIter = std::slice::Iter<'a, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.iter()
    }
}
