//! Delta-to-event translation.
//!
//! Only unit deltas matter. A `change` for a unit the model did not know
//! about at the start of the tick is an addition; any later `change` for the
//! same unit (status updates, relation changes, ...) is noise. A `remove` is
//! always a removal, whatever the snapshot says, because the unit is leaving
//! either way.
//!
//! Translation is a pure function of the delta and the snapshot: feeding the
//! same input twice yields the same answer.

use std::collections::BTreeSet;

use governor_types::{ChangeKind, ChangeNotification, Delta, Event};
use tracing::debug;

/// Translate one delta against the unit snapshot taken for this tick.
pub fn translate(delta: &Delta, known_units: &BTreeSet<String>) -> Option<Event> {
    if !delta.is_unit() {
        return None;
    }
    let name = delta.name()?;

    match delta.change {
        ChangeKind::Change if !known_units.contains(name) => Some(Event::unit_added(name)),
        ChangeKind::Remove => Some(Event::unit_removed(name)),
        ChangeKind::Change | ChangeKind::Other(_) => None,
    }
}

/// Translate every delta of a notification, preserving arrival order.
pub fn translate_notification(
    notification: &ChangeNotification,
    known_units: &BTreeSet<String>,
) -> Vec<Event> {
    notification
        .iter()
        .filter_map(|delta| {
            let event = translate(delta, known_units);
            if let Some(event) = &event {
                debug!(event = %event, "unit delta translated");
            }
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use governor_types::{EventName, UNIT_ENTITY};

    use super::*;

    fn known(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn change_for_unknown_unit_is_addition() {
        let event = translate(&Delta::unit_change("u1"), &known(&[]));
        assert_eq!(event, Some(Event::unit_added("u1")));
    }

    #[test]
    fn change_for_known_unit_is_ignored() {
        assert_eq!(translate(&Delta::unit_change("u1"), &known(&["u1"])), None);
    }

    #[test]
    fn remove_is_unconditional() {
        assert_eq!(
            translate(&Delta::unit_remove("u1"), &known(&[])),
            Some(Event::unit_removed("u1"))
        );
        assert_eq!(
            translate(&Delta::unit_remove("u1"), &known(&["u1"])),
            Some(Event::unit_removed("u1"))
        );
    }

    #[test]
    fn non_unit_entities_are_ignored() {
        for entity in ["application", "machine", "relation", "annotation"] {
            let delta = Delta::new(entity, ChangeKind::Change, serde_json::json!({"name": "u1"}));
            assert_eq!(translate(&delta, &known(&[])), None, "{entity}");
            let delta = Delta::new(entity, ChangeKind::Remove, serde_json::json!({"name": "u1"}));
            assert_eq!(translate(&delta, &known(&[])), None, "{entity}");
        }
    }

    #[test]
    fn unknown_change_kinds_are_ignored() {
        let delta = Delta::new(
            UNIT_ENTITY,
            ChangeKind::Other("rename".to_owned()),
            serde_json::json!({"name": "u1"}),
        );
        assert_eq!(translate(&delta, &known(&[])), None);
    }

    #[test]
    fn unit_delta_without_name_is_ignored() {
        let delta = Delta::new(UNIT_ENTITY, ChangeKind::Remove, serde_json::json!({}));
        assert_eq!(translate(&delta, &known(&[])), None);
    }

    #[test]
    fn translation_is_idempotent() {
        let snapshot = known(&["a/0"]);
        for delta in [
            Delta::unit_change("a/0"),
            Delta::unit_change("a/1"),
            Delta::unit_remove("a/0"),
        ] {
            assert_eq!(translate(&delta, &snapshot), translate(&delta, &snapshot));
        }
    }

    #[test]
    fn notification_keeps_arrival_order() {
        let notification = ChangeNotification::new(vec![
            Delta::unit_change("u1"),
            Delta::new("application", ChangeKind::Change, serde_json::json!({"name": "app"})),
            Delta::unit_remove("u1"),
            Delta::unit_change("u2"),
        ]);
        let events = translate_notification(&notification, &known(&[]));
        let names: Vec<(EventName, &str)> =
            events.iter().map(|e| (e.name(), e.unit_name())).collect();
        assert_eq!(
            names,
            vec![
                (EventName::UnitAdded, "u1"),
                (EventName::UnitRemoved, "u1"),
                (EventName::UnitAdded, "u2"),
            ]
        );
    }

    #[test]
    fn repeated_changes_in_one_tick_each_count_against_the_snapshot() {
        // The snapshot is fixed for the tick, so two changes for the same new
        // unit inside one notification both read as additions.
        let notification =
            ChangeNotification::new(vec![Delta::unit_change("u1"), Delta::unit_change("u1")]);
        assert_eq!(translate_notification(&notification, &known(&[])).len(), 2);
    }
}
