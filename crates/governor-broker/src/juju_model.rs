//! [`Model`] over a Juju model connection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use governor_core::{ActionParams, ActionReceipt, Model, ModelError, UnitStatus};
use governor_types::{ChangeKind, ChangeNotification, unit_tag};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::rpc::RpcClient;
use crate::session::{ENQUEUE_OPERATION, FULL_STATUS};

/// Units currently present in the model, as seen through the all-watcher.
///
/// Shared between the change feed, which applies deltas, and the model
/// adapter, which hands out snapshots.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Arc<RwLock<BTreeSet<String>>>,
}

impl UnitRegistry {
    /// Fold the unit deltas of `notification` into the registry.
    pub fn apply(&self, notification: &ChangeNotification) {
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        for delta in notification.iter().filter(|d| d.is_unit()) {
            let Some(name) = delta.name() else { continue };
            match delta.change {
                ChangeKind::Change => {
                    units.insert(name.to_owned());
                }
                ChangeKind::Remove => {
                    units.remove(name);
                }
                ChangeKind::Other(_) => {}
            }
        }
    }

    /// Copy of the current unit set.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Default, Deserialize)]
struct FullStatus {
    #[serde(default)]
    applications: Option<BTreeMap<String, ApplicationStatus>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationStatus {
    #[serde(default)]
    units: Option<BTreeMap<String, UnitLeadership>>,
}

#[derive(Debug, Default, Deserialize)]
struct UnitLeadership {
    #[serde(default)]
    leader: bool,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct ActionTag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct EnqueuedAction {
    #[serde(default)]
    action: Option<ActionTag>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct EnqueuedOperation {
    #[serde(default)]
    operation: String,
    #[serde(default)]
    actions: Option<Vec<EnqueuedAction>>,
}

/// Reads leadership and runs actions on a Juju model.
#[derive(Debug, Clone)]
pub struct JujuModel {
    client: Arc<RpcClient>,
    registry: UnitRegistry,
}

impl JujuModel {
    /// Adapter over `client`, answering unit queries from `registry`.
    pub const fn new(client: Arc<RpcClient>, registry: UnitRegistry) -> Self {
        Self { client, registry }
    }
}

impl Model for JujuModel {
    async fn known_units(&self) -> Result<BTreeSet<String>, ModelError> {
        Ok(self.registry.snapshot())
    }

    async fn application_units(
        &self,
        application: &str,
    ) -> Result<Option<Vec<UnitStatus>>, ModelError> {
        let params = json!({ "patterns": [application] });
        let status: FullStatus = self.client.call_as(FULL_STATUS, "", params).await?;

        let Some(app) = status
            .applications
            .unwrap_or_default()
            .remove(application)
        else {
            return Ok(None);
        };
        let units = app
            .units
            .unwrap_or_default()
            .into_iter()
            .map(|(name, unit)| UnitStatus::new(name, unit.leader))
            .collect();
        Ok(Some(units))
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<ActionReceipt, ModelError> {
        let receiver = unit_tag(unit).map_err(|e| ModelError::InvalidUnit(e.to_string()))?;
        let request = json!({
            "actions": [{
                "receiver": receiver,
                "name": action,
                "parameters": params,
            }]
        });
        let enqueued: EnqueuedOperation =
            self.client.call_as(ENQUEUE_OPERATION, "", request).await?;

        let mut receipt = ActionReceipt {
            operation: enqueued.operation,
            actions: Vec::new(),
        };
        for result in enqueued.actions.unwrap_or_default() {
            if let Some(error) = result.error {
                return Err(ModelError::Api {
                    code: error.code,
                    message: error.message,
                });
            }
            if let Some(tag) = result.action {
                receipt.actions.push(tag.tag);
            }
        }
        debug!(unit, action, operation = receipt.operation, "action enqueued");
        Ok(receipt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use governor_types::Delta;
    use serde_json::{Value, json};

    use super::*;
    use crate::fake_controller;

    fn names(registry: &UnitRegistry) -> Vec<String> {
        registry.snapshot().into_iter().collect()
    }

    #[test]
    fn registry_follows_unit_deltas() {
        let registry = UnitRegistry::default();
        registry.apply(&ChangeNotification::new(vec![
            Delta::unit_change("db/0"),
            Delta::unit_change("db/1"),
            Delta::new("application", ChangeKind::Change, json!({"name": "db"})),
        ]));
        assert_eq!(names(&registry), vec!["db/0", "db/1"]);

        registry.apply(&ChangeNotification::new(vec![
            Delta::unit_remove("db/0"),
            Delta::new("unit", ChangeKind::Other("refresh".to_owned()), json!({"name": "db/7"})),
        ]));
        assert_eq!(names(&registry), vec!["db/1"]);
    }

    #[test]
    fn registry_clones_share_state() {
        let registry = UnitRegistry::default();
        let shared = registry.clone();
        registry.apply(&ChangeNotification::new(vec![Delta::unit_change("db/0")]));
        assert!(shared.snapshot().contains("db/0"));
    }

    fn status_handler(
        facade: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, (String, String)> {
        match (facade, method) {
            ("Client", "FullStatus") => {
                if params["patterns"][0] == "governor" {
                    Ok(json!({"applications": {"governor": {"units": {
                        "governor/0": {"leader": false, "workload-status": {}},
                        "governor/1": {"leader": true}
                    }}}}))
                } else {
                    Ok(json!({"applications": {}}))
                }
            }
            ("Action", "EnqueueOperation") => {
                let action = &params["actions"][0];
                if action["receiver"] == "unit-governor-1" && action["name"] == "governor-event" {
                    Ok(json!({"operation": "operation-3", "actions": [
                        {"action": {"tag": "action-4", "receiver": "unit-governor-1", "name": "governor-event"}}
                    ]}))
                } else {
                    Ok(json!({"operation": "operation-5", "actions": [
                        {"error": {"message": "action not defined", "code": "not found"}}
                    ]}))
                }
            }
            _ => Err(("not implemented".to_owned(), format!("{facade}.{method}"))),
        }
    }

    async fn model() -> JujuModel {
        let (client, controller) = fake_controller::connect().await;
        let _server = controller.serve(status_handler);
        JujuModel::new(Arc::new(client), UnitRegistry::default())
    }

    #[tokio::test]
    async fn reads_leadership_from_full_status() {
        let model = model().await;
        let units = model.application_units("governor").await.unwrap().unwrap();
        assert_eq!(
            units,
            vec![
                UnitStatus::new("governor/0", false),
                UnitStatus::new("governor/1", true),
            ]
        );
    }

    #[tokio::test]
    async fn missing_application_is_none() {
        let model = model().await;
        assert_eq!(model.application_units("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn enqueues_action_on_unit_tag() {
        let model = model().await;
        let receipt = model
            .run_action("governor/1", "governor-event", &ActionParams::new())
            .await
            .unwrap();
        assert_eq!(receipt.operation, "operation-3");
        assert_eq!(receipt.actions, vec!["action-4"]);
    }

    #[tokio::test]
    async fn per_action_error_is_reported() {
        let model = model().await;
        let err = model
            .run_action("governor/1", "missing", &ActionParams::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::Api {
                code: "not found".to_owned(),
                message: "action not defined".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn malformed_unit_name_never_reaches_the_controller() {
        let model = model().await;
        let err = model
            .run_action("governor", "governor-event", &ActionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidUnit(_)));
    }

    #[tokio::test]
    async fn known_units_come_from_registry() {
        let (client, _controller) = fake_controller::connect().await;
        let registry = UnitRegistry::default();
        registry.apply(&ChangeNotification::new(vec![Delta::unit_change("db/0")]));
        let model = JujuModel::new(Arc::new(client), registry);
        assert!(model.known_units().await.unwrap().contains("db/0"));
    }
}
