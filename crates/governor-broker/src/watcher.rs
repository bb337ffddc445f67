//! [`ChangeFeed`] over the Juju all-watcher.
//!
//! `Client.WatchAll` creates a watcher on the controller; each
//! `AllWatcher.Next` blocks until there are deltas and returns them all.
//! The first response is the full current state of the model.
//!
//! Every returned notification is folded into the shared [`UnitRegistry`]
//! at the start of the following `next` call, after the loop has taken its
//! known-unit snapshot for it.

use std::sync::Arc;

use governor_core::{ChangeFeed, FeedError};
use governor_types::ChangeNotification;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::juju_model::UnitRegistry;
use crate::rpc::{self, PendingCall, RpcClient, RpcError};
use crate::session::{ALL_WATCHER_NEXT, WATCH_ALL};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WatcherId {
    watcher_id: String,
}

/// Change feed backed by one all-watcher.
#[derive(Debug)]
pub struct AllWatcherFeed {
    client: Arc<RpcClient>,
    watcher_id: String,
    registry: UnitRegistry,
    in_flight: Option<PendingCall>,
    unapplied: Option<ChangeNotification>,
}

impl AllWatcherFeed {
    /// Create an all-watcher on the model behind `client`.
    pub async fn start(client: Arc<RpcClient>, registry: UnitRegistry) -> Result<Self, RpcError> {
        let id: WatcherId = client.call_as(WATCH_ALL, "", json!({})).await?;
        info!(watcher_id = id.watcher_id, "all-watcher started");
        Ok(Self {
            client,
            watcher_id: id.watcher_id,
            registry,
            in_flight: None,
            unapplied: None,
        })
    }
}

impl ChangeFeed for AllWatcherFeed {
    async fn next(&mut self) -> Result<ChangeNotification, FeedError> {
        if let Some(previous) = self.unapplied.take() {
            self.registry.apply(&previous);
        }

        let call = self
            .in_flight
            .get_or_insert_with(|| self.client.start(ALL_WATCHER_NEXT, &self.watcher_id, json!({})));
        let result = call.wait().await;
        self.in_flight = None;

        let notification: ChangeNotification = rpc::decode(result?)?;
        debug!(deltas = notification.len(), "all-watcher notification");
        self.unapplied = Some(notification.clone());
        Ok(notification)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::fake_controller::{self, FakeController};

    async fn started() -> (AllWatcherFeed, FakeController, UnitRegistry) {
        let (client, mut controller) = fake_controller::connect().await;
        let registry = UnitRegistry::default();
        let client = Arc::new(client);

        let start = tokio::spawn(AllWatcherFeed::start(client, registry.clone()));
        let request = controller.request().await;
        assert_eq!(request["type"], "Client");
        assert_eq!(request["request"], "WatchAll");
        controller.reply(&request, json!({"watcher-id": "17"}));

        (start.await.unwrap().unwrap(), controller, registry)
    }

    fn unit_delta(kind: &str, name: &str) -> serde_json::Value {
        json!(["unit", kind, {"name": name, "application": "db"}])
    }

    #[tokio::test]
    async fn next_polls_the_watcher_and_decodes_deltas() {
        let (mut feed, mut controller, _) = started().await;

        let next = tokio::spawn(async move {
            let notification = feed.next().await;
            (feed, notification)
        });
        let request = controller.request().await;
        assert_eq!(request["type"], "AllWatcher");
        assert_eq!(request["request"], "Next");
        assert_eq!(request["id"], "17");
        controller.reply(
            &request,
            json!({"deltas": [unit_delta("change", "db/0"), ["application", "change", {"name": "db"}]]}),
        );

        let (_, notification) = next.await.unwrap();
        let notification = notification.unwrap();
        assert_eq!(notification.len(), 2);
        assert_eq!(notification.deltas[0].name(), Some("db/0"));
    }

    #[tokio::test]
    async fn registry_lags_one_notification_behind() {
        let (mut feed, mut controller, registry) = started().await;

        let server = tokio::spawn(async move {
            let first = controller.request().await;
            controller.reply(&first, json!({"deltas": [unit_delta("change", "db/0")]}));
            let second = controller.request().await;
            controller.reply(&second, json!({"deltas": [unit_delta("remove", "db/0")]}));
            controller
        });

        feed.next().await.unwrap();
        assert!(registry.snapshot().is_empty());

        feed.next().await.unwrap();
        assert!(registry.snapshot().contains("db/0"));

        let _controller = server.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_next_keeps_the_pending_request() {
        let (mut feed, mut controller, _) = started().await;

        let timed_out = tokio::time::timeout(Duration::from_millis(20), feed.next()).await;
        assert!(timed_out.is_err());

        let request = controller.request().await;
        controller.reply(&request, json!({"deltas": [unit_delta("change", "db/3")]}));

        let notification = feed.next().await.unwrap();
        assert_eq!(notification.deltas[0].name(), Some("db/3"));

        let extra = tokio::time::timeout(Duration::from_millis(20), controller.request()).await;
        assert!(extra.is_err(), "only one Next was sent");
    }

    #[tokio::test]
    async fn watcher_error_ends_the_feed() {
        let (mut feed, mut controller, _) = started().await;

        let next = tokio::spawn(async move { feed.next().await });
        let request = controller.request().await;
        controller.fail(&request, "stopped", "watcher was stopped");

        let err = next.await.unwrap().unwrap_err();
        assert!(matches!(err, FeedError::Watcher(_)));
    }

    #[tokio::test]
    async fn lost_connection_closes_the_feed() {
        let (mut feed, mut controller, _) = started().await;

        let next = tokio::spawn(async move { feed.next().await });
        let _request = controller.request().await;
        controller.hang_up();

        let err = next.await.unwrap().unwrap_err();
        assert!(matches!(err, FeedError::Closed(_)));
    }
}
