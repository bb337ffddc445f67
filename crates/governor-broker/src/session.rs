//! Establishing an authenticated model connection.
//!
//! The broker logs into the controller, resolves the configured model name
//! to its UUID, then opens a second connection scoped to that model and
//! logs in again. Only the model connection is kept.

use governor_types::user_tag;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Credentials;
use crate::error::BrokerError;
use crate::rpc::{Method, RpcClient, RpcError};
use crate::tls::ControllerTls;

/// Version string announced at login.
const CLIENT_VERSION: &str = "3.4.0";

/// `Admin.Login`.
pub const LOGIN: Method<'static> = Method::new("Admin", 3, "Login");
/// `ModelManager.ListModels`.
pub const LIST_MODELS: Method<'static> = Method::new("ModelManager", 9, "ListModels");
/// `Client.WatchAll`.
pub const WATCH_ALL: Method<'static> = Method::new("Client", 6, "WatchAll");
/// `Client.FullStatus`.
pub const FULL_STATUS: Method<'static> = Method::new("Client", 6, "FullStatus");
/// `AllWatcher.Next`.
pub const ALL_WATCHER_NEXT: Method<'static> = Method::new("AllWatcher", 3, "Next");
/// `Action.EnqueueOperation`.
pub const ENQUEUE_OPERATION: Method<'static> = Method::new("Action", 7, "EnqueueOperation");

/// Login response fields the broker reports.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LoginResult {
    #[serde(default)]
    server_version: String,
}

/// A model the user can see.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelSummary {
    /// Model name.
    pub name: String,
    /// Model UUID.
    pub uuid: String,
    /// Owner tag (`user-admin`).
    #[serde(default)]
    pub owner_tag: String,
}

#[derive(Debug, Deserialize)]
struct UserModel {
    model: ModelSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserModelList {
    #[serde(default)]
    user_models: Option<Vec<UserModel>>,
}

/// Authenticate `client` as the configured user.
pub async fn login(client: &RpcClient, creds: &Credentials) -> Result<(), RpcError> {
    let params = json!({
        "auth-tag": user_tag(&creds.username),
        "credentials": creds.password,
        "nonce": "",
        "macaroons": [],
        "client-version": CLIENT_VERSION,
    });
    let result: LoginResult = client.call_as(LOGIN, "", params).await?;
    info!(
        user = creds.username,
        server_version = result.server_version,
        "logged in"
    );
    Ok(())
}

/// Look up the configured model among the models visible to the user.
pub async fn find_model(
    client: &RpcClient,
    creds: &Credentials,
) -> Result<Option<ModelSummary>, RpcError> {
    let params = json!({ "tag": user_tag(&creds.username) });
    let list: UserModelList = client.call_as(LIST_MODELS, "", params).await?;
    let models: Vec<ModelSummary> = list
        .user_models
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.model)
        .collect();
    Ok(select_model(models, &creds.model, &creds.username))
}

/// Pick the model named by `wanted` (`name` or `owner/name`).
///
/// A bare name prefers a model owned by `username` and otherwise takes the
/// first match.
pub fn select_model(models: Vec<ModelSummary>, wanted: &str, username: &str) -> Option<ModelSummary> {
    let (owner, name) = match wanted.split_once('/') {
        Some((owner, name)) => (Some(owner), name),
        None => (None, wanted),
    };
    let mut matches = models.into_iter().filter(|m| m.name == name);

    match owner {
        Some(owner) => {
            let tag = user_tag(owner);
            matches.find(|m| m.owner_tag == tag)
        }
        None => {
            let own_tag = user_tag(username);
            let candidates: Vec<ModelSummary> = matches.collect();
            let own = candidates.iter().position(|m| m.owner_tag == own_tag);
            let index = own.unwrap_or(0);
            candidates.into_iter().nth(index)
        }
    }
}

async fn dial(tls: &ControllerTls, addr: &str, path: &str) -> Result<RpcClient, RpcError> {
    let stream = tls.connect(addr).await?;
    RpcClient::handshake(&format!("wss://{addr}{path}"), stream).await
}

/// Whether trying the next controller address could help.
const fn is_transport_error(e: &RpcError) -> bool {
    matches!(
        e,
        RpcError::Connect { .. } | RpcError::Tls(_) | RpcError::WebSocket(_) | RpcError::Closed(_)
    )
}

/// Log into the controller, find the model and return a logged-in model
/// connection.
///
/// Controller addresses are tried in order; an address that cannot be
/// reached is skipped, while an API error (bad credentials, for one) ends
/// the attempt.
pub async fn open(creds: &Credentials) -> Result<(RpcClient, ModelSummary), BrokerError> {
    let tls = ControllerTls::new(&creds.cacert, &creds.tls_server_name)?;
    let mut last_error = None;

    for addr in creds.endpoints() {
        match open_via(&tls, addr, creds).await {
            Ok(opened) => return Ok(opened),
            Err(BrokerError::Rpc { source }) if is_transport_error(&source) => {
                warn!(endpoint = addr, error = %source, "controller endpoint unusable");
                last_error = Some(source);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.map_or(BrokerError::NoEndpoint, BrokerError::from))
}

async fn open_via(
    tls: &ControllerTls,
    addr: &str,
    creds: &Credentials,
) -> Result<(RpcClient, ModelSummary), BrokerError> {
    let controller = dial(tls, addr, "/api").await?;
    login(&controller, creds).await?;
    let model = find_model(&controller, creds)
        .await?
        .ok_or_else(|| BrokerError::ModelNotFound {
            model: creds.model.clone(),
        })?;
    drop(controller);

    let client = dial(tls, addr, &format!("/model/{}/api", model.uuid)).await?;
    login(&client, creds).await?;
    info!(endpoint = addr, model = model.name, uuid = model.uuid, "model connection open");
    Ok((client, model))
}
