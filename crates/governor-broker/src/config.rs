//! Configuration for the broker.
//!
//! Connection details come from `creds.yaml` in the snap's common directory
//! (`$SNAP_COMMON/creds.yaml`), written there by the governor charm. The same
//! directory is the storage root for the event store. Tuning knobs are read
//! from environment variables with defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use governor_core::GovernorConfig;
use governor_core::config::DEFAULT_ACTION;
use governor_store::StoreConfig;
use serde::Deserialize;

/// TLS server name the Juju API server certificate is issued for.
const DEFAULT_TLS_SERVER_NAME: &str = "juju-apiserver";

/// Name of the credentials file below the storage root.
const CREDS_FILE_NAME: &str = "creds.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the credentials file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the credentials YAML.
    #[error("failed to parse credentials YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// A required environment variable is not set.
    #[error("missing required env var {0}")]
    MissingVar(String),

    /// A value is present but unusable.
    #[error("invalid {name}: {reason}")]
    Invalid {
        /// The offending setting.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// One controller address or a list of them, tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Endpoints {
    /// A single `host:port`.
    One(String),
    /// Several `host:port` addresses of an HA controller.
    Many(Vec<String>),
}

/// Contents of `creds.yaml`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credentials {
    /// Controller API address(es).
    pub endpoint: Endpoints,
    /// Juju user name (without the `user-` prefix).
    pub username: String,
    /// Juju user password.
    pub password: String,
    /// PEM-encoded controller CA certificate.
    pub cacert: String,
    /// Model to watch, as `name` or `owner/name`.
    pub model: String,
    /// Application whose leader receives the wake-up action.
    pub governor_charm: String,
    /// Wake-up action name.
    #[serde(default = "default_action")]
    pub governor_action: String,
    /// Server name checked against the controller certificate.
    #[serde(default = "default_tls_server_name")]
    pub tls_server_name: String,
}

fn default_action() -> String {
    DEFAULT_ACTION.to_owned()
}

fn default_tls_server_name() -> String {
    DEFAULT_TLS_SERVER_NAME.to_owned()
}

impl Credentials {
    /// Parse credentials from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the document is malformed or lacks a
    /// required key, and [`ConfigError::Invalid`] if no endpoint is given.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let creds: Self = serde_yml::from_str(yaml)?;
        if creds.endpoints().is_empty() {
            return Err(ConfigError::Invalid {
                name: "endpoint".to_owned(),
                reason: "no controller address given".to_owned(),
            });
        }
        Ok(creds)
    }

    /// Read and parse a credentials file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`parse`](Self::parse).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Controller addresses in the order they should be tried.
    pub fn endpoints(&self) -> Vec<&str> {
        match &self.endpoint {
            Endpoints::One(addr) => addr
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .collect(),
            Endpoints::Many(addrs) => addrs
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("model", &self.model)
            .field("governor_charm", &self.governor_charm)
            .field("governor_action", &self.governor_action)
            .field("tls_server_name", &self.tls_server_name)
            .finish_non_exhaustive()
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Storage root; holds the event store and, by default, `creds.yaml`.
    pub storage_root: PathBuf,
    /// Where the credentials were read from.
    pub creds_path: PathBuf,
    /// Controller connection details.
    pub credentials: Credentials,
    /// Bound on one wake-up dispatch.
    pub dispatch_timeout: Duration,
    /// Idle retry for events blocked by a locked store (`None` = off).
    pub retry_interval: Option<Duration>,
    /// How long store operations wait on a held lock.
    pub store_busy_timeout: Duration,
}

impl BrokerConfig {
    /// Load configuration from the process environment.
    ///
    /// Required variables:
    /// - `SNAP_COMMON` -- storage root
    ///
    /// Optional variables:
    /// - `GOVERNOR_CREDS` -- credentials file (default `$SNAP_COMMON/creds.yaml`)
    /// - `GOVERNOR_DISPATCH_TIMEOUT_MS` -- dispatch bound (default 30000)
    /// - `GOVERNOR_RETRY_INTERVAL_MS` -- idle retry, `0` disables (default 10000)
    /// - `GOVERNOR_STORE_BUSY_TIMEOUT_MS` -- store lock wait (default 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration using `var` to look up environment variables.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage_root = var("SNAP_COMMON")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingVar("SNAP_COMMON".to_owned()))?;
        let creds_path = var("GOVERNOR_CREDS")
            .filter(|v| !v.is_empty())
            .map_or_else(|| storage_root.join(CREDS_FILE_NAME), PathBuf::from);
        let credentials = Credentials::from_file(&creds_path)?;

        let dispatch_timeout = millis(&var, "GOVERNOR_DISPATCH_TIMEOUT_MS", 30_000)?;
        let retry_interval = millis(&var, "GOVERNOR_RETRY_INTERVAL_MS", 10_000)?;
        let store_busy_timeout = millis(&var, "GOVERNOR_STORE_BUSY_TIMEOUT_MS", 5_000)?;

        Ok(Self {
            storage_root,
            creds_path,
            credentials,
            dispatch_timeout,
            retry_interval: (!retry_interval.is_zero()).then_some(retry_interval),
            store_busy_timeout,
        })
    }

    /// Settings for the watch loop.
    pub fn governor_config(&self) -> GovernorConfig {
        let store = StoreConfig::new(self.storage_root.clone()).with_busy_timeout(self.store_busy_timeout);
        GovernorConfig::new(&self.credentials.governor_charm, store)
            .with_action(&self.credentials.governor_action)
            .with_dispatch_timeout(self.dispatch_timeout)
            .with_retry_interval(self.retry_interval)
    }
}

/// Read a millisecond duration, falling back to `default_ms` when unset.
fn millis(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let ms = match var(name) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            name: name.to_owned(),
            reason: e.to_string(),
        })?,
        None => default_ms,
    };
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const CREDS: &str = r"
endpoint: 10.5.0.2:17070
username: admin
password: s3cret
cacert: |
  -----BEGIN CERTIFICATE-----
  MIIB
  -----END CERTIFICATE-----
model: production
governor-charm: governor
";

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parses_charm_written_creds() {
        let creds = Credentials::parse(CREDS).unwrap();
        assert_eq!(creds.endpoints(), vec!["10.5.0.2:17070"]);
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.model, "production");
        assert_eq!(creds.governor_charm, "governor");
        assert_eq!(creds.governor_action, "governor-event");
        assert_eq!(creds.tls_server_name, "juju-apiserver");
        assert!(creds.cacert.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn accepts_endpoint_lists() {
        let yaml = CREDS.replace(
            "endpoint: 10.5.0.2:17070",
            "endpoint: [\"10.5.0.2:17070\", \"10.5.0.3:17070\"]",
        );
        let creds = Credentials::parse(&yaml).unwrap();
        assert_eq!(creds.endpoints(), vec!["10.5.0.2:17070", "10.5.0.3:17070"]);

        let yaml = CREDS.replace(
            "endpoint: 10.5.0.2:17070",
            "endpoint: 10.5.0.2:17070, 10.5.0.3:17070",
        );
        let creds = Credentials::parse(&yaml).unwrap();
        assert_eq!(creds.endpoints().len(), 2);
    }

    #[test]
    fn missing_key_is_a_yaml_error() {
        let yaml = CREDS.replace("governor-charm: governor\n", "");
        assert!(matches!(Credentials::parse(&yaml), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let yaml = CREDS.replace("endpoint: 10.5.0.2:17070", "endpoint: []");
        assert!(matches!(Credentials::parse(&yaml), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = Credentials::parse(CREDS).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn loads_from_storage_root_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("creds.yaml"), CREDS).unwrap();
        let root = dir.path().to_str().unwrap();

        let config = BrokerConfig::from_vars(vars(&[("SNAP_COMMON", root)])).unwrap();
        assert_eq!(config.creds_path, dir.path().join("creds.yaml"));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_interval, Some(Duration::from_secs(10)));
        assert_eq!(config.store_busy_timeout, Duration::from_secs(5));

        let governor = config.governor_config();
        assert_eq!(governor.application, "governor");
        assert_eq!(governor.action, "governor-event");
        assert_eq!(governor.store.path(), dir.path().join("gs_db"));
    }

    #[test]
    fn env_overrides_and_zero_retry_disables() {
        let dir = tempfile::TempDir::new().unwrap();
        let creds = dir.path().join("elsewhere.yaml");
        std::fs::write(&creds, CREDS).unwrap();

        let config = BrokerConfig::from_vars(vars(&[
            ("SNAP_COMMON", dir.path().to_str().unwrap()),
            ("GOVERNOR_CREDS", creds.to_str().unwrap()),
            ("GOVERNOR_DISPATCH_TIMEOUT_MS", "1500"),
            ("GOVERNOR_RETRY_INTERVAL_MS", "0"),
            ("GOVERNOR_STORE_BUSY_TIMEOUT_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.creds_path, creds);
        assert_eq!(config.dispatch_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry_interval, None);
        assert_eq!(config.store_busy_timeout, Duration::ZERO);
    }

    #[test]
    fn missing_storage_root_is_reported() {
        let err = BrokerConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "SNAP_COMMON"));
    }

    #[test]
    fn malformed_duration_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("creds.yaml"), CREDS).unwrap();
        let err = BrokerConfig::from_vars(vars(&[
            ("SNAP_COMMON", dir.path().to_str().unwrap()),
            ("GOVERNOR_DISPATCH_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "GOVERNOR_DISPATCH_TIMEOUT_MS"));
    }

    #[test]
    fn unreadable_creds_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = BrokerConfig::from_vars(vars(&[("SNAP_COMMON", dir.path().to_str().unwrap())]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
