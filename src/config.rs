//! API configuration
//!
//! Loads the two `CalicoAPIConfig` documents (YAML or JSON) naming the v1 and
//! v3 datastores. When a file does not exist the settings are taken from the
//! environment instead.

use crate::datastore::http::{ApiHttpClient, Credentials};
use crate::datastore::{ClusterDatastore, LegacyClient, ModernClient};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH_V1: &str = "/etc/calico/apiconfigv1.cfg";
pub const DEFAULT_CONFIG_PATH_V3: &str = "/etc/calico/apiconfigv3.cfg";
pub const DEFAULT_OUTPUT_DIR: &str = "calico-upgrade-report";

/// Default per-request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// `spec` section of a `CalicoAPIConfig` document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigSpec {
    #[serde(default)]
    pub datastore_type: Option<String>,
    /// Comma separated etcd URLs
    #[serde(default)]
    pub etcd_endpoints: Option<String>,
    #[serde(default)]
    pub etcd_username: Option<String>,
    #[serde(default)]
    pub etcd_password: Option<String>,
    #[serde(default, rename = "k8sAPIEndpoint")]
    pub k8s_api_endpoint: Option<String>,
    #[serde(default, rename = "k8sAPIToken")]
    pub k8s_api_token: Option<String>,
    /// Request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiConfigFile {
    #[serde(default)]
    spec: ApiConfigSpec,
}

impl ApiConfigSpec {
    /// Build a spec from environment variables via `lookup`
    fn from_env_with(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{}{}", prefix, name)).filter(|v| !v.is_empty());
        Self {
            datastore_type: var("DATASTORE_TYPE"),
            etcd_endpoints: var("ETCD_ENDPOINTS"),
            etcd_username: var("ETCD_USERNAME"),
            etcd_password: var("ETCD_PASSWORD"),
            k8s_api_endpoint: var("K8S_API_ENDPOINT"),
            k8s_api_token: var("K8S_API_TOKEN"),
            timeout: var("TIMEOUT").and_then(|t| t.parse().ok()),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// Read a config file, or `None` if it does not exist
fn read_spec(path: &Path) -> Result<Option<ApiConfigSpec>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // JSON is a subset of YAML, so one parser covers both formats
    let file: ApiConfigFile = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(file.spec))
}

/// Where a spec came from, for error messages
fn origin(path: &Path, from_file: bool) -> String {
    if from_file {
        path.display().to_string()
    } else {
        "environment".to_string()
    }
}

fn parse_url(origin: &str, field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        origin: origin.to_string(),
        message: format!("{} '{}' is not a valid URL: {}", field, raw.trim(), e),
    })
}

/// Resolved v1 (etcd v2) connection settings
#[derive(Debug, Clone)]
pub struct LegacyConfig {
    pub endpoints: Vec<Url>,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl LegacyConfig {
    pub fn from_spec(spec: &ApiConfigSpec, origin: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            origin: origin.to_string(),
            message,
        };

        match spec.datastore_type.as_deref() {
            None | Some("etcdv2") => {}
            Some(other) => {
                return Err(invalid(format!(
                    "datastoreType '{}' is not supported for v1 data, expected 'etcdv2'",
                    other
                )))
            }
        }

        let raw = spec
            .etcd_endpoints
            .as_deref()
            .ok_or_else(|| invalid("etcdEndpoints is required".to_string()))?;
        let endpoints = raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_url(origin, "etcdEndpoints", s))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(invalid("etcdEndpoints is empty".to_string()));
        }

        let credentials = match &spec.etcd_username {
            Some(username) => Credentials::Basic {
                username: username.clone(),
                password: spec.etcd_password.clone(),
            },
            None => Credentials::None,
        };

        Ok(Self {
            endpoints,
            credentials,
            timeout: spec.timeout(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = read_spec(path)?;
        let from_file = file.is_some();
        let spec = file.unwrap_or_else(|| ApiConfigSpec::from_env_with("APIV1_", lookup));
        Self::from_spec(&spec, &origin(path, from_file))
    }

    pub fn client(&self) -> Result<LegacyClient, ConfigError> {
        let http = ApiHttpClient::new(self.credentials.clone(), self.timeout)?;
        Ok(LegacyClient::new(http, self.endpoints.clone()))
    }
}

/// Resolved v3 API connection settings
#[derive(Debug, Clone)]
pub struct ModernConfig {
    pub endpoint: Url,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl ModernConfig {
    pub fn from_spec(spec: &ApiConfigSpec, origin: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            origin: origin.to_string(),
            message,
        };

        match spec.datastore_type.as_deref() {
            None | Some("kubernetes") => {}
            Some(other) => {
                return Err(invalid(format!(
                    "datastoreType '{}' is not supported for v3 data, expected 'kubernetes'",
                    other
                )))
            }
        }

        let raw = spec
            .k8s_api_endpoint
            .as_deref()
            .ok_or_else(|| invalid("k8sAPIEndpoint is required".to_string()))?;
        let endpoint = parse_url(origin, "k8sAPIEndpoint", raw)?;

        let credentials = match &spec.k8s_api_token {
            Some(token) => Credentials::Bearer(token.clone()),
            None => Credentials::None,
        };

        Ok(Self {
            endpoint,
            credentials,
            timeout: spec.timeout(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = read_spec(path)?;
        let from_file = file.is_some();
        let spec = file.unwrap_or_else(|| ApiConfigSpec::from_env_with("", lookup));
        Self::from_spec(&spec, &origin(path, from_file))
    }

    pub fn client(&self) -> Result<ModernClient, ConfigError> {
        let http = ApiHttpClient::new(self.credentials.clone(), self.timeout)?;
        Ok(ModernClient::new(http, self.endpoint.clone()))
    }
}

/// Load both configs and connect to both datastores
///
/// Both datastores are checked concurrently; the first failure is returned.
pub async fn load_clients(v3_path: &Path, v1_path: &Path) -> Result<ClusterDatastore> {
    let modern = ModernConfig::load(v3_path).context("Failed to load the Calico v3 API configuration")?;
    let legacy = LegacyConfig::load(v1_path).context("Failed to load the Calico v1 API configuration")?;
    tracing::debug!("v1 endpoints: {:?}", legacy.endpoints);
    tracing::debug!("v3 endpoint: {}", modern.endpoint);

    let datastore = ClusterDatastore::new(legacy.client()?, modern.client()?);
    datastore.ping().await.context("Failed to connect to the Calico datastores")?;
    Ok(datastore)
}

/// Default report directory, relative to the working directory
pub fn default_output_dir() -> PathBuf {
    std::env::current_dir()
        .map(|dir| dir.join(DEFAULT_OUTPUT_DIR))
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_legacy_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apiconfigv1.cfg");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: calicoApiConfig\nspec:\n  datastoreType: etcdv2\n  etcdEndpoints: http://10.0.0.1:2379,http://10.0.0.2:2379\n  etcdUsername: root\n  etcdPassword: secret\n",
        )
        .unwrap();

        let config = LegacyConfig::load_with(&path, env(&[])).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].host_str(), Some("10.0.0.2"));
        assert!(matches!(config.credentials, Credentials::Basic { ref username, .. } if username == "root"));
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_modern_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apiconfigv3.cfg");
        std::fs::write(
            &path,
            r#"{"kind": "CalicoAPIConfig", "spec": {"datastoreType": "kubernetes", "k8sAPIEndpoint": "https://k8s:6443", "k8sAPIToken": "abc", "timeout": 3}}"#,
        )
        .unwrap();

        let config = ModernConfig::load_with(&path, env(&[])).unwrap();
        assert_eq!(config.endpoint.as_str(), "https://k8s:6443/");
        assert!(matches!(config.credentials, Credentials::Bearer(_)));
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_falls_back_to_environment() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.cfg");

        let legacy = LegacyConfig::load_with(&missing, env(&[("APIV1_ETCD_ENDPOINTS", "http://etcd:2379")])).unwrap();
        assert_eq!(legacy.endpoints[0].as_str(), "http://etcd:2379/");
        assert!(matches!(legacy.credentials, Credentials::None));

        let modern = ModernConfig::load_with(&missing, env(&[("K8S_API_ENDPOINT", "https://k8s:6443")])).unwrap();
        assert_eq!(modern.endpoint.host_str(), Some("k8s"));
    }

    #[test]
    fn test_missing_endpoint_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.cfg");
        let err = LegacyConfig::load_with(&missing, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref origin, .. } if origin == "environment"));
        assert!(err.to_string().contains("etcdEndpoints"));
    }

    #[test]
    fn test_wrong_datastore_type_is_invalid() {
        let spec = ApiConfigSpec {
            datastore_type: Some("etcdv3".to_string()),
            etcd_endpoints: Some("http://etcd:2379".to_string()),
            ..Default::default()
        };
        let err = LegacyConfig::from_spec(&spec, "test").unwrap_err();
        assert!(err.to_string().contains("etcdv3"));
    }

    #[test]
    fn test_bad_url_is_invalid() {
        let spec = ApiConfigSpec {
            k8s_api_endpoint: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(ModernConfig::from_spec(&spec, "test").is_err());
    }

    #[test]
    fn test_unparseable_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cfg");
        std::fs::write(&path, "spec: [unterminated").unwrap();
        assert!(matches!(
            LegacyConfig::load_with(&path, env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }
}
