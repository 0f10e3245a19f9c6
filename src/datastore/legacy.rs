//! etcd v2 client for the Calico v1 datastore

use super::http::ApiHttpClient;
use super::keys::{self, EtcdNode, LEGACY_PREFIXES, READY_KEY};
use crate::error::{AccessError, HttpError, Store};
use crate::resource::LegacyResource;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// etcd v2 error code for "key not found"
const ETCD_KEY_NOT_FOUND: u64 = 100;

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: EtcdNode,
}

/// Client for the etcd v2 keys API
///
/// Endpoints are tried in order; the next one is used only when the previous
/// could not be reached at all.
#[derive(Clone)]
pub struct LegacyClient {
    http: ApiHttpClient,
    endpoints: Vec<Url>,
}

impl LegacyClient {
    pub fn new(http: ApiHttpClient, endpoints: Vec<Url>) -> Self {
        Self { http, endpoints }
    }

    fn url(endpoint: &Url, path: &str) -> String {
        format!("{}{}", endpoint.as_str().trim_end_matches('/'), path)
    }

    /// Check that some endpoint answers
    pub async fn ping(&self) -> Result<(), AccessError> {
        self.get("/version").await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Value, AccessError> {
        let mut last: Option<HttpError> = None;
        for endpoint in &self.endpoints {
            match self.http.get(&Self::url(endpoint, path)).await {
                Err(err) if err.is_unreachable() => {
                    tracing::warn!("etcd endpoint {} unreachable, trying next", endpoint);
                    last = Some(err);
                }
                result => return result.map_err(|e| AccessError::request(Store::Legacy, e)),
            }
        }
        Err(match last {
            Some(err) => AccessError::request(Store::Legacy, err),
            None => AccessError::malformed(Store::Legacy, "no etcd endpoints configured"),
        })
    }

    async fn put(&self, path: &str, form: &[(&str, &str)]) -> Result<(), AccessError> {
        let mut last: Option<HttpError> = None;
        for endpoint in &self.endpoints {
            match self.http.put_form(&Self::url(endpoint, path), form).await {
                Err(err) if err.is_unreachable() => {
                    tracing::warn!("etcd endpoint {} unreachable, trying next", endpoint);
                    last = Some(err);
                }
                result => return result.map(|_| ()).map_err(|e| AccessError::request(Store::Legacy, e)),
            }
        }
        Err(match last {
            Some(err) => AccessError::request(Store::Legacy, err),
            None => AccessError::malformed(Store::Legacy, "no etcd endpoints configured"),
        })
    }

    /// Fetch the subtree under `prefix`, or `None` if the prefix does not exist
    pub async fn get_tree(&self, prefix: &str) -> Result<Option<EtcdNode>, AccessError> {
        let path = format!("/v2/keys{}?recursive=true&sorted=true", prefix);
        let response = match self.get(&path).await {
            Ok(value) => value,
            Err(AccessError::Request { source, .. }) if is_missing_key(&source) => {
                tracing::debug!("{} not present", prefix);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let parsed: KeysResponse = serde_json::from_value(response)
            .map_err(|e| AccessError::malformed(Store::Legacy, format!("keys response for {}: {}", prefix, e)))?;
        Ok(Some(parsed.node))
    }

    /// Read every v1 record under the Calico prefixes
    pub async fn list_all(&self) -> Result<Vec<LegacyResource>, AccessError> {
        let mut leaves = Vec::new();
        for prefix in LEGACY_PREFIXES {
            if let Some(tree) = self.get_tree(prefix).await? {
                leaves.extend(tree.leaves());
            }
        }
        tracing::debug!("Read {} v1 keys", leaves.len());
        Ok(keys::parse_leaves(&leaves))
    }

    /// Set a single key
    pub async fn set(&self, key: &str, value: &str) -> Result<(), AccessError> {
        self.put(&format!("/v2/keys{}", key), &[("value", value)]).await
    }

    /// Set the Felix readiness flag
    pub async fn set_ready(&self, ready: bool) -> Result<(), AccessError> {
        tracing::info!("Setting {} to {}", READY_KEY, ready);
        self.set(READY_KEY, if ready { "true" } else { "false" }).await
    }
}

/// etcd answers 404 with errorCode 100 for a missing key
///
/// Any other 404 (a proxy, a wrong base path) is an access error, never
/// an empty datastore.
fn is_missing_key(err: &HttpError) -> bool {
    match err {
        HttpError::Status { status: 404, body, .. } => serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("errorCode").and_then(Value::as_u64))
            == Some(ETCD_KEY_NOT_FOUND),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> HttpError {
        HttpError::Status {
            url: "http://etcd:2379/v2/keys/calico/v1".into(),
            status,
            body: body.into(),
        }
    }

    #[test]
    fn test_missing_key_detection() {
        assert!(is_missing_key(&status(404, r#"{"errorCode":100,"message":"Key not found"}"#)));
        assert!(!is_missing_key(&status(404, "")));
        assert!(!is_missing_key(&status(404, "404 page not found")));
        assert!(!is_missing_key(&status(404, r#"{"errorCode":110}"#)));
        assert!(!is_missing_key(&status(500, "")));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let endpoint = Url::parse("http://etcd:2379/").unwrap();
        assert_eq!(LegacyClient::url(&endpoint, "/version"), "http://etcd:2379/version");
    }
}
