//! Client for the projectcalico.org/v3 resource API

use super::http::ApiHttpClient;
use super::ModernIdentities;
use crate::error::{AccessError, HttpError, Store, WriteError};
use crate::resource::{ModernKind, ModernResource, ResourceId};
use serde_json::Value;
use url::Url;

const API_PATH: &str = "/apis/projectcalico.org/v3";

/// Items requested per list page
const PAGE_LIMIT: usize = 500;

/// Result of one list page
struct Page {
    ids: Vec<ResourceId>,
    next_token: Option<String>,
}

#[derive(Clone)]
pub struct ModernClient {
    http: ApiHttpClient,
    base: Url,
}

impl ModernClient {
    pub fn new(http: ApiHttpClient, base: Url) -> Self {
        Self { http, base }
    }

    fn api_url(&self) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), API_PATH)
    }

    fn collection_url(&self, kind: ModernKind, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}/namespaces/{}/{}", self.api_url(), urlencoding::encode(ns), kind.plural()),
            None => format!("{}/{}", self.api_url(), kind.plural()),
        }
    }

    fn resource_url(&self, id: &ResourceId) -> String {
        format!(
            "{}/{}",
            self.collection_url(id.kind, id.namespace.as_deref()),
            urlencoding::encode(&id.name)
        )
    }

    /// Check that the v3 API is served
    pub async fn ping(&self) -> Result<(), AccessError> {
        self.http
            .get(&self.api_url())
            .await
            .map(|_| ())
            .map_err(|e| AccessError::request(Store::Modern, e))
    }

    /// Identities of every resource of `kind`, across all namespaces
    pub async fn list_identities(&self, kind: ModernKind) -> Result<Vec<ResourceId>, AccessError> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(kind, page_token.as_deref()).await?;
            all_ids.extend(page.ids);

            if page.next_token.is_none() {
                break;
            }
            page_token = page.next_token;
        }

        Ok(all_ids)
    }

    async fn list_page(&self, kind: ModernKind, page_token: Option<&str>) -> Result<Page, AccessError> {
        let mut url = format!("{}?limit={}", self.collection_url(kind, None), PAGE_LIMIT);
        if let Some(token) = page_token {
            url.push_str(&format!("&continue={}", urlencoding::encode(token)));
        }

        let response = match self.http.get(&url).await {
            Ok(value) => value,
            // Kind not served yet means nothing of that kind exists
            Err(err) if err.is_not_found() && page_token.is_none() => {
                tracing::debug!("{} not served, treating as empty", kind.plural());
                return Ok(Page {
                    ids: Vec::new(),
                    next_token: None,
                });
            }
            Err(err) => return Err(AccessError::request(Store::Modern, err)),
        };

        let items = response
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let metadata = item.get("metadata");
            let name = metadata
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| AccessError::malformed(Store::Modern, format!("{} item without a name", kind)))?;
            let namespace = metadata.and_then(|m| m.get("namespace")).and_then(Value::as_str);
            ids.push(match namespace {
                Some(ns) if kind.is_namespaced() => ResourceId::namespaced(kind, ns, name),
                _ => ResourceId::cluster(kind, name),
            });
        }

        let next_token = response
            .get("metadata")
            .and_then(|m| m.get("continue"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Page { ids, next_token })
    }

    /// Every v3 identity of every kind the migration can produce
    pub async fn list_all(&self) -> Result<ModernIdentities, AccessError> {
        let lists = futures::future::try_join_all(ModernKind::ALL.iter().map(|kind| self.list_identities(*kind))).await?;
        let identities: ModernIdentities = lists.into_iter().flatten().collect();
        tracing::debug!("Found {} existing v3 resources", identities.len());
        Ok(identities)
    }

    /// Create one resource, or replace it if it already exists
    ///
    /// Creation is a POST to the collection. On 409 the current object is
    /// fetched and the PUT carries its `resourceVersion`, which the API
    /// server requires for an update.
    pub async fn apply(&self, resource: &ModernResource) -> Result<(), WriteError> {
        let id = resource.id();
        let url = self.resource_url(&id);
        let mut body = serde_json::to_value(resource).map_err(|source| WriteError {
            id: id.clone(),
            source: HttpError::Decode { url: url.clone(), source },
        })?;

        let collection = self.collection_url(id.kind, id.namespace.as_deref());
        match self.http.post_json(&collection, &body).await {
            Ok(_) => return Ok(()),
            Err(err) if err.status() == Some(409) => tracing::debug!("{} exists, replacing", id),
            Err(source) => return Err(WriteError { id, source }),
        }

        let current = match self.http.get(&url).await {
            Ok(value) => value,
            Err(source) => return Err(WriteError { id, source }),
        };
        if let Some(version) = resource_version(&current) {
            set_resource_version(&mut body, version);
        }

        self.http
            .put_json(&url, &body)
            .await
            .map(|_| ())
            .map_err(|source| WriteError { id, source })
    }
}

fn resource_version(object: &Value) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

fn set_resource_version(body: &mut Value, version: &str) {
    if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("resourceVersion".to_string(), Value::String(version.to_string()));
    }
}
