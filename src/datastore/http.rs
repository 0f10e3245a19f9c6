//! HTTP utilities for the etcd and Calico API clients

use crate::error::HttpError;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Credentials attached to every request
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
}

// Security: never print secrets
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => write!(f, "Basic({}, ***)", username),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

impl Credentials {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::None => request,
            Self::Basic { username, password } => request.basic_auth(username, password.as_deref()),
            Self::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// HTTP client wrapper shared by both datastore clients
#[derive(Clone)]
pub struct ApiHttpClient {
    client: Client,
    credentials: Credentials,
}

impl ApiHttpClient {
    /// Create a new HTTP client
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("calico-upgrade/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, credentials })
    }

    /// GET a JSON document
    pub async fn get(&self, url: &str) -> Result<Value, HttpError> {
        tracing::debug!("GET {}", url);
        let request = self.credentials.apply(self.client.get(url));
        self.send(url, request).await
    }

    /// POST a JSON document
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        tracing::debug!("POST {}", url);
        let request = self.credentials.apply(self.client.post(url)).json(body);
        self.send(url, request).await
    }

    /// PUT a JSON document
    pub async fn put_json(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        tracing::debug!("PUT {}", url);
        let request = self.credentials.apply(self.client.put(url)).json(body);
        self.send(url, request).await
    }

    /// PUT form-encoded fields (etcd v2 keys API)
    pub async fn put_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, HttpError> {
        tracing::debug!("PUT {}", url);
        let request = self.credentials.apply(self.client.put(url)).form(form);
        self.send(url, request).await
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Value, HttpError> {
        let transport = |source: reqwest::Error| HttpError::Transport {
            url: url.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            let sanitized = sanitize_for_log(&body);
            tracing::warn!("API error: {} - {}", status, sanitized);
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: sanitized,
            });
        }

        // Handle empty response
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|source| HttpError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Format a datastore error for display
/// Security: Avoids echoing raw API responses to the terminal
pub fn describe_error(error: &HttpError) -> String {
    match error {
        HttpError::Transport { url, source } if source.is_timeout() => {
            format!("Request to {} timed out.", host_of(url))
        }
        HttpError::Transport { url, .. } => {
            format!("Unable to connect to {}. Check the endpoint and your network.", host_of(url))
        }
        HttpError::Status { status: 401, .. } => "Authentication failed. Check the configured credentials.".to_string(),
        HttpError::Status { status: 403, .. } => "Permission denied. Check the configured credentials.".to_string(),
        HttpError::Status { status: 404, .. } => "Resource not found.".to_string(),
        HttpError::Status { status: 409, .. } => "Resource conflict. The resource may have been modified concurrently.".to_string(),
        HttpError::Status { status: 422 | 400, body, .. } => format!("Request rejected: {}", body),
        HttpError::Status { status, .. } if *status >= 500 => {
            "Datastore temporarily unavailable. Please try again.".to_string()
        }
        HttpError::Status { status, .. } => format!("Request failed with status {}.", status),
        HttpError::Decode { .. } => "Unexpected response from the datastore.".to_string(),
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| match u.port() {
            Some(port) => format!("{}:{}", h, port),
            None => h.to_string(),
        }))
        .unwrap_or_else(|| url.to_string())
}
