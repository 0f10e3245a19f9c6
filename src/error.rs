//! Error types for calico-upgrade
//!
//! The engine keeps four failure families apart because each drives a
//! different decision in the orchestrator:
//!
//! - [`AccessError`] - the datastore could not be read at all
//! - [`ConversionError`] - one legacy record could not be converted
//! - [`WriteError`] - one v3 resource could not be written
//! - pause/resume failures, reported as [`AccessError`] from the shim
//!
//! [`HttpError`] is the transport-level error both clients build on.

use crate::resource::ResourceId;
use std::path::PathBuf;
use thiserror::Error;

/// Transport-level error from the datastore HTTP clients
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never got a response (connection refused, DNS, timeout)
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("API request to {url} failed: {status}")]
    Status {
        url: String,
        status: u16,
        /// Sanitized, truncated response body
        body: String,
    },

    /// The response body was not the JSON we expected
    #[error("failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HttpError {
    /// HTTP status code, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when no response was received
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True for a 404 response
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Which of the two datastores an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Calico v1 data in etcd v2
    Legacy,
    /// Calico v3 data behind the projectcalico.org/v3 API
    Modern,
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("v1"),
            Self::Modern => f.write_str("v3"),
        }
    }
}

/// The datastore could not be reached or answered with something unusable
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("error accessing the Calico {store} datastore: {source}")]
    Request {
        store: Store,
        #[source]
        source: HttpError,
    },

    #[error("unexpected data from the Calico {store} datastore: {message}")]
    Malformed { store: Store, message: String },
}

impl AccessError {
    pub fn request(store: Store, source: HttpError) -> Self {
        Self::Request { store, source }
    }

    pub fn malformed(store: Store, message: impl Into<String>) -> Self {
        Self::Malformed {
            store,
            message: message.into(),
        }
    }
}

/// A single v3 resource could not be written
#[derive(Debug, Error)]
#[error("failed to write {id}: {source}")]
pub struct WriteError {
    pub id: ResourceId,
    #[source]
    pub source: HttpError,
}

/// Per-resource conversion failure, always recorded in the report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("invalid value for field '{field}' ({value}): {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("malformed record: {message}")]
    Malformed { message: String },

    #[error("{id} already exists in the v3 datastore")]
    Collision { id: ResourceId },

    #[error("{id} is also the converted name of {other}")]
    NameClash { id: ResourceId, other: String },
}

impl ConversionError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Offending field path, for field-level failures
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } | Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// API configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid API configuration ({origin}): {message}")]
    Invalid { origin: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
