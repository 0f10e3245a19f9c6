//! Datastore access
//!
//! The orchestrator only talks to the [`Datastore`] trait. [`ClusterDatastore`]
//! implements it over HTTP: an etcd v2 client for the v1 data and the
//! projectcalico.org/v3 API for the v3 data.
//!
//! - [`http`] - shared HTTP client and credentials
//! - [`keys`] - v1 key layout
//! - [`legacy`] - etcd v2 client
//! - [`modern`] - v3 API client

pub mod http;
pub mod keys;
pub mod legacy;
pub mod modern;

use crate::error::{AccessError, WriteError};
use crate::resource::{LegacyResource, ModernResource, ResourceId};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub use legacy::LegacyClient;
pub use modern::ModernClient;

/// Identities of the resources already present in the v3 datastore
pub type ModernIdentities = BTreeSet<ResourceId>;

/// Everything the migration needs from the outside world
///
/// Every call may block on I/O. Implementations are not expected to retry;
/// the orchestrator decides what a failure means.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Every v1 record, in a stable order
    async fn list_all_legacy(&self) -> Result<Vec<LegacyResource>, AccessError>;

    /// Identities of every v3 resource the migration could produce
    async fn list_all_modern(&self) -> Result<ModernIdentities, AccessError>;

    /// Stop the data plane from acting on configuration changes
    async fn pause_networking(&self) -> Result<(), AccessError>;

    /// Undo [`Datastore::pause_networking`]. Safe to call when not paused.
    async fn resume_networking(&self) -> Result<(), AccessError>;

    /// Create or replace one v3 resource
    async fn write_modern(&self, resource: &ModernResource) -> Result<(), WriteError>;
}

/// The HTTP-backed datastore pair
#[derive(Clone)]
pub struct ClusterDatastore {
    legacy: LegacyClient,
    modern: ModernClient,
}

impl ClusterDatastore {
    pub fn new(legacy: LegacyClient, modern: ModernClient) -> Self {
        Self { legacy, modern }
    }

    /// Check both datastores answer
    pub async fn ping(&self) -> Result<(), AccessError> {
        futures::try_join!(self.legacy.ping(), self.modern.ping())?;
        Ok(())
    }
}

#[async_trait]
impl Datastore for ClusterDatastore {
    async fn list_all_legacy(&self) -> Result<Vec<LegacyResource>, AccessError> {
        self.legacy.list_all().await
    }

    async fn list_all_modern(&self) -> Result<ModernIdentities, AccessError> {
        self.modern.list_all().await
    }

    async fn pause_networking(&self) -> Result<(), AccessError> {
        self.legacy.set_ready(false).await
    }

    async fn resume_networking(&self) -> Result<(), AccessError> {
        self.legacy.set_ready(true).await
    }

    async fn write_modern(&self, resource: &ModernResource) -> Result<(), WriteError> {
        tracing::debug!("Writing {}", resource.id());
        self.modern.apply(resource).await
    }
}
