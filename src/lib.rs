//! Calico v1 to v3 data migration
//!
//! Reads the v1 data from etcd, converts each record to its v3 equivalent and,
//! for a migration, writes the result to the v3 API with Calico networking
//! paused. See [`migrate`] for how a run decides between retry and abort.

pub mod config;
pub mod datastore;
pub mod error;
pub mod migrate;
pub mod report;
pub mod resource;
pub mod status;

pub use datastore::{ClusterDatastore, Datastore};
pub use migrate::{run_abort, run_migration, run_validation, MigrationResult, Phase, RunOptions};
pub use report::MigrationReport;
