//! Orchestrator tests against an in-memory datastore
//!
//! Every decision branch of a validate, migrate or abort run is pinned here
//! using a fake datastore that can fail any individual call.

use async_trait::async_trait;
use calico_upgrade::datastore::{Datastore, ModernIdentities};
use calico_upgrade::error::{AccessError, ConversionError, HttpError, Store, WriteError};
use calico_upgrade::report::{ConversionOutcome, FailureReason};
use calico_upgrade::resource::{LegacyKind, LegacyResource, ModernKind, ModernResource, ResourceId};
use calico_upgrade::{run_abort, run_migration, run_validation, MigrationResult, RunOptions};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory datastore with per-call failure injection
#[derive(Default)]
struct FakeDatastore {
    legacy: Vec<LegacyResource>,
    modern: Mutex<BTreeMap<ResourceId, ModernResource>>,
    paused: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    fail_list_legacy: bool,
    fail_list_modern: bool,
    fail_pause: bool,
    fail_resume: bool,
    /// Fail the write with this zero-based index
    fail_write_at: Option<usize>,
    writes: Mutex<usize>,
}

impl FakeDatastore {
    fn with_legacy(legacy: Vec<LegacyResource>) -> Self {
        Self {
            legacy,
            ..Default::default()
        }
    }

    fn seed_modern(&self, resource: ModernResource) {
        self.modern.lock().unwrap().insert(resource.id(), resource);
    }

    fn log(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn write_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("write")).count()
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    fn modern(&self) -> BTreeMap<ResourceId, ModernResource> {
        self.modern.lock().unwrap().clone()
    }
}

fn injected(store: Store) -> AccessError {
    AccessError::malformed(store, "injected failure")
}

#[async_trait]
impl Datastore for FakeDatastore {
    async fn list_all_legacy(&self) -> Result<Vec<LegacyResource>, AccessError> {
        self.log("list_legacy");
        if self.fail_list_legacy {
            return Err(injected(Store::Legacy));
        }
        Ok(self.legacy.clone())
    }

    async fn list_all_modern(&self) -> Result<ModernIdentities, AccessError> {
        self.log("list_modern");
        if self.fail_list_modern {
            return Err(injected(Store::Modern));
        }
        Ok(self.modern.lock().unwrap().keys().cloned().collect())
    }

    async fn pause_networking(&self) -> Result<(), AccessError> {
        self.log("pause");
        if self.fail_pause {
            return Err(injected(Store::Legacy));
        }
        *self.paused.lock().unwrap() = true;
        Ok(())
    }

    async fn resume_networking(&self) -> Result<(), AccessError> {
        self.log("resume");
        if self.fail_resume {
            return Err(injected(Store::Legacy));
        }
        *self.paused.lock().unwrap() = false;
        Ok(())
    }

    async fn write_modern(&self, resource: &ModernResource) -> Result<(), WriteError> {
        self.log(&format!("write {}", resource.id()));
        let index = {
            let mut writes = self.writes.lock().unwrap();
            let index = *writes;
            *writes += 1;
            index
        };
        if self.fail_write_at == Some(index) {
            return Err(WriteError {
                id: resource.id(),
                source: HttpError::Status {
                    url: "https://k8s:6443/apis/projectcalico.org/v3".to_string(),
                    status: 500,
                    body: String::new(),
                },
            });
        }
        self.modern.lock().unwrap().insert(resource.id(), resource.clone());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn pool(cidr: &str) -> LegacyResource {
    LegacyResource::new(
        LegacyKind::IpPool,
        format!("/calico/v1/ipam/v4/pool/{}", cidr.replace('/', "-")),
        cidr,
        json!({"cidr": cidr, "masquerade": true}),
    )
}

fn policy(name: &str, rule: Value) -> LegacyResource {
    LegacyResource::new(
        LegacyKind::Policy,
        format!("/calico/v1/policy/tier/default/policy/{}", name),
        name,
        json!({"order": 10, "selector": "role == 'web'", "inbound_rules": [rule], "outbound_rules": []}),
    )
}

fn valid_policy(name: &str) -> LegacyResource {
    policy(name, json!({"action": "allow", "protocol": "tcp", "dst_ports": [80]}))
}

/// Policy whose only rule has no action
fn broken_policy(name: &str) -> LegacyResource {
    policy(name, json!({"protocol": "tcp"}))
}

fn profile(name: &str) -> LegacyResource {
    LegacyResource::new(
        LegacyKind::Profile,
        format!("/calico/v1/policy/profile/{}", name),
        name,
        json!({"rules": {"inbound_rules": [{"action": "allow"}], "outbound_rules": []}, "tags": [name]}),
    )
}

fn clean_cluster() -> Vec<LegacyResource> {
    vec![
        pool("10.0.0.0/16"),
        valid_policy("allow-web"),
        pool("10.1.0.0/16"),
        profile("web"),
    ]
}

fn options(ignore_existing_v3: bool) -> RunOptions {
    RunOptions {
        ignore_existing_v3,
        display_status: false,
    }
}

fn pool_id(name: &str) -> ResourceId {
    ResourceId::cluster(ModernKind::IpPool, name)
}

// =============================================================================
// Validate
// =============================================================================

mod validate {
    use super::*;

    #[tokio::test]
    async fn test_clean_data_is_ok_and_writes_nothing() {
        let store = FakeDatastore::with_legacy(clean_cluster());
        let (report, result) = run_validation(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Ok);
        let report = report.expect("report");
        assert!(!report.has_errors());
        assert_eq!(report.converted_count(), 4);
        assert_eq!(store.calls(), vec!["list_legacy", "list_modern"]);
        assert!(store.modern().is_empty());
    }

    #[tokio::test]
    async fn test_field_error_fails_with_report() {
        let store = FakeDatastore::with_legacy(vec![pool("10.0.0.0/16"), broken_policy("b")]);
        let (report, result) = run_validation(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Fail);
        let report = report.expect("report");
        assert!(report.has_errors());

        let pools = report.section(&LegacyKind::IpPool).expect("pool section");
        assert!(matches!(pools[0], ConversionOutcome::Converted { .. }));

        let policies = report.section(&LegacyKind::Policy).expect("policy section");
        match &policies[0] {
            ConversionOutcome::Failed {
                source,
                reason: FailureReason::Conversion(err),
            } => {
                assert_eq!(source.key, "/calico/v1/policy/tier/default/policy/b");
                assert_eq!(err.field(), Some("inbound_rules[0].action"));
            }
            other => panic!("expected conversion failure, got {:?}", other),
        }
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_fixed_data_validates_on_rerun() {
        let store = FakeDatastore::with_legacy(vec![pool("10.0.0.0/16"), broken_policy("b")]);
        let (_, result) = run_validation(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Fail);

        let store = FakeDatastore::with_legacy(vec![pool("10.0.0.0/16"), valid_policy("b")]);
        let (report, result) = run_validation(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Ok);
        assert!(!report.expect("report").has_errors());
    }

    #[tokio::test]
    async fn test_unreadable_legacy_store_fails_without_report() {
        let store = FakeDatastore {
            fail_list_legacy: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_validation(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Fail);
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_modern_store_fails_without_report() {
        let store = FakeDatastore {
            fail_list_modern: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_validation(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Fail);
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_ignoring_v3_data_skips_modern_listing() {
        let store = FakeDatastore {
            fail_list_modern: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_validation(&store, &options(true)).await;
        assert_eq!(result, MigrationResult::Ok);
        assert!(report.is_some());
        assert_eq!(store.calls(), vec!["list_legacy"]);
    }

    #[tokio::test]
    async fn test_unsupported_data_is_skipped_not_failed() {
        let mut legacy = clean_cluster();
        legacy.push(LegacyResource::new(
            LegacyKind::Unsupported("tier".to_string()),
            "/calico/v1/policy/tier/gold/metadata",
            "gold",
            json!({}),
        ));
        let store = FakeDatastore::with_legacy(legacy);
        let (report, result) = run_validation(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Ok);
        assert_eq!(report.expect("report").skipped_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_cluster_is_ok() {
        let store = FakeDatastore::default();
        let (report, result) = run_validation(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Ok);
        assert!(report.expect("report").is_empty());
    }
}

// =============================================================================
// Migrate
// =============================================================================

mod migrate {
    use super::*;

    #[tokio::test]
    async fn test_clean_migration_pauses_writes_and_resumes() {
        let store = FakeDatastore::with_legacy(clean_cluster());
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Ok);
        assert!(!report.expect("report").has_errors());
        assert!(!store.is_paused());

        let calls = store.calls();
        assert_eq!(&calls[..3], &["list_legacy", "list_modern", "pause"]);
        assert_eq!(calls.last().map(String::as_str), Some("resume"));
        // Kind order first, then encounter order
        assert_eq!(
            &calls[3..7],
            &[
                "write IPPool(10-0-0-0-16)",
                "write IPPool(10-1-0-0-16)",
                "write Profile(web)",
                "write GlobalNetworkPolicy(allow-web)",
            ]
        );
        assert_eq!(store.modern().len(), 4);
    }

    #[tokio::test]
    async fn test_conversion_errors_never_pause() {
        let store = FakeDatastore::with_legacy(vec![pool("10.0.0.0/16"), broken_policy("b")]);
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Fail);
        assert!(report.expect("report").has_errors());
        assert!(!store.calls().iter().any(|c| c == "pause"));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_is_plain_fail() {
        let store = FakeDatastore {
            fail_list_legacy: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::Fail);
        assert!(report.is_none());
        assert_eq!(store.calls(), vec!["list_legacy"]);
    }

    #[tokio::test]
    async fn test_pause_failure_is_retry_never_abort() {
        let store = FakeDatastore {
            fail_pause: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::FailNeedsRetry);
        assert!(report.is_some());
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_pause_failure_stays_retry_when_cleanup_resume_fails() {
        let store = FakeDatastore {
            fail_pause: true,
            fail_resume: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (_, result) = run_migration(&store, &options(false)).await;
        assert_eq!(result, MigrationResult::FailNeedsRetry);
    }

    #[tokio::test]
    async fn test_write_failure_with_resume_is_retry() {
        let store = FakeDatastore {
            fail_write_at: Some(2),
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::FailNeedsRetry);
        assert!(!store.is_paused());
        let report = report.expect("report");
        assert_eq!(report.converted_count(), 2);
        assert_eq!(report.error_count(), 2);
        assert_eq!(store.write_calls(), 3);
    }

    #[tokio::test]
    async fn test_first_write_failure_with_resume_is_retry() {
        let store = FakeDatastore {
            fail_write_at: Some(0),
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::FailNeedsRetry);
        assert_eq!(report.expect("report").converted_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_without_resume_is_abort() {
        let store = FakeDatastore {
            fail_write_at: Some(1),
            fail_resume: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::FailNeedsAbort);
        assert!(store.is_paused());

        let report = report.expect("report");
        assert_eq!(report.converted_count(), 1);
        let failed: Vec<&FailureReason> = report
            .outcomes()
            .filter_map(|o| match o {
                ConversionOutcome::Failed { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert!(matches!(failed[0], FailureReason::Write { .. }));
        assert!(failed[1..].iter().all(|r| **r == FailureReason::NotWritten));
    }

    #[tokio::test]
    async fn test_final_resume_failure_is_abort() {
        let store = FakeDatastore {
            fail_resume: true,
            ..FakeDatastore::with_legacy(clean_cluster())
        };
        let (report, result) = run_migration(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::FailNeedsAbort);
        assert!(!report.expect("report").has_errors());
        assert_eq!(store.modern().len(), 4);
    }

    #[tokio::test]
    async fn test_rerun_with_ignore_is_idempotent() {
        let store = FakeDatastore::with_legacy(clean_cluster());

        let (_, first) = run_migration(&store, &options(true)).await;
        let after_first = store.modern();
        let (_, second) = run_migration(&store, &options(true)).await;

        assert_eq!(first, MigrationResult::Ok);
        assert_eq!(second, MigrationResult::Ok);
        assert_eq!(store.modern(), after_first);
        assert_eq!(after_first.len(), 4);
    }

    #[tokio::test]
    async fn test_rerun_without_ignore_collides() {
        let store = FakeDatastore::with_legacy(clean_cluster());
        let (_, first) = run_migration(&store, &options(false)).await;
        let (report, second) = run_migration(&store, &options(false)).await;

        assert_eq!(first, MigrationResult::Ok);
        assert_eq!(second, MigrationResult::Fail);
        assert_eq!(report.expect("report").error_count(), 4);
    }
}

// =============================================================================
// Collision policy
// =============================================================================

mod collisions {
    use super::*;

    fn seeded() -> FakeDatastore {
        let store = FakeDatastore::with_legacy(vec![pool("10.0.0.0/16")]);
        store.seed_modern(ModernResource::new(ModernKind::IpPool, "10-0-0-0-16", json!({"cidr": "stale"})));
        store.seed_modern(ModernResource::new(ModernKind::IpPool, "unrelated", json!({"cidr": "192.168.0.0/16"})));
        store
    }

    #[tokio::test]
    async fn test_existing_identity_fails_without_ignore() {
        let store = seeded();
        let (report, result) = run_validation(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Fail);
        let report = report.expect("report");
        match &report.section(&LegacyKind::IpPool).expect("pool section")[0] {
            ConversionOutcome::Failed {
                reason: FailureReason::Conversion(ConversionError::Collision { id }),
                ..
            } => assert_eq!(*id, pool_id("10-0-0-0-16")),
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_existing_identity_is_overwritten_with_ignore() {
        let store = seeded();
        let (report, result) = run_migration(&store, &options(true)).await;

        assert_eq!(result, MigrationResult::Ok);
        assert_eq!(report.expect("report").converted_count(), 1);

        let modern = store.modern();
        assert_eq!(modern[&pool_id("10-0-0-0-16")].spec["cidr"], "10.0.0.0/16");
        assert_eq!(modern[&pool_id("unrelated")].spec["cidr"], "192.168.0.0/16");
    }

    #[tokio::test]
    async fn test_name_clash_within_one_run() {
        let store = FakeDatastore::with_legacy(vec![valid_policy("Web"), valid_policy("web")]);
        let (report, result) = run_validation(&store, &options(false)).await;

        assert_eq!(result, MigrationResult::Fail);
        let report = report.expect("report");
        let section = report.section(&LegacyKind::Policy).expect("policy section");
        assert!(matches!(section[0], ConversionOutcome::Converted { .. }));
        assert!(matches!(
            &section[1],
            ConversionOutcome::Failed {
                reason: FailureReason::Conversion(ConversionError::NameClash { .. }),
                ..
            }
        ));
    }
}

// =============================================================================
// Abort
// =============================================================================

mod abort {
    use super::*;

    #[tokio::test]
    async fn test_abort_resumes_networking() {
        let store = FakeDatastore::default();
        *store.paused.lock().unwrap() = true;

        assert_eq!(run_abort(&store, &options(false)).await, MigrationResult::Ok);
        assert!(!store.is_paused());
        assert_eq!(store.calls(), vec!["resume"]);
    }

    #[tokio::test]
    async fn test_abort_reports_resume_failure() {
        let store = FakeDatastore {
            fail_resume: true,
            ..Default::default()
        };
        assert_eq!(run_abort(&store, &options(false)).await, MigrationResult::Fail);
    }
}
