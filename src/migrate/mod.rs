//! Migration Orchestrator
//!
//! Drives a run through its phases and decides the final [`MigrationResult`]:
//!
//! ```text
//! Start -> Listing -> Converting -> Done                                  (validate)
//! Start -> Listing -> Converting -> Pausing -> Writing -> Resuming -> Done (migrate)
//! ```
//!
//! Any phase after pausing may end in `Aborted` when networking cannot be
//! confirmed resumed. Retry is only reported when nothing is left paused.

use crate::datastore::{Datastore, ModernIdentities};
use crate::datastore::http::describe_error;
use crate::error::AccessError;
use crate::report::{MigrationReport, ReportBuilder};
use crate::resource::{self, ModernResource};
use crate::status::StatusPrinter;
use std::fmt;
use tracing::Instrument;

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationResult {
    Ok,
    /// Failed with nothing left in an unsafe state
    Fail,
    /// Failed after pausing, but networking was resumed; rerun the command
    FailNeedsRetry,
    /// Networking may still be paused; run `abort` before anything else
    FailNeedsAbort,
}

impl MigrationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::FailNeedsRetry => "fail (retry)",
            Self::FailNeedsAbort => "fail (abort)",
        })
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Listing,
    Converting,
    Pausing,
    Writing,
    Resuming,
    Done,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Listing => "listing",
            Self::Converting => "converting",
            Self::Pausing => "pausing",
            Self::Writing => "writing",
            Self::Resuming => "resuming",
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

/// Per-run settings
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the v3 collision check and overwrite common identities
    pub ignore_existing_v3: bool,
    /// Print progress lines to stdout
    pub display_status: bool,
}

type Outcome = (Option<MigrationReport>, MigrationResult);

/// One orchestrator run
struct Run<'a> {
    datastore: &'a dyn Datastore,
    options: RunOptions,
    status: StatusPrinter,
    phase: Phase,
}

impl<'a> Run<'a> {
    fn new(datastore: &'a dyn Datastore, options: &RunOptions) -> Self {
        Self {
            datastore,
            options: *options,
            status: StatusPrinter::new(options.display_status),
            phase: Phase::Start,
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
    }

    fn finish(&mut self, report: Option<MigrationReport>, result: MigrationResult) -> Outcome {
        let terminal = if result == MigrationResult::FailNeedsAbort {
            Phase::Aborted
        } else {
            Phase::Done
        };
        self.enter(terminal);
        tracing::info!(%result, "run finished");
        (report, result)
    }

    /// List both datastores and convert everything
    async fn list_and_convert(&mut self) -> Result<MigrationReport, AccessError> {
        self.enter(Phase::Listing);
        self.status.print("Reading Calico v1 data");
        let legacy = self.datastore.list_all_legacy().await?;

        let existing: Option<ModernIdentities> = if self.options.ignore_existing_v3 {
            None
        } else {
            self.status.print("Checking for existing Calico v3 data");
            Some(self.datastore.list_all_modern().await?)
        };

        self.enter(Phase::Converting);
        self.status.print("Converting v1 data to v3 format");
        let mut builder = ReportBuilder::new();
        for record in &legacy {
            builder.record(resource::convert(record, existing.as_ref(), self.options.ignore_existing_v3));
        }
        let report = builder.finalize();
        tracing::info!(
            records = legacy.len(),
            converted = report.converted_count(),
            skipped = report.skipped_count(),
            failed = report.error_count(),
            "conversion complete"
        );
        Ok(report)
    }

    async fn validate(mut self) -> Outcome {
        let report = match self.list_and_convert().await {
            Ok(report) => report,
            Err(err) => {
                self.status.print(&format!("Unable to read Calico data: {}", err));
                return self.finish(None, MigrationResult::Fail);
            }
        };

        let result = if report.has_errors() {
            MigrationResult::Fail
        } else {
            self.status.print("Data conversion validated successfully");
            MigrationResult::Ok
        };
        self.finish(Some(report), result)
    }

    async fn migrate(mut self) -> Outcome {
        let mut report = match self.list_and_convert().await {
            Ok(report) => report,
            Err(err) => {
                self.status.print(&format!("Unable to read Calico data: {}", err));
                return self.finish(None, MigrationResult::Fail);
            }
        };

        if report.has_errors() {
            self.status.print("Conversion errors found, no data has been migrated");
            return self.finish(Some(report), MigrationResult::Fail);
        }

        self.enter(Phase::Pausing);
        self.status.print("Pausing Calico networking");
        if let Err(err) = self.datastore.pause_networking().await {
            self.status.print(&format!("Unable to pause Calico networking: {}", err));
            // The pause may have partly landed; undo it if we can
            if let Err(err) = self.datastore.resume_networking().await {
                tracing::warn!("Resume after failed pause also failed: {}", err);
            }
            return self.finish(Some(report), MigrationResult::FailNeedsRetry);
        }

        self.enter(Phase::Writing);
        self.status.print("Storing v3 data");
        let resources: Vec<ModernResource> = report.converted().cloned().collect();
        for (index, resource) in resources.iter().enumerate() {
            if let Err(err) = self.datastore.write_modern(resource).await {
                tracing::error!(written = index, "{}", err);
                self.status.print(&format!("Error writing v3 data for {}", err.id));
                report.mark_write_failure(index, &describe_error(&err.source));

                self.enter(Phase::Resuming);
                self.status.print("Resuming Calico networking");
                let result = match self.datastore.resume_networking().await {
                    Ok(()) => MigrationResult::FailNeedsRetry,
                    Err(err) => {
                        self.status.print(&format!("Unable to resume Calico networking: {}", err));
                        MigrationResult::FailNeedsAbort
                    }
                };
                return self.finish(Some(report), result);
            }
        }

        self.enter(Phase::Resuming);
        self.status.print("Resuming Calico networking");
        if let Err(err) = self.datastore.resume_networking().await {
            self.status.print(&format!("Unable to resume Calico networking: {}", err));
            return self.finish(Some(report), MigrationResult::FailNeedsAbort);
        }

        self.status.print("Data migration completed successfully");
        self.finish(Some(report), MigrationResult::Ok)
    }

    async fn abort(mut self) -> MigrationResult {
        self.enter(Phase::Resuming);
        self.status.print("Resuming Calico networking");
        let result = match self.datastore.resume_networking().await {
            Ok(()) => MigrationResult::Ok,
            Err(err) => {
                self.status.print(&format!("Unable to resume Calico networking: {}", err));
                MigrationResult::Fail
            }
        };
        self.finish(None, result).1
    }
}

fn run_span(operation: &'static str) -> tracing::Span {
    let run_id = uuid::Uuid::new_v4();
    tracing::info_span!("run", %run_id, operation)
}

/// Convert all v1 data without writing anything
///
/// The result is only ever [`MigrationResult::Ok`] or [`MigrationResult::Fail`].
/// The report is absent when the datastores could not be read.
pub async fn run_validation(datastore: &dyn Datastore, options: &RunOptions) -> Outcome {
    Run::new(datastore, options)
        .validate()
        .instrument(run_span("validate"))
        .await
}

/// Convert all v1 data and write it to the v3 datastore
///
/// Writes happen with networking paused, one resource at a time in report
/// order. Once paused, the run always tries to resume before returning.
pub async fn run_migration(datastore: &dyn Datastore, options: &RunOptions) -> Outcome {
    Run::new(datastore, options)
        .migrate()
        .instrument(run_span("migrate"))
        .await
}

/// Resume networking after a run that ended in [`MigrationResult::FailNeedsAbort`]
pub async fn run_abort(datastore: &dyn Datastore, options: &RunOptions) -> MigrationResult {
    Run::new(datastore, options)
        .abort()
        .instrument(run_span("abort"))
        .await
}
