//! Report rendering
//!
//! Writes one YAML file per non-empty report section and builds the short
//! text summary printed at the end of a run.

use super::{ConversionOutcome, MigrationReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct SectionFile<'a> {
    kind: String,
    generated: String,
    summary: SectionSummary,
    entries: Vec<Entry<'a>>,
}

#[derive(Debug, Default, Serialize)]
struct SectionSummary {
    converted: usize,
    skipped: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct Entry<'a> {
    key: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    v3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl<'a> From<&'a ConversionOutcome> for Entry<'a> {
    fn from(outcome: &'a ConversionOutcome) -> Self {
        let (v3, reason) = match outcome {
            ConversionOutcome::Converted { resource, .. } => (Some(resource.id().to_string()), None),
            ConversionOutcome::Skipped { reason, .. } => (None, Some(reason.clone())),
            ConversionOutcome::Failed { reason, .. } => (None, Some(reason.to_string())),
        };
        Self {
            key: &outcome.source().key,
            status: outcome.status(),
            v3,
            reason,
        }
    }
}

/// Write one `<section>.yaml` per non-empty section into `dir`
///
/// The directory must already exist. Returns the written paths in section
/// order.
pub fn write_report(report: &MigrationReport, dir: &Path) -> Result<Vec<PathBuf>> {
    let generated = chrono::Utc::now().to_rfc3339();
    let mut written = Vec::new();

    for (kind, outcomes) in report.sections() {
        if outcomes.is_empty() {
            continue;
        }

        let mut summary = SectionSummary::default();
        for outcome in outcomes {
            match outcome {
                ConversionOutcome::Converted { .. } => summary.converted += 1,
                ConversionOutcome::Skipped { .. } => summary.skipped += 1,
                ConversionOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        let file = SectionFile {
            kind: kind.to_string(),
            generated: generated.clone(),
            summary,
            entries: outcomes.iter().map(Entry::from).collect(),
        };

        let path = dir.join(format!("{}.yaml", kind.section_name()));
        let content = serde_yaml::to_string(&file).context("Failed to serialize report section")?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write report {:?}", path))?;
        tracing::debug!("Wrote report section {:?}", path);
        written.push(path);
    }

    Ok(written)
}

/// One line per section plus every failure, for terminal output
pub fn summarize(report: &MigrationReport) -> String {
    let mut lines = Vec::new();

    for (kind, outcomes) in report.sections() {
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ConversionOutcome::Skipped { .. }))
            .count();
        lines.push(format!(
            "{}: {} converted, {} skipped, {} failed",
            kind,
            outcomes.len() - failed - skipped,
            skipped,
            failed
        ));
        for outcome in outcomes {
            if let ConversionOutcome::Failed { source, reason } = outcome {
                lines.push(format!("  - {}: {}", source.key, reason));
            }
        }
    }

    if lines.is_empty() {
        lines.push("No Calico v1 data found.".to_string());
    }
    lines.join("\n")
}
