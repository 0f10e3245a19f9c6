//! Migration report
//!
//! Per-resource outcomes grouped by legacy kind. The builder keeps encounter
//! order within each kind and a running error count, so `has_errors` never
//! rescans the outcomes.
//!
//! - [`render`] - writes one report file per non-empty section

pub mod render;

use crate::error::ConversionError;
use crate::resource::{LegacyKind, LegacyResource, ModernResource, ResourceId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Where an outcome came from
#[derive(Debug, Clone, PartialEq)]
pub struct LegacySource {
    pub kind: LegacyKind,
    /// etcd key (or key directory) of the v1 record
    pub key: String,
    pub name: String,
}

impl From<&LegacyResource> for LegacySource {
    fn from(legacy: &LegacyResource) -> Self {
        Self {
            kind: legacy.kind.clone(),
            key: legacy.key.clone(),
            name: legacy.name.clone(),
        }
    }
}

/// Why a record did not end up in the v3 datastore
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The record could not be converted
    Conversion(ConversionError),
    /// The converted resource was rejected or the write did not complete
    Write { message: String },
    /// An earlier write failed, so this one was never attempted
    NotWritten,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversion(err) => write!(f, "{}", err),
            Self::Write { message } => write!(f, "write failed: {}", message),
            Self::NotWritten => f.write_str("not written: an earlier write failed"),
        }
    }
}

/// Outcome for exactly one legacy record
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted {
        source: LegacySource,
        resource: ModernResource,
    },
    Skipped {
        source: LegacySource,
        reason: String,
    },
    Failed {
        source: LegacySource,
        reason: FailureReason,
    },
}

impl ConversionOutcome {
    /// Conversion failure bound to its source record
    pub fn failed(source: LegacySource, error: ConversionError) -> Self {
        Self::Failed {
            source,
            reason: FailureReason::Conversion(error),
        }
    }

    pub fn source(&self) -> &LegacySource {
        match self {
            Self::Converted { source, .. } | Self::Skipped { source, .. } | Self::Failed { source, .. } => source,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Converted { .. } => "converted",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Accumulates outcomes during the conversion pass
#[derive(Debug, Default)]
pub struct ReportBuilder {
    sections: BTreeMap<LegacyKind, Vec<ConversionOutcome>>,
    errors: usize,
    /// Converted identities and the key of the record that claimed them
    claimed: HashMap<ResourceId, String>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome
    ///
    /// A converted resource whose identity was already produced by an earlier
    /// record in this run is recorded as a name clash instead.
    pub fn record(&mut self, outcome: ConversionOutcome) {
        let outcome = match outcome {
            ConversionOutcome::Converted { source, resource } => {
                let id = resource.id();
                match self.claimed.get(&id) {
                    Some(other) => {
                        tracing::debug!("{} clashes with {}", source.key, other);
                        ConversionOutcome::failed(
                            source,
                            ConversionError::NameClash {
                                id,
                                other: other.clone(),
                            },
                        )
                    }
                    None => {
                        self.claimed.insert(id, source.key.clone());
                        ConversionOutcome::Converted { source, resource }
                    }
                }
            }
            other => other,
        };

        if outcome.is_failed() {
            self.errors += 1;
        }
        self.sections
            .entry(outcome.source().kind.clone())
            .or_default()
            .push(outcome);
    }

    pub fn finalize(self) -> MigrationReport {
        MigrationReport {
            sections: self.sections,
            errors: self.errors,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcomes of one run, grouped by kind
///
/// A kind with no records has no section at all; a section whose records all
/// converted is present with no failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    sections: BTreeMap<LegacyKind, Vec<ConversionOutcome>>,
    errors: usize,
}

impl MigrationReport {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Number of outcomes across all sections
    pub fn len(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Sections in kind order
    pub fn sections(&self) -> impl Iterator<Item = (&LegacyKind, &[ConversionOutcome])> {
        self.sections.iter().map(|(kind, outcomes)| (kind, outcomes.as_slice()))
    }

    pub fn section(&self, kind: &LegacyKind) -> Option<&[ConversionOutcome]> {
        self.sections.get(kind).map(Vec::as_slice)
    }

    /// All outcomes in kind order, then encounter order
    pub fn outcomes(&self) -> impl Iterator<Item = &ConversionOutcome> {
        self.sections.values().flatten()
    }

    /// Converted resources in write order
    pub fn converted(&self) -> impl Iterator<Item = &ModernResource> {
        self.outcomes().filter_map(|outcome| match outcome {
            ConversionOutcome::Converted { resource, .. } => Some(resource),
            _ => None,
        })
    }

    pub fn converted_count(&self) -> usize {
        self.converted().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, ConversionOutcome::Skipped { .. }))
            .count()
    }

    /// Record a failed write of the `index`th converted resource
    ///
    /// That resource becomes a write failure and every converted resource
    /// after it becomes not-written, so the remaining converted outcomes are
    /// exactly the committed prefix.
    pub(crate) fn mark_write_failure(&mut self, index: usize, message: &str) {
        let mut position = 0;
        for outcome in self.sections.values_mut().flatten() {
            let ConversionOutcome::Converted { source, .. } = outcome else {
                continue;
            };
            if position >= index {
                let source = source.clone();
                let reason = if position == index {
                    FailureReason::Write {
                        message: message.to_string(),
                    }
                } else {
                    FailureReason::NotWritten
                };
                *outcome = ConversionOutcome::Failed { source, reason };
                self.errors += 1;
            }
            position += 1;
        }
    }
}
