use std::fmt;

use serde::Serialize;

use crate::tml::tools::model::{ContentKind, ObjectId};

/// Why an object was not submitted to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "identifier", rename_all = "snake_case")]
pub enum SkipReason {
    /// The object is already mapped to this target identifier.
    AlreadyDeployed(ObjectId),
    DependencyFailed(ObjectId),
    DependencySkipped(ObjectId),
    Cancelled,
}

impl SkipReason {
    /// Skipped objects that still exist in the target satisfy their
    /// dependents; every other skip blocks them.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, SkipReason::AlreadyDeployed(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyDeployed(target) => write!(f, "already deployed as {target}"),
            SkipReason::DependencyFailed(id) => write!(f, "dependency {id} failed"),
            SkipReason::DependencySkipped(id) => write!(f, "dependency {id} skipped"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of one object in one run. Created once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentOutcome {
    Deployed { target: ObjectId },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl DeploymentOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, DeploymentOutcome::Deployed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeploymentOutcome::Failed { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            DeploymentOutcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether objects depending on this one may be deployed.
    pub fn satisfies_dependents(&self) -> bool {
        match self {
            DeploymentOutcome::Deployed { .. } => true,
            DeploymentOutcome::Skipped { reason } => reason.satisfies_dependents(),
            DeploymentOutcome::Failed { .. } => false,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            DeploymentOutcome::Deployed { .. } => "DEPLOYED",
            DeploymentOutcome::Skipped { .. } => "SKIPPED",
            DeploymentOutcome::Failed { .. } => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentOutcome::Deployed { target } => write!(f, "DEPLOYED ({target})"),
            DeploymentOutcome::Skipped { reason } => write!(f, "SKIPPED ({reason})"),
            DeploymentOutcome::Failed { error } => write!(f, "FAILED ({error})"),
        }
    }
}

/// Report line for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub identifier: ObjectId,
    pub name: String,
    pub kind: ContentKind,
    pub batch: usize,
    /// Calls made to the target; zero for skipped objects.
    pub attempts: u32,
    pub outcome: DeploymentOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub deployed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of every object of a run, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub entries: Vec<ReportEntry>,
    /// Set when the run was cancelled before every batch had started.
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn outcome(&self, identifier: &str) -> Option<&DeploymentOutcome> {
        self.entry(identifier).map(|entry| &entry.outcome)
    }

    pub fn entry(&self, identifier: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.identifier == identifier)
    }

    pub fn summary(&self) -> Summary {
        self.entries
            .iter()
            .fold(Summary::default(), |mut summary, entry| {
                match entry.outcome {
                    DeploymentOutcome::Deployed { .. } => summary.deployed += 1,
                    DeploymentOutcome::Skipped { .. } => summary.skipped += 1,
                    DeploymentOutcome::Failed { .. } => summary.failed += 1,
                }
                summary
            })
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|entry| entry.outcome.is_failed())
    }
}
