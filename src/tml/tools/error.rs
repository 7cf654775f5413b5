use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the failures that stop a migration run, either while
/// the input set is loaded and validated or while the tool talks to its
/// environment (files, configuration, logging).
///
/// Per-object deployment failures are not represented here; they are
/// recorded as [`crate::report::DeploymentOutcome::Failed`] so that one
/// object cannot abort the run.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a TML document is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Raised when the configuration file cannot be parsed.
    #[error("configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Errors bubbled up from the mapping details CSV writer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Raised when the HTTP client cannot be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Raised when a document parses as YAML but is not usable TML.
    #[error("invalid TML in {origin}: {reason}")]
    Tml { origin: String, reason: String },

    /// Two objects in the input set share an identifier.
    #[error("duplicate identifier in input set: {0}")]
    DuplicateIdentifier(String),

    /// An object lists its own identifier among its references.
    #[error("object {0} references itself")]
    SelfReference(String),

    /// References that are neither in the input set nor already mapped in
    /// the target environment.
    #[error("unresolved references: {}", join_unresolved(.0))]
    UnresolvedReference(Vec<UnresolvedDependency>),

    /// A lookup in the identifier mapping found no entry.
    #[error("no target identifier recorded for {0}")]
    UnmappedIdentifier(String),

    /// Planning stopped because the remaining objects form a cycle.
    #[error("dependency cycle detected: {}", render_cycle(.cycle))]
    CycleDetected {
        /// Shortest cycle found inside the smallest strongly connected
        /// component, without repeating the first identifier.
        cycle: Vec<String>,
        /// Every non-trivial strongly connected component, each sorted.
        components: Vec<Vec<String>>,
    },

    /// An identifier mapping entry already exists.
    #[error("mapping for {source_id} already exists ({existing}), refusing to record {attempted}")]
    DuplicateMapping {
        source_id: String,
        existing: String,
        attempted: String,
    },

    /// Raised when configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input path not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// Broad grouping of [`ToolError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The input set itself is unusable.
    Input,
    /// The input set cannot be ordered for deployment.
    Graph,
    /// Files, configuration, network setup or logging.
    Environment,
}

impl ToolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ToolError::Tml { .. }
            | ToolError::DuplicateIdentifier(_)
            | ToolError::SelfReference(_) => ErrorClass::Input,
            ToolError::UnresolvedReference(_)
            | ToolError::UnmappedIdentifier(_)
            | ToolError::CycleDetected { .. }
            | ToolError::DuplicateMapping { .. } => ErrorClass::Graph,
            _ => ErrorClass::Environment,
        }
    }
}

/// A reference from `object` to an identifier that cannot be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub object: String,
    pub reference: String,
}

impl fmt::Display for UnresolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.object, self.reference)
    }
}

fn join_unresolved(items: &[UnresolvedDependency]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_cycle(cycle: &[String]) -> String {
    let mut path: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        path.push(first);
    }
    path.join(" -> ")
}
