//! The boundary between the migration engine and the target platform.
//!
//! The engine only ever calls [`TargetClient::deploy`]; authentication,
//! connection handling and wire formats belong to the implementations.

pub mod directory;
pub mod rest;

use async_trait::async_trait;
use thiserror::Error;

use crate::tml::tools::model::{ContentObject, ObjectId};

pub use directory::DirectoryTarget;
pub use rest::RestTarget;

/// One object ready for submission. Its reference slots already hold
/// target-environment identifiers.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Identifier of the object in the source environment.
    pub source_identifier: ObjectId,
    pub object: ContentObject,
    /// Known target identifier when an existing object is being overwritten.
    pub existing_target: Option<ObjectId>,
}

/// Failure reported by a target for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    /// Rate limiting, server-side 5xx, timeouts, dropped connections.
    #[error("transport error: {0}")]
    Transport(String),
    /// Validation or permission failures. Retrying cannot help.
    #[error("rejected by target: {0}")]
    Rejected(String),
}

impl DeployError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::Transport(_))
    }
}

/// A target environment that content objects can be deployed into.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Creates or overwrites the object, returning its identifier in the
    /// target environment.
    async fn deploy(&self, request: &DeployRequest) -> Result<ObjectId, DeployError>;
}
