use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::tml::tools::client::{DeployError, DeployRequest, TargetClient};
use crate::tml::tools::io::tml::{render_tml, tml_file_name};
use crate::tml::tools::model::ObjectId;

/// Target that stages deploy-ready TML files in a directory instead of
/// calling a platform, e.g. to commit them to a branch that the platform
/// deploys from.
///
/// New objects receive UUID v5 identifiers derived from the environment name
/// and the source identifier, so repeated staging is reproducible.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    root: PathBuf,
    environment: String,
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            environment: environment.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifier a new object with `source` identifier receives.
    pub fn assign_identifier(&self, source: &str) -> ObjectId {
        let name = format!("{}:{source}", self.environment);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }
}

#[async_trait]
impl TargetClient for DirectoryTarget {
    async fn deploy(&self, request: &DeployRequest) -> Result<ObjectId, DeployError> {
        let target = request
            .existing_target
            .clone()
            .unwrap_or_else(|| self.assign_identifier(&request.source_identifier));

        let document = render_tml(&request.object, Some(&target))
            .map_err(|err| DeployError::Rejected(err.to_string()))?;
        let path = self.root.join(tml_file_name(request.object.kind(), &target));

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;
        tokio::fs::write(&path, document)
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;

        debug!(source = %request.source_identifier, %target, path = %path.display(), "staged TML");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tml::tools::io::tml::parse_tml_document;
    use crate::tml::tools::model::{ContentKind, ContentObject};

    fn request(existing: Option<&str>) -> DeployRequest {
        let payload = serde_yaml::from_str("name: orders\n").expect("valid yaml");
        DeployRequest {
            source_identifier: "T1".into(),
            object: ContentObject::new("T1", ContentKind::Table, payload).expect("valid object"),
            existing_target: existing.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn stages_a_document_under_its_new_identifier() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let target = DirectoryTarget::new(dir.path().join("out"), "prod");

        let id = target.deploy(&request(None)).await.expect("deployed");
        assert_eq!(id, target.assign_identifier("T1"));

        let path = dir.path().join("out").join(format!("{id}.table.tml"));
        let document = std::fs::read_to_string(path).expect("file readable");
        let staged = parse_tml_document(&document, "staged").expect("staged document parsed");
        assert_eq!(staged.identifier(), id);
        assert_eq!(staged.name(), "orders");
    }

    #[tokio::test]
    async fn overwrite_keeps_the_existing_identifier() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let target = DirectoryTarget::new(dir.path(), "prod");
        let id = target.deploy(&request(Some("t-existing"))).await.expect("deployed");
        assert_eq!(id, "t-existing");
    }

    #[test]
    fn identifiers_differ_per_environment() {
        let prod = DirectoryTarget::new("/tmp/a", "prod");
        let test = DirectoryTarget::new("/tmp/a", "test");
        assert_ne!(prod.assign_identifier("T1"), test.assign_identifier("T1"));
        assert_eq!(prod.assign_identifier("T1"), prod.assign_identifier("T1"));
    }
}
