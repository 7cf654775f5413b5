use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::tml::tools::client::{DeployError, DeployRequest, TargetClient};
use crate::tml::tools::error::Result;
use crate::tml::tools::io::tml::render_tml;
use crate::tml::tools::model::ObjectId;

const IMPORT_PATH: &str = "/api/rest/2.0/metadata/tml/import";
const TAG_ASSIGN_PATH: &str = "/api/rest/2.0/tags/assign";

/// Target platform reached over its REST API, one TML document per call.
///
/// The bearer token is supplied by the caller; obtaining and refreshing it is
/// outside this client.
#[derive(Debug, Clone)]
pub struct RestTarget {
    http: reqwest::Client,
    import_url: String,
    tag_assign_url: String,
    token: String,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ImportRequest<'a> {
    metadata_tmls: [&'a str; 1],
    import_policy: &'static str,
    create_new: bool,
}

#[derive(Serialize)]
struct TagAssignRequest<'a> {
    metadata: [TagMetadata<'a>; 1],
    tag_identifiers: &'a [String],
}

#[derive(Serialize)]
struct TagMetadata<'a> {
    identifier: &'a str,
}

#[derive(Deserialize)]
struct ImportResult {
    response: ImportResponse,
}

#[derive(Deserialize)]
struct ImportResponse {
    status: ImportStatus,
    #[serde(default)]
    header: Option<ImportHeader>,
}

#[derive(Deserialize)]
struct ImportStatus {
    status_code: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct ImportHeader {
    #[serde(default)]
    id_guid: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl RestTarget {
    /// `timeout` bounds each HTTP exchange; the executor applies its own
    /// per-call timeout on top.
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/');
        Ok(Self {
            http,
            import_url: format!("{base_url}{IMPORT_PATH}"),
            tag_assign_url: format!("{base_url}{TAG_ASSIGN_PATH}"),
            token: token.into(),
            tags: Vec::new(),
        })
    }

    /// Tags assigned to every successfully imported object.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    async fn assign_tags(&self, guid: &str) -> std::result::Result<(), DeployError> {
        let body = TagAssignRequest {
            metadata: [TagMetadata { identifier: guid }],
            tag_identifiers: &self.tags,
        };
        let response = self
            .http
            .post(&self.tag_assign_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_status(status, &text)
            .unwrap_or_else(|| DeployError::Rejected(format!("HTTP {status}"))))
    }
}

#[async_trait]
impl TargetClient for RestTarget {
    async fn deploy(&self, request: &DeployRequest) -> std::result::Result<ObjectId, DeployError> {
        let document = render_tml(&request.object, request.existing_target.as_deref())
            .map_err(|err| DeployError::Rejected(err.to_string()))?;
        let body = ImportRequest {
            metadata_tmls: [document.as_str()],
            import_policy: "PARTIAL",
            create_new: request.existing_target.is_none(),
        };

        let response = self
            .http
            .post(&self.import_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;

        debug!(source = %request.source_identifier, %status, "import call returned");
        if let Some(error) = classify_status(status, &text) {
            warn!(source = %request.source_identifier, %status, "import call failed");
            return Err(error);
        }
        let guid = parse_import_response(&text)?;

        // The object is imported at this point; tagging never fails the deployment.
        if !self.tags.is_empty() {
            match self.assign_tags(&guid).await {
                Ok(()) => info!(%guid, tags = ?self.tags, "tags assigned"),
                Err(err) => warn!(%guid, tags = ?self.tags, error = %err, "could not assign tags"),
            }
        }
        Ok(guid)
    }
}

fn classify_status(status: StatusCode, body: &str) -> Option<DeployError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(DeployError::Transport(message))
    } else {
        Some(DeployError::Rejected(message))
    }
}

/// Extracts the identifier of the imported object from an import response.
fn parse_import_response(body: &str) -> std::result::Result<ObjectId, DeployError> {
    let results: Vec<ImportResult> = serde_json::from_str(body)
        .map_err(|err| DeployError::Rejected(format!("unexpected import response: {err}")))?;
    let Some(result) = results.into_iter().next() else {
        return Err(DeployError::Rejected("empty import response".into()));
    };

    let response = result.response;
    if response.status.status_code.eq_ignore_ascii_case("ERROR") {
        return Err(DeployError::Rejected(
            response
                .status
                .error_message
                .unwrap_or_else(|| "import failed without a message".into()),
        ));
    }

    response
        .header
        .and_then(|header| header.id_guid.or(header.id))
        .ok_or_else(|| DeployError::Rejected("import response carries no identifier".into()))
}
