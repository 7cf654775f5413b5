use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tml::tools::error::{Result, ToolError};
use crate::tml::tools::retry::RetryPolicy;

/// What to do with an object whose identifier is already mapped to an object
/// in the target environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingPolicy {
    /// Leave the target object alone and reuse its identifier.
    #[default]
    Skip,
    /// Resubmit the object against its known target identifier.
    Overwrite,
}

/// Settings for one migration run. A value is created per run and handed to
/// the executor; nothing is read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Upper bound of concurrent deployments inside one batch.
    pub concurrency: usize,
    /// Timeout for a single call to the target.
    pub call_timeout_ms: u64,
    pub existing: ExistingPolicy,
    pub retry: RetryPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            call_timeout_ms: 60_000,
            existing: ExistingPolicy::Skip,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationConfig {
    /// Reads a TOML configuration file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolError::MissingInput(path.to_path_buf()));
        }
        let source = fs::read_to_string(path)?;
        let config: MigrationConfig = toml::from_str(&source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ToolError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(ToolError::InvalidConfig("call_timeout_ms must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ToolError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ToolError::InvalidConfig(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temporary file");
        writeln!(
            file,
            "concurrency = 8\nexisting = \"overwrite\"\n\n[retry]\nmax_attempts = 2"
        )
        .expect("config written");

        let config = MigrationConfig::from_toml_file(file.path()).expect("config loaded");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.existing, ExistingPolicy::Overwrite);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = MigrationConfig {
            concurrency: 0,
            ..MigrationConfig::default()
        };
        assert!(matches!(config.validate(), Err(ToolError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temporary file");
        writeln!(file, "existing = \"merge\"").expect("config written");
        assert!(matches!(
            MigrationConfig::from_toml_file(file.path()),
            Err(ToolError::Toml(_))
        ));
    }
}
