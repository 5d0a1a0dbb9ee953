//! Engine configuration, loaded from TOML
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    /// How long a permission snapshot is served before the table is re-read.
    pub permission_cache_ttl_secs: u64,
    pub case_number_prefix: String,
    /// Candidates tried before giving up on a unique case number.
    pub case_number_attempts: u32,
    pub seed_default_permissions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("agreements.db"),
            permission_cache_ttl_secs: 60,
            case_number_prefix: "LC".into(),
            case_number_attempts: 8,
            seed_default_permissions: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content).context("Invalid engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn permission_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_cache_ttl_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let prefix = &self.case_number_prefix;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_uppercase()) {
            anyhow::bail!("case_number_prefix must be upper-case letters, got '{prefix}'");
        }
        if self.case_number_attempts == 0 {
            anyhow::bail!("case_number_attempts must be at least 1");
        }
        Ok(())
    }
}
