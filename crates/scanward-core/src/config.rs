//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//! Every field has a default, so an empty file (or none) is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;
use crate::retry::RetryPolicy;

/// Generative and embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    pub embedding_model: String,
    /// Never written back out; comes from the file or `GEMINI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            api_key: None,
        }
    }
}

/// External scan tool commands, one argv per category. The source is
/// appended as the final argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommands {
    pub code: Vec<String>,
    pub web: Vec<String>,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            code: vec!["scanward-code-scan".to_string()],
            web: vec!["scanward-web-scan".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanwardConfig {
    /// Retry policy for scan tool invocations.
    pub tool_retry: RetryPolicy,
    /// Retry policy for generative completion calls.
    pub provider_retry: RetryPolicy,
    /// Timeout for one generative or retrieval call.
    pub call_timeout_secs: u64,
    /// Timeout for one scan tool invocation.
    pub scan_timeout_secs: u64,
    /// Cap on concurrent per-item work inside a stage.
    pub concurrency: usize,
    /// Chunks retrieved per finding.
    pub top_k: usize,
    pub index_path: PathBuf,
    pub output_dir: PathBuf,
    pub provider: ProviderConfig,
    pub tools: ToolCommands,
}

impl Default for ScanwardConfig {
    fn default() -> Self {
        Self {
            tool_retry: RetryPolicy::new(3, 5, 30),
            provider_retry: RetryPolicy::default(),
            call_timeout_secs: 60,
            scan_timeout_secs: 1_800,
            concurrency: 4,
            top_k: 5,
            index_path: PathBuf::from("vectorstore/index.json"),
            output_dir: PathBuf::from("scanward-out"),
            provider: ProviderConfig::default(),
            tools: ToolCommands::default(),
        }
    }
}

impl ScanwardConfig {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let base = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml_str(&raw).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        let config = base.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SCANWARD_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCANWARD_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.concurrency = v;
        }
        if let Some(v) = lookup("SCANWARD_TOP_K").and_then(|v| v.parse().ok()) {
            self.top_k = v;
        }
        if let Some(v) = lookup("SCANWARD_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.call_timeout_secs = v;
        }
        if let Some(v) = lookup("SCANWARD_INDEX_PATH") {
            self.index_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCANWARD_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCANWARD_PROVIDER_ENDPOINT") {
            self.provider.endpoint = v;
        }
        if let Some(v) = lookup("SCANWARD_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()) {
            self.provider.api_key = Some(v);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.concurrency == 0 {
            return Err(ConfigurationError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(ConfigurationError::Invalid(
                "top_k must be at least 1".to_string(),
            ));
        }
        for (name, policy) in [("tool_retry", &self.tool_retry), ("provider_retry", &self.provider_retry)] {
            if policy.max_attempts == 0 {
                return Err(ConfigurationError::Invalid(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}
