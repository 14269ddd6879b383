//! Scan tools backed by external commands.
//!
//! The command is run as `argv... <source>` and must print one JSON object
//! on stdout:
//!
//! ```json
//! {"status": "success", "results": [], "errors": [], "version": "1.2.0"}
//! ```
//!
//! `status` is one of `success`, `failure`, `transient_failure` or
//! `invalid_source`; a top-level `error` string is folded into `errors`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use scanward_core::config::ToolCommands;
use scanward_core::domain::{ScanArtifact, ScanCategory, ScanStatus, ToolExecutionError};
use scanward_pipeline::{group_web_alerts, ScanTool};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReportedStatus {
    Success,
    Failure,
    TransientFailure,
    InvalidSource,
}

#[derive(Debug, Deserialize)]
struct ToolReport {
    status: ReportedStatus,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Clone)]
pub struct CommandScanTool {
    name: String,
    category: ScanCategory,
    argv: Vec<String>,
}

impl CommandScanTool {
    /// Returns `None` for an empty command.
    pub fn new(category: ScanCategory, argv: Vec<String>) -> Option<Self> {
        let program = argv.first()?;
        let name = std::path::Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Some(Self {
            name,
            category,
            argv,
        })
    }

    fn failed(&self, message: impl Into<String>) -> ToolExecutionError {
        ToolExecutionError::Failed {
            tool: self.name.clone(),
            message: message.into(),
        }
    }

    /// Map a decoded report to the artifact contract.
    fn interpret(&self, report: ToolReport) -> Result<ScanArtifact, ToolExecutionError> {
        let mut errors = report.errors;
        if let Some(error) = &report.error {
            errors.push(Value::String(error.clone()));
        }
        let message = || {
            report
                .error
                .clone()
                .unwrap_or_else(|| "no error message".to_string())
        };

        match report.status {
            ReportedStatus::Success => {
                let results = match self.category {
                    ScanCategory::Web => group_web_alerts(report.results),
                    ScanCategory::Code => report.results,
                };
                Ok(ScanArtifact {
                    status: ScanStatus::Success,
                    results,
                    errors,
                    version: report.version,
                })
            }
            ReportedStatus::Failure => Ok(ScanArtifact {
                status: ScanStatus::Failure,
                results: Vec::new(),
                errors,
                version: report.version,
            }),
            ReportedStatus::TransientFailure => Err(ToolExecutionError::Transient {
                tool: self.name.clone(),
                message: message(),
            }),
            ReportedStatus::InvalidSource => Err(ToolExecutionError::Validation {
                tool: self.name.clone(),
                message: message(),
            }),
        }
    }
}

#[async_trait]
impl ScanTool for CommandScanTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> ScanCategory {
        self.category
    }

    async fn scan(&self, source: &str) -> Result<ScanArtifact, ToolExecutionError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| self.failed("empty command"))?;

        debug!(tool = %self.name, source, "spawning scan command");
        let output = Command::new(program)
            .args(args)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The dispatcher's timeout drops this future; take the child with it.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.failed(format!("spawn {program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<ToolReport>(stdout.trim()) {
            Ok(report) => self.interpret(report),
            Err(parse_err) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.lines().last().unwrap_or_default().trim().to_string();
                warn!(tool = %self.name, source, status = ?output.status.code(), "unreadable scan output");
                if output.status.success() {
                    Err(self.failed(format!("unreadable output: {parse_err}")))
                } else {
                    Err(self.failed(format!(
                        "exit status {}: {}",
                        output.status.code().unwrap_or(-1),
                        detail
                    )))
                }
            }
        }
    }
}

/// One tool per configured category; empty commands are skipped.
pub fn tools_from_config(commands: &ToolCommands) -> Vec<Arc<dyn ScanTool>> {
    [
        (ScanCategory::Code, &commands.code),
        (ScanCategory::Web, &commands.web),
    ]
    .into_iter()
    .filter_map(|(category, argv)| CommandScanTool::new(category, argv.clone()))
    .map(|tool| Arc::new(tool) as Arc<dyn ScanTool>)
    .collect()
}
