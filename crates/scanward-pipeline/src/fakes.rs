//! Scripted scan tool and stage collaborators (testing only).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use scanward_core::domain::{ScanArtifact, ScanCategory, ToolExecutionError};
use serde_json::Value;

use crate::dispatcher::ScanTool;

type Step = Result<ScanArtifact, ToolExecutionError>;

/// Scan tool answering from per-source scripts.
///
/// A source with a script pops one step per call and repeats the last step
/// once the script runs out. Unscripted sources succeed with no results.
#[derive(Debug)]
pub struct ScriptedScanTool {
    name: String,
    category: ScanCategory,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    transient: Option<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedScanTool {
    pub fn new(category: ScanCategory) -> Self {
        Self {
            name: format!("scripted-{category}"),
            category,
            scripts: Mutex::new(HashMap::new()),
            transient: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_script(self, source: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), steps.into());
        self
    }

    pub fn with_results(self, source: &str, results: Vec<Value>) -> Self {
        self.with_script(source, vec![Ok(ScanArtifact::success(results))])
    }

    pub fn with_error(self, source: &str, error: ToolExecutionError) -> Self {
        self.with_script(source, vec![Err(error)])
    }

    /// Every call on any source fails transiently.
    pub fn always_transient(mut self, message: &str) -> Self {
        self.transient = Some(message.to_string());
        self
    }

    pub fn calls_for(&self, source: &str) -> usize {
        self.calls.lock().unwrap().get(source).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ScanTool for ScriptedScanTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> ScanCategory {
        self.category
    }

    async fn scan(&self, source: &str) -> Result<ScanArtifact, ToolExecutionError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default() += 1;

        if let Some(message) = &self.transient {
            return Err(ToolExecutionError::Transient {
                tool: self.name.clone(),
                message: message.clone(),
            });
        }

        let mut scripts = self.scripts.lock().unwrap();
        let step = match scripts.get_mut(source) {
            Some(steps) if steps.len() > 1 => steps.pop_front(),
            Some(steps) => steps.front().cloned(),
            None => None,
        };
        step.unwrap_or_else(|| Ok(ScanArtifact::success(Vec::new())))
    }
}
