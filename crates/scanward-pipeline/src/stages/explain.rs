//! Explain stage: one generated explanation per scanned item.
//!
//! A failed call still produces an `ai_explanation`, holding the error text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scanward_core::domain::{
    AnnotatedItem, ExplanationArtifact, ScanCategory, ScanwardError, StageId, StageOutput,
    StateKey,
};
use scanward_core::parallel::{execute_bounded, TaskOutcome};
use scanward_core::provider::{complete_with_retry, CompletionClient};
use scanward_core::retry::RetryPolicy;
use serde_json::Value;
use tracing::{info, warn};

use super::{scanned_items, StageContext, StageHandler};

const FAILURE_PREFIX: &str = "AI explanation failed to generate. Error: ";

/// Prompt asking for plain-text guidance on one scan result item.
pub fn explain_prompt(category: ScanCategory, item: &Value) -> String {
    let details = serde_json::to_string_pretty(item).unwrap_or_else(|_| item.to_string());
    match category {
        ScanCategory::Code => format!(
            "You are an application security expert specializing in static code analysis.

Analyze this code vulnerability and provide:
1. A detailed explanation of the security issue
2. Why this code pattern is dangerous
3. Potential attack scenarios
4. Secure coding alternatives
5. Prevention strategies

Vulnerability Details:
{details}

Please provide actionable security guidance in plain text only. Do not use markdown formatting."
        ),
        ScanCategory::Web => format!(
            "You are a cybersecurity expert specializing in web application vulnerabilities.

Analyze this web vulnerability and provide:
1. A clear explanation of what this vulnerability means
2. The potential impact and risks
3. Step-by-step remediation guidance
4. Best practices to prevent this in the future

Vulnerability Details:
{details}

Please provide the output in plain text. Do not use any markdown formatting."
        ),
    }
}

pub struct ExplainStage {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    call_timeout: Duration,
    max_concurrent: usize,
}

impl ExplainStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            max_concurrent: 4,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

#[async_trait]
impl StageHandler for ExplainStage {
    fn stage(&self) -> StageId {
        StageId::Explain
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::ScanResults]
    }

    fn produces(&self) -> StateKey {
        StateKey::Explanations
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
        let items = scanned_items(StageId::Explain, ctx.state)?;
        let total = items.len();

        let client = Arc::clone(&self.client);
        let policy = self.policy;
        let call_timeout = self.call_timeout;
        let outcomes = execute_bounded(items.clone(), self.max_concurrent, ctx.cancel, move |item| {
            let client = Arc::clone(&client);
            async move {
                let prompt = explain_prompt(item.category, &item.item);
                complete_with_retry(client.as_ref(), &prompt, &policy, call_timeout)
                    .await
                    .result
                    .map_err(|e| e.message())
            }
        })
        .await;

        let mut failed = 0;
        let mut annotated: Vec<AnnotatedItem> = Vec::with_capacity(total);
        for (mut item, outcome) in items.into_iter().zip(outcomes) {
            let explanation = match outcome {
                TaskOutcome::Completed(Ok(text)) => text,
                TaskOutcome::Completed(Err(message)) | TaskOutcome::Panicked(message) => {
                    warn!(item = %item.identifier, error = %message, "explanation failed");
                    failed += 1;
                    format!("{FAILURE_PREFIX}{message}")
                }
                TaskOutcome::Cancelled => {
                    failed += 1;
                    format!("{FAILURE_PREFIX}run cancelled")
                }
            };
            item.set_explanation(explanation);
            annotated.push(item);
        }

        info!(run_id = ctx.run_id, total, failed, "explain stage complete");
        Ok(StageOutput::Explanations(ExplanationArtifact {
            items: annotated,
            failed,
        }))
    }
}
