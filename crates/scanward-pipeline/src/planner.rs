//! Intent Planner: free-text request to plan sequence.
//!
//! The model is asked for a depth level. Anything short of a clean answer
//! (call failure, unparseable output, unknown stage tokens) yields the full
//! plan.

use std::sync::Arc;
use std::time::Duration;

use scanward_core::domain::{ConfigurationError, DepthLevel, PlanSequence};
use scanward_core::provider::CompletionClient;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// How a plan was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDecision {
    pub plan: PlanSequence,
    /// Depth the model picked, when it answered with one.
    pub depth: Option<DepthLevel>,
    /// True when the planner fell back to the full plan.
    pub defaulted: bool,
}

impl PlanDecision {
    fn full_fallback() -> Self {
        Self {
            plan: PlanSequence::full(),
            depth: None,
            defaulted: true,
        }
    }
}

pub fn planner_prompt(request: &str) -> String {
    format!(
        r#"You are a vulnerability-report planner for a cybersecurity application.
Given the following user prompt: "{request}", decide how deep the analysis should go.

Depth levels:
- "minimal": scanning and report only
- "cve": scanning + compliance mapping + report
- "fixes": scanning + explanation of each finding + report
- "full": scanning + explanation + compliance mapping + report + narration

If the user prompt is unclear or unrelated to the depth of the report, answer "full".

Respond with a single JSON object in a ```json fenced block, for example:
```json
{{"depth": "minimal"}}
```"#
    )
}

/// Decode a planner answer.
///
/// Accepts a fenced or bare JSON object with either a `depth` string or a
/// `plan_sequence` array of stage tokens.
pub fn decode_plan(raw: &str) -> Result<(PlanSequence, Option<DepthLevel>), ConfigurationError> {
    let body = match raw.rsplit_once("```json") {
        Some((_, after)) => after.split("```").next().unwrap_or_default(),
        None => match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => raw,
        },
    };

    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| ConfigurationError::Invalid(format!("planner output is not JSON: {e}")))?;

    if let Some(depth) = value.get("depth").and_then(Value::as_str) {
        let depth: DepthLevel = depth.parse()?;
        return Ok((PlanSequence::for_depth(depth), Some(depth)));
    }

    if let Some(tokens) = value.get("plan_sequence").and_then(Value::as_array) {
        let tokens = tokens
            .iter()
            .map(|t| {
                t.as_str().ok_or_else(|| {
                    ConfigurationError::Invalid(format!("plan_sequence entry is not a string: {t}"))
                })
            })
            .collect::<Result<Vec<&str>, _>>()?;
        return Ok((PlanSequence::from_tokens(tokens)?, None));
    }

    Err(ConfigurationError::Invalid(
        "planner output has neither depth nor plan_sequence".to_string(),
    ))
}

pub struct IntentPlanner {
    client: Arc<dyn CompletionClient>,
    call_timeout: Duration,
}

impl IntentPlanner {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn plan(&self, request: &str) -> PlanSequence {
        self.decide(request).await.plan
    }

    /// Classify `request`; never fails.
    pub async fn decide(&self, request: &str) -> PlanDecision {
        if request.trim().is_empty() {
            debug!("empty request; using full plan");
            return PlanDecision::full_fallback();
        }

        let prompt = planner_prompt(request);
        let raw = match tokio::time::timeout(self.call_timeout, self.client.complete(&prompt)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "planner call failed; using full plan");
                return PlanDecision::full_fallback();
            }
            Err(_) => {
                warn!(timeout_ms = self.call_timeout.as_millis() as u64, "planner call timed out; using full plan");
                return PlanDecision::full_fallback();
            }
        };

        match decode_plan(&raw) {
            Ok((plan, depth)) => {
                info!(plan = %plan, depth = ?depth, "plan selected");
                PlanDecision {
                    plan,
                    depth,
                    defaulted: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "unusable planner output; using full plan");
                PlanDecision::full_fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanward_core::domain::{ProviderError, StageId};
    use scanward_core::fakes::ScriptedCompletion;

    #[test]
    fn decodes_fenced_depth() {
        let (plan, depth) = decode_plan("Sure!\n```json\n{\"depth\": \"fixes\"}\n```").unwrap();
        assert_eq!(depth, Some(DepthLevel::Fixes));
        assert_eq!(plan.stages(), &[StageId::Scan, StageId::Explain, StageId::Report]);
    }

    #[test]
    fn decodes_bare_plan_sequence_with_agent_suffixes() {
        let (plan, depth) =
            decode_plan(r#"{"plan_sequence":["ScanAgent","ComplianceAgent","ReportAgent"]}"#).unwrap();
        assert_eq!(depth, None);
        assert_eq!(plan.stages(), &[StageId::Scan, StageId::Compliance, StageId::Report]);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let err = decode_plan(r#"{"plan_sequence":["ScanAgent","FixAgent"]}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownStage { .. }));
    }

    #[test]
    fn non_string_plan_entries_are_rejected() {
        let err = decode_plan(r#"{"plan_sequence":["ScanAgent",7,"ReportAgent"]}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(_)));
    }

    #[tokio::test]
    async fn minimal_request_gets_minimal_plan() {
        let client = Arc::new(ScriptedCompletion::always("```json\n{\"depth\":\"minimal\"}\n```"));
        let decision = IntentPlanner::new(client).decide("just a quick scan").await;
        assert!(!decision.defaulted);
        assert_eq!(decision.plan, PlanSequence::for_depth(DepthLevel::Minimal));
    }

    #[tokio::test]
    async fn garbage_and_failures_default_to_full() {
        for response in [
            Ok("a quick brown fox".to_string()),
            Ok("```json\n{\"depth\": \"extreme\"}\n```".to_string()),
            Ok("{\"plan_sequence\": []}".to_string()),
            Ok("{\"plan_sequence\": [\"ScanAgent\", null, \"ReportAgent\"]}".to_string()),
            Err(ProviderError::from_message("500 backend error")),
        ] {
            let client = Arc::new(ScriptedCompletion::new(vec![response]));
            let decision = IntentPlanner::new(client).decide("whatever").await;
            assert!(decision.defaulted);
            assert_eq!(decision.plan, PlanSequence::full());
        }
    }

    #[tokio::test]
    async fn empty_request_skips_the_call() {
        let client = Arc::new(ScriptedCompletion::always("{\"depth\":\"minimal\"}"));
        let plan = IntentPlanner::new(client.clone()).plan("   ").await;
        assert_eq!(plan, PlanSequence::full());
        assert_eq!(client.call_count(), 0);
    }
}
