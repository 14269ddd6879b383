//! Compliance Enricher: retrieve, prompt, call, decode.
//!
//! Every finding yields a [`ComplianceReport`]. Provider failures are written
//! into the report as inline violations; nothing here returns an error.

use std::sync::Arc;
use std::time::Duration;

use scanward_core::domain::{ComplianceReport, ComplianceViolation, Finding, ProviderError};
use scanward_core::metrics::METRICS;
use scanward_core::obs;
use scanward_core::parallel::{execute_bounded, TaskOutcome};
use scanward_core::provider::{complete_with_retry, CompletionClient};
use scanward_core::retry::RetryPolicy;
use scanward_core::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::decode::decode_violations;
use crate::prompt::compliance_prompt;
use crate::retriever::{KnowledgeRetriever, Retrieval};

#[derive(Clone)]
pub struct ComplianceEnricher {
    retriever: KnowledgeRetriever,
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ComplianceEnricher {
    pub fn new(retriever: KnowledgeRetriever, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            retriever,
            client,
            policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
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

    /// Enrich one finding.
    #[instrument(skip(self, finding), fields(finding = %finding.identifier))]
    pub async fn enrich(&self, finding: &Finding) -> ComplianceReport {
        if !finding.has_content() {
            debug!("no name or description; skipping retrieval");
            return ComplianceReport {
                violations: vec![ComplianceViolation::no_information()],
                sources: Vec::new(),
                degraded: false,
            };
        }

        let retrieval = match self.retriever.retrieve(&finding.retrieval_query()).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "retrieval failed; continuing without context");
                Retrieval::default()
            }
        };
        if !retrieval.sources.is_empty() {
            let files: Vec<String> = retrieval
                .sources
                .iter()
                .map(|s| format!("{} ({} chunks)", s.source_file, s.chunk_ids.len()))
                .collect();
            debug!(sources = %files.join(", "), "found compliance context");
        }

        let prompt = compliance_prompt(finding, &retrieval.context, self.retriever.top_k());
        let outcome =
            complete_with_retry(self.client.as_ref(), &prompt, &self.policy, self.call_timeout)
                .await;

        let Retrieval { sources, .. } = retrieval;
        match outcome.result {
            Ok(raw) => {
                let decoded = decode_violations(&raw);
                if decoded.degraded {
                    METRICS.inc_degraded_parses();
                    debug!("model response had no violation array; using raw text");
                }
                ComplianceReport {
                    violations: decoded.violations,
                    sources,
                    degraded: decoded.degraded,
                }
            }
            Err(ProviderError::RateLimited { .. }) => {
                obs::emit_rate_limited(&finding.identifier, outcome.attempts);
                ComplianceReport {
                    violations: vec![ComplianceViolation::rate_limited(outcome.attempts)],
                    sources,
                    degraded: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "compliance call failed");
                ComplianceReport {
                    violations: vec![ComplianceViolation::provider_failure(&e.message())],
                    sources,
                    degraded: true,
                }
            }
        }
    }

    /// Enrich `findings` with at most `max_concurrent` in flight.
    ///
    /// Output is index-aligned with the input. Items whose result arrives
    /// after `cancel` fires get a `Cancelled` violation instead.
    pub async fn enrich_batch(
        &self,
        findings: Vec<Finding>,
        max_concurrent: usize,
        cancel: &CancellationToken,
    ) -> Vec<ComplianceReport> {
        let total = findings.len();
        let this = self.clone();
        let outcomes = execute_bounded(findings, max_concurrent, cancel, move |finding| {
            let this = this.clone();
            async move { this.enrich(&finding).await }
        })
        .await;

        let reports: Vec<ComplianceReport> = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Cancelled => ComplianceReport {
                    violations: vec![ComplianceViolation::cancelled()],
                    sources: Vec::new(),
                    degraded: true,
                },
                TaskOutcome::Panicked(message) => ComplianceReport {
                    violations: vec![ComplianceViolation::new("Error", message)],
                    sources: Vec::new(),
                    degraded: true,
                },
            })
            .collect();

        info!(
            total,
            degraded = reports.iter().filter(|r| r.degraded).count(),
            "compliance batch enriched"
        );
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticIndex;
    use scanward_core::domain::ScanCategory;
    use scanward_core::fakes::{ResponderCompletion, ScriptedCompletion};

    fn retriever() -> KnowledgeRetriever {
        KnowledgeRetriever::new(Arc::new(StaticIndex::from_triples(&[
            ("asvs.pdf", 3, "V5.1 input validation"),
            ("asvs.pdf", 1, "V5.3 output encoding"),
        ])))
    }

    fn sqli() -> Finding {
        Finding::new("sqli", "SQL Injection", "user input reaches query", ScanCategory::Web)
    }

    #[tokio::test]
    async fn empty_finding_short_circuits_without_a_call() {
        let client = Arc::new(ScriptedCompletion::always("[]"));
        let index = Arc::new(StaticIndex::from_triples(&[("a.pdf", 1, "x")]));
        let enricher =
            ComplianceEnricher::new(KnowledgeRetriever::new(index.clone()), client.clone());

        let report = enricher
            .enrich(&Finding::new("<unnamed>", "", "", ScanCategory::Code))
            .await;

        assert_eq!(report.violations, vec![ComplianceViolation::no_information()]);
        assert!(report.sources.is_empty());
        assert_eq!(client.call_count(), 0);
        assert!(index.queries().is_empty());
    }

    #[tokio::test]
    async fn parsed_answer_keeps_sources() {
        let client = Arc::new(ScriptedCompletion::always(
            r#"Sure. [{"regulation":"OWASP ASVS V5.3.4","reason":"no parameterised queries"}]"#,
        ));
        let report = ComplianceEnricher::new(retriever(), client.clone())
            .enrich(&sqli())
            .await;

        assert!(!report.degraded);
        assert_eq!(report.violations[0].regulation, "OWASP ASVS V5.3.4");
        assert_eq!(report.sources.len(), 1);
        assert_eq!(
            report.sources[0].chunk_ids.iter().copied().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(client.prompts()[0].contains("Name: SQL Injection"));
    }

    #[tokio::test]
    async fn hard_failure_is_inline_and_not_retried() {
        let client = Arc::new(ScriptedCompletion::new(vec![Err(ProviderError::from_message(
            "400 invalid argument",
        ))]));
        let report = ComplianceEnricher::new(retriever(), client.clone())
            .enrich(&sqli())
            .await;

        assert_eq!(
            report.violations,
            vec![ComplianceViolation::new("Error", "API call failed: 400 invalid argument")]
        );
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrieval_failure_still_calls_model() {
        let client = Arc::new(ScriptedCompletion::always("nothing useful"));
        let enricher = ComplianceEnricher::new(
            KnowledgeRetriever::new(Arc::new(StaticIndex::failing("embedding down"))),
            client.clone(),
        );
        let report = enricher.enrich(&sqli()).await;
        assert!(report.degraded);
        assert!(report.sources.is_empty());
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_continues_past_rate_limited_item() {
        let client = Arc::new(ResponderCompletion::new(|prompt: &str| {
            if prompt.contains("Name: Throttled") {
                Err(ProviderError::from_message("429 Resource has been exhausted (quota)"))
            } else {
                Ok(r#"[{"regulation":"PCI DSS 6.5.1","reason":"injection"}]"#.to_string())
            }
        }));
        let enricher = ComplianceEnricher::new(retriever(), client.clone());
        let findings = vec![
            Finding::new("t", "Throttled", "first", ScanCategory::Web),
            sqli(),
        ];

        let reports = enricher
            .enrich_batch(findings, 2, &CancellationToken::new())
            .await;

        assert_eq!(
            reports[0].violations,
            vec![ComplianceViolation::new(
                "Rate Limit Error",
                "API rate limit exceeded after 3 attempts"
            )]
        );
        assert_eq!(reports[1].violations[0].regulation, "PCI DSS 6.5.1");
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test]
    async fn cancelled_batch_discards_results() {
        let client = Arc::new(ScriptedCompletion::always("[]"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reports = ComplianceEnricher::new(retriever(), client.clone())
            .enrich_batch(vec![sqli(), sqli()], 2, &cancel)
            .await;
        assert!(reports
            .iter()
            .all(|r| r.violations == vec![ComplianceViolation::cancelled()]));
        assert_eq!(client.call_count(), 0);
    }
}
