//! Bounded retry with provider-hinted back-off.
//!
//! The policy is constant configuration. Each call site supplies a classifier
//! that decides, per error, whether another attempt is allowed and how long to
//! wait first. No sleep happens after the final attempt.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::METRICS;

/// Extra seconds added on top of a provider-supplied retry hint.
const HINT_BUFFER_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub default_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_delay_secs: 30,
            max_delay_secs: 60,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, default_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            default_delay_secs,
            max_delay_secs,
        }
    }

    /// Attempts actually made; a zero policy still runs the operation once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_secs(self.default_delay_secs.min(self.max_delay_secs))
    }

    /// Delay derived from an error message: the parsed hint plus a small
    /// buffer, capped at `max_delay_secs`, else the default delay.
    pub fn delay_from_message(&self, message: &str) -> Duration {
        match parse_retry_hint(message) {
            Some(secs) => {
                Duration::from_secs((secs + HINT_BUFFER_SECS).min(self.max_delay_secs))
            }
            None => self.default_delay(),
        }
    }
}

/// Extract a retry delay in seconds from provider error text.
///
/// Recognises `retry_delay { seconds: N }`, the REST body's `"retryDelay": "Ns"`
/// and `retry after N seconds`.
pub fn parse_retry_hint(message: &str) -> Option<u64> {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            Regex::new(r"retry_delay\s*\{\s*seconds:\s*(\d+)").expect("valid regex"),
            Regex::new(r#""retryDelay"\s*:\s*"(\d+)(?:\.\d+)?s""#).expect("valid regex"),
            Regex::new(r"(?i)retry after (\d+) seconds").expect("valid regex"),
        ]
    });

    patterns.iter().find_map(|re| {
        re.captures(message)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    })
}

/// Per-error retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `op` under `policy`. `op` receives the 1-based attempt number.
pub async fn retry_async<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    classify: C,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => match classify(&err) {
                RetryDecision::GiveUp => {
                    debug!(label, attempt, error = %err, "non-retryable failure");
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                RetryDecision::Retry { delay } => {
                    if attempt >= max_attempts {
                        warn!(label, attempts = attempt, error = %err, "retries exhausted");
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "transient failure, backing off"
                    );
                    METRICS.inc_retries();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn parses_structured_retry_delay() {
        let msg = "429 Resource exhausted. retry_delay {\n  seconds: 17\n}";
        assert_eq!(parse_retry_hint(msg), Some(17));
    }

    #[test]
    fn parses_rest_retry_info_body() {
        let msg = r#"429 {"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        assert_eq!(parse_retry_hint(msg), Some(17));
        assert_eq!(parse_retry_hint(r#""retryDelay": "4.5s""#), Some(4));
    }

    #[test]
    fn parses_retry_after_phrase() {
        assert_eq!(parse_retry_hint("Please Retry After 9 seconds"), Some(9));
        assert_eq!(parse_retry_hint("quota exceeded"), None);
    }

    #[test]
    fn hinted_delay_is_buffered_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_from_message("retry_delay { seconds: 10 }"),
            Duration::from_secs(12)
        );
        assert_eq!(
            policy.delay_from_message("retry_delay { seconds: 300 }"),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.delay_from_message("rate limit"),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn zero_attempt_policy_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, 1, 1).attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            &RetryPolicy::default(),
            "test",
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("busy".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| RetryDecision::Retry {
                delay: Duration::from_secs(30),
            },
        )
        .await;
        assert_eq!(outcome.result, Ok(2));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = retry_async(
            &RetryPolicy::default(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("busy".to_string()) }
            },
            |_| RetryDecision::Retry {
                delay: Duration::from_secs(1),
            },
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn give_up_stops_after_first_attempt() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = retry_async(
            &RetryPolicy::default(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad input".to_string()) }
            },
            |_| RetryDecision::GiveUp,
        )
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
