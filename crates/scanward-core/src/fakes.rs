//! In-memory fakes for the provider seam (testing only)
//!
//! `ScriptedCompletion` replays a fixed list of responses in call order;
//! `ResponderCompletion` answers from a closure over the prompt, which keeps
//! results stable when calls arrive concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::error::ProviderError;
use crate::provider::CompletionClient;

/// Completion client that pops scripted results in order.
#[derive(Debug)]
pub struct ScriptedCompletion {
    steps: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    fallback: Result<String, ProviderError>,
    delay: Option<Duration>,
}

impl ScriptedCompletion {
    pub fn new(steps: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fallback: Err(ProviderError::Hard {
                message: "no scripted response".to_string(),
            }),
            delay: None,
        }
    }

    /// Always answer `response`.
    pub fn always(response: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(Ok(response.into()))
    }

    /// Result returned once the script is exhausted.
    pub fn with_fallback(mut self, fallback: Result<String, ProviderError>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        step.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Completion client answering from a closure over the prompt.
pub struct ResponderCompletion<F> {
    responder: F,
    calls: AtomicUsize,
}

impl<F> ResponderCompletion<F>
where
    F: Fn(&str) -> Result<String, ProviderError> + Send + Sync,
{
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> CompletionClient for ResponderCompletion<F>
where
    F: Fn(&str) -> Result<String, ProviderError> + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(prompt)
    }
}
