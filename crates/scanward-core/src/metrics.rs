//! Process-wide atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters; no allocation on increment.
pub struct Metrics {
    stages_executed: AtomicU64,
    tool_attempts: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    degraded_parses: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stages_executed: AtomicU64::new(0),
            tool_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            degraded_parses: AtomicU64::new(0),
        }
    }

    pub fn inc_stages(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_attempts(&self) {
        self.tool_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_degraded_parses(&self) {
        self.degraded_parses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "degraded_parses", "counter incremented");
    }

    pub fn stages_executed(&self) -> u64 {
        self.stages_executed.load(Ordering::Relaxed)
    }

    pub fn tool_attempts(&self) -> u64 {
        self.tool_attempts.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn degraded_parses(&self) -> u64 {
        self.degraded_parses.load(Ordering::Relaxed)
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            stages_executed = self.stages_executed(),
            tool_attempts = self.tool_attempts(),
            retries = self.retries(),
            rate_limited = self.rate_limited(),
            degraded_parses = self.degraded_parses(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_stages();
        m.inc_stages();
        m.inc_retries();
        assert_eq!(m.stages_executed(), 2);
        assert_eq!(m.retries(), 1);
        assert_eq!(m.rate_limited(), 0);
        m.flush();
    }
}
