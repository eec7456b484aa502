use crate::model::{Pod, PodStatus};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential delay between pod creations while pods keep crashing.
#[derive(Debug)]
pub struct CreateBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
    last_failure: Option<Instant>,
    seen: HashSet<String>,
}

impl CreateBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
            last_failure: None,
            seen: HashSet::new(),
        }
    }

    /// Record newly crash-looping pods. A Running pod with no crash in
    /// sight resets the backoff.
    pub fn observe(&mut self, owned: &[&Pod], now: Instant) {
        self.seen
            .retain(|id| owned.iter().any(|pod| &pod.id == id));

        let mut crashing = false;
        let mut running = false;
        for pod in owned {
            match pod.status {
                PodStatus::CrashLoop => {
                    crashing = true;
                    if self.seen.insert(pod.id.clone()) {
                        self.failures = self.failures.saturating_add(1);
                        self.last_failure = Some(now);
                    }
                }
                PodStatus::Running => running = true,
                _ => {}
            }
        }

        if running && !crashing {
            self.failures = 0;
            self.last_failure = None;
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.failures - 1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    /// Earliest instant the next creation may happen.
    pub fn ready_at(&self) -> Option<Instant> {
        self.last_failure.map(|at| at + self.delay())
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at().map_or(true, |at| now >= at)
    }
}
