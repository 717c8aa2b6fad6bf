use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Minimal circuit breaker guarding the directory client. Opens after
/// `failure_threshold` consecutive failures, stays open for `open_duration`,
/// then allows a single probe call through (half-open) before closing again.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        let opened_at = *self.opened_at.lock().await;
        match opened_at {
            None => CircuitState::Closed,
            Some(t) if t.elapsed() >= self.open_duration => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    pub async fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().await = None;
    }

    pub async fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            let mut opened_at = self.opened_at.lock().await;
            if opened_at.is_none() {
                *opened_at = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closes_on_success_and_opens_after_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        breaker.on_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_duration_elapses() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }
}
