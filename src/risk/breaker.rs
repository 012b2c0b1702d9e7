use crate::models::CircuitBreakerSnapshot;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Consecutive-failure circuit breaker
///
/// Trips when `consecutive_failures` reaches the threshold and stays
/// tripped for the cooldown. The reset is lazy: nothing re-arms on a
/// timer, the tripped state is re-evaluated the next time `check` runs.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    triggered: bool,
    tripped_at: Option<DateTime<Utc>>,
    last_reset: Option<DateTime<Utc>>,
}

/// Outcome of a breaker check
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerCheck {
    Closed,
    /// Still cooling down; carries the remaining wait
    Open(Duration),
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            triggered: false,
            tripped_at: None,
            last_reset: None,
        }
    }

    pub fn reconfigure(&mut self, threshold: u32, cooldown: Duration) {
        self.threshold = threshold;
        self.cooldown = cooldown;
    }

    /// Evaluate the breaker, resetting it if the cooldown has elapsed
    pub fn check(&mut self, now: DateTime<Utc>) -> BreakerCheck {
        if !self.triggered {
            return BreakerCheck::Closed;
        }

        let tripped_at = match self.tripped_at {
            Some(t) => t,
            None => {
                // Inconsistent state, treat as closed
                self.triggered = false;
                return BreakerCheck::Closed;
            }
        };

        let elapsed = (now - tripped_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.cooldown {
            self.triggered = false;
            self.consecutive_failures = 0;
            self.last_reset = Some(now);
            tracing::info!("🔌 Circuit breaker cooldown elapsed, resetting");
            BreakerCheck::Closed
        } else {
            BreakerCheck::Open(self.cooldown - elapsed)
        }
    }

    /// Record an execution outcome. Returns true when this call tripped
    /// the breaker.
    pub fn record(&mut self, success: bool, profit_usd: f64) -> bool {
        if success && profit_usd >= 0.0 {
            self.consecutive_failures = 0;
            return false;
        }

        self.consecutive_failures += 1;
        if !self.triggered && self.consecutive_failures >= self.threshold {
            self.triggered = true;
            self.tripped_at = Some(Utc::now());
            tracing::warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "⚡ Circuit breaker TRIPPED"
            );
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Duration {
        if !self.triggered {
            return Duration::ZERO;
        }
        match self.tripped_at {
            Some(t) => {
                let elapsed = (now - t).to_std().unwrap_or(Duration::ZERO);
                self.cooldown.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            triggered: self.triggered,
            consecutive_failures: self.consecutive_failures,
            cooldown_remaining: self.cooldown_remaining(Utc::now()),
            last_trip: self.tripped_at,
            last_reset: self.last_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_trips_exactly_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        assert!(!breaker.record(false, 0.0));
        assert!(!breaker.record(false, 0.0));
        assert!(breaker.record(false, 0.0));
        assert!(breaker.is_triggered());
        assert_eq!(breaker.consecutive_failures(), 3);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record(false, 0.0);
        breaker.record(false, 0.0);
        breaker.record(true, 0.5);
        assert_eq!(breaker.consecutive_failures(), 0);

        // A "success" at a loss still counts as a failure
        breaker.record(true, -0.1);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn test_open_while_cooling_down() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(600));
        breaker.record(false, 0.0);

        match breaker.check(Utc::now()) {
            BreakerCheck::Open(remaining) => {
                assert!(remaining > Duration::ZERO);
                assert!(remaining <= Duration::from_secs(600));
            }
            BreakerCheck::Closed => panic!("breaker should be open"),
        }
    }

    #[test]
    fn test_lazy_reset_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record(false, 0.0);
        assert!(breaker.is_triggered());

        // Evaluate as if the cooldown already elapsed
        let later = Utc::now() + ChronoDuration::seconds(11);
        assert_eq!(breaker.check(later), BreakerCheck::Closed);
        assert!(!breaker.is_triggered());
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.snapshot().last_reset.is_some());
    }

    #[test]
    fn test_snapshot_fields() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record(false, 0.0);

        let snap = breaker.snapshot();
        assert!(!snap.triggered);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.cooldown_remaining, Duration::ZERO);

        breaker.record(false, 0.0);
        let snap = breaker.snapshot();
        assert!(snap.triggered);
        assert!(snap.cooldown_remaining > Duration::ZERO);
        assert!(snap.last_trip.is_some());
    }
}
