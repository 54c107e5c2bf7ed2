//! Exponential backoff with jitter for reconnect attempts.

use rand::Rng;
use std::time::Duration;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Jitter never exceeds this, however long the base delay grows.
const MAX_JITTER: Duration = Duration::from_secs(1);

/// How the delay between reconnect attempts grows.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Backoff before any failure has been recorded.
    pub initial: Duration,
    /// Ceiling for the base delay.
    pub max: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Add uniform jitter in `[0, min(1s, base)]` to each sleep.
    pub jitter: bool,
    /// Reset the retry sequence once a session has stayed up this long.
    /// `None` keeps growing the backoff for the life of the supervisor.
    pub reset_after: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_BACKOFF,
            max: MAX_BACKOFF,
            backoff_factor: 2.0,
            jitter: true,
            reset_after: None,
        }
    }
}

impl BackoffPolicy {
    /// Base delay after `failures` consecutive failures, without jitter.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let mut delay = self.initial.min(self.max);
        for _ in 0..failures {
            delay = self.grow(delay);
            if delay == self.max {
                break;
            }
        }
        delay
    }

    fn grow(&self, delay: Duration) -> Duration {
        let next = delay.as_secs_f64() * self.backoff_factor;
        Duration::try_from_secs_f64(next)
            .unwrap_or(self.max)
            .max(delay)
            .min(self.max)
    }

    /// `base` plus uniform jitter in `[0, min(1s, base)]`, if enabled.
    pub fn jittered(&self, base: Duration) -> Duration {
        if !self.jitter {
            return base;
        }
        let bound = base.min(MAX_JITTER).as_secs_f64();
        let extra = rand::thread_rng().gen_range(0.0..=bound);
        base + Duration::from_secs_f64(extra)
    }
}

/// Per-target retry counters. Lives as long as its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    backoff: Duration,
}

impl RetryState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            attempt: 0,
            backoff: policy.initial.min(policy.max),
        }
    }

    /// Failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current base delay.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// How long to sleep before the next attempt; `None` before the first.
    pub fn next_delay(&self, policy: &BackoffPolicy) -> Option<Duration> {
        (self.attempt > 0).then(|| policy.jittered(self.backoff))
    }

    pub fn record_failure(&mut self, policy: &BackoffPolicy) {
        self.attempt = self.attempt.saturating_add(1);
        self.backoff = policy.grow(self.backoff);
    }

    /// Apply `reset_after` for a session that was Active for `uptime`.
    pub fn note_uptime(&mut self, policy: &BackoffPolicy, uptime: Duration) {
        if let Some(threshold) = policy.reset_after {
            if uptime >= threshold && self.attempt > 0 {
                tracing::debug!(
                    "Session stayed up for {:.1}s, resetting backoff",
                    uptime.as_secs_f64()
                );
                *self = Self::new(policy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        let policy = BackoffPolicy::default();
        let state = RetryState::new(&policy);
        assert_eq!(state.next_delay(&policy), None);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = BackoffPolicy {
            jitter: false,
            ..Default::default()
        };
        let mut state = RetryState::new(&policy);
        let mut delays = Vec::new();
        for _ in 0..12 {
            state.record_failure(&policy);
            delays.push(state.next_delay(&policy).unwrap().as_secs());
        }
        assert_eq!(
            delays,
            vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 600, 600, 600]
        );
        assert_eq!(state.attempt(), 12);
    }

    #[test]
    fn test_backoff_never_resets_by_default() {
        let policy = BackoffPolicy::default();
        let mut state = RetryState::new(&policy);
        state.record_failure(&policy);
        state.record_failure(&policy);
        state.note_uptime(&policy, Duration::from_secs(86_400));
        assert_eq!(state.attempt(), 2);
        assert_eq!(state.backoff(), Duration::from_secs(4));
    }

    #[test]
    fn test_reset_after_threshold() {
        let policy = BackoffPolicy {
            reset_after: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let mut state = RetryState::new(&policy);
        state.record_failure(&policy);
        state.note_uptime(&policy, Duration::from_secs(10));
        assert_eq!(state.attempt(), 1);
        state.note_uptime(&policy, Duration::from_secs(60));
        assert_eq!(state, RetryState::new(&policy));
    }

    #[test]
    fn test_jitter_bounded_by_base_for_short_delays() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            ..Default::default()
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(200));
        }
    }
}
