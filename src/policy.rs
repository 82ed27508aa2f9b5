//! Restart policy for crashed instances.
//!
//! A pure decision table: given the current attempt count and the time
//! since the previous crash, decide between a delayed restart and a
//! permanent failure. The cooldown window is measured from the previous
//! crash, never from the instance becoming running, so a rapid
//! restart-then-crash sequence counts as one uninterrupted streak.

use std::time::Duration;

/// Restart policy parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before the first restart attempt.
    pub base_delay_ms: u64,
    /// Ceiling on the backoff delay.
    pub cap_delay_ms: u64,
    /// A crash later than this after the previous one starts a fresh streak.
    pub cooldown_ms: u64,
    /// Restart attempts allowed within one streak before giving up.
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            cap_delay_ms: 10_000,
            cooldown_ms: 10_000,
            max_attempts: 3,
        }
    }
}

/// Verdict for a single crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Schedule a restart after `delay`; `attempt` is the new attempt count.
    Restart { attempt: u32, delay: Duration },
    /// Restart budget exhausted; the instance is permanently failed.
    Fail,
}

impl RestartPolicy {
    /// Decide what to do about a crash.
    ///
    /// `attempts` is the attempt count accumulated in the current streak
    /// and `ms_since_last_crash` is `None` for the first crash ever.
    pub fn decide(&self, attempts: u32, ms_since_last_crash: Option<u64>) -> RestartDecision {
        let in_window = ms_since_last_crash.is_some_and(|ms| ms <= self.cooldown_ms);

        if !in_window {
            // First crash ever, or the streak went cold: start over.
            return RestartDecision::Restart {
                attempt: 1,
                delay: Duration::from_millis(self.base_delay_ms),
            };
        }

        let attempt = attempts + 1;
        if attempt > self.max_attempts {
            return RestartDecision::Fail;
        }

        // Exponential backoff: base * 2^(attempt-1), capped.
        let exp = 2u64.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay_ms.saturating_mul(exp).min(self.cap_delay_ms);

        RestartDecision::Restart {
            attempt,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay_of(decision: RestartDecision) -> u64 {
        match decision {
            RestartDecision::Restart { delay, .. } => delay.as_millis() as u64,
            RestartDecision::Fail => panic!("expected restart decision"),
        }
    }

    #[test]
    fn test_default_policy_constants() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.cap_delay_ms, 10_000);
        assert_eq!(policy.cooldown_ms, 10_000);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_first_crash_ever_is_attempt_one() {
        let policy = RestartPolicy::default();
        let decision = policy.decide(0, None);
        assert_eq!(
            decision,
            RestartDecision::Restart {
                attempt: 1,
                delay: Duration::from_millis(1000),
            }
        );
    }

    #[test]
    fn test_crash_outside_cooldown_resets_streak() {
        let policy = RestartPolicy::default();
        // Deep into a streak, but the crash came 10.001s after the last one.
        let decision = policy.decide(3, Some(10_001));
        assert_eq!(
            decision,
            RestartDecision::Restart {
                attempt: 1,
                delay: Duration::from_millis(1000),
            }
        );
    }

    #[test]
    fn test_backoff_sequence_doubles() {
        let policy = RestartPolicy::default();
        assert_eq!(delay_of(policy.decide(0, None)), 1000);
        assert_eq!(delay_of(policy.decide(1, Some(100))), 2000);
        assert_eq!(delay_of(policy.decide(2, Some(100))), 4000);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RestartPolicy {
            max_attempts: 10,
            ..Default::default()
        };
        // base * 2^4 = 16000, capped to 10000.
        assert_eq!(delay_of(policy.decide(4, Some(100))), 10_000);
        assert_eq!(delay_of(policy.decide(9, Some(100))), 10_000);
    }

    #[test]
    fn test_fourth_in_window_crash_fails() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.decide(3, Some(5000)), RestartDecision::Fail);
    }

    #[test]
    fn test_boundary_exactly_at_cooldown_is_in_window() {
        let policy = RestartPolicy::default();
        // msSinceLastCrash > cooldownWindow resets; exactly equal continues.
        let decision = policy.decide(1, Some(10_000));
        assert_eq!(delay_of(decision), 2000);
    }

    #[test]
    fn test_budget_allows_exactly_three_restarts() {
        let policy = RestartPolicy::default();
        let mut attempts = 0;
        let mut restarts = 0;
        loop {
            let since = if attempts == 0 { None } else { Some(10) };
            match policy.decide(attempts, since) {
                RestartDecision::Restart { attempt, .. } => {
                    attempts = attempt;
                    restarts += 1;
                }
                RestartDecision::Fail => break,
            }
        }
        assert_eq!(restarts, 3);
    }

    #[test]
    fn test_delays_never_decrease_within_streak() {
        let policy = RestartPolicy::default();
        let mut attempts = 0;
        let mut last_delay = 0;
        loop {
            let since = if attempts == 0 { None } else { Some(10) };
            match policy.decide(attempts, since) {
                RestartDecision::Restart { attempt, delay } => {
                    let delay_ms = delay.as_millis() as u64;
                    assert!(delay_ms >= last_delay);
                    last_delay = delay_ms;
                    attempts = attempt;
                }
                RestartDecision::Fail => break,
            }
        }
    }

    #[test]
    fn test_custom_policy_values() {
        let policy = RestartPolicy {
            base_delay_ms: 10,
            cap_delay_ms: 25,
            cooldown_ms: 500,
            max_attempts: 2,
        };
        assert_eq!(delay_of(policy.decide(0, None)), 10);
        assert_eq!(delay_of(policy.decide(1, Some(100))), 20);
        assert_eq!(policy.decide(2, Some(100)), RestartDecision::Fail);
        // Out of the 500ms window: fresh streak.
        assert_eq!(delay_of(policy.decide(2, Some(600))), 10);
    }
}
