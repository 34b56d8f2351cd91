//! Failed-attempt counting and temporary lockout.
//!
//! ```text
//! Active(n) --failure--> Active(n+1)            while n+1 < threshold
//! Active(n) --failure--> Locked(until)          when n+1 >= threshold
//! Locked    --now >= until, success--> Active(0)
//! Active(n) --success--> Active(0)
//! ```
//!
//! Stores apply `register_failure` as one atomic read-modify-write.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Result of applying one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutTransition {
    pub state: LockoutState,
    /// True only for the attempt that moved the identity into `Locked`.
    pub newly_locked: bool,
}

impl LockoutTransition {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        is_locked(self.state.locked_until, now)
    }
}

/// Pure lock check; no side effects.
pub fn is_locked(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(locked_until, Some(until) if now < until)
}

impl LockoutPolicy {
    pub fn register_failure(&self, current: LockoutState, now: DateTime<Utc>) -> LockoutTransition {
        if is_locked(current.locked_until, now) {
            return LockoutTransition {
                state: LockoutState {
                    failed_attempts: current.failed_attempts.saturating_add(1),
                    locked_until: current.locked_until,
                },
                newly_locked: false,
            };
        }

        // An elapsed lock starts a fresh counting window.
        let base = if current.locked_until.is_some() {
            0
        } else {
            current.failed_attempts
        };
        let failed_attempts = base.saturating_add(1);

        if failed_attempts >= self.threshold {
            LockoutTransition {
                state: LockoutState {
                    failed_attempts,
                    locked_until: Some(now + self.duration),
                },
                newly_locked: true,
            }
        } else {
            LockoutTransition {
                state: LockoutState {
                    failed_attempts,
                    locked_until: None,
                },
                newly_locked: false,
            }
        }
    }

    pub fn register_success(&self) -> LockoutState {
        LockoutState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fifth_failure_locks() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let state = LockoutState {
            failed_attempts: 4,
            locked_until: None,
        };

        let t = policy.register_failure(state, now);
        assert!(t.newly_locked);
        assert_eq!(t.state.failed_attempts, 5);
        assert_eq!(t.state.locked_until, Some(now + Duration::minutes(15)));
        assert!(t.is_locked(now));
    }

    #[test]
    fn failures_while_locked_do_not_extend_lock() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let until = now + Duration::minutes(10);
        let state = LockoutState {
            failed_attempts: 5,
            locked_until: Some(until),
        };

        let t = policy.register_failure(state, now);
        assert!(!t.newly_locked);
        assert_eq!(t.state.locked_until, Some(until));
        assert_eq!(t.state.failed_attempts, 6);
    }

    #[test]
    fn elapsed_lock_restarts_counting() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let state = LockoutState {
            failed_attempts: 5,
            locked_until: Some(now - Duration::seconds(1)),
        };

        let t = policy.register_failure(state, now);
        assert_eq!(t.state.failed_attempts, 1);
        assert_eq!(t.state.locked_until, None);
    }

    #[test]
    fn lock_boundary_is_exclusive() {
        let now = Utc::now();
        assert!(is_locked(Some(now + Duration::seconds(1)), now));
        assert!(!is_locked(Some(now), now));
        assert!(!is_locked(None, now));
    }

    proptest! {
        #[test]
        fn exactly_one_transition_locks(threshold in 1u32..10, failures in 1u32..30) {
            let policy = LockoutPolicy { threshold, duration: Duration::minutes(15) };
            let now = Utc::now();
            let mut state = LockoutState::default();
            let mut locks = 0;

            for _ in 0..failures {
                let t = policy.register_failure(state, now);
                prop_assert_eq!(t.state.failed_attempts, state.failed_attempts + 1);
                if t.newly_locked {
                    locks += 1;
                }
                state = t.state;
            }

            let expected = if failures >= threshold { 1 } else { 0 };
            prop_assert_eq!(locks, expected);
        }
    }
}
