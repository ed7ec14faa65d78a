//! Reconnect scheduling with bounded exponential backoff.
//!
//! [`ReconnectPlan`] tracks the attempt counter and the single pending
//! retry timer. Timers are identified by a monotonically increasing id so
//! a timer that fires after being cancelled is recognised as stale.

use std::time::Duration;

use crate::types::ReconnectConfig;

/// Identifier of a scheduled retry timer.
pub type TimerId = u64;

/// Outcome of an unexpected closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// A retry was scheduled.
    Scheduled {
        timer: TimerId,
        attempt: u32,
        delay: Duration,
    },
    /// The attempt cap is reached; nothing was scheduled.
    Exhausted { attempts: u32 },
}

/// Attempt counter plus the pending retry timer, if any.
#[derive(Debug, Clone)]
pub struct ReconnectPlan {
    config: ReconnectConfig,
    attempt: u32,
    pending: Option<TimerId>,
    next_timer: TimerId,
}

impl ReconnectPlan {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            pending: None,
            next_timer: 0,
        }
    }

    /// Retries scheduled since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// The retry timer currently waiting to fire.
    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    /// Called after an unexpected closure.
    ///
    /// Increments the attempt counter and schedules a retry while attempts
    /// remain. Any previously pending timer is superseded.
    pub fn on_unexpected_close(&mut self) -> RetryDecision {
        if self.attempt >= self.config.max_attempts {
            self.pending = None;
            return RetryDecision::Exhausted {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;
        self.next_timer += 1;
        let timer = self.next_timer;
        self.pending = Some(timer);
        RetryDecision::Scheduled {
            timer,
            attempt: self.attempt,
            delay: self.config.delay_for_attempt(self.attempt),
        }
    }

    /// Consumes the pending timer if `timer` is it. Returns `false` for a
    /// stale or cancelled timer.
    pub fn fire(&mut self, timer: TimerId) -> bool {
        if self.pending == Some(timer) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Drops the pending timer, returning its id so the caller can stop it.
    pub fn cancel(&mut self) -> Option<TimerId> {
        self.pending.take()
    }

    /// Called on every successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(max_attempts: u32) -> ReconnectPlan {
        ReconnectPlan::new(ReconnectConfig {
            max_attempts,
            ..ReconnectConfig::default()
        })
    }

    #[test]
    fn attempts_are_capped() {
        let mut plan = plan(5);
        for n in 1..=8u32 {
            plan.on_unexpected_close();
            assert_eq!(plan.attempt(), n.min(5));
        }
    }

    #[test]
    fn schedules_then_exhausts() {
        let mut plan = plan(2);
        let first = plan.on_unexpected_close();
        let second = plan.on_unexpected_close();
        let third = plan.on_unexpected_close();

        assert!(matches!(
            first,
            RetryDecision::Scheduled { attempt: 1, delay, .. } if delay == Duration::from_secs(2)
        ));
        assert!(matches!(
            second,
            RetryDecision::Scheduled { attempt: 2, delay, .. } if delay == Duration::from_secs(4)
        ));
        assert_eq!(third, RetryDecision::Exhausted { attempts: 2 });
        assert!(plan.pending().is_none());
    }

    #[test]
    fn fire_only_accepts_pending_timer() {
        let mut plan = plan(5);
        let RetryDecision::Scheduled { timer, .. } = plan.on_unexpected_close() else {
            panic!("expected a scheduled retry");
        };

        assert!(!plan.fire(timer + 1));
        assert!(plan.fire(timer));
        // Already consumed.
        assert!(!plan.fire(timer));
    }

    #[test]
    fn cancelled_timer_is_stale() {
        let mut plan = plan(5);
        let RetryDecision::Scheduled { timer, .. } = plan.on_unexpected_close() else {
            panic!("expected a scheduled retry");
        };

        assert_eq!(plan.cancel(), Some(timer));
        assert_eq!(plan.cancel(), None);
        assert!(!plan.fire(timer));
    }

    #[test]
    fn reset_restarts_backoff() {
        let mut plan = plan(5);
        plan.on_unexpected_close();
        plan.on_unexpected_close();
        plan.reset();

        assert_eq!(plan.attempt(), 0);
        assert!(matches!(
            plan.on_unexpected_close(),
            RetryDecision::Scheduled { attempt: 1, .. }
        ));
    }

    #[test]
    fn zero_max_attempts_never_schedules() {
        let mut plan = plan(0);
        assert_eq!(
            plan.on_unexpected_close(),
            RetryDecision::Exhausted { attempts: 0 }
        );
    }
}
