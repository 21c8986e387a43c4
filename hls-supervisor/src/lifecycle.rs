//! Stream lifecycle state machine.
//!
//! ```text
//!             grace elapsed
//! Connecting ──────────────► Connected
//!     │   ▲                      │
//!     │   │ retry due            │ exit
//!     │   │                      ▼
//!     │ Reconnecting ◄──── Disconnected ────► Failed
//!     │              backoff      ▲   retries exhausted
//!     └───────────────────────────┘
//!          exit / spawn failure
//! ```
//!
//! [`Lifecycle::apply`] is the only way status changes. Edges not in the
//! graph are rejected with [`StreamError::InvalidTransition`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Failed,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// No automatic transition leaves this state
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the supervisor observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The process survived the connect grace period
    GraceElapsed,
    /// The process exited (any exit code)
    Exited(String),
    /// The spawn call itself failed
    SpawnFailed(String),
    /// The backoff timer was armed
    BackoffStarted,
    /// The backoff timer fired
    RetryDue,
    /// Give up after the last failure
    RetriesExhausted,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::GraceElapsed => "grace elapsed",
            Self::Exited(_) => "process exited",
            Self::SpawnFailed(_) => "spawn failed",
            Self::BackoffStarted => "backoff started",
            Self::RetryDue => "retry due",
            Self::RetriesExhausted => "retries exhausted",
        }
    }
}

/// What the supervisor should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    RetryAfter(Duration),
    GiveUp,
}

/// Status, retry counter and last error of one session
#[derive(Debug, Clone)]
pub struct Lifecycle {
    status: StreamStatus,
    attempts: u32,
    last_error: Option<String>,
    policy: RetryPolicy,
}

impl Lifecycle {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            status: StreamStatus::Connecting,
            attempts: 0,
            last_error: None,
            policy,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Most recent failure; kept across transitions for diagnostics
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn apply(&mut self, event: LifecycleEvent) -> Result<Directive, StreamError> {
        use LifecycleEvent::*;
        use StreamStatus::*;

        match (self.status, event) {
            (Connecting, GraceElapsed) => {
                self.status = Connected;
                self.attempts = 0;
                Ok(Directive::Continue)
            }
            (Connecting | Connected, Exited(reason) | SpawnFailed(reason)) => {
                self.status = Disconnected;
                self.attempts = self.attempts.saturating_add(1);
                self.last_error = Some(reason);

                if self.policy.is_exhausted(self.attempts) {
                    Ok(Directive::GiveUp)
                } else {
                    Ok(Directive::RetryAfter(self.policy.delay_for(self.attempts)))
                }
            }
            (Disconnected, BackoffStarted) if !self.policy.is_exhausted(self.attempts) => {
                self.status = Reconnecting;
                Ok(Directive::Continue)
            }
            (Disconnected, RetriesExhausted) if self.policy.is_exhausted(self.attempts) => {
                self.status = Failed;
                Ok(Directive::GiveUp)
            }
            (Reconnecting, RetryDue) => {
                self.status = Connecting;
                Ok(Directive::Continue)
            }
            (from, event) => Err(StreamError::InvalidTransition {
                from,
                event: event.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle(max_attempts: u32) -> Lifecycle {
        Lifecycle::new(RetryPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts,
        })
    }

    /// Drive one failed cycle: exit, then either back off and retry or give up.
    fn fail_once(lc: &mut Lifecycle, reason: &str) -> Directive {
        let directive = lc.apply(LifecycleEvent::Exited(reason.to_string())).unwrap();
        match directive {
            Directive::RetryAfter(_) => {
                lc.apply(LifecycleEvent::BackoffStarted).unwrap();
                lc.apply(LifecycleEvent::RetryDue).unwrap();
            }
            Directive::GiveUp => {
                lc.apply(LifecycleEvent::RetriesExhausted).unwrap();
            }
            Directive::Continue => unreachable!("exit never continues"),
        }
        directive
    }

    #[test]
    fn test_grace_promotes_and_resets_attempts() {
        let mut lc = lifecycle(5);
        fail_once(&mut lc, "boom");
        assert_eq!(lc.attempts(), 1);
        assert_eq!(lc.status(), StreamStatus::Connecting);

        lc.apply(LifecycleEvent::GraceElapsed).unwrap();
        assert_eq!(lc.status(), StreamStatus::Connected);
        assert_eq!(lc.attempts(), 0);
        // Diagnostics survive the recovery
        assert_eq!(lc.last_error(), Some("boom"));
    }

    #[test]
    fn test_fails_exactly_after_max_attempts() {
        let mut lc = lifecycle(5);
        for n in 1..=4 {
            let directive = fail_once(&mut lc, &format!("exit {}", n));
            assert!(matches!(directive, Directive::RetryAfter(_)));
            assert_eq!(lc.attempts(), n);
            assert_ne!(lc.status(), StreamStatus::Failed);
        }

        let directive = fail_once(&mut lc, "exit 5");
        assert_eq!(directive, Directive::GiveUp);
        assert_eq!(lc.attempts(), 5);
        assert_eq!(lc.status(), StreamStatus::Failed);
        assert_eq!(lc.last_error(), Some("exit 5"));
    }

    #[test]
    fn test_retry_delays_follow_policy() {
        let mut lc = lifecycle(10);
        let mut delays = Vec::new();
        for _ in 0..4 {
            if let Directive::RetryAfter(d) = fail_once(&mut lc, "x") {
                delays.push(d.as_secs());
            }
        }
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_spawn_failure_counts_as_cycle() {
        let mut lc = lifecycle(5);
        let directive = lc
            .apply(LifecycleEvent::SpawnFailed("transcoder not found".to_string()))
            .unwrap();
        assert_eq!(directive, Directive::RetryAfter(Duration::from_secs(1)));
        assert_eq!(lc.status(), StreamStatus::Disconnected);
        assert_eq!(lc.attempts(), 1);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut lc = lifecycle(1);
        fail_once(&mut lc, "x");
        assert_eq!(lc.status(), StreamStatus::Failed);

        for event in [
            LifecycleEvent::GraceElapsed,
            LifecycleEvent::Exited("again".to_string()),
            LifecycleEvent::BackoffStarted,
            LifecycleEvent::RetryDue,
        ] {
            assert!(matches!(
                lc.apply(event),
                Err(StreamError::InvalidTransition { from: StreamStatus::Failed, .. })
            ));
        }
    }

    #[test]
    fn test_rejects_out_of_order_events() {
        let mut lc = lifecycle(5);
        assert!(lc.apply(LifecycleEvent::RetryDue).is_err());
        assert!(lc.apply(LifecycleEvent::BackoffStarted).is_err());
        // Not exhausted yet, so giving up is not allowed
        lc.apply(LifecycleEvent::Exited("x".to_string())).unwrap();
        assert!(lc.apply(LifecycleEvent::RetriesExhausted).is_err());
        assert_eq!(lc.status(), StreamStatus::Disconnected);
    }
}
