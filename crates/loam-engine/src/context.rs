//! Cancellation and deadlines for blocking engine calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::EngineError;

/// Carries a cancel flag and an optional deadline into `begin`, `commit` and
/// `Stream::next`. Derived contexts share the parent's flag and never extend
/// its deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Cancels every context sharing its flag.
#[derive(Debug, Clone)]
pub struct Canceller {
    canceled: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            canceled: Arc::clone(&self.canceled),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            canceled: Arc::clone(&self.canceled),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Canceled)` once the context is canceled or past its deadline.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_done() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_expires() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_none());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancel_reaches_derived_contexts() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.canceller().cancel();
        assert!(child.is_done());
        assert!(matches!(child.check(), Err(EngineError::Canceled)));
    }

    #[test]
    fn deadlines_only_shrink() {
        let short = Context::background().with_timeout(Duration::from_millis(1));
        let longer = short.with_timeout(Duration::from_secs(60));
        assert_eq!(short.deadline(), longer.deadline());
        std::thread::sleep(Duration::from_millis(5));
        assert!(longer.is_done());
    }
}
