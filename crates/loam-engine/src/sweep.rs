//! Background TTL reaper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::Shared;
use crate::error::EngineError;

pub(crate) struct SweepHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<(Mutex<()>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SweepHandle {
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.1.notify_one();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the sweep thread. It wakes every `interval` and reaps expired
/// documents until stopped.
pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration) -> SweepHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new((Mutex::new(()), Condvar::new()));
    let sweep_flag = Arc::clone(&shutdown);
    let sweep_notify = Arc::clone(&notify);
    let handle = thread::spawn(move || {
        loop {
            let (lock, cvar) = &*sweep_notify;
            let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = cvar
                .wait_timeout(guard, interval)
                .unwrap_or_else(PoisonError::into_inner);
            if sweep_flag.load(Ordering::Relaxed) {
                break;
            }
            // Give up the pass rather than block shutdown behind a writer.
            let ctx = Context::background().with_timeout(interval);
            match reap(&shared, &ctx) {
                Ok(0) | Err(EngineError::Canceled | EngineError::Closed) => {}
                Ok(removed) => debug!(removed, "ttl sweep"),
                Err(e) => warn!(error = %e, "ttl sweep failed"),
            }
        }
    });

    SweepHandle {
        shutdown,
        notify,
        handle: Some(handle),
    }
}

/// Delete every expired document in one write transaction.
pub(crate) fn reap(shared: &Arc<Shared>, ctx: &Context) -> Result<u64, EngineError> {
    let mut txn = shared.begin(ctx, false)?;
    let removed = txn.reap(bson::DateTime::now().timestamp_millis())?;
    if removed > 0 {
        shared.commit(ctx, txn)?;
    }
    Ok(removed)
}
