use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::EngineError;
use crate::semaphore::{Permit, Semaphore};
use crate::store::Store;
use crate::stream::{Scope, Stream, StreamOptions};
use crate::sweep::{self, SweepHandle};
use crate::transaction::Transaction;

// ── Signal ──────────────────────────────────────────────────────

/// Broadcast wake-up for change streams, bumped on every commit.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn current(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.cond.notify_all();
    }

    /// Wait until the generation moves past `seen` or `timeout` elapses.
    pub(crate) fn wait(&self, seen: u64, timeout: Duration) {
        let generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .cond
            .wait_timeout_while(generation, timeout, |g| *g == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

// ── Shared state ────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) store: Box<dyn Store>,
    pub(crate) config: EngineConfig,
    pub(crate) live: ArcSwap<Catalog>,
    pub(crate) writers: Arc<Semaphore>,
    commit_lock: Mutex<()>,
    pub(crate) signal: Signal,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn begin(self: &Arc<Self>, ctx: &Context, readonly: bool) -> Result<Transaction, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        ctx.check()?;
        let permit = if readonly {
            None
        } else {
            match Permit::acquire(&self.writers, ctx, self.config.begin_timeout) {
                Some(permit) => Some(permit),
                None if self.is_closed() => return Err(EngineError::Closed),
                None => return Err(EngineError::Canceled),
            }
        };
        Ok(Transaction::new(Arc::clone(self), readonly, permit))
    }

    /// Persist and publish `txn`'s catalog. Read-only and unmodified
    /// transactions commit trivially.
    pub(crate) fn commit(&self, ctx: &Context, txn: Transaction) -> Result<(), EngineError> {
        if txn.readonly || !txn.dirty {
            return Ok(());
        }
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        ctx.check()?;

        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let live = self.live.load_full();
        if !Arc::ptr_eq(&live, &txn.base) {
            return Err(EngineError::Constraint(
                "write conflict: the catalog changed since the transaction began".into(),
            ));
        }
        self.store.store(&txn.catalog)?;
        let namespaces = txn.catalog.len();
        let oplog = txn.catalog.oplog().len();
        self.live.store(Arc::new(txn.catalog));
        self.signal.notify();
        debug!(namespaces, oplog, "committed");
        Ok(())
    }
}

// ── Engine ──────────────────────────────────────────────────────

/// An embedded document database over a [`Store`].
pub struct Engine {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<SweepHandle>>,
}

impl Engine {
    /// Load the catalog from `store` and start the TTL reaper if configured.
    pub fn open(store: impl Store + 'static, config: EngineConfig) -> Result<Engine, EngineError> {
        let catalog = store.load()?;
        info!(
            namespaces = catalog.len(),
            oplog = catalog.oplog().len(),
            "engine opened"
        );

        let shared = Arc::new(Shared {
            store: Box::new(store),
            writers: Arc::new(Semaphore::new(config.max_transactions.max(1))),
            live: ArcSwap::from_pointee(catalog),
            commit_lock: Mutex::new(()),
            signal: Signal::default(),
            closed: AtomicBool::new(false),
            config,
        });
        let sweeper = shared
            .config
            .ttl_sweep_interval
            .map(|interval| sweep::spawn(Arc::clone(&shared), interval));

        Ok(Engine {
            shared,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Start a transaction over a snapshot of the live catalog. Write
    /// transactions wait for the writer token first.
    pub fn begin(&self, ctx: &Context, readonly: bool) -> Result<Transaction, EngineError> {
        self.shared.begin(ctx, readonly)
    }

    pub fn commit(&self, ctx: &Context, txn: Transaction) -> Result<(), EngineError> {
        if !Arc::ptr_eq(&txn.shared, &self.shared) {
            return Err(EngineError::Validation(
                "transaction belongs to another engine".into(),
            ));
        }
        self.shared.commit(ctx, txn)
    }

    /// The live catalog. Later commits do not affect the returned snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.shared.live.load_full()
    }

    /// Subscribe to oplog events within `scope`.
    pub fn watch(&self, scope: Scope, options: StreamOptions) -> Result<Stream, EngineError> {
        if self.shared.is_closed() {
            return Err(EngineError::Closed);
        }
        Stream::open(Arc::clone(&self.shared), scope, options)
    }

    /// Run one TTL pass now. Returns the number of documents removed.
    pub fn reap(&self, ctx: &Context) -> Result<u64, EngineError> {
        sweep::reap(&self.shared, ctx)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop the reaper and wake blocked streams. Later calls fail with
    /// [`EngineError::Closed`].
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sweeper) = sweeper {
            sweeper.stop();
        }
        self.shared.signal.notify();
        info!("engine closed");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}
