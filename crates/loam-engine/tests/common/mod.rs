#![allow(dead_code)]

use bson::Document;
use loam_engine::{Context, Engine, EngineConfig, FindOptions, Handle, MemoryStore, Store};

pub const DB: &str = "db";
pub const COLLECTION: &str = "c";

pub fn handle() -> Handle {
    Handle::new(DB, COLLECTION)
}

pub fn ctx() -> Context {
    Context::background()
}

/// Route engine logs to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Engine config with the background reaper disabled.
pub fn config() -> EngineConfig {
    EngineConfig {
        ttl_sweep_interval: None,
        ..Default::default()
    }
}

pub fn memory_engine() -> Engine {
    Engine::open(MemoryStore::new(), config()).unwrap()
}

pub fn open(store: impl Store + 'static) -> Engine {
    Engine::open(store, config()).unwrap()
}

/// Insert `docs` into `handle` in one committed transaction.
pub fn seed(engine: &Engine, handle: &Handle, docs: Vec<Document>) {
    let mut txn = engine.begin(&ctx(), false).unwrap();
    for doc in docs {
        txn.insert(handle, doc).unwrap();
    }
    txn.commit(&ctx()).unwrap();
}

/// Every document in `handle` matching `query`, in insertion order.
pub fn find(engine: &Engine, handle: &Handle, query: Document) -> Vec<Document> {
    let txn = engine.begin(&ctx(), true).unwrap();
    txn.find(handle, &query, &FindOptions::default()).unwrap()
}
