mod common;

use std::thread;
use std::time::{Duration, Instant};

use bson::{DateTime, doc};
use common::{ctx, find, handle, memory_engine, seed};
use loam_engine::{Engine, EngineConfig, IndexConfig, MemoryStore};

fn ago(secs: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() - secs * 1000)
}

fn ttl_index(engine: &Engine, secs: u64) {
    let mut txn = engine.begin(&ctx(), false).unwrap();
    txn.create_index(
        &handle(),
        Some("expire"),
        IndexConfig::new(doc! { "at": 1 }).expire_after(Duration::from_secs(secs)),
    )
    .unwrap();
    txn.commit(&ctx()).unwrap();
}

#[test]
fn reap_removes_expired_documents() {
    let engine = memory_engine();
    ttl_index(&engine, 60);
    seed(
        &engine,
        &handle(),
        vec![
            doc! { "_id": "old", "at": ago(120) },
            doc! { "_id": "new", "at": ago(1) },
            doc! { "_id": "text", "at": "2000-01-01" },
            doc! { "_id": "none" },
        ],
    );

    assert_eq!(engine.reap(&ctx()).unwrap(), 1);
    let ids: Vec<_> = find(&engine, &handle(), doc! {})
        .iter()
        .map(|d| d.get_str("_id").unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["new", "text", "none"]);

    let last = engine.catalog().oplog().documents().last().unwrap().clone();
    assert_eq!(last.get_str("operationType").unwrap(), "delete");
    assert_eq!(engine.reap(&ctx()).unwrap(), 0);
}

#[test]
fn arrays_expire_only_when_every_date_has() {
    let engine = memory_engine();
    ttl_index(&engine, 60);
    seed(
        &engine,
        &handle(),
        vec![
            doc! { "_id": 1, "at": [ago(300), ago(120)] },
            doc! { "_id": 2, "at": [ago(300), ago(1)] },
        ],
    );
    assert_eq!(engine.reap(&ctx()).unwrap(), 1);
    assert_eq!(find(&engine, &handle(), doc! {}).len(), 1);
}

#[test]
fn compound_indexes_are_not_ttl() {
    let engine = memory_engine();
    let mut txn = engine.begin(&ctx(), false).unwrap();
    let err = txn
        .create_index(
            &handle(),
            None,
            IndexConfig::new(doc! { "at": 1, "b": 1 }).expire_after(Duration::from_secs(1)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), loam_engine::ErrorKind::Validation);
}

#[test]
fn sweeper_reaps_in_background() {
    common::init_tracing();
    let engine = Engine::open(
        MemoryStore::new(),
        EngineConfig {
            ttl_sweep_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .unwrap();
    ttl_index(&engine, 60);
    seed(&engine, &handle(), vec![doc! { "_id": 1, "at": ago(120) }]);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !find(&engine, &handle(), doc! {}).is_empty() {
        assert!(Instant::now() < deadline, "sweeper never reaped");
        thread::sleep(Duration::from_millis(10));
    }
    engine.close();
}
