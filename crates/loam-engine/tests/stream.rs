mod common;

use std::thread;
use std::time::Duration;

use bson::{Document, doc};
use common::{ctx, handle, memory_engine, seed};
use loam_engine::{
    Context, Engine, EngineConfig, EngineError, ErrorKind, Handle, MemoryStore, Scope,
    StreamOptions, token_ts,
};

fn watch(engine: &Engine, scope: Scope) -> loam_engine::Stream {
    engine.watch(scope, StreamOptions::default()).unwrap()
}

fn op(event: &Document) -> &str {
    event.get_str("operationType").unwrap()
}

fn soon() -> Context {
    Context::background().with_timeout(Duration::from_secs(5))
}

#[test]
fn collection_stream_sees_insert_then_drop() {
    common::init_tracing();
    let engine = memory_engine();
    let mut stream = watch(&engine, Scope::Collection(handle()));

    seed(&engine, &handle(), vec![doc! { "_id": "z" }]);
    let event = stream.next(&soon()).unwrap().unwrap();
    assert_eq!(op(&event), "insert");
    assert_eq!(event.get_document("ns").unwrap(), &doc! { "db": "db", "coll": "c" });
    assert_eq!(event.get_document("documentKey").unwrap(), &doc! { "_id": "z" });
    assert_eq!(event.get_document("fullDocument").unwrap(), &doc! { "_id": "z" });

    let mut txn = engine.begin(&ctx(), false).unwrap();
    txn.drop(&handle()).unwrap();
    txn.commit(&ctx()).unwrap();

    assert_eq!(op(&stream.next(&soon()).unwrap().unwrap()), "drop");
    assert_eq!(op(&stream.next(&soon()).unwrap().unwrap()), "invalidate");
    assert!(stream.is_closed());
    assert_eq!(stream.next(&soon()).unwrap(), None);
}

#[test]
fn new_stream_skips_history() {
    let engine = memory_engine();
    seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
    let mut stream = watch(&engine, Scope::Cluster);
    assert_eq!(stream.try_next().unwrap(), None);

    seed(&engine, &handle(), vec![doc! { "_id": 2 }]);
    let event = stream.try_next().unwrap().unwrap();
    assert_eq!(event.get_document("documentKey").unwrap(), &doc! { "_id": 2 });
}

#[test]
fn scopes_filter_namespaces() {
    let engine = memory_engine();
    let mut db = watch(&engine, Scope::Database("db".into()));
    let mut coll = watch(&engine, Scope::Collection(Handle::new("db", "other")));

    seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
    seed(&engine, &Handle::new("elsewhere", "c"), vec![doc! { "_id": 2 }]);

    let event = db.try_next().unwrap().unwrap();
    assert_eq!(event.get_document("documentKey").unwrap(), &doc! { "_id": 1 });
    assert_eq!(db.try_next().unwrap(), None);
    assert_eq!(coll.try_next().unwrap(), None);
}

#[test]
fn database_stream_invalidates_on_drop_database() {
    let engine = memory_engine();
    seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
    let mut stream = watch(&engine, Scope::Database("db".into()));

    let mut txn = engine.begin(&ctx(), false).unwrap();
    txn.drop(&Handle::database("db")).unwrap();
    txn.commit(&ctx()).unwrap();

    let kinds: Vec<_> = std::iter::from_fn(|| stream.try_next().unwrap())
        .map(|e| op(&e).to_string())
        .collect();
    assert_eq!(kinds, vec!["drop", "dropDatabase", "invalidate"]);
}

#[test]
fn cluster_stream_survives_drops() {
    let engine = memory_engine();
    seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
    let mut stream = watch(&engine, Scope::Cluster);

    let mut txn = engine.begin(&ctx(), false).unwrap();
    txn.drop(&handle()).unwrap();
    txn.commit(&ctx()).unwrap();
    seed(&engine, &handle(), vec![doc! { "_id": 2 }]);

    let kinds: Vec<_> = std::iter::from_fn(|| stream.try_next().unwrap())
        .map(|e| op(&e).to_string())
        .collect();
    assert_eq!(kinds, vec!["drop", "insert"]);
    assert!(!stream.is_closed());
}

#[test]
fn match_stage_filters_events() {
    let engine = memory_engine();
    let options = StreamOptions {
        pipeline: vec![doc! { "$match": { "operationType": "delete" } }],
        ..Default::default()
    };
    let mut stream = engine.watch(Scope::Collection(handle()), options).unwrap();

    seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
    let mut txn = engine.begin(&ctx(), false).unwrap();
    txn.delete(&handle(), &doc! {}, &Default::default()).unwrap();
    txn.commit(&ctx()).unwrap();

    assert_eq!(op(&stream.try_next().unwrap().unwrap()), "delete");
    assert_eq!(stream.try_next().unwrap(), None);
}

#[test]
fn unsupported_stage_is_rejected() {
    let engine = memory_engine();
    let options = StreamOptions {
        pipeline: vec![doc! { "$project": { "ns": 1 } }],
        ..Default::default()
    };
    let err = engine.watch(Scope::Cluster, options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn resume_after_token() {
    let engine = memory_engine();
    let mut stream = watch(&engine, Scope::Collection(handle()));
    for i in 0..3 {
        seed(&engine, &handle(), vec![doc! { "_id": i }]);
    }
    stream.try_next().unwrap().unwrap();
    let token = stream.resume_token().unwrap().clone();
    assert!(token_ts(&token).is_some());
    drop(stream);

    let options = StreamOptions {
        resume_after: Some(token),
        ..Default::default()
    };
    let mut resumed = engine.watch(Scope::Collection(handle()), options).unwrap();
    let keys: Vec<_> = std::iter::from_fn(|| resumed.try_next().unwrap())
        .map(|e| e.get_document("documentKey").unwrap().clone())
        .collect();
    assert_eq!(keys, vec![doc! { "_id": 1 }, doc! { "_id": 2 }]);
}

#[test]
fn start_at_operation_time() {
    let engine = memory_engine();
    for i in 0..3 {
        seed(&engine, &handle(), vec![doc! { "_id": i }]);
    }
    let second = engine
        .catalog()
        .oplog()
        .documents()
        .nth(1)
        .unwrap()
        .get_timestamp("clusterTime")
        .unwrap();

    let options = StreamOptions {
        start_at_operation_time: Some(second),
        ..Default::default()
    };
    let mut stream = engine.watch(Scope::Cluster, options).unwrap();
    let keys: Vec<_> = std::iter::from_fn(|| stream.try_next().unwrap())
        .map(|e| e.get_document("documentKey").unwrap().clone())
        .collect();
    assert_eq!(keys, vec![doc! { "_id": 1 }, doc! { "_id": 2 }]);
}

#[test]
fn conflicting_resume_options() {
    let engine = memory_engine();
    let token = doc! { "ts": bson::Timestamp { time: 1, increment: 1 } };
    let options = StreamOptions {
        resume_after: Some(token.clone()),
        start_after: Some(token),
        ..Default::default()
    };
    assert_eq!(
        engine.watch(Scope::Cluster, options).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn trimmed_history_is_not_found() {
    let engine = Engine::open(
        MemoryStore::new(),
        EngineConfig {
            ttl_sweep_interval: None,
            oplog_size: 2,
            ..Default::default()
        },
    )
    .unwrap();
    seed(&engine, &handle(), vec![doc! { "_id": 0 }]);
    let token = engine
        .catalog()
        .oplog()
        .documents()
        .next()
        .unwrap()
        .get_document("_id")
        .unwrap()
        .clone();

    let mut lagging = watch(&engine, Scope::Cluster);
    for i in 1..4 {
        seed(&engine, &handle(), vec![doc! { "_id": i }]);
    }

    let options = StreamOptions {
        resume_after: Some(token),
        ..Default::default()
    };
    assert_eq!(
        engine.watch(Scope::Cluster, options).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(lagging.try_next().unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn next_wakes_on_commit() {
    let engine = std::sync::Arc::new(memory_engine());
    let mut stream = watch(&engine, Scope::Collection(handle()));

    let writer = {
        let engine = std::sync::Arc::clone(&engine);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            seed(&engine, &handle(), vec![doc! { "_id": 1 }]);
        })
    };
    let event = stream.next(&soon()).unwrap().unwrap();
    assert_eq!(op(&event), "insert");
    writer.join().unwrap();
}

#[test]
fn next_honors_deadline() {
    let engine = memory_engine();
    let mut stream = watch(&engine, Scope::Cluster);
    let ctx = Context::background().with_timeout(Duration::from_millis(30));
    assert!(matches!(stream.next(&ctx), Err(EngineError::Canceled)));
}

#[test]
fn next_fails_after_close() {
    let engine = memory_engine();
    let mut stream = watch(&engine, Scope::Cluster);
    engine.close();
    assert!(matches!(stream.next(&soon()), Err(EngineError::Closed)));
    assert!(matches!(
        engine.watch(Scope::Cluster, StreamOptions::default()),
        Err(EngineError::Closed)
    ));
}
