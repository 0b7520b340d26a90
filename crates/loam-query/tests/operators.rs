mod common;

use bson::{Bson, doc};
use common::*;
use loam_query::*;

#[test]
fn find_like_pipeline() {
    let docs = people();
    let mut hits: Vec<_> = docs
        .iter()
        .filter(|d| matches(d, &doc! { "age": { "$gte": 30 } }).unwrap())
        .collect();
    sort(&mut hits, &doc! { "age": -1 }).unwrap();
    let names: Vec<_> = hits
        .iter()
        .map(|d| project(d, &doc! { "name": 1, "_id": 0 }).unwrap())
        .collect();
    assert_eq!(names, vec![doc! { "name": "carol" }, doc! { "name": "alice" }]);
}

#[test]
fn set_then_get_law() {
    for (path, value) in [
        ("a", Bson::Int32(1)),
        ("b.c.d", Bson::String("x".into())),
        ("tags.1", Bson::Null),
    ] {
        let mut doc = people().remove(0);
        let mut set = doc! {};
        set.insert(path, value.clone());
        apply(&mut doc, &doc! { "$set": set }, false, &[]).unwrap();
        assert_eq!(get(&doc, path).as_deref(), Some(&value), "{path}");
    }
}

#[test]
fn unset_then_get_law() {
    let mut doc = people().remove(0);
    apply(&mut doc, &doc! { "$unset": { "name": 1, "tags.0": 1 } }, false, &[]).unwrap();
    assert_eq!(get(&doc, "name"), None);
    assert_eq!(get(&doc, "tags.0").as_deref(), Some(&Bson::Null));
}

#[test]
fn upsert_base_from_query() {
    let query = doc! { "a": "x", "b": { "$gt": 0 } };
    let mut base = extract(&query).unwrap();
    let changes = apply(&mut base, &doc! { "$set": { "c": 1 } }, true, &[]).unwrap();
    assert_eq!(base, doc! { "a": "x", "c": 1 });
    assert_eq!(changes.updated, doc! { "c": 1 });
    assert!(matches(&base, &doc! { "a": "x" }).unwrap());
}

#[test]
fn distinct_over_people() {
    assert_eq!(
        distinct(&people(), "tags"),
        vec![Bson::from("admin"), Bson::from("dev"), Bson::from("ops")]
    );
}

#[test]
fn compare_is_antisymmetric_over_documents() {
    let docs: Vec<Bson> = people().into_iter().map(Bson::Document).collect();
    for a in &docs {
        for b in &docs {
            assert_eq!(compare(a, b), compare(b, a).reverse());
        }
    }
}
