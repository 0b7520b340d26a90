use bson::{Document, doc};
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use loam_query::{apply, matches, project, sort};

fn records(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            doc! {
                "_id": i as i64,
                "name": format!("user-{i}"),
                "age": (i % 90) as i32,
                "tags": ["a", if i % 2 == 0 { "even" } else { "odd" }],
                "address": { "city": if i % 3 == 0 { "Oslo" } else { "Lima" }, "zip": i as i32 },
            }
        })
        .collect()
}

// ── Match ───────────────────────────────────────────────────

fn bench_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match");
    let queries = [
        ("equality", doc! { "address.city": "Oslo" }),
        ("range", doc! { "age": { "$gte": 18, "$lt": 65 } }),
        (
            "or",
            doc! { "$or": [{ "tags": "even" }, { "name": { "$regex": "^user-1" } }] },
        ),
    ];
    let docs = records(1_000);
    for (name, query) in queries {
        group.bench_with_input(BenchmarkId::from_parameter(name), &query, |b, query| {
            b.iter(|| docs.iter().filter(|d| matches(d, query).unwrap()).count())
        });
    }
    group.finish();
}

// ── Update ──────────────────────────────────────────────────

fn bench_apply(c: &mut Criterion) {
    let update = doc! {
        "$set": { "address.city": "Rome" },
        "$inc": { "age": 1 },
        "$push": { "tags": { "$each": ["x"], "$slice": -3 } },
    };
    let docs = records(1_000);
    c.bench_function("apply", |b| {
        b.iter_batched(
            || docs.clone(),
            |mut docs| {
                for doc in &mut docs {
                    apply(doc, &update, false, &[]).unwrap();
                }
            },
            BatchSize::LargeInput,
        )
    });
}

// ── Project / Sort ──────────────────────────────────────────

fn bench_project_sort(c: &mut Criterion) {
    let docs = records(1_000);
    let projection = doc! { "name": 1, "address.city": 1 };
    c.bench_function("project", |b| {
        b.iter(|| {
            docs.iter()
                .map(|d| project(d, &projection).unwrap())
                .count()
        })
    });
    c.bench_function("sort", |b| {
        b.iter_batched(
            || docs.clone(),
            |mut docs| sort(&mut docs, &doc! { "age": -1, "name": 1 }).unwrap(),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_match, bench_apply, bench_project_sort);
criterion_main!(benches);
