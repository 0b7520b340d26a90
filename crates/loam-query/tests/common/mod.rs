use bson::{Document, doc};

pub fn people() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "name": "alice", "age": 30, "tags": ["dev", "ops"] },
        doc! { "_id": 2, "name": "bob", "age": 25, "tags": ["dev"] },
        doc! { "_id": 3, "name": "carol", "age": 41, "tags": ["admin"] },
    ]
}
