//! Runs against a live server. Set `DOCLANE_MONGODB_URI` to enable.

#![cfg(feature = "mongodb")]

use bson::{doc, oid::ObjectId};
use doclane::{mongodb::MongoDbStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
struct Note {
    #[serde(flatten)]
    base: BaseDocument,
    title: String,
}

async fn store() -> Option<DocumentStore<MongoDbStore>> {
    let uri = std::env::var("DOCLANE_MONGODB_URI").ok()?;
    let store = DocumentStore::connect(MongoDbStore::builder(&uri).with_app_name("doclane-tests"), "doclane_tests")
        .await
        .unwrap();

    Some(store)
}

#[tokio::test]
async fn crud_round_trip() {
    let Some(store) = store().await else {
        return;
    };
    store.ping().await.unwrap();

    let notes = store.collection(&format!("notes_{}", ObjectId::new()));
    notes
        .create_index(doc! { "title": 1 }, IndexOptions::default().with_unique(true))
        .await
        .unwrap();

    let mut note = Note { title: "first".into(), ..Default::default() };
    let id = notes.insert_one(&mut note).await.unwrap();
    assert_eq!(
        notes.insert_one(&mut Note { title: "first".into(), ..Default::default() }).await.unwrap_err(),
        DocumentStoreError::DuplicateDocument,
    );

    let mut loaded = Note::default();
    notes.get_one_by_id(&id, &mut loaded).await.unwrap();
    assert_eq!(loaded.title, "first");
    assert_eq!(notes.update_one(&mut loaded).await.unwrap_err(), DocumentStoreError::DocumentNotModified);

    let mut batch = vec![
        Note { title: "second".into(), ..Default::default() },
        Note { title: "third".into(), ..Default::default() },
    ];
    assert_eq!(notes.insert_many(&mut batch).await.unwrap().len(), 2);

    let all = notes
        .get_many_by_filter(doc! {}, Note::default, FindOptions::default().with_sort(doc! { "title": 1 }))
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(notes.count_by_filter(doc! {}).await.unwrap(), 3);

    notes.delete_one_by_id(&id).await.unwrap();
    assert_eq!(notes.delete_one_by_id(&id).await.unwrap_err(), DocumentStoreError::DocumentNotFound);

    notes.delete_all().await.unwrap();
    store.shutdown().await.unwrap();
}
