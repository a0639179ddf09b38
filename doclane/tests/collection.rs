use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bson::{doc, oid::ObjectId};
use chrono::{Duration, TimeZone, Utc};
use doclane::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Document)]
struct Note {
    #[serde(flatten)]
    base: BaseDocument,
    title: String,
    content: String,
}

impl Note {
    fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Keeps its identifier out of the serialized body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
struct Label {
    #[document(base)]
    #[serde(skip)]
    meta: BaseDocument,
    name: String,
}

struct Fixture {
    backend: Arc<InMemoryStore>,
    clock: FrozenClock,
    notes: CollectionStore<InMemoryStore>,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let clock = FrozenClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    let store = DocumentStore::new(InMemoryStore::new(), "doclane").with_clock(Arc::new(clock.clone()));

    Fixture {
        backend: store.backend().clone(),
        clock,
        notes: store.collection("notes"),
    }
}

fn counter(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(HookContext) -> std::future::Ready<DocumentStoreResult<()>> + Send + Sync + 'static {
    let counter = counter.clone();
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

#[tokio::test]
async fn insert_runs_hooks_and_stamps_the_document() {
    let Fixture { clock, mut notes, .. } = fixture();
    let fired = Arc::new(AtomicUsize::new(0));
    notes.add_before_hook(Operation::InsertOne, counter(&fired));
    notes.add_after_hook(Operation::InsertOne, counter(&fired));

    let mut note = Note::new("groceries", "milk");
    let id = notes.insert_one(&mut note).await.unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(id, note.hex_id());
    assert_eq!(note.created_at(), Some(clock.now()));
    assert_eq!(note.updated_at(), Some(clock.now()));

    let mut loaded = Note::default();
    notes.get_one_by_id(&id, &mut loaded).await.unwrap();
    assert_eq!(loaded, note);
}

#[tokio::test]
async fn rejected_insert_leaves_the_collection_untouched() {
    let Fixture { backend, mut notes, .. } = fixture();
    notes.add_before_hook(Operation::InsertOne, |ctx| async move {
        Err(DocumentStoreError::Hook(format!("{} is disabled", ctx.operation)))
    });

    let err = notes.insert_one(&mut Note::new("a", "b")).await.unwrap_err();

    assert_eq!(err, DocumentStoreError::Hook("InsertOne is disabled".into()));
    assert!(backend.documents(notes.namespace()).await.is_empty());
}

#[tokio::test]
async fn update_refreshes_only_updated_at() {
    let Fixture { clock, notes, .. } = fixture();
    let mut note = Note::new("draft", "v1");
    let id = notes.insert_one(&mut note).await.unwrap();
    let created = clock.now();

    clock.advance(Duration::minutes(5));
    note.content = "v2".into();
    notes.update_one(&mut note).await.unwrap();

    let mut loaded = Note::default();
    notes.get_one_by_id(&id, &mut loaded).await.unwrap();
    assert_eq!(loaded.content, "v2");
    assert_eq!(loaded.created_at(), Some(created));
    assert_eq!(loaded.updated_at(), Some(clock.now()));
}

#[tokio::test]
async fn unchanged_update_is_not_modified() {
    let Fixture { notes, .. } = fixture();
    let mut note = Note::new("same", "same");
    notes.insert_one(&mut note).await.unwrap();

    let err = notes.update_one(&mut note).await.unwrap_err();

    assert_eq!(err, DocumentStoreError::DocumentNotModified);
    assert_eq!(err.kind(), ErrorKind::DocumentNotModified);
}

#[tokio::test]
async fn missing_documents_are_not_found() {
    let Fixture { notes, .. } = fixture();
    let missing = ObjectId::new().to_hex();

    let err = notes.get_one_by_id(&missing, &mut Note::default()).await.unwrap_err();
    assert_eq!(err, DocumentStoreError::DocumentNotFound);

    let mut ghost = Note::new("ghost", "");
    ghost.set_hex_id(&missing).unwrap();
    assert_eq!(notes.update_one(&mut ghost).await.unwrap_err(), DocumentStoreError::DocumentNotFound);
}

#[tokio::test]
async fn malformed_ids_are_rejected() {
    let Fixture { notes, .. } = fixture();

    let err = notes.get_one_by_id("123", &mut Note::default()).await.unwrap_err();
    assert_eq!(err, DocumentStoreError::InvalidIdentifier("123".into()));
    assert_eq!(notes.delete_one_by_id("xyz").await.unwrap_err().kind(), ErrorKind::InvalidIdentifier);
    assert_eq!(
        notes
            .replace_one_by_id("not-an-id", &mut Note::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidIdentifier,
    );
}

#[tokio::test]
async fn batch_reads_writes_and_counts() {
    let Fixture { backend, notes, .. } = fixture();
    let mut batch = vec![Note::new("a", "x"), Note::new("b", "x"), Note::new("c", "y")];

    let ids = notes.insert_many(&mut batch).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(batch.iter().zip(&ids).all(|(note, id)| &note.hex_id() == id));

    let outcome = notes
        .update_many(doc! {}, doc! { "$set": { "content": "y" } })
        .await
        .unwrap();
    assert_eq!((outcome.matched_count, outcome.modified_count), (3, 2));

    let mut found = Vec::<Note>::new();
    notes
        .find_all_by_filter(doc! {}, &mut found, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
    assert!(found.iter().all(|note| note.content == "y" && note.hex_id() != "000000000000000000000000"));

    let sorted = notes
        .get_many_by_filter(
            FilterBuilder::new().in_values("title", ["a", "c"]).build(),
            Note::default,
            FindOptions::default().with_sort(doc! { "title": -1 }),
        )
        .await
        .unwrap();
    assert_eq!(
        sorted.iter().map(|note| note.title.as_str()).collect::<Vec<_>>(),
        vec!["c", "a"],
    );

    assert_eq!(notes.count_by_filter(doc! {}).await.unwrap(), 3);
    assert_eq!(backend.open_cursors(), 0);
}

#[tokio::test]
async fn empty_batches_are_a_no_op() {
    let Fixture { backend, notes, .. } = fixture();

    assert!(notes.insert_many(&mut Vec::<Note>::new()).await.unwrap().is_empty());
    assert!(backend.documents(notes.namespace()).await.is_empty());
}

#[tokio::test]
async fn deletes() {
    let Fixture { notes, .. } = fixture();
    let mut batch = vec![Note::new("tmp", ""), Note::new("tmp", ""), Note::new("keep", "")];
    let ids = notes.insert_many(&mut batch).await.unwrap();

    let deleted = notes
        .delete_many_by_filter(FilterBuilder::new().equal_to("title", "tmp").build())
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    notes.delete_one_by_id(&ids[2]).await.unwrap();
    assert_eq!(notes.delete_one_by_id(&ids[2]).await.unwrap_err(), DocumentStoreError::DocumentNotFound);
    assert_eq!(notes.count_by_filter(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn upsert_creates_then_updates_in_place() {
    let Fixture { notes, .. } = fixture();
    let id = ObjectId::parse_str("555555555555555555555555").unwrap();
    let filter = FilterBuilder::by_id(id).build();

    let mut note = Note::default();
    notes
        .upsert_one(filter.clone(), doc! { "$set": { "title": "first", "content": "" } }, &mut note)
        .await
        .unwrap();
    assert_eq!(note.hex_id(), "555555555555555555555555");
    assert_eq!(note.title, "first");

    notes
        .upsert_one(filter, doc! { "$set": { "title": "second" } }, &mut note)
        .await
        .unwrap();
    assert_eq!(note.title, "second");
    assert_eq!(notes.count_by_filter(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn find_and_update_requires_a_match() {
    let Fixture { notes, .. } = fixture();
    let mut note = Note::new("todo", "open");
    notes.insert_one(&mut note).await.unwrap();

    let mut updated = Note::default();
    notes
        .find_and_update_one(
            FilterBuilder::new().equal_to("title", "todo").build(),
            doc! { "$set": { "content": "done" } },
            &mut updated,
        )
        .await
        .unwrap();
    assert_eq!(updated.id(), note.id());
    assert_eq!(updated.content, "done");

    let err = notes
        .find_and_update_one(
            FilterBuilder::new().equal_to("title", "missing").build(),
            doc! { "$set": { "content": "done" } },
            &mut Note::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, DocumentStoreError::DocumentNotFound);
}

#[tokio::test]
async fn unique_indexes_surface_duplicates() {
    let Fixture { notes, .. } = fixture();
    let name = notes
        .create_index(doc! { "title": 1 }, IndexOptions::default().with_unique(true))
        .await
        .unwrap();
    assert_eq!(name, "title_1");

    notes.insert_one(&mut Note::new("only", "")).await.unwrap();
    let err = notes.insert_one(&mut Note::new("only", "")).await.unwrap_err();

    assert_eq!(err, DocumentStoreError::DuplicateDocument);
    assert_eq!(err.kind(), ErrorKind::DuplicateDocument);
}

#[tokio::test]
async fn replace_by_id_keeps_the_identifier() {
    let Fixture { clock, mut notes, .. } = fixture();
    let fired = Arc::new(AtomicUsize::new(0));
    notes.add_before_hook(Operation::ReplaceOne, counter(&fired));

    let id = notes.insert_one(&mut Note::new("old", "old")).await.unwrap();
    clock.advance(Duration::seconds(30));

    let mut replacement = Note::new("new", "new");
    let outcome = notes.replace_one_by_id(&id, &mut replacement).await.unwrap();
    assert_eq!((outcome.matched_count, outcome.modified_count), (1, 1));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let mut loaded = Note::default();
    notes.get_one_by_id(&id, &mut loaded).await.unwrap();
    assert_eq!(loaded.title, "new");
    assert_eq!(loaded.updated_at(), Some(clock.now()));
}

#[tokio::test]
async fn cursor_errors_are_surfaced_and_the_cursor_closed() {
    let Fixture { backend, notes, .. } = fixture();
    notes.insert_one(&mut Note::new("a", "")).await.unwrap();
    backend.inject_cursor_error("cursor lost").await;

    let err = notes
        .get_many_by_filter(doc! {}, Note::default, FindOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err, DocumentStoreError::driver("cursor lost"));
    assert_eq!(backend.open_cursors(), 0);
}

#[tokio::test]
async fn open_cursors_belong_to_the_caller() {
    let Fixture { backend, notes, .. } = fixture();
    notes.insert_one(&mut Note::new("a", "")).await.unwrap();

    let mut cursor = notes.find_many_by_filter(doc! {}, FindOptions::default()).await.unwrap();
    assert_eq!(backend.open_cursors(), 1);

    assert!(cursor.advance().await.unwrap());
    assert_eq!(cursor.current().unwrap().get_str("title").unwrap(), "a");
    cursor.close().await.unwrap();
    assert_eq!(backend.open_cursors(), 0);
}

#[tokio::test]
async fn delete_all_drops_the_collection() {
    let Fixture { notes, .. } = fixture();
    let mut batch = vec![Note::new("a", ""), Note::new("b", "")];
    notes.insert_many(&mut batch).await.unwrap();

    notes.delete_all().await.unwrap();

    assert_eq!(notes.count_by_filter(doc! {}).await.unwrap(), 0);
    notes.delete_all().await.unwrap();
}

#[tokio::test]
async fn ids_are_recovered_from_the_raw_payload() {
    let store = DocumentStore::new(InMemoryStore::new(), "doclane");
    let labels = store.collection("labels");

    let mut label = Label { name: "urgent".into(), ..Default::default() };
    let id = labels.insert_one(&mut label).await.unwrap();
    assert_eq!(label.hex_id(), id);

    let mut loaded = Label::default();
    labels
        .get_one_by_filter(FilterBuilder::new().equal_to("name", "urgent").build(), &mut loaded)
        .await
        .unwrap();
    assert_eq!(loaded.hex_id(), id);

    let many = labels
        .get_many_by_filter(doc! {}, Label::default, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(many.iter().map(Label::hex_id).collect::<Vec<_>>(), vec![id.clone()]);

    let mut all = Vec::<Label>::new();
    labels
        .find_all_by_filter(doc! {}, &mut all, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(all.iter().map(Label::hex_id).collect::<Vec<_>>(), vec![id]);
}
