//! In-process document store.
//!
//! Backs tests and ephemeral runs with the same contract as the MongoDB
//! adapter: documents live in per-collection vectors (insertion order is
//! listing order), ids are UUIDs, and every mutation is published to a
//! bounded change log so [`watch`](super::DocumentStore::watch) can replay
//! from a sequence-number resume token.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{
    ChangeEvent, ChangeFeed, ChangeOperation, Collection, DocumentId, DocumentStore, Filter,
    JsonObject, ResumeToken,
};

/// How many past events each collection's change log retains for resume.
const REPLAY_CAPACITY: usize = 256;

/// Broadcast buffer per live subscriber before it counts as lagged.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct SequencedEvent {
    seq: u64,
    event: ChangeEvent,
}

struct LogInner {
    next_seq: u64,
    history: VecDeque<SequencedEvent>,
}

/// Mutation log for one collection: a broadcast channel for live delivery
/// plus a bounded history for resume.
struct ChangeLog {
    tx: broadcast::Sender<SequencedEvent>,
    inner: Mutex<LogInner>,
}

impl ChangeLog {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tx,
            inner: Mutex::new(LogInner {
                next_seq: 1,
                history: VecDeque::new(),
            }),
        }
    }

    /// Assign the next sequence number, record the event, and broadcast it.
    /// The lock is held across the send so subscribers observe sequence
    /// numbers in order.
    fn publish(
        &self,
        operation: ChangeOperation,
        document_id: String,
        full_document: Option<JsonObject>,
    ) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let event = SequencedEvent {
            seq,
            event: ChangeEvent {
                operation,
                document_id,
                full_document,
                resume_token: Some(ResumeToken::Sequence(seq)),
            },
        };
        if inner.history.len() == REPLAY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());
        let _ = self.tx.send(event);
    }

    fn subscribe(&self, resume_after: Option<u64>) -> ChangeFeed {
        // Subscribe before snapshotting the history so no event can fall
        // between the two; the monotonic filter below drops duplicates.
        let rx = self.tx.subscribe();
        let replayed: Vec<SequencedEvent> = {
            let inner = self.inner.lock();
            match resume_after {
                Some(after) => inner
                    .history
                    .iter()
                    .filter(|ev| ev.seq > after)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        let mut last_seen = replayed
            .last()
            .map(|ev| ev.seq)
            .or(resume_after)
            .unwrap_or(0);

        let live = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(ev) if ev.seq <= last_seen => None,
            Ok(ev) => {
                last_seen = ev.seq;
                Some(Ok(ev.event))
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(Error::store(format!(
                "change feed lagged by {missed} events"
            )))),
        });
        let replay = tokio_stream::iter(replayed.into_iter().map(|ev| Ok(ev.event)));
        Box::pin(replay.chain(live))
    }
}

struct StoredDoc {
    id: String,
    body: JsonObject,
}

impl StoredDoc {
    fn matches(&self, filter: &Filter) -> bool {
        filter
            .conditions()
            .iter()
            .all(|(field, value)| self.body.get(field).and_then(Value::as_str) == Some(value))
    }

    /// The document as served: body plus the reserved `id` field.
    fn to_document(&self) -> JsonObject {
        let mut doc = self.body.clone();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        doc
    }
}

/// In-memory [`DocumentStore`] backend.
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<StoredDoc>>>,
    logs: HashMap<Collection, ChangeLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut logs = HashMap::new();
        logs.insert(Collection::Users, ChangeLog::new());
        logs.insert(Collection::Tasks, ChangeLog::new());
        Self {
            collections: RwLock::new(HashMap::new()),
            logs,
        }
    }

    fn log(&self, collection: Collection) -> &ChangeLog {
        // Both collections are seeded in `new`.
        &self.logs[&collection]
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: Collection, mut document: JsonObject) -> Result<DocumentId> {
        document.remove("id");
        let id = Uuid::new_v4().to_string();
        let doc = StoredDoc {
            id: id.clone(),
            body: document,
        };
        let full = doc.to_document();
        self.collections
            .write()
            .entry(collection)
            .or_default()
            .push(doc);
        self.log(collection)
            .publish(ChangeOperation::Insert, id.clone(), Some(full));
        Ok(DocumentId::new(id))
    }

    async fn find_one(&self, collection: Collection, filter: Filter) -> Result<Option<JsonObject>> {
        let collections = self.collections.read();
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|doc| doc.matches(&filter)))
            .map(StoredDoc::to_document))
    }

    async fn find_many(&self, collection: Collection, filter: Filter) -> Result<Vec<JsonObject>> {
        let collections = self.collections.read();
        Ok(collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| doc.matches(&filter))
                    .map(StoredDoc::to_document)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: JsonObject,
    ) -> Result<u64> {
        let post_image = {
            let mut collections = self.collections.write();
            let Some(doc) = collections
                .get_mut(&collection)
                .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id.as_str()))
            else {
                return Ok(0);
            };
            for (field, value) in patch {
                doc.body.insert(field, value);
            }
            doc.to_document()
        };
        self.log(collection).publish(
            ChangeOperation::Update,
            id.as_str().to_string(),
            Some(post_image),
        );
        Ok(1)
    }

    async fn delete_one(&self, collection: Collection, id: &DocumentId) -> Result<u64> {
        let deleted = {
            let mut collections = self.collections.write();
            match collections.get_mut(&collection) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|doc| doc.id != id.as_str());
                    before - docs.len()
                }
                None => 0,
            }
        };
        if deleted > 0 {
            self.log(collection)
                .publish(ChangeOperation::Delete, id.as_str().to_string(), None);
        }
        Ok(deleted as u64)
    }

    fn parse_id(&self, entity: &'static str, raw: &str) -> Result<DocumentId> {
        Uuid::parse_str(raw)
            .map(|_| DocumentId::new(raw))
            .map_err(|_| Error::invalid_id(entity, raw))
    }

    async fn watch(
        &self,
        collection: Collection,
        resume: Option<ResumeToken>,
    ) -> Result<ChangeFeed> {
        let resume_after = match resume {
            None => None,
            Some(ResumeToken::Sequence(seq)) => Some(seq),
            Some(ResumeToken::ChangeStream(_)) => {
                return Err(Error::store(
                    "change-stream resume token offered to the memory store",
                ))
            }
        };
        Ok(self.log(collection).subscribe(resume_after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> JsonObject {
        value.as_object().expect("test document is an object").clone()
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let store = MemoryStore::new();
        let id = store
            .insert(Collection::Tasks, doc(json!({"title": "t", "category": "c"})))
            .await
            .unwrap();

        let found = store
            .find_one(Collection::Tasks, Filter::by("title", "t"))
            .await
            .unwrap()
            .expect("document is present");
        assert_eq!(found["id"], json!(id.as_str()));
        assert_eq!(found["category"], json!("c"));
    }

    #[tokio::test]
    async fn find_many_honors_exact_match_filter() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Tasks, doc(json!({"title": "a", "ownerId": "A"})))
            .await
            .unwrap();
        store
            .insert(Collection::Tasks, doc(json!({"title": "b", "ownerId": "B"})))
            .await
            .unwrap();
        store
            .insert(Collection::Tasks, doc(json!({"title": "c", "ownerId": "A"})))
            .await
            .unwrap();

        let all = store
            .find_many(Collection::Tasks, Filter::all())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        // insertion order is listing order
        assert_eq!(all[0]["title"], json!("a"));
        assert_eq!(all[2]["title"], json!("c"));

        let owned = store
            .find_many(Collection::Tasks, Filter::by("ownerId", "A"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|d| d["ownerId"] == json!("A")));
    }

    #[tokio::test]
    async fn update_one_patches_and_reports_matches() {
        let store = MemoryStore::new();
        let id = store
            .insert(Collection::Tasks, doc(json!({"title": "old", "category": "c"})))
            .await
            .unwrap();

        let matched = store
            .update_one(Collection::Tasks, &id, doc(json!({"title": "new"})))
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let found = store
            .find_one(Collection::Tasks, Filter::by("title", "new"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["category"], json!("c"));

        let missing = DocumentId::new(Uuid::new_v4().to_string());
        let matched = store
            .update_one(Collection::Tasks, &missing, doc(json!({"title": "x"})))
            .await
            .unwrap();
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn delete_one_removes_and_reports_counts() {
        let store = MemoryStore::new();
        let id = store
            .insert(Collection::Tasks, doc(json!({"title": "t"})))
            .await
            .unwrap();

        assert_eq!(store.delete_one(Collection::Tasks, &id).await.unwrap(), 1);
        assert_eq!(store.delete_one(Collection::Tasks, &id).await.unwrap(), 0);
        assert!(store
            .find_many(Collection::Tasks, Filter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn parse_id_rejects_non_uuid() {
        let store = MemoryStore::new();
        let err = store.parse_id("task", "definitely-not-a-uuid").unwrap_err();
        assert!(err.is_validation());

        let ok = store.parse_id("task", &Uuid::new_v4().to_string());
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn watch_delivers_live_mutations_in_order() {
        let store = MemoryStore::new();
        let mut feed = store.watch(Collection::Tasks, None).await.unwrap();

        let id = store
            .insert(Collection::Tasks, doc(json!({"title": "t"})))
            .await
            .unwrap();
        store
            .update_one(Collection::Tasks, &id, doc(json!({"title": "t2"})))
            .await
            .unwrap();
        store.delete_one(Collection::Tasks, &id).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.operation, ChangeOperation::Insert);
        assert_eq!(first.document_id, id.as_str());
        assert_eq!(first.full_document.unwrap()["title"], json!("t"));

        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.operation, ChangeOperation::Update);
        assert_eq!(second.full_document.unwrap()["title"], json!("t2"));

        let third = feed.next().await.unwrap().unwrap();
        assert_eq!(third.operation, ChangeOperation::Delete);
        assert!(third.full_document.is_none());
    }

    #[tokio::test]
    async fn watch_without_token_sees_no_history() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Tasks, doc(json!({"title": "before"})))
            .await
            .unwrap();

        let mut feed = store.watch(Collection::Tasks, None).await.unwrap();
        store
            .insert(Collection::Tasks, doc(json!({"title": "after"})))
            .await
            .unwrap();

        let event = feed.next().await.unwrap().unwrap();
        assert_eq!(event.full_document.unwrap()["title"], json!("after"));
    }

    #[tokio::test]
    async fn watch_resumes_from_token_and_replays_missed_events() {
        let store = MemoryStore::new();
        let mut feed = store.watch(Collection::Tasks, None).await.unwrap();

        store
            .insert(Collection::Tasks, doc(json!({"title": "one"})))
            .await
            .unwrap();
        let seen = feed.next().await.unwrap().unwrap();
        let token = seen.resume_token.clone().expect("events carry tokens");
        drop(feed);

        // Mutations while nothing is subscribed.
        store
            .insert(Collection::Tasks, doc(json!({"title": "two"})))
            .await
            .unwrap();
        store
            .insert(Collection::Tasks, doc(json!({"title": "three"})))
            .await
            .unwrap();

        let mut resumed = store.watch(Collection::Tasks, Some(token)).await.unwrap();
        let replayed = resumed.next().await.unwrap().unwrap();
        assert_eq!(replayed.full_document.unwrap()["title"], json!("two"));
        let replayed = resumed.next().await.unwrap().unwrap();
        assert_eq!(replayed.full_document.unwrap()["title"], json!("three"));

        // And the resumed feed keeps delivering live events.
        store
            .insert(Collection::Tasks, doc(json!({"title": "four"})))
            .await
            .unwrap();
        let live = resumed.next().await.unwrap().unwrap();
        assert_eq!(live.full_document.unwrap()["title"], json!("four"));
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = MemoryStore::new();
        let mut task_feed = store.watch(Collection::Tasks, None).await.unwrap();

        store
            .insert(Collection::Users, doc(json!({"externalId": "u-1"})))
            .await
            .unwrap();
        store
            .insert(Collection::Tasks, doc(json!({"title": "t"})))
            .await
            .unwrap();

        // The first event on the task feed is the task, not the user.
        let event = task_feed.next().await.unwrap().unwrap();
        assert_eq!(event.full_document.unwrap()["title"], json!("t"));
        assert!(store
            .find_many(Collection::Users, Filter::all())
            .await
            .unwrap()
            .len()
            == 1);
    }
}
