//! Persistent store adapter.
//!
//! [`DocumentStore`] is the seam between the services and whatever holds the
//! documents. Two backends implement it: [`MongoStore`] for production and
//! [`MemoryStore`] as the injected double for tests and ephemeral runs.
//!
//! Documents are plain JSON objects with a reserved string field `id` that
//! the backend assigns on insert. Filters are exact-match only; nothing in
//! this system queries beyond equality on a field.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

/// A stored document: a JSON object keyed by wire field names.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// The two logical collections this system persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Tasks,
}

impl Collection {
    /// Collection name as known to the store.
    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Tasks => "tasks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A backend-validated document identifier.
///
/// Obtained from [`DocumentStore::insert`] or [`DocumentStore::parse_id`];
/// the inner string is the id in its wire form (`ObjectId` hex for Mongo,
/// UUID for the memory store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId(String);

impl DocumentId {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The id as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exact-match filter over document fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    /// Matches every document in the collection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches documents whose `field` equals `value`.
    pub fn by(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            conditions: vec![(field.into(), value.into())],
        }
    }

    pub(crate) fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }
}

/// Kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// Opaque position marker for re-entering a change feed after interruption.
#[derive(Debug, Clone)]
pub enum ResumeToken {
    /// Memory-store sequence number.
    Sequence(u64),
    /// MongoDB change-stream token.
    ChangeStream(mongodb::change_stream::event::ResumeToken),
}

/// One observed mutation of a collection.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    /// Id of the affected document, in wire form.
    pub document_id: String,
    /// Current full state of the document. Present for inserts; present for
    /// updates when the store could look the post-image up; absent for
    /// deletes.
    pub full_document: Option<JsonObject>,
    /// Token to resume the feed from just after this event.
    pub resume_token: Option<ResumeToken>,
}

/// Stream of change events for one collection.
pub type ChangeFeed = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;

/// Contract between the services/bridge and the document store.
///
/// All operations are async and single-document; there is no cross-document
/// atomicity. Backends own their timeouts: an operation that cannot reach the
/// store must fail with a retryable error rather than hang.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, returning the generated id. Any `id` field already
    /// present in `document` is ignored.
    async fn insert(&self, collection: Collection, document: JsonObject) -> Result<DocumentId>;

    /// First document matching `filter`, in store order.
    async fn find_one(&self, collection: Collection, filter: Filter) -> Result<Option<JsonObject>>;

    /// All documents matching `filter`, in store order.
    async fn find_many(&self, collection: Collection, filter: Filter) -> Result<Vec<JsonObject>>;

    /// Set the fields in `patch` on the document with `id`. Returns the
    /// number of documents matched (0 or 1).
    async fn update_one(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: JsonObject,
    ) -> Result<u64>;

    /// Delete the document with `id`. Returns the number deleted (0 or 1).
    async fn delete_one(&self, collection: Collection, id: &DocumentId) -> Result<u64>;

    /// Validate a raw identifier against the backend's native id syntax.
    ///
    /// Failure is a validation error (the id could never address anything),
    /// distinct from the not-found produced when a well-formed id matches no
    /// document. `entity` names the record kind for the error message.
    fn parse_id(&self, entity: &'static str, raw: &str) -> Result<DocumentId>;

    /// Subscribe to the collection's mutation feed, optionally resuming from
    /// a previously observed token.
    async fn watch(&self, collection: Collection, resume: Option<ResumeToken>)
        -> Result<ChangeFeed>;
}
