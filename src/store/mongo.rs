//! MongoDB document store.
//!
//! Thin adapter over the official driver: one `Database` handle created at
//! startup and shared for the process lifetime (the driver's `Client` is
//! cheap to clone and safe for concurrent use). Documents cross this module
//! as JSON objects; `_id` is translated to and from the reserved wire field
//! `id` (`ObjectId` hex). The mutation feed is a change stream with
//! `UpdateLookup` post-images, resumable via the stream's native token.

use std::future::IntoFuture;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, FullDocumentType};
use mongodb::{Client, Database};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

use super::{
    ChangeEvent, ChangeFeed, ChangeOperation, Collection, DocumentId, DocumentStore, Filter,
    JsonObject, ResumeToken,
};

/// MongoDB-backed [`DocumentStore`].
pub struct MongoStore {
    db: Database,
    op_timeout: Duration,
}

impl MongoStore {
    /// Build a store handle from configuration.
    ///
    /// The driver connects lazily; this fails only on an unusable connection
    /// string. Use [`ping`](Self::ping) to verify reachability at startup.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|err| Error::Config(format!("bad MongoDB URI: {err}")))?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.server_selection_timeout = Some(config.op_timeout);
        let client =
            Client::with_options(options).map_err(|err| Error::Config(err.to_string()))?;
        Ok(Self {
            db: client.database(&config.database),
            op_timeout: config.op_timeout,
        })
    }

    /// Round-trip to the server to verify the connection.
    pub async fn ping(&self) -> Result<()> {
        self.with_timeout(self.db.run_command(doc! { "ping": 1 }))
            .await?;
        Ok(())
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<Document> {
        self.db.collection::<Document>(collection.name())
    }

    /// Bound a driver call so an unreachable store surfaces as a retryable
    /// fault instead of hanging the request. Accepts the driver's lazy
    /// action builders as well as plain futures.
    async fn with_timeout<T>(
        &self,
        op: impl IntoFuture<Output = mongodb::error::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(map_driver_error),
            Err(_) => Err(Error::store_unavailable(format!(
                "store operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert(&self, collection: Collection, document: JsonObject) -> Result<DocumentId> {
        let doc = json_to_document(document)?;
        let coll = self.collection(collection);
        let result = self.with_timeout(coll.insert_one(doc)).await?;
        match result.inserted_id {
            Bson::ObjectId(oid) => Ok(DocumentId::new(oid.to_hex())),
            other => Err(Error::store(format!(
                "store generated a non-ObjectId id: {other}"
            ))),
        }
    }

    async fn find_one(&self, collection: Collection, filter: Filter) -> Result<Option<JsonObject>> {
        let query = filter_to_document(&filter);
        let coll = self.collection(collection);
        let found = self.with_timeout(coll.find_one(query)).await?;
        found.map(document_to_json).transpose()
    }

    async fn find_many(&self, collection: Collection, filter: Filter) -> Result<Vec<JsonObject>> {
        let query = filter_to_document(&filter);
        let coll = self.collection(collection);
        let docs: Vec<Document> = self
            .with_timeout(async move { coll.find(query).await?.try_collect().await })
            .await?;
        docs.into_iter().map(document_to_json).collect()
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: JsonObject,
    ) -> Result<u64> {
        let oid = object_id(id)?;
        let set = json_to_document(patch)?;
        let coll = self.collection(collection);
        let result = self
            .with_timeout(coll.update_one(doc! { "_id": oid }, doc! { "$set": set }))
            .await?;
        Ok(result.matched_count)
    }

    async fn delete_one(&self, collection: Collection, id: &DocumentId) -> Result<u64> {
        let oid = object_id(id)?;
        let coll = self.collection(collection);
        let result = self
            .with_timeout(coll.delete_one(doc! { "_id": oid }))
            .await?;
        Ok(result.deleted_count)
    }

    fn parse_id(&self, entity: &'static str, raw: &str) -> Result<DocumentId> {
        ObjectId::parse_str(raw)
            .map(|oid| DocumentId::new(oid.to_hex()))
            .map_err(|_| Error::invalid_id(entity, raw))
    }

    async fn watch(
        &self,
        collection: Collection,
        resume: Option<ResumeToken>,
    ) -> Result<ChangeFeed> {
        let coll = self.collection(collection);
        let mut action = coll.watch().full_document(FullDocumentType::UpdateLookup);
        match resume {
            None => {}
            Some(ResumeToken::ChangeStream(token)) => {
                action = action.resume_after(token);
            }
            Some(ResumeToken::Sequence(_)) => {
                return Err(Error::store(
                    "sequence resume token offered to the MongoDB store",
                ))
            }
        }
        let stream = self.with_timeout(action).await?;
        let feed = stream.filter_map(|item| futures::future::ready(map_change_event(item)));
        Ok(Box::pin(feed))
    }
}

fn object_id(id: &DocumentId) -> Result<ObjectId> {
    // Ids reaching this point came from `insert` or `parse_id`.
    ObjectId::parse_str(id.as_str())
        .map_err(|_| Error::internal(format!("non-ObjectId document id: {id}")))
}

fn filter_to_document(filter: &Filter) -> Document {
    let mut query = Document::new();
    for (field, value) in filter.conditions() {
        query.insert(field.clone(), value.clone());
    }
    query
}

/// JSON object (without its reserved `id` field) to a BSON document.
fn json_to_document(mut document: JsonObject) -> Result<Document> {
    document.remove("id");
    mongodb::bson::to_document(&Value::Object(document))
        .map_err(|err| Error::Serialization(err.to_string()))
}

/// BSON document to the wire shape: `_id` becomes the string field `id`.
fn document_to_json(mut doc: Document) -> Result<JsonObject> {
    let id = match doc.remove("_id") {
        Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
        Some(Bson::String(raw)) => Some(raw),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let mut object = match serde_json::to_value(&doc)? {
        Value::Object(object) => object,
        other => {
            return Err(Error::Serialization(format!(
                "document serialized to a non-object: {other}"
            )))
        }
    };
    if let Some(id) = id {
        object.insert("id".to_string(), Value::String(id));
    }
    Ok(object)
}

fn map_change_event(
    item: mongodb::error::Result<ChangeStreamEvent<Document>>,
) -> Option<Result<ChangeEvent>> {
    let event = match item {
        Ok(event) => event,
        Err(err) => return Some(Err(map_driver_error(err))),
    };
    let operation = match event.operation_type {
        OperationType::Insert => ChangeOperation::Insert,
        OperationType::Update | OperationType::Replace => ChangeOperation::Update,
        OperationType::Delete => ChangeOperation::Delete,
        OperationType::Invalidate => {
            return Some(Err(Error::store("change stream invalidated")));
        }
        // Collection-level DDL and anything future; nothing to forward.
        _ => return None,
    };
    let document_id = event
        .document_key
        .as_ref()
        .and_then(|key| key.get_object_id("_id").ok())
        .map(|oid| oid.to_hex())?;
    let full_document = match event.full_document.map(document_to_json).transpose() {
        Ok(doc) => doc,
        Err(err) => return Some(Err(err)),
    };
    Some(Ok(ChangeEvent {
        operation,
        document_id,
        full_document,
        resume_token: Some(ResumeToken::ChangeStream(event.id)),
    }))
}

fn map_driver_error(err: mongodb::error::Error) -> Error {
    match &*err.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            Error::store_unavailable(err.to_string())
        }
        _ => Error::store(err.to_string()),
    }
}
