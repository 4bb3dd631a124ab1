//! Task CRUD.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::store::{Collection, DocumentStore, Filter};
use crate::types::{NewTask, Task, TaskChanges};

use super::require;

/// CRUD over the `tasks` collection. Each operation is one store
/// interaction; nothing is cached between requests.
pub struct TaskService {
    store: Arc<dyn DocumentStore>,
}

impl TaskService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a task, returning the generated id.
    ///
    /// Title, description and category must be present and non-empty.
    /// `created_at` defaults to now when the caller supplies none.
    pub async fn create(&self, input: NewTask) -> Result<String> {
        let title = require("title", input.title.as_deref())?;
        let description = require("description", input.description.as_deref())?;
        let category = require("category", input.category.as_deref())?;
        let created_at = input.created_at.unwrap_or_else(Utc::now);

        let mut document = json!({
            "title": title,
            "description": description,
            "category": category,
            "createdAt": created_at,
        });
        if let Some(owner) = input.owner_id.as_deref().filter(|o| !o.is_empty()) {
            document["ownerId"] = json!(owner);
        }
        let Value::Object(document) = document else {
            unreachable!("json! object literal")
        };

        let id = self
            .store
            .insert(Collection::Tasks, document)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "task insert failed");
                err
            })?;
        tracing::debug!(task_id = %id, "task created");
        Ok(id.to_string())
    }

    /// List tasks, optionally scoped to one owner. Store order, no
    /// pagination.
    pub async fn list_all(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        let filter = match owner {
            Some(owner) => Filter::by("ownerId", owner),
            None => Filter::all(),
        };
        let documents = self
            .store
            .find_many(Collection::Tasks, filter)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "task listing failed");
                err
            })?;
        documents
            .into_iter()
            .map(|document| {
                serde_json::from_value(Value::Object(document))
                    .map_err(|err| Error::Serialization(err.to_string()))
            })
            .collect()
    }

    /// Replace the three mutable fields of a task and stamp `updatedAt`.
    ///
    /// # Errors
    ///
    /// Validation error when a field is missing/empty or the id is not a
    /// well-formed store id; not-found when the id matches nothing.
    pub async fn update(&self, id: &str, changes: TaskChanges) -> Result<()> {
        let title = require("title", changes.title.as_deref())?;
        let description = require("description", changes.description.as_deref())?;
        let category = require("category", changes.category.as_deref())?;
        let task_id = self.store.parse_id("task", id)?;

        let patch = json!({
            "title": title,
            "description": description,
            "category": category,
            "updatedAt": Utc::now(),
        });
        let Value::Object(patch) = patch else {
            unreachable!("json! object literal")
        };

        let matched = self
            .store
            .update_one(Collection::Tasks, &task_id, patch)
            .await
            .map_err(|err| {
                tracing::error!(task_id = %task_id, error = %err, "task update failed");
                err
            })?;
        if matched == 0 {
            return Err(Error::not_found("task", id));
        }
        tracing::debug!(task_id = %task_id, "task updated");
        Ok(())
    }

    /// Delete a task.
    ///
    /// # Errors
    ///
    /// Validation error for a malformed id; not-found when nothing was
    /// deleted.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let task_id = self.store.parse_id("task", id)?;
        let deleted = self
            .store
            .delete_one(Collection::Tasks, &task_id)
            .await
            .map_err(|err| {
                tracing::error!(task_id = %task_id, error = %err, "task delete failed");
                err
            })?;
        if deleted == 0 {
            return Err(Error::not_found("task", id));
        }
        tracing::debug!(task_id = %task_id, "task deleted");
        Ok(())
    }
}
