//! User upsert-on-login.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::store::{Collection, DocumentId, DocumentStore, Filter};
use crate::types::{LoginOutcome, User};

use super::require;

/// Records logins reported by the identity provider, keeping at most one
/// user record per external id.
pub struct UserService {
    store: Arc<dyn DocumentStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Upsert a user by external id.
    ///
    /// First login inserts the record with `createdAt = lastLogin = now`;
    /// every later login updates email, display name and `lastLogin`,
    /// leaving `createdAt` untouched. Exactly one write either way. The
    /// outcome tells the caller whether this login created the record.
    ///
    /// # Errors
    ///
    /// Validation error when any of the three inputs is missing or empty;
    /// store errors pass through.
    pub async fn record_login(
        &self,
        external_id: Option<&str>,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<LoginOutcome> {
        let external_id = require("externalId", external_id)?;
        let email = require("email", email)?;
        let display_name = require("displayName", display_name)?;

        let existing = self
            .store
            .find_one(Collection::Users, Filter::by("externalId", external_id))
            .await
            .map_err(|err| {
                tracing::error!(external_id, error = %err, "user lookup failed");
                err
            })?;
        let now = Utc::now();

        match existing {
            None => {
                let document = json!({
                    "externalId": external_id,
                    "email": email,
                    "displayName": display_name,
                    "createdAt": now,
                    "lastLogin": now,
                });
                let Value::Object(document) = document else {
                    unreachable!("json! object literal")
                };
                let id = self
                    .store
                    .insert(Collection::Users, document)
                    .await
                    .map_err(|err| {
                        tracing::error!(external_id, error = %err, "user insert failed");
                        err
                    })?;
                tracing::info!(external_id, user_id = %id, "user created on first login");
                Ok(LoginOutcome {
                    created: true,
                    user: User {
                        id: id.to_string(),
                        external_id: external_id.to_string(),
                        email: email.to_string(),
                        display_name: display_name.to_string(),
                        created_at: now,
                        last_login: now,
                    },
                })
            }
            Some(document) => {
                let user: User = serde_json::from_value(Value::Object(document))
                    .map_err(|err| Error::Serialization(err.to_string()))?;
                let patch = json!({
                    "email": email,
                    "displayName": display_name,
                    "lastLogin": now,
                });
                let Value::Object(patch) = patch else {
                    unreachable!("json! object literal")
                };
                let id = DocumentId::new(user.id.clone());
                let matched = self
                    .store
                    .update_one(Collection::Users, &id, patch)
                    .await
                    .map_err(|err| {
                        tracing::error!(external_id, error = %err, "user update failed");
                        err
                    })?;
                if matched == 0 {
                    // Record vanished between lookup and write; nothing to
                    // converge onto.
                    tracing::warn!(external_id, "user disappeared during login upsert");
                }
                tracing::debug!(external_id, "login recorded for existing user");
                Ok(LoginOutcome {
                    created: false,
                    user: User {
                        email: email.to_string(),
                        display_name: display_name.to_string(),
                        last_login: now,
                        ..user
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn service() -> UserService {
        UserService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn first_login_creates_the_user() {
        let service = service();
        let outcome = service
            .record_login(Some("ext-1"), Some("ada@example.com"), Some("Ada"))
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.user.external_id, "ext-1");
        assert_eq!(outcome.user.created_at, outcome.user.last_login);
    }

    #[tokio::test]
    async fn second_login_updates_without_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let service = UserService::new(store.clone());

        let first = service
            .record_login(Some("ext-1"), Some("ada@example.com"), Some("Ada"))
            .await
            .unwrap();
        let second = service
            .record_login(Some("ext-1"), Some("ada@new.example"), Some("Ada L."))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(second.user.display_name, "Ada L.");
        // createdAt survives from the first login
        assert_eq!(second.user.created_at, first.user.created_at);
        assert!(second.user.last_login >= first.user.last_login);

        let records = store
            .find_many(Collection::Users, Filter::by("externalId", "ext-1"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["displayName"], serde_json::json!("Ada L."));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let service = UserService::new(store.clone());

        for (uid, email, name) in [
            (None, Some("a@b.c"), Some("Ada")),
            (Some("ext-1"), None, Some("Ada")),
            (Some("ext-1"), Some("a@b.c"), Some("")),
        ] {
            let err = service.record_login(uid, email, name).await.unwrap_err();
            assert!(err.is_validation());
        }
        assert!(store
            .find_many(Collection::Users, Filter::all())
            .await
            .unwrap()
            .is_empty());
    }
}
