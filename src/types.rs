//! Domain records and service input shapes.
//!
//! Wire field names are camelCase, matching the JSON contract the HTTP and
//! realtime surfaces expose. Timestamps are RFC 3339 UTC. Record ids are
//! opaque strings assigned by the store backend on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user, upserted on every login.
///
/// At most one record exists per `external_id` (the identity-provider key).
/// `created_at` is set on first login and never touched again; `last_login`
/// advances on every login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Store-assigned record id.
    pub id: String,
    /// Unique key supplied by the external identity provider.
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Result of [`recordLogin`](crate::service::UserService::record_login):
/// the record as stored, plus whether this login created it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    /// True when no user with this `external_id` existed before.
    pub created: bool,
    /// The record after the write.
    pub user: User,
}

/// A task as stored and as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Store-assigned id, immutable for the record's lifetime.
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Optional association to the owning user's `external_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set on the first successful update, absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input to task creation. Title, description and category are required
/// non-empty; the service rejects anything else before touching the store.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub owner_id: Option<String>,
    /// Caller-supplied creation timestamp; the service stamps `now` when absent.
    pub created_at: Option<DateTime<Utc>>,
}

/// The mutable fields of a task. All three are required non-empty on update.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_serializes_camel_case() {
        let task = Task {
            id: "abc123".into(),
            title: "t".into(),
            description: "d".into(),
            category: "c".into(),
            owner_id: Some("owner-1".into()),
            created_at: "2026-01-02T03:04:05Z".parse().unwrap(),
            updated_at: None,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["ownerId"], "owner-1");
        assert_eq!(json["createdAt"], "2026-01-02T03:04:05Z");
        // updatedAt absent until the first update
        assert!(json.get("updatedAt").is_none());
    }

    #[test]
    fn task_deserializes_without_optional_fields() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "title": "t",
            "description": "d",
            "category": "c",
            "createdAt": "2026-01-02T03:04:05Z"
        }))
        .unwrap();
        assert_eq!(task.owner_id, None);
        assert_eq!(task.updated_at, None);
    }

    #[test]
    fn user_round_trips() {
        let user = User {
            id: "u1".into(),
            external_id: "ext-1".into(),
            email: "a@b.c".into(),
            display_name: "Ada".into(),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            last_login: "2026-01-02T00:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["externalId"], "ext-1");
        assert_eq!(json["displayName"], "Ada");
        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }
}
