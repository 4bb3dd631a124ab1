//! HTTP and WebSocket transport.
//!
//! The transport's whole job is to (de)serialize JSON bodies, map service
//! results and typed failures onto HTTP statuses in one place
//! ([`ApiError`]), and relay hub events to open sockets. No business logic
//! lives here.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Error;
use crate::realtime::{ChannelEvent, Hub};
use crate::service::{TaskService, UserService};
use crate::types::{NewTask, Task, TaskChanges};

/// Greeting pushed once per realtime connection.
const WELCOME_MESSAGE: &str = "connected to task updates";

/// Shared handles the handlers work with.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub tasks: Arc<TaskService>,
    pub hub: Arc<Hub>,
}

/// Build the application router. The `/ws` endpoint is only mounted when
/// realtime is enabled.
pub fn router(state: AppState, realtime: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/users", post(record_login))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{id}", put(update_task).delete(delete_task));
    if realtime {
        router = router.route("/ws", get(ws_upgrade));
    }
    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Service failure carried to the single error-to-status mapping.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, message) = if err.is_validation() {
            (StatusCode::BAD_REQUEST, err.to_string())
        } else if err.is_not_found() {
            (StatusCode::NOT_FOUND, err.to_string())
        } else {
            // Detail stays in the logs; the client gets a generic body.
            tracing::error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn root() -> &'static str {
    "taskboard backend is running"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[serde(default, alias = "uid", alias = "userId")]
    external_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

async fn record_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .users
        .record_login(
            body.external_id.as_deref(),
            body.email.as_deref(),
            body.display_name.as_deref(),
        )
        .await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "created": outcome.created,
            "message": "User stored successfully",
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default, alias = "timestamp")]
    created_at: Option<DateTime<Utc>>,
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Response, ApiError> {
    let id = state
        .tasks
        .create(NewTask {
            title: body.title,
            description: body.description,
            category: body.category,
            owner_id: body.owner_id,
            created_at: body.created_at,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "taskId": id })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksQuery {
    #[serde(default, alias = "owner")]
    owner_id: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.tasks.list_all(query.owner_id.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .tasks
        .update(
            &id,
            TaskChanges {
                title: body.title,
                description: body.description,
                category: body.category,
            },
        )
        .await?;
    Ok(Json(
        json!({ "success": true, "message": "Task updated successfully" }),
    ))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tasks.delete(&id).await?;
    Ok(Json(
        json!({ "success": true, "message": "Task deleted successfully" }),
    ))
}

async fn ws_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    upgrade.on_upgrade(move |socket| client_session(socket, hub))
}

/// One realtime client: register with the hub, greet, then relay hub events
/// until either side goes away. Inbound frames carry no protocol and are
/// drained.
async fn client_session(mut socket: WebSocket, hub: Arc<Hub>) {
    let (id, mut events) = hub.register();
    let welcome = ChannelEvent::Welcome(WELCOME_MESSAGE.to_string());
    if send_event(&mut socket, &welcome).await.is_err() {
        hub.unregister(id);
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(connection_id = id, error = %err, "websocket receive failed");
                    break;
                }
            },
        }
    }
    hub.unregister(id);
}

async fn send_event(socket: &mut WebSocket, event: &ChannelEvent) -> Result<(), axum::Error> {
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode realtime frame");
            return Ok(());
        }
    };
    socket.send(Message::Text(frame.into())).await
}
