//! # taskboard
//!
//! Task-management REST backend with realtime change notification.
//!
//! - **Store adapter** ([`store`]): CRUD over the `users` and `tasks`
//!   document collections behind the [`store::DocumentStore`] trait, with a
//!   MongoDB backend for production and an in-memory backend for tests.
//! - **Services** ([`service`]): input validation plus the actual
//!   operations, upsert-on-login and task CRUD.
//! - **Bridge** ([`bridge`]): background subscription on the store's task
//!   mutation feed, fanning every observed change out to connected clients.
//! - **Realtime hub** ([`realtime`]): the subscriber registry the bridge
//!   publishes to.
//! - **Transport** ([`server`]): the axum router. JSON in/out, one
//!   error-to-status mapping, and the `/ws` relay. No business logic.
//!
//! The binary (`src/main.rs`) wires these together from environment
//! configuration ([`config`]) and owns process lifecycle.

pub mod bridge;
pub mod config;
pub mod error;
pub mod realtime;
pub mod server;
pub mod service;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
