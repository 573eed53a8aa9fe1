//! # murmur-store
//!
//! Local persistence for a murmur node, backed by SQLite.
//!
//! The crate exposes a `Database` handle that wraps a `rusqlite::Connection`
//! behind a mutex, so one handle can be shared by the relay, sync and ingress
//! tasks, and provides typed CRUD helpers for every domain model.

pub mod database;
pub mod endpoint_stats;
pub mod filestore;
pub mod identity;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
