//! Database layer for marksync

mod connection;
mod migrations;
mod object_map;
mod prefs_repository;

pub use connection::Database;
pub use object_map::{generate_object_id, ObjectKind, ObjectMap, SqliteObjectMap, SyncMetadata};
pub use prefs_repository::{PrefsRepository, SqlitePrefsRepository};
