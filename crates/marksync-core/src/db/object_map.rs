//! Local id to object id mapping with per-node sync bookkeeping

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

/// Namespace for local ids; bookmark and history ids are assigned independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Bookmark,
    History,
}

impl ObjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::History => "history",
        }
    }
}

/// Sync bookkeeping attached to one local node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadata {
    pub object_id: String,
    pub parent_object_id: Option<String>,
    pub order: Option<String>,
    /// Set once the relay confirmed the latest state; `None` means dirty
    pub sync_timestamp: Option<i64>,
    /// When the node was last handed to the relay (Unix ms)
    pub last_send_time: Option<i64>,
    /// Whether any record for this object was ever confirmed
    pub confirmed: bool,
}

impl SyncMetadata {
    pub const fn is_dirty(&self) -> bool {
        self.sync_timestamp.is_none()
    }
}

/// Generate a fresh object id: 16 random bytes in the `"b0, b1, ..."` wire form
pub fn generate_object_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Storage for the local/global identity map.
///
/// Lookups of missing keys return `None` or an empty list; a node that was
/// never synced is a normal state, not an error.
pub trait ObjectMap {
    /// Return the object id for `local_id`, minting and persisting one if needed
    fn get_or_create_object_id(&self, kind: ObjectKind, local_id: &str) -> Result<String>;

    fn get_object_id_by_local_id(&self, kind: ObjectKind, local_id: &str)
        -> Result<Option<String>>;

    fn get_local_id_by_object_id(
        &self,
        kind: ObjectKind,
        object_id: &str,
    ) -> Result<Option<String>>;

    fn get(&self, kind: ObjectKind, local_id: &str) -> Result<Option<SyncMetadata>>;

    /// Insert or replace the full metadata row for `local_id`
    fn save_metadata(&self, kind: ObjectKind, local_id: &str, meta: &SyncMetadata) -> Result<()>;

    /// Store `order` for `local_id`, creating the mapping with `object_id` if absent
    fn save_order(
        &self,
        kind: ObjectKind,
        local_id: &str,
        object_id: &str,
        order: &str,
    ) -> Result<()>;

    fn get_order(&self, kind: ObjectKind, local_id: &str) -> Result<Option<String>>;

    /// Clear the sync and last-send timestamps so the node is sent again
    fn mark_dirty(&self, kind: ObjectKind, local_id: &str) -> Result<()>;

    fn mark_sent(&self, kind: ObjectKind, local_id: &str, now: i64) -> Result<()>;

    /// Record relay confirmation at `timestamp`
    fn mark_synced(&self, kind: ObjectKind, local_id: &str, timestamp: i64) -> Result<()>;

    /// Remove the mapping; removing a missing mapping is not an error
    fn delete_by_local_id(&self, kind: ObjectKind, local_id: &str) -> Result<()>;

    /// Every mapping of `kind`, ordered by local id
    fn list(&self, kind: ObjectKind) -> Result<Vec<(String, SyncMetadata)>>;

    /// Drop every mapping of every kind
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of [`ObjectMap`]
pub struct SqliteObjectMap<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteObjectMap<'a> {
    /// Create a new object map over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &Row<'_>) -> rusqlite::Result<SyncMetadata> {
        Ok(SyncMetadata {
            object_id: row.get("object_id")?,
            parent_object_id: row.get("parent_object_id")?,
            order: row.get("ord")?,
            sync_timestamp: row.get("sync_timestamp")?,
            last_send_time: row.get("last_send_time")?,
            confirmed: row.get::<_, i64>("confirmed")? != 0,
        })
    }
}

impl ObjectMap for SqliteObjectMap<'_> {
    fn get_or_create_object_id(&self, kind: ObjectKind, local_id: &str) -> Result<String> {
        if let Some(existing) = self.get_object_id_by_local_id(kind, local_id)? {
            return Ok(existing);
        }

        let object_id = generate_object_id();
        self.conn.execute(
            "INSERT INTO sync_objects (kind, local_id, object_id) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), local_id, object_id],
        )?;
        tracing::debug!(kind = kind.as_str(), local_id, %object_id, "Minted object id");
        Ok(object_id)
    }

    fn get_object_id_by_local_id(
        &self,
        kind: ObjectKind,
        local_id: &str,
    ) -> Result<Option<String>> {
        let object_id = self
            .conn
            .query_row(
                "SELECT object_id FROM sync_objects WHERE kind = ?1 AND local_id = ?2",
                params![kind.as_str(), local_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(object_id)
    }

    fn get_local_id_by_object_id(
        &self,
        kind: ObjectKind,
        object_id: &str,
    ) -> Result<Option<String>> {
        let local_id = self
            .conn
            .query_row(
                "SELECT local_id FROM sync_objects WHERE kind = ?1 AND object_id = ?2",
                params![kind.as_str(), object_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(local_id)
    }

    fn get(&self, kind: ObjectKind, local_id: &str) -> Result<Option<SyncMetadata>> {
        let meta = self
            .conn
            .query_row(
                "SELECT object_id, parent_object_id, ord, sync_timestamp, last_send_time, confirmed
                 FROM sync_objects WHERE kind = ?1 AND local_id = ?2",
                params![kind.as_str(), local_id],
                Self::parse_row,
            )
            .optional()?;
        Ok(meta)
    }

    fn save_metadata(&self, kind: ObjectKind, local_id: &str, meta: &SyncMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_objects
                (kind, local_id, object_id, parent_object_id, ord, sync_timestamp, last_send_time, confirmed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                kind.as_str(),
                local_id,
                meta.object_id,
                meta.parent_object_id,
                meta.order,
                meta.sync_timestamp,
                meta.last_send_time,
                i64::from(meta.confirmed),
            ],
        )?;
        Ok(())
    }

    fn save_order(
        &self,
        kind: ObjectKind,
        local_id: &str,
        object_id: &str,
        order: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_objects (kind, local_id, object_id, ord) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, local_id) DO UPDATE SET ord = excluded.ord",
            params![kind.as_str(), local_id, object_id, order],
        )?;
        Ok(())
    }

    fn get_order(&self, kind: ObjectKind, local_id: &str) -> Result<Option<String>> {
        Ok(self
            .get(kind, local_id)?
            .and_then(|meta| meta.order)
            .filter(|order| !order.is_empty()))
    }

    fn mark_dirty(&self, kind: ObjectKind, local_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_objects SET sync_timestamp = NULL, last_send_time = NULL
             WHERE kind = ?1 AND local_id = ?2",
            params![kind.as_str(), local_id],
        )?;
        Ok(())
    }

    fn mark_sent(&self, kind: ObjectKind, local_id: &str, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_objects SET last_send_time = ?3 WHERE kind = ?1 AND local_id = ?2",
            params![kind.as_str(), local_id, now],
        )?;
        Ok(())
    }

    fn mark_synced(&self, kind: ObjectKind, local_id: &str, timestamp: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_objects SET sync_timestamp = ?3, last_send_time = NULL, confirmed = 1
             WHERE kind = ?1 AND local_id = ?2",
            params![kind.as_str(), local_id, timestamp],
        )?;
        Ok(())
    }

    fn delete_by_local_id(&self, kind: ObjectKind, local_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_objects WHERE kind = ?1 AND local_id = ?2",
            params![kind.as_str(), local_id],
        )?;
        Ok(())
    }

    fn list(&self, kind: ObjectKind) -> Result<Vec<(String, SyncMetadata)>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, object_id, parent_object_id, ord, sync_timestamp, last_send_time, confirmed
             FROM sync_objects WHERE kind = ?1 ORDER BY local_id",
        )?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok((row.get("local_id")?, Self::parse_row(row)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_objects", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_object_id_format() {
        let id = generate_object_id();
        let bytes: Vec<u8> = id.split(", ").map(|b| b.parse().unwrap()).collect();
        assert_eq!(bytes.len(), 16);
        let rejoined: Vec<String> = bytes.iter().map(u8::to_string).collect();
        assert_eq!(rejoined.join(", "), id);
        assert_ne!(generate_object_id(), id);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());

        let first = map.get_or_create_object_id(ObjectKind::Bookmark, "7").unwrap();
        let second = map.get_or_create_object_id(ObjectKind::Bookmark, "7").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            map.get_local_id_by_object_id(ObjectKind::Bookmark, &first)
                .unwrap(),
            Some("7".to_string())
        );
        assert_eq!(map.get_order(ObjectKind::Bookmark, "7").unwrap(), None);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());

        let bookmark = map.get_or_create_object_id(ObjectKind::Bookmark, "7").unwrap();
        let history = map.get_or_create_object_id(ObjectKind::History, "7").unwrap();
        assert_ne!(bookmark, history);
        assert_eq!(
            map.get_local_id_by_object_id(ObjectKind::History, &bookmark)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_keys_are_empty() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());

        assert_eq!(map.get(ObjectKind::Bookmark, "1").unwrap(), None);
        assert_eq!(map.get_order(ObjectKind::Bookmark, "1").unwrap(), None);
        assert_eq!(
            map.get_local_id_by_object_id(ObjectKind::Bookmark, "nope")
                .unwrap(),
            None
        );
        map.delete_by_local_id(ObjectKind::Bookmark, "1").unwrap();
        map.delete_by_local_id(ObjectKind::Bookmark, "1").unwrap();
    }

    #[test]
    fn test_save_order_creates_or_updates() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());

        map.save_order(ObjectKind::Bookmark, "3", "obj", "1.2")
            .unwrap();
        assert_eq!(
            map.get_order(ObjectKind::Bookmark, "3").unwrap().as_deref(),
            Some("1.2")
        );

        map.save_order(ObjectKind::Bookmark, "3", "ignored", "1.3")
            .unwrap();
        let meta = map.get(ObjectKind::Bookmark, "3").unwrap().unwrap();
        assert_eq!(meta.object_id, "obj");
        assert_eq!(meta.order.as_deref(), Some("1.3"));
    }

    #[test]
    fn test_dirty_sent_synced_cycle() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());
        map.get_or_create_object_id(ObjectKind::Bookmark, "4")
            .unwrap();

        map.mark_sent(ObjectKind::Bookmark, "4", 100).unwrap();
        let meta = map.get(ObjectKind::Bookmark, "4").unwrap().unwrap();
        assert!(meta.is_dirty());
        assert_eq!(meta.last_send_time, Some(100));

        map.mark_synced(ObjectKind::Bookmark, "4", 150).unwrap();
        let meta = map.get(ObjectKind::Bookmark, "4").unwrap().unwrap();
        assert!(!meta.is_dirty());
        assert!(meta.confirmed);
        assert_eq!(meta.last_send_time, None);

        map.mark_dirty(ObjectKind::Bookmark, "4").unwrap();
        let meta = map.get(ObjectKind::Bookmark, "4").unwrap().unwrap();
        assert!(meta.is_dirty());
        assert!(meta.confirmed);
    }

    #[test]
    fn test_list_and_clear() {
        let db = setup();
        let map = SqliteObjectMap::new(db.connection());
        map.get_or_create_object_id(ObjectKind::Bookmark, "1")
            .unwrap();
        map.get_or_create_object_id(ObjectKind::Bookmark, "2")
            .unwrap();
        map.get_or_create_object_id(ObjectKind::History, "1")
            .unwrap();

        let listed = map.list(ObjectKind::Bookmark).unwrap();
        assert_eq!(
            listed.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );

        map.clear().unwrap();
        assert!(map.list(ObjectKind::Bookmark).unwrap().is_empty());
        assert!(map.list(ObjectKind::History).unwrap().is_empty());
    }
}
