//! Sync prefs repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{SyncDevice, SyncPrefs};

const SEED: &str = "sync_seed";
const THIS_DEVICE_ID: &str = "sync_this_device_id";
const THIS_DEVICE_NAME: &str = "sync_device_name";
const THIS_DEVICE_OBJECT_ID: &str = "sync_this_device_object_id";
const SYNC_ENABLED: &str = "sync_enabled";
const BOOKMARKS_ENABLED: &str = "sync_bookmarks_enabled";
const HISTORY_ENABLED: &str = "sync_history_enabled";
const PREFERENCES_ENABLED: &str = "sync_preferences_enabled";
const LAST_FETCH_TIME: &str = "sync_last_fetch_time";
const LATEST_RECORD_TIME: &str = "sync_latest_record_time";
const LATEST_DEVICE_RECORD_TIME: &str = "sync_latest_device_record_time";
const DEVICE_LIST: &str = "sync_device_list";
const BOOKMARKS_BASE_ORDER: &str = "sync_bookmarks_base_order";
const API_VERSION: &str = "sync_api_version";

const ALL_KEYS: [&str; 14] = [
    SEED,
    THIS_DEVICE_ID,
    THIS_DEVICE_NAME,
    THIS_DEVICE_OBJECT_ID,
    SYNC_ENABLED,
    BOOKMARKS_ENABLED,
    HISTORY_ENABLED,
    PREFERENCES_ENABLED,
    LAST_FETCH_TIME,
    LATEST_RECORD_TIME,
    LATEST_DEVICE_RECORD_TIME,
    DEVICE_LIST,
    BOOKMARKS_BASE_ORDER,
    API_VERSION,
];

/// Trait for sync prefs storage operations
pub trait PrefsRepository {
    /// Load prefs; keys never written keep their defaults
    fn load(&self) -> Result<SyncPrefs>;

    /// Save prefs to the database
    fn save(&self, prefs: &SyncPrefs) -> Result<()>;

    /// Forget every sync pref
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of `PrefsRepository`
pub struct SqlitePrefsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePrefsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl PrefsRepository for SqlitePrefsRepository<'_> {
    fn load(&self) -> Result<SyncPrefs> {
        let mut prefs = SyncPrefs::default();

        prefs.seed = self.get_setting(SEED)?;
        prefs.this_device_id = self.get_setting(THIS_DEVICE_ID)?;
        if let Some(name) = self.get_setting(THIS_DEVICE_NAME)? {
            prefs.this_device_name = name;
        }
        prefs.this_device_object_id = self.get_setting(THIS_DEVICE_OBJECT_ID)?;

        if let Some(value) = self.get_setting(SYNC_ENABLED)? {
            prefs.sync_enabled = parse_bool(&value);
        }
        if let Some(value) = self.get_setting(BOOKMARKS_ENABLED)? {
            prefs.sync_bookmarks = parse_bool(&value);
        }
        if let Some(value) = self.get_setting(HISTORY_ENABLED)? {
            prefs.sync_history = parse_bool(&value);
        }
        if let Some(value) = self.get_setting(PREFERENCES_ENABLED)? {
            prefs.sync_preferences = parse_bool(&value);
        }

        prefs.last_fetch_time = self.get_time(LAST_FETCH_TIME)?;
        prefs.latest_record_time = self.get_time(LATEST_RECORD_TIME)?;
        prefs.latest_device_record_time = self.get_time(LATEST_DEVICE_RECORD_TIME)?;

        if let Some(value) = self.get_setting(DEVICE_LIST)? {
            match serde_json::from_str::<Vec<SyncDevice>>(&value) {
                Ok(devices) => prefs.devices = devices,
                Err(error) => tracing::warn!(%error, "Ignoring malformed stored device list"),
            }
        }

        prefs.bookmarks_base_order = self.get_setting(BOOKMARKS_BASE_ORDER)?;
        if let Some(version) = self.get_setting(API_VERSION)? {
            prefs.api_version = version;
        }

        Ok(prefs)
    }

    fn save(&self, prefs: &SyncPrefs) -> Result<()> {
        self.put_optional(SEED, prefs.seed.as_deref())?;
        self.put_optional(THIS_DEVICE_ID, prefs.this_device_id.as_deref())?;
        self.set_setting(THIS_DEVICE_NAME, &prefs.this_device_name)?;
        self.put_optional(
            THIS_DEVICE_OBJECT_ID,
            prefs.this_device_object_id.as_deref(),
        )?;
        self.set_setting(SYNC_ENABLED, bool_str(prefs.sync_enabled))?;
        self.set_setting(BOOKMARKS_ENABLED, bool_str(prefs.sync_bookmarks))?;
        self.set_setting(HISTORY_ENABLED, bool_str(prefs.sync_history))?;
        self.set_setting(PREFERENCES_ENABLED, bool_str(prefs.sync_preferences))?;
        self.put_time(LAST_FETCH_TIME, prefs.last_fetch_time)?;
        self.put_time(LATEST_RECORD_TIME, prefs.latest_record_time)?;
        self.put_time(LATEST_DEVICE_RECORD_TIME, prefs.latest_device_record_time)?;
        self.set_setting(DEVICE_LIST, &serde_json::to_string(&prefs.devices)?)?;
        self.put_optional(BOOKMARKS_BASE_ORDER, prefs.bookmarks_base_order.as_deref())?;
        self.set_setting(API_VERSION, &prefs.api_version)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for key in ALL_KEYS {
            self.remove_setting(key)?;
        }
        Ok(())
    }
}

impl SqlitePrefsRepository<'_> {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn get_time(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .get_setting(key)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn put_optional(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.set_setting(key, value),
            None => self.remove_setting(key),
        }
    }

    fn put_time(&self, key: &str, value: Option<i64>) -> Result<()> {
        self.put_optional(key, value.map(|v| v.to_string()).as_deref())
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
    fn test_load_default_prefs() {
        let db = setup();
        let repo = SqlitePrefsRepository::new(db.connection());

        let prefs = repo.load().unwrap();
        assert_eq!(prefs, SyncPrefs::default());
    }

    #[test]
    fn test_save_and_load_prefs() {
        let db = setup();
        let repo = SqlitePrefsRepository::new(db.connection());

        let prefs = SyncPrefs {
            seed: Some("ab01".into()),
            this_device_id: Some("42".into()),
            this_device_name: "laptop".into(),
            this_device_object_id: Some("1, 2".into()),
            sync_enabled: true,
            sync_history: true,
            last_fetch_time: Some(1_000),
            latest_record_time: Some(2_000),
            devices: vec![SyncDevice {
                name: "laptop".into(),
                object_id: "1, 2".into(),
                device_id: "42".into(),
                last_active: 2_000,
            }],
            bookmarks_base_order: Some("1.42.".into()),
            ..SyncPrefs::default()
        };

        repo.save(&prefs).unwrap();
        assert_eq!(repo.load().unwrap(), prefs);
    }

    #[test]
    fn test_saving_none_removes_value() {
        let db = setup();
        let repo = SqlitePrefsRepository::new(db.connection());

        let mut prefs = SyncPrefs {
            last_fetch_time: Some(5),
            ..SyncPrefs::default()
        };
        repo.save(&prefs).unwrap();
        prefs.last_fetch_time = None;
        repo.save(&prefs).unwrap();
        assert_eq!(repo.load().unwrap().last_fetch_time, None);
    }

    #[test]
    fn test_clear_resets_to_defaults() {
        let db = setup();
        let repo = SqlitePrefsRepository::new(db.connection());

        let prefs = SyncPrefs {
            seed: Some("ff".into()),
            this_device_id: Some("1".into()),
            sync_enabled: true,
            ..SyncPrefs::default()
        };
        repo.save(&prefs).unwrap();
        repo.clear().unwrap();
        assert_eq!(repo.load().unwrap(), SyncPrefs::default());
    }

    #[test]
    fn test_malformed_device_list_is_ignored() {
        let db = setup();
        db.connection()
            .execute(
                "INSERT INTO settings (key, value) VALUES ('sync_device_list', '{oops')",
                [],
            )
            .unwrap();
        let repo = SqlitePrefsRepository::new(db.connection());
        assert!(repo.load().unwrap().devices.is_empty());
    }
}
