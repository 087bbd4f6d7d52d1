//! Persisted sync configuration

use serde::{Deserialize, Serialize};

use super::SyncDevice;

/// Legacy wire protocol version recorded at setup
pub const API_VERSION: &str = "0";

/// Local sync configuration, one per profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPrefs {
    /// Shared chain secret, hex encoded
    pub seed: Option<String>,
    pub this_device_id: Option<String>,
    pub this_device_name: String,
    /// Object id of this device's own device record
    pub this_device_object_id: Option<String>,
    pub sync_enabled: bool,
    pub sync_bookmarks: bool,
    pub sync_history: bool,
    pub sync_preferences: bool,
    /// Set after the first fetch completed (Unix ms)
    pub last_fetch_time: Option<i64>,
    /// Highest relay timestamp among fetched bookmark records
    pub latest_record_time: Option<i64>,
    /// Highest relay timestamp among fetched device records
    pub latest_device_record_time: Option<i64>,
    pub devices: Vec<SyncDevice>,
    /// `"<platform>.<device_id>."`, the prefix of every order key minted here
    pub bookmarks_base_order: Option<String>,
    pub api_version: String,
}

impl Default for SyncPrefs {
    fn default() -> Self {
        Self {
            seed: None,
            this_device_id: None,
            this_device_name: String::new(),
            this_device_object_id: None,
            sync_enabled: false,
            sync_bookmarks: true,
            sync_history: false,
            sync_preferences: true,
            last_fetch_time: None,
            latest_record_time: None,
            latest_device_record_time: None,
            devices: Vec::new(),
            bookmarks_base_order: None,
            api_version: API_VERSION.to_string(),
        }
    }
}

impl SyncPrefs {
    /// Whether this profile has joined or created a chain
    pub const fn is_configured(&self) -> bool {
        self.seed.is_some() && self.this_device_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefs_are_unconfigured() {
        let prefs = SyncPrefs::default();
        assert!(!prefs.is_configured());
        assert!(prefs.sync_bookmarks);
        assert!(!prefs.sync_history);
        assert_eq!(prefs.api_version, "0");
    }
}
