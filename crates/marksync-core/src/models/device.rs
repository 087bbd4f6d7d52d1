//! Device model

use serde::{Deserialize, Serialize};

/// A device known to be part of the sync chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDevice {
    /// User-visible device name
    pub name: String,
    /// Object id of the device record
    pub object_id: String,
    /// Chain-local device id
    pub device_id: String,
    /// Sync timestamp of the latest record seen for this device (Unix ms)
    pub last_active: i64,
}
