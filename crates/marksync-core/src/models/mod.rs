//! Data models for marksync

mod device;
mod prefs;
mod record;

pub use device::SyncDevice;
pub use prefs::SyncPrefs;
pub use record::{
    Action, BookmarkPayload, Category, DevicePayload, ObjectData, RecordPayload, Site, SyncRecord,
};
