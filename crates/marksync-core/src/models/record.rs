//! Wire records exchanged through the relay

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Record action, carried on the wire as `0`, `1` or `2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Create),
            1 => Ok(Self::Update),
            2 => Ok(Self::Delete),
            other => Err(format!("unknown record action {other}")),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        match action {
            Action::Create => 0,
            Action::Update => 1,
            Action::Delete => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// Relay category a batch of records belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Bookmarks,
    HistorySites,
    Preferences,
}

impl Category {
    pub const ALL: [Self; 3] = [Self::Bookmarks, Self::HistorySites, Self::Preferences];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bookmarks => "BOOKMARKS",
            Self::HistorySites => "HISTORY_SITES",
            Self::Preferences => "PREFERENCES",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload tag of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectData {
    Bookmark,
    Device,
    HistorySite,
}

/// Page attributes shared by bookmark and history records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Site {
    pub location: String,
    pub title: String,
    pub custom_title: String,
    pub last_accessed_time: i64,
    pub creation_time: i64,
    pub favicon: String,
}

impl Site {
    /// Title to show locally: the custom title wins when it is set
    pub fn display_title(&self) -> &str {
        if self.custom_title.is_empty() {
            &self.title
        } else {
            &self.custom_title
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookmarkPayload {
    pub site: Site,
    pub is_folder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder_object_id: Option<String>,
    pub hide_in_toolbar: bool,
    pub order: String,
}

impl BookmarkPayload {
    /// Parent object id, treating an empty string as absent
    pub fn parent_object_id(&self) -> Option<&str> {
        self.parent_folder_object_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePayload {
    pub name: String,
}

/// Record body, keyed on the wire by its object data tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordPayload {
    Bookmark(BookmarkPayload),
    Device(DevicePayload),
    HistorySite(Site),
}

impl RecordPayload {
    pub const fn object_data(&self) -> ObjectData {
        match self {
            Self::Bookmark(_) => ObjectData::Bookmark,
            Self::Device(_) => ObjectData::Device,
            Self::HistorySite(_) => ObjectData::HistorySite,
        }
    }
}

/// One change, as sent to and fetched from the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub action: Action,
    pub device_id: String,
    pub object_id: String,
    pub object_data: ObjectData,
    #[serde(flatten)]
    pub payload: RecordPayload,
    /// Assigned by the relay when the record is stored (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_timestamp: Option<i64>,
}

impl SyncRecord {
    pub fn bookmark(
        action: Action,
        device_id: impl Into<String>,
        object_id: impl Into<String>,
        payload: BookmarkPayload,
    ) -> Self {
        Self {
            action,
            device_id: device_id.into(),
            object_id: object_id.into(),
            object_data: ObjectData::Bookmark,
            payload: RecordPayload::Bookmark(payload),
            sync_timestamp: None,
        }
    }

    pub fn device(
        action: Action,
        device_id: impl Into<String>,
        object_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            action,
            device_id: device_id.into(),
            object_id: object_id.into(),
            object_data: ObjectData::Device,
            payload: RecordPayload::Device(DevicePayload { name: name.into() }),
            sync_timestamp: None,
        }
    }

    /// Parse one wire record.
    ///
    /// Any malformed input, including a tag that disagrees with the payload,
    /// is reported as [`Error::Format`].
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self =
            serde_json::from_str(json).map_err(|e| Error::Format(format!("sync record: {e}")))?;
        if record.object_data != record.payload.object_data() {
            return Err(Error::Format(format!(
                "record {} is tagged {:?} but carries a {:?} payload",
                record.object_id,
                record.object_data,
                record.payload.object_data()
            )));
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub const fn as_bookmark(&self) -> Option<&BookmarkPayload> {
        match &self.payload {
            RecordPayload::Bookmark(payload) => Some(payload),
            _ => None,
        }
    }

    pub const fn as_device(&self) -> Option<&DevicePayload> {
        match &self.payload {
            RecordPayload::Device(payload) => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bookmark_wire_format() {
        let record = SyncRecord::bookmark(
            Action::Update,
            "3",
            "1, 2, 3",
            BookmarkPayload {
                site: Site {
                    location: "https://www.rust-lang.org/".into(),
                    title: "Rust".into(),
                    ..Site::default()
                },
                parent_folder_object_id: Some("9, 9".into()),
                order: "1.3.1".into(),
                ..BookmarkPayload::default()
            },
        );

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["action"], 1);
        assert_eq!(value["deviceId"], "3");
        assert_eq!(value["objectData"], "bookmark");
        assert_eq!(value["bookmark"]["site"]["location"], "https://www.rust-lang.org/");
        assert_eq!(value["bookmark"]["parentFolderObjectId"], "9, 9");
        assert_eq!(value["bookmark"]["hideInToolbar"], false);
        assert!(value.get("syncTimestamp").is_none());
    }

    #[test]
    fn test_parse_device_record() {
        let json = r#"{"action":0,"deviceId":"7","objectId":"4, 4","objectData":"device","device":{"name":"laptop"},"syncTimestamp":12}"#;
        let record = SyncRecord::from_json(json).unwrap();
        assert_eq!(record.action, Action::Create);
        assert_eq!(record.as_device().unwrap().name, "laptop");
        assert_eq!(record.sync_timestamp, Some(12));
    }

    #[test]
    fn test_malformed_records_are_format_errors() {
        let bad_action = r#"{"action":9,"deviceId":"7","objectId":"1","objectData":"device","device":{"name":"x"}}"#;
        assert!(matches!(
            SyncRecord::from_json(bad_action),
            Err(Error::Format(_))
        ));

        let mismatched = r#"{"action":0,"deviceId":"7","objectId":"1","objectData":"bookmark","device":{"name":"x"}}"#;
        assert!(matches!(
            SyncRecord::from_json(mismatched),
            Err(Error::Format(_))
        ));

        assert!(matches!(
            SyncRecord::from_json("not json"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_custom_title_wins_when_set() {
        let mut site = Site {
            title: "Page".into(),
            ..Site::default()
        };
        assert_eq!(site.display_title(), "Page");
        site.custom_title = "Mine".into();
        assert_eq!(site.display_title(), "Mine");
    }

    #[test]
    fn test_empty_parent_is_absent() {
        let payload = BookmarkPayload {
            parent_folder_object_id: Some(String::new()),
            ..BookmarkPayload::default()
        };
        assert_eq!(payload.parent_object_id(), None);
    }

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&Category::HistorySites).unwrap(),
            "\"HISTORY_SITES\""
        );
        assert_eq!(Category::Preferences.to_string(), "PREFERENCES");
    }
}
