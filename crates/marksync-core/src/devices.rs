//! Sync chain membership.
//!
//! Devices announce themselves with PREFERENCES-category device records.
//! The registry folds those records into the list of known devices and tells
//! the caller when the chain has to be torn down locally.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Action, SyncDevice, SyncRecord};

/// What a batch of device records did to this device's chain membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainChange {
    /// Another device removed this one from the chain
    ThisDeviceDeleted,
    /// The chain shrank to this device alone
    LastDeviceStanding,
    Unchanged,
}

/// Known devices of the chain, keyed by device record object id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRegistry {
    devices: Vec<SyncDevice>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    pub const fn from_devices(devices: Vec<SyncDevice>) -> Self {
        Self { devices }
    }

    pub fn into_devices(self) -> Vec<SyncDevice> {
        self.devices
    }

    pub fn devices(&self) -> &[SyncDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn find_by_object_id(&self, object_id: &str) -> Option<&SyncDevice> {
        self.devices.iter().find(|d| d.object_id == object_id)
    }

    pub fn find_by_device_id(&self, device_id: &str) -> Option<&SyncDevice> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Apply one device change. Returns whether the list actually changed
    /// shape: a DELETE for an unknown device is a no-op.
    pub fn merge(&mut self, device: SyncDevice, action: Action) -> bool {
        let existing = self
            .devices
            .iter()
            .position(|d| d.object_id == device.object_id);

        match (action, existing) {
            (Action::Delete, Some(index)) => {
                self.devices.remove(index);
                true
            }
            (Action::Delete, None) => false,
            (Action::Create | Action::Update, Some(index)) => {
                self.devices[index] = device;
                true
            }
            (Action::Create | Action::Update, None) => {
                self.devices.push(device);
                true
            }
        }
    }

    /// Merge every device record in `records` and report the effect on the
    /// chain as seen from `this_device_id`
    pub fn merge_records(&mut self, records: &[SyncRecord], this_device_id: &str) -> ChainChange {
        let size_before = self.len();
        let mut this_deleted = false;
        let mut other_deleted = false;

        for record in records {
            let Some(payload) = record.as_device() else {
                continue;
            };
            let device = SyncDevice {
                name: payload.name.clone(),
                object_id: record.object_id.clone(),
                device_id: record.device_id.clone(),
                last_active: record.sync_timestamp.unwrap_or_default(),
            };
            let deleted_device_id = (record.action == Action::Delete)
                .then(|| self.find_by_object_id(&record.object_id))
                .flatten()
                .map(|d| d.device_id.clone());

            if !self.merge(device, record.action) {
                tracing::debug!(object_id = %record.object_id, "Ignoring delete of unknown device");
                continue;
            }
            match deleted_device_id {
                Some(id) if id == this_device_id => this_deleted = true,
                Some(_) => other_deleted = true,
                None => {}
            }
        }

        if this_deleted {
            ChainChange::ThisDeviceDeleted
        } else if other_deleted && size_before >= 2 && self.len() == 1 {
            ChainChange::LastDeviceStanding
        } else {
            ChainChange::Unchanged
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(object_id: &str, device_id: &str) -> SyncDevice {
        SyncDevice {
            name: format!("device {device_id}"),
            object_id: object_id.into(),
            device_id: device_id.into(),
            last_active: 0,
        }
    }

    fn record(action: Action, object_id: &str, device_id: &str) -> SyncRecord {
        let mut record =
            SyncRecord::device(action, device_id, object_id, format!("device {device_id}"));
        record.sync_timestamp = Some(10);
        record
    }

    #[test]
    fn test_merge_upserts_and_ignores_unknown_delete() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.merge(device("a", "0"), Action::Delete));
        assert!(registry.merge(device("a", "0"), Action::Update));
        assert!(registry.merge(
            SyncDevice {
                name: "renamed".into(),
                ..device("a", "0")
            },
            Action::Create
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_device_id("0").unwrap().name, "renamed");
        assert!(registry.merge(device("a", "0"), Action::Delete));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deleting_other_device_leaves_last_standing() {
        let mut registry =
            DeviceRegistry::from_devices(vec![device("a", "0"), device("b", "1")]);
        let change = registry.merge_records(&[record(Action::Delete, "b", "1")], "0");
        assert_eq!(change, ChainChange::LastDeviceStanding);
    }

    #[test]
    fn test_deleting_this_device() {
        let mut registry = DeviceRegistry::from_devices(vec![
            device("a", "0"),
            device("b", "1"),
            device("c", "2"),
        ]);
        let change = registry.merge_records(&[record(Action::Delete, "a", "1")], "0");
        assert_eq!(change, ChainChange::ThisDeviceDeleted);
    }

    #[test]
    fn test_unknown_delete_does_not_shrink_chain() {
        let mut registry = DeviceRegistry::from_devices(vec![device("a", "0")]);
        let change = registry.merge_records(&[record(Action::Delete, "zz", "9")], "0");
        assert_eq!(change, ChainChange::Unchanged);

        let change = registry.merge_records(&[record(Action::Create, "b", "1")], "0");
        assert_eq!(change, ChainChange::Unchanged);
        assert_eq!(registry.find_by_object_id("b").unwrap().last_active, 10);
    }

    #[test]
    fn test_json_is_a_plain_list() {
        let registry = DeviceRegistry::from_devices(vec![device("a", "0")]);
        let json = registry.to_json().unwrap();
        assert!(json.starts_with('['));
        assert_eq!(DeviceRegistry::from_json(&json).unwrap(), registry);
    }
}
