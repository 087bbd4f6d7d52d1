//! Building outbound records from dirty nodes

use super::{ChangeProcessor, KIND};
use crate::db::ObjectMap;
use crate::error::Result;
use crate::models::{Action, BookmarkPayload, Site, SyncRecord};
use crate::tree::{BookmarkTree, NodeId};

impl<T: BookmarkTree, M: ObjectMap> ChangeProcessor<'_, T, M> {
    /// Records for every dirty node not sent within `min_interval_ms`.
    ///
    /// Tombstones produce DELETE, objects the relay never confirmed produce
    /// CREATE, everything else UPDATE. Each returned node is stamped with
    /// `now` as its last send time.
    pub fn send_unsynced(&mut self, now: i64, min_interval_ms: i64) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();

        for id in self.tracked_nodes() {
            let meta = match self.objects.get(KIND, &id.local_id())? {
                Some(meta) if meta.order.is_some() => meta,
                _ => self.assign(id)?,
            };
            if !meta.is_dirty() || meta.last_send_time.is_some_and(|sent| now - sent < min_interval_ms) {
                continue;
            }
            let action = if meta.confirmed {
                Action::Update
            } else {
                Action::Create
            };
            if let Some(record) = self.local_record(id, action)? {
                self.objects.mark_sent(KIND, &id.local_id(), now)?;
                records.push(record);
            }
        }

        let deleted = self.tree.permanent().deleted;
        for id in self.tree.descendants(deleted) {
            let Some(meta) = self.objects.get(KIND, &id.local_id())? else {
                continue;
            };
            if meta.last_send_time.is_some_and(|sent| now - sent < min_interval_ms) {
                continue;
            }
            if let Some(record) = self.local_record(id, Action::Delete)? {
                self.objects.mark_sent(KIND, &id.local_id(), now)?;
                records.push(record);
            }
        }

        if !records.is_empty() {
            tracing::debug!(count = records.len(), "Collected unsynced bookmark records");
        }
        Ok(records)
    }

    /// Give metadata to every node under the visible roots, parents first,
    /// and return CREATE records for the ones the relay has never seen
    pub fn initial_sync(&mut self, now: i64) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();
        for id in self.tracked_nodes() {
            let meta = self.assign(id)?;
            if meta.confirmed || meta.last_send_time.is_some() {
                continue;
            }
            if let Some(record) = self.local_record(id, Action::Create)? {
                self.objects.mark_sent(KIND, &id.local_id(), now)?;
                records.push(record);
            }
        }
        tracing::info!(count = records.len(), "Prepared initial bookmark sync");
        Ok(records)
    }

    /// Wire record describing the current local state of `id`
    pub(super) fn local_record(&self, id: NodeId, action: Action) -> Result<Option<SyncRecord>> {
        let Some(node) = self.tree.node(id) else {
            return Ok(None);
        };
        let Some(meta) = self.objects.get(KIND, &id.local_id())? else {
            return Ok(None);
        };

        let bar = self.tree.permanent().bookmark_bar;
        let payload = BookmarkPayload {
            site: Site {
                location: node.url().unwrap_or_default().to_string(),
                title: node.title.clone(),
                custom_title: node.title.clone(),
                last_accessed_time: 0,
                creation_time: node.date_added,
                favicon: node.favicon.clone().unwrap_or_default(),
            },
            is_folder: node.is_folder(),
            parent_folder_object_id: meta.parent_object_id.clone(),
            hide_in_toolbar: !self.tree.has_ancestor(id, bar),
            order: meta.order.clone().unwrap_or_default(),
        };

        let mut record = SyncRecord::bookmark(action, &self.device_id, &meta.object_id, payload);
        record.sync_timestamp = meta.sync_timestamp;
        Ok(Some(record))
    }

    /// User nodes under the visible roots, each parent before its children
    fn tracked_nodes(&self) -> Vec<NodeId> {
        self.tree
            .permanent()
            .tracked()
            .into_iter()
            .flat_map(|root| self.tree.descendants(root))
            .collect()
    }
}
