//! Applying fetched records to the local tree

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use super::{ChangeProcessor, KIND};
use crate::db::{ObjectMap, SyncMetadata};
use crate::error::{Error, Result};
use crate::models::{Action, BookmarkPayload, SyncRecord};
use crate::order;
use crate::tree::{BookmarkTree, NodeId};

/// Counts reported after a batch of remote records was applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Own records confirmed by the relay
    pub confirmed: usize,
    /// Records parked until their parent arrives
    pub parked: usize,
    pub ignored: usize,
}

impl std::ops::AddAssign for ApplyStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.confirmed += other.confirmed;
        self.parked += other.parked;
        self.ignored += other.ignored;
    }
}

impl<T: BookmarkTree, M: ObjectMap> ChangeProcessor<'_, T, M> {
    /// Pair each incoming bookmark record with the local record for the same
    /// object, if this device knows it
    pub fn get_all_sync_data(
        &mut self,
        records: &[SyncRecord],
    ) -> Result<Vec<(SyncRecord, Option<SyncRecord>)>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if record.as_bookmark().is_none() {
                continue;
            }
            let local = match self.find_node(&record.object_id)? {
                Some(id) => {
                    let action = if self.is_tombstone(id) {
                        Action::Delete
                    } else {
                        Action::Update
                    };
                    self.local_record(id, action)?
                }
                None => None,
            };
            out.push((record.clone(), local));
        }
        Ok(out)
    }

    /// Turn fetched records into the actions this device should apply.
    ///
    /// Records from other devices are normalised against local state: a
    /// delete of something unknown is dropped, a create of something known
    /// becomes an update and vice versa, and a record older than a pending
    /// local send of the same object loses to it. Own records pass through
    /// untouched; they confirm earlier sends.
    pub fn resolve(&mut self, records: Vec<SyncRecord>) -> Result<Vec<SyncRecord>> {
        let pairs = self.get_all_sync_data(&records)?;
        let mut resolved = Vec::with_capacity(pairs.len());
        // Whether an object exists once the earlier records of this batch apply
        let mut exists_after: HashMap<String, bool> = HashMap::new();

        for (mut remote, local) in pairs {
            if remote.device_id == self.device_id {
                resolved.push(remote);
                continue;
            }

            let known = exists_after
                .get(&remote.object_id)
                .copied()
                .unwrap_or(local.is_some());
            match (remote.action, known) {
                (Action::Delete, false) => {
                    tracing::debug!(object_id = %remote.object_id, "Dropping delete of unknown object");
                    continue;
                }
                (Action::Create, true) => remote.action = Action::Update,
                (Action::Update, false) => remote.action = Action::Create,
                _ => {}
            }

            if let Some(meta) = self.meta_for_object(&remote.object_id)? {
                let remote_time = remote.sync_timestamp.unwrap_or_default();
                let superseded = meta.is_dirty()
                    && meta.last_send_time.is_some_and(|sent| remote_time < sent);
                if superseded {
                    tracing::debug!(
                        object_id = %remote.object_id,
                        remote_time,
                        "Dropping record older than a pending local send"
                    );
                    continue;
                }
            }
            exists_after.insert(remote.object_id.clone(), remote.action != Action::Delete);
            resolved.push(remote);
        }
        Ok(resolved)
    }

    /// Apply resolved bookmark records to the tree
    pub fn apply_changes_from_sync_model(&mut self, records: &[SyncRecord]) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        let mut touched = BTreeSet::new();

        self.tree.set_events_paused(true);
        let result = records
            .iter()
            .try_for_each(|record| self.apply_record(record, &mut stats, &mut touched))
            .and_then(|()| self.rehome_pending(&mut touched))
            .and_then(|()| self.repair_sibling_orders(&touched));
        self.tree.set_events_paused(false);
        result?;

        tracing::debug!(?stats, "Applied remote bookmark records");
        Ok(stats)
    }

    fn apply_record(
        &mut self,
        record: &SyncRecord,
        stats: &mut ApplyStats,
        touched: &mut BTreeSet<NodeId>,
    ) -> Result<()> {
        let Some(payload) = record.as_bookmark() else {
            stats.ignored += 1;
            return Ok(());
        };
        let found = self.find_node(&record.object_id)?;

        if record.device_id == self.device_id {
            return self.confirm_own_record(record, found, stats);
        }

        match (found, record.action) {
            (Some(id), action) if self.is_tombstone(id) => {
                if action == Action::Delete {
                    self.remove_silently(id)?;
                    stats.deleted += 1;
                } else {
                    tracing::debug!(object_id = %record.object_id, "Ignoring update to locally deleted node");
                    stats.ignored += 1;
                }
            }
            (Some(id), Action::Delete) => {
                if let Some(parent) = self.tree.parent(id) {
                    touched.insert(parent);
                }
                self.remove_silently(id)?;
                stats.deleted += 1;
            }
            (Some(id), Action::Create | Action::Update) => {
                self.update_node(id, record, payload, touched)?;
                stats.updated += 1;
            }
            (None, Action::Delete) => stats.ignored += 1,
            (None, Action::Create | Action::Update) => {
                let id = self.create_node(record, payload, touched)?;
                if self.is_pending(id) {
                    stats.parked += 1;
                } else {
                    stats.created += 1;
                }
            }
        }
        Ok(())
    }

    /// An own record came back from the relay
    fn confirm_own_record(
        &mut self,
        record: &SyncRecord,
        found: Option<NodeId>,
        stats: &mut ApplyStats,
    ) -> Result<()> {
        let Some(id) = found else {
            stats.ignored += 1;
            return Ok(());
        };
        if record.action == Action::Delete && self.is_tombstone(id) {
            self.remove_silently(id)?;
            stats.confirmed += 1;
            return Ok(());
        }

        let local_id = id.local_id();
        let Some(meta) = self.objects.get(KIND, &local_id)? else {
            stats.ignored += 1;
            return Ok(());
        };
        // A node edited after the send has no send time and stays dirty.
        if meta.last_send_time.is_some() && !self.is_tombstone(id) {
            self.objects
                .mark_synced(KIND, &local_id, record.sync_timestamp.unwrap_or_default())?;
            stats.confirmed += 1;
        } else {
            stats.ignored += 1;
        }
        Ok(())
    }

    fn update_node(
        &mut self,
        id: NodeId,
        record: &SyncRecord,
        payload: &BookmarkPayload,
        touched: &mut BTreeSet<NodeId>,
    ) -> Result<()> {
        self.write_fields(id, payload)?;

        let current_parent = self
            .tree
            .parent(id)
            .ok_or_else(|| Error::Consistency(format!("node {id} has no parent")))?;
        let target_parent = match self.resolve_parent(payload)? {
            // Still waiting for its parent: stay where it is.
            Some(parent) if self.is_pending(parent) || parent == self.tree.permanent().pending => {
                if self.is_pending(id) {
                    current_parent
                } else {
                    parent
                }
            }
            Some(parent) => parent,
            None => self.fallback_root(payload)?,
        };

        if target_parent == id || self.tree.has_ancestor(target_parent, id) {
            tracing::warn!(object_id = %record.object_id, "Ignoring move into own subtree");
        } else {
            let index = self.remote_index(target_parent, &payload.order, &record.object_id, Some(id))?;
            let in_place =
                target_parent == current_parent && self.tree.index_of(id) == Some(index);
            if !in_place {
                self.tree.move_node(id, target_parent, index)?;
                touched.insert(current_parent);
            }
        }
        touched.insert(target_parent);

        self.save_remote_metadata(id, record, payload)
    }

    fn create_node(
        &mut self,
        record: &SyncRecord,
        payload: &BookmarkPayload,
        touched: &mut BTreeSet<NodeId>,
    ) -> Result<NodeId> {
        let parent = match self.resolve_parent(payload)? {
            Some(parent) => parent,
            None => self.fallback_root(payload)?,
        };
        let index = self.remote_index(parent, &payload.order, &record.object_id, None)?;
        let title = payload.site.display_title();

        let id = if payload.is_folder {
            self.tree.add_folder(parent, index, title)?
        } else {
            self.tree.add_url(
                parent,
                index,
                title,
                &payload.site.location,
                payload.site.creation_time,
            )?
        };
        self.write_fields(id, payload)?;
        touched.insert(parent);
        tracing::debug!(object_id = %record.object_id, node = %id, "Created node from remote record");

        self.save_remote_metadata(id, record, payload)?;
        Ok(id)
    }

    fn write_fields(&mut self, id: NodeId, payload: &BookmarkPayload) -> Result<()> {
        self.tree.set_title(id, payload.site.display_title())?;
        let is_leaf = self.tree.node(id).is_some_and(|node| !node.is_folder());
        if is_leaf && !payload.site.location.is_empty() {
            self.tree.set_url(id, &payload.site.location)?;
        }
        if payload.site.creation_time > 0 {
            self.tree.set_date_added(id, payload.site.creation_time)?;
        }
        let favicon = Some(payload.site.favicon.as_str()).filter(|f| !f.is_empty());
        self.tree.set_favicon(id, favicon)?;
        Ok(())
    }

    fn save_remote_metadata(
        &self,
        id: NodeId,
        record: &SyncRecord,
        payload: &BookmarkPayload,
    ) -> Result<()> {
        let local_id = id.local_id();
        // Another local node may still hold this object id (e.g. a stale
        // mapping left by a crash); the incoming record owns it now.
        if let Some(previous) = self.objects.get_local_id_by_object_id(KIND, &record.object_id)? {
            if previous != local_id {
                self.objects.delete_by_local_id(KIND, &previous)?;
            }
        }

        let meta = SyncMetadata {
            object_id: record.object_id.clone(),
            parent_object_id: payload.parent_object_id().map(str::to_string),
            order: Some(payload.order.clone()).filter(|order| !order.is_empty()),
            sync_timestamp: Some(record.sync_timestamp.unwrap_or_default()),
            last_send_time: None,
            confirmed: true,
        };
        self.objects.save_metadata(KIND, &local_id, &meta)
    }

    /// Parent named by the record. `Ok(None)` means the record names no
    /// parent (or one that cannot hold children) and a permanent root
    /// applies; an unknown parent resolves to the pending root when parking
    /// is enabled.
    fn resolve_parent(&mut self, payload: &BookmarkPayload) -> Result<Option<NodeId>> {
        let Some(parent_object_id) = payload.parent_object_id() else {
            return Ok(None);
        };

        if let Some(parent) = self.find_node(parent_object_id)? {
            let is_folder = self.tree.node(parent).is_some_and(|node| node.is_folder());
            if is_folder && !self.is_tombstone(parent) {
                return Ok(Some(parent));
            }
        }

        if self.park_orphans {
            Ok(Some(self.tree.permanent().pending))
        } else {
            Ok(None)
        }
    }

    /// Permanent root for a record without a usable parent: mobile-minted
    /// keys go to the mobile root, otherwise the toolbar flag decides
    fn fallback_root(&self, payload: &BookmarkPayload) -> Result<NodeId> {
        let permanent = self.tree.permanent();
        let root = if order::first_segment(&payload.order) == Some(2) {
            permanent.mobile
        } else if !payload.hide_in_toolbar {
            permanent.bookmark_bar
        } else {
            permanent.other
        };

        if self.tree.node(root).is_none() {
            return Err(Error::Consistency(format!(
                "fallback root {root} missing from the tree"
            )));
        }
        Ok(root)
    }

    /// Index of the first child of `parent` whose `(order, object_id)` is
    /// not less than the given pair. Children without a valid key sort last.
    fn remote_index(
        &self,
        parent: NodeId,
        order_key: &str,
        object_id: &str,
        exclude: Option<NodeId>,
    ) -> Result<usize> {
        let mut index = 0;
        for child in self.tree.children(parent) {
            if Some(*child) == exclude {
                continue;
            }
            let Some(meta) = self.objects.get(KIND, &child.local_id())? else {
                break;
            };
            let child_order = meta.order.unwrap_or_default();
            let less = if order::is_valid(&child_order) {
                !order::is_valid(order_key)
                    || order::compare_siblings(&child_order, &meta.object_id, order_key, object_id)
                        == Ordering::Less
            } else {
                false
            };
            if !less {
                break;
            }
            index += 1;
        }
        Ok(index)
    }

    /// Move parked nodes whose parent has arrived to their real position
    fn rehome_pending(&mut self, touched: &mut BTreeSet<NodeId>) -> Result<()> {
        let pending = self.tree.permanent().pending;
        loop {
            let mut moved = false;
            for id in self.tree.children(pending).to_vec() {
                let Some(meta) = self.objects.get(KIND, &id.local_id())? else {
                    continue;
                };
                let Some(parent_object_id) = meta.parent_object_id.as_deref() else {
                    continue;
                };
                let Some(parent) = self.find_node(parent_object_id)? else {
                    continue;
                };
                // A parent that is parked too is fine: the pair moves together
                // once the parent is re-homed.
                let usable = self.tree.node(parent).is_some_and(|node| node.is_folder())
                    && !self.is_tombstone(parent)
                    && parent != id
                    && !self.tree.has_ancestor(parent, id);
                if !usable {
                    continue;
                }

                let order_key = meta.order.clone().unwrap_or_default();
                let index = self.remote_index(parent, &order_key, &meta.object_id, Some(id))?;
                self.tree.move_node(id, parent, index)?;
                touched.insert(parent);
                moved = true;
                tracing::debug!(node = %id, parent = %parent, "Re-homed parked node");
            }
            if !moved {
                return Ok(());
            }
        }
    }

    fn find_node(&self, object_id: &str) -> Result<Option<NodeId>> {
        let Some(local_id) = self.objects.get_local_id_by_object_id(KIND, object_id)? else {
            return Ok(None);
        };
        let Ok(raw) = local_id.parse::<i64>() else {
            return Ok(None);
        };
        let id = NodeId(raw);
        Ok(self.tree.node(id).map(|_| id))
    }

    fn meta_for_object(&self, object_id: &str) -> Result<Option<SyncMetadata>> {
        match self.objects.get_local_id_by_object_id(KIND, object_id)? {
            Some(local_id) => self.objects.get(KIND, &local_id),
            None => Ok(None),
        }
    }
}
