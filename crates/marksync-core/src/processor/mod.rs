//! Bookmark change processor.
//!
//! Sits between the host [`BookmarkTree`] and the relay. Local edits arrive
//! as [`TreeEvent`]s and are turned into sync metadata (object ids, order
//! keys, dirty flags); remote records are applied back onto the tree. Every
//! write the processor makes to the tree happens with tree events paused so
//! it never mistakes its own writes for user edits.
//!
//! A node is *dirty* while its `sync_timestamp` is unset. Order keys are
//! computed locally and immediately, so a node goes straight from dirty to
//! clean once the relay echoes its record back.

mod outbound;
mod remote;

pub use remote::ApplyStats;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::db::{ObjectKind, ObjectMap, SyncMetadata};
use crate::error::{Error, Result};
use crate::order;
use crate::tree::{BookmarkTree, NodeId, NodeKind, RemovedNode, TreeEvent};

const KIND: ObjectKind = ObjectKind::Bookmark;

/// Order keys of the three visible permanent folders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOrders {
    pub bookmark_bar: String,
    pub other: String,
    pub mobile: String,
}

impl RootOrders {
    /// Orders derived from a device's bookmarks base order (`"1.42."`)
    pub fn from_base(base: &str) -> Self {
        Self {
            bookmark_bar: format!("{base}1"),
            other: format!("{base}2"),
            mobile: format!("{base}3"),
        }
    }
}

/// Reconciles one device's bookmark tree with the records of its chain
pub struct ChangeProcessor<'a, T: BookmarkTree, M: ObjectMap> {
    tree: &'a mut T,
    objects: &'a M,
    device_id: String,
    roots: RootOrders,
    park_orphans: bool,
}

impl<'a, T: BookmarkTree, M: ObjectMap> ChangeProcessor<'a, T, M> {
    pub fn new(tree: &'a mut T, objects: &'a M, device_id: impl Into<String>, roots: RootOrders) -> Self {
        Self {
            tree,
            objects,
            device_id: device_id.into(),
            roots,
            park_orphans: true,
        }
    }

    /// Whether records with an unknown parent wait under the pending root
    #[must_use]
    pub const fn with_park_orphans(mut self, park: bool) -> Self {
        self.park_orphans = park;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Process every queued local tree event
    pub fn handle_events(&mut self) -> Result<()> {
        let events = self.tree.take_events();
        if events.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = events.len(), "Handling local bookmark events");

        let mut touched = BTreeSet::new();
        self.tree.set_events_paused(true);
        let result = events
            .into_iter()
            .try_for_each(|event| self.handle_event(event, &mut touched))
            .and_then(|()| self.repair_sibling_orders(&touched));
        self.tree.set_events_paused(false);
        result
    }

    fn handle_event(&mut self, event: TreeEvent, touched: &mut BTreeSet<NodeId>) -> Result<()> {
        match event {
            TreeEvent::NodeAdded { node, parent, .. } => {
                if self.tree.node(node).is_some() && self.is_tracked(node) {
                    self.place_subtree(node)?;
                    touched.insert(parent);
                }
            }
            TreeEvent::NodeRemoved { parent, node, .. } => {
                if self.is_tracked_folder(parent) {
                    self.tombstone(&node)?;
                } else {
                    self.forget_subtree(&node)?;
                }
            }
            TreeEvent::NodeChanged { node } => {
                if self.is_tracked(node) {
                    if self.objects.get(KIND, &node.local_id())?.is_some() {
                        self.objects.mark_dirty(KIND, &node.local_id())?;
                    } else {
                        self.assign(node)?;
                    }
                }
            }
            TreeEvent::NodeMoved {
                node, new_parent, ..
            } => {
                if self.tree.node(node).is_some() && self.is_tracked(node) {
                    self.place(node)?;
                    touched.insert(new_parent);
                }
            }
            TreeEvent::ChildrenReordered { node } => {
                if self.is_tracked_folder(node) {
                    self.renumber_children(node)?;
                }
            }
            TreeEvent::AllNodesRemoved { removed } => {
                for node in &removed {
                    self.tombstone(node)?;
                }
            }
        }
        Ok(())
    }

    /// Wipe every mapping plus the tombstone and pending subtrees
    pub fn clear_sync_data(&mut self) -> Result<()> {
        let permanent = self.tree.permanent();
        let hidden: Vec<NodeId> = [permanent.deleted, permanent.pending]
            .into_iter()
            .flat_map(|root| self.tree.children(root).to_vec())
            .collect();

        self.tree.set_events_paused(true);
        let result = hidden
            .into_iter()
            .try_for_each(|child| self.tree.remove(child).map(|_| ()))
            .and_then(|()| self.objects.clear());
        self.tree.set_events_paused(false);
        tracing::info!("Cleared bookmark sync data");
        result
    }

    // ------------------------------------------------------------------
    // Tree position helpers
    // ------------------------------------------------------------------

    /// Under one of the visible roots (roots themselves excluded)
    fn is_tracked(&self, id: NodeId) -> bool {
        self.tree
            .permanent()
            .tracked()
            .into_iter()
            .any(|root| self.tree.has_ancestor(id, root))
    }

    fn is_tracked_folder(&self, id: NodeId) -> bool {
        self.tree.permanent().tracked().contains(&id) || self.is_tracked(id)
    }

    fn is_tombstone(&self, id: NodeId) -> bool {
        self.tree.has_ancestor(id, self.tree.permanent().deleted)
    }

    fn is_pending(&self, id: NodeId) -> bool {
        self.tree.has_ancestor(id, self.tree.permanent().pending)
    }

    fn root_order(&self, id: NodeId) -> Option<&str> {
        let permanent = self.tree.permanent();
        if id == permanent.bookmark_bar {
            Some(&self.roots.bookmark_bar)
        } else if id == permanent.other {
            Some(&self.roots.other)
        } else if id == permanent.mobile {
            Some(&self.roots.mobile)
        } else {
            None
        }
    }

    /// Object id of `parent` as carried in a child's record; visible roots
    /// have none
    fn parent_object_id(&self, parent: NodeId) -> Result<Option<String>> {
        if self.root_order(parent).is_some() {
            return Ok(None);
        }
        Ok(Some(
            self.objects
                .get_or_create_object_id(KIND, &parent.local_id())?,
        ))
    }

    fn stored_order(&self, id: NodeId) -> Result<Option<String>> {
        self.objects.get_order(KIND, &id.local_id())
    }

    /// Order of a folder, assigning one to it (and its ancestors) if missing
    fn folder_order(&mut self, folder: NodeId) -> Result<String> {
        if let Some(order) = self.root_order(folder) {
            return Ok(order.to_string());
        }
        if !self.is_tracked(folder) {
            return Err(Error::Consistency(format!(
                "folder {folder} is not under a synced root"
            )));
        }
        if let Some(order) = self.stored_order(folder)? {
            return Ok(order);
        }
        let meta = self.assign(folder)?;
        Ok(meta.order.unwrap_or_default())
    }

    /// Key for `id` at its current position among its siblings
    fn position_order(&mut self, id: NodeId) -> Result<String> {
        let parent = self
            .tree
            .parent(id)
            .ok_or_else(|| Error::Consistency(format!("node {id} has no parent")))?;
        let index = self
            .tree
            .index_of(id)
            .ok_or_else(|| Error::Consistency(format!("node {id} missing from its parent")))?;
        let parent_order = self.folder_order(parent)?;

        let siblings = self.tree.children(parent).to_vec();
        let prev = match index.checked_sub(1) {
            Some(i) => self.stored_order(siblings[i])?,
            None => None,
        };
        let next = match siblings.get(index + 1) {
            Some(next) => self.stored_order(*next)?,
            None => None,
        };

        Ok(order::for_position(
            &parent_order,
            index,
            prev.as_deref().filter(|key| order::is_valid(key)),
            next.as_deref().filter(|key| order::is_valid(key)),
        ))
    }

    // ------------------------------------------------------------------
    // Local changes
    // ------------------------------------------------------------------

    /// Make sure `id` has an object id and an order; new metadata is dirty
    fn assign(&mut self, id: NodeId) -> Result<SyncMetadata> {
        let local_id = id.local_id();
        if let Some(meta) = self.objects.get(KIND, &local_id)? {
            if meta.order.as_deref().is_some_and(|order| !order.is_empty()) {
                return Ok(meta);
            }
        }

        let order = self.position_order(id)?;
        let object_id = self.objects.get_or_create_object_id(KIND, &local_id)?;
        let parent = self
            .tree
            .parent(id)
            .ok_or_else(|| Error::Consistency(format!("node {id} has no parent")))?;
        let mut meta = self.objects.get(KIND, &local_id)?.unwrap_or_default();
        meta.object_id = object_id;
        meta.parent_object_id = self.parent_object_id(parent)?;
        meta.order = Some(order);
        meta.sync_timestamp = None;
        meta.last_send_time = None;
        self.objects.save_metadata(KIND, &local_id, &meta)?;
        Ok(meta)
    }

    /// Recompute parent link and order for a node at its current position
    fn place(&mut self, id: NodeId) -> Result<()> {
        let local_id = id.local_id();
        let order = self.position_order(id)?;
        let object_id = self.objects.get_or_create_object_id(KIND, &local_id)?;
        let parent = self
            .tree
            .parent(id)
            .ok_or_else(|| Error::Consistency(format!("node {id} has no parent")))?;

        let mut meta = self.objects.get(KIND, &local_id)?.unwrap_or_default();
        meta.object_id = object_id;
        meta.parent_object_id = self.parent_object_id(parent)?;
        meta.order = Some(order);
        meta.sync_timestamp = None;
        meta.last_send_time = None;
        self.objects.save_metadata(KIND, &local_id, &meta)?;
        tracing::debug!(node = %id, order = ?meta.order, "Placed local node");
        Ok(())
    }

    /// Place `id` and give every descendant that lacks metadata an order
    fn place_subtree(&mut self, id: NodeId) -> Result<()> {
        self.place(id)?;
        for child in self.tree.descendants(id) {
            self.assign(child)?;
        }
        Ok(())
    }

    /// Give every child of `parent` the key of its new position
    fn renumber_children(&mut self, parent: NodeId) -> Result<()> {
        let parent_order = self.folder_order(parent)?;

        for (index, child) in self.tree.children(parent).to_vec().into_iter().enumerate() {
            let key = order::for_position(&parent_order, index, None, None);
            let meta = self.assign(child)?;
            if meta.order.as_deref() != Some(key.as_str()) {
                self.objects
                    .save_order(KIND, &child.local_id(), &meta.object_id, &key)?;
                self.objects.mark_dirty(KIND, &child.local_id())?;
            }
        }
        Ok(())
    }

    /// Re-key children whose key is missing, malformed or not strictly
    /// greater than the previous sibling's. The first of two equal keys
    /// keeps it, so with siblings laid out by `(order, object_id)` the
    /// greater object id is the one re-keyed.
    fn repair_sibling_orders(&mut self, parents: &BTreeSet<NodeId>) -> Result<()> {
        for parent in parents.iter().copied() {
            if self.tree.node(parent).is_none() || !self.is_tracked_folder(parent) {
                continue;
            }
            let parent_order = self.folder_order(parent)?;
            let children = self.tree.children(parent).to_vec();

            let mut prev: Option<String> = None;
            for (index, child) in children.iter().copied().enumerate() {
                let current = self.stored_order(child)?;
                let in_place = current.as_deref().is_some_and(|key| {
                    order::is_valid(key)
                        && prev
                            .as_deref()
                            .map_or(true, |p| order::compare(p, key) == Ordering::Less)
                });
                if in_place {
                    prev = current;
                    continue;
                }

                let next = self.next_valid_order(&children[index + 1..], prev.as_deref())?;
                let key = order::between(prev.as_deref(), next.as_deref(), &parent_order)
                    .or_else(|| order::between(prev.as_deref(), None, &parent_order))
                    .ok_or_else(|| {
                        Error::Consistency(format!("no order key fits after {prev:?}"))
                    })?;
                let meta = self.assign(child)?;
                self.objects
                    .save_order(KIND, &child.local_id(), &meta.object_id, &key)?;
                self.objects.mark_dirty(KIND, &child.local_id())?;
                tracing::debug!(node = %child, %key, "Repaired sibling order");
                prev = Some(key);
            }
        }
        Ok(())
    }

    fn next_valid_order(&self, rest: &[NodeId], after: Option<&str>) -> Result<Option<String>> {
        for sibling in rest {
            if let Some(key) = self.stored_order(*sibling)? {
                let greater = order::is_valid(&key)
                    && after.map_or(true, |p| order::compare(p, &key) == Ordering::Less);
                if greater {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    /// Clone a removed subtree under the tombstone root so its deletion can
    /// be sent. Metadata moves to the clones with the sync state cleared;
    /// nodes that never had metadata are dropped.
    fn tombstone(&mut self, removed: &RemovedNode) -> Result<()> {
        let deleted = self.tree.permanent().deleted;
        self.tombstone_into(removed, deleted)
    }

    fn tombstone_into(&mut self, removed: &RemovedNode, parent: NodeId) -> Result<()> {
        let local_id = removed.id.local_id();
        let Some(mut meta) = self.objects.get(KIND, &local_id)? else {
            for child in &removed.children {
                self.tombstone_into(child, parent)?;
            }
            return Ok(());
        };
        self.objects.delete_by_local_id(KIND, &local_id)?;

        let index = self.tree.children(parent).len();
        let clone = match &removed.kind {
            NodeKind::Folder => self.tree.add_folder(parent, index, &removed.title)?,
            NodeKind::Url { url } => {
                self.tree
                    .add_url(parent, index, &removed.title, url, removed.date_added)?
            }
        };
        meta.sync_timestamp = None;
        meta.last_send_time = None;
        self.objects.save_metadata(KIND, &clone.local_id(), &meta)?;
        tracing::debug!(node = %removed.id, object_id = %meta.object_id, "Tombstoned node");

        for child in &removed.children {
            self.tombstone_into(child, clone)?;
        }
        Ok(())
    }

    /// Drop the mappings of a removed subtree without tombstoning it
    fn forget_subtree(&self, removed: &RemovedNode) -> Result<()> {
        self.objects
            .delete_by_local_id(KIND, &removed.id.local_id())?;
        for child in &removed.children {
            self.forget_subtree(child)?;
        }
        Ok(())
    }

    /// Remove a node and its mappings without producing any event or tombstone
    fn remove_silently(&mut self, id: NodeId) -> Result<()> {
        let removed = self.tree.remove(id)?;
        self.forget_subtree(&removed)
    }
}
