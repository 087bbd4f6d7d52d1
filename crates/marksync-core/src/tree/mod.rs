//! Bookmark tree seam.
//!
//! The sync core never owns bookmark nodes. It reads and mutates the host
//! tree through [`BookmarkTree`] and learns about user edits from the
//! [`TreeEvent`]s the tree queues up.

mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryTree;

/// Local node identity, stable for the lifetime of one device's tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Key used for this node in the object map
    pub fn local_id(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Folder or leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    Url { url: String },
}

/// A node in the bookmark tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    /// Creation timestamp (Unix ms)
    pub date_added: i64,
    #[serde(default)]
    pub favicon: Option<String>,
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

impl BookmarkNode {
    pub const fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn url(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Url { url } => Some(url),
            NodeKind::Folder => None,
        }
    }
}

/// Nodes that exist in every tree and are never synced themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermanentNodes {
    pub root: NodeId,
    pub bookmark_bar: NodeId,
    pub other: NodeId,
    pub mobile: NodeId,
    /// Hidden tombstone folder
    pub deleted: NodeId,
    /// Hidden folder for records whose parent has not arrived yet
    pub pending: NodeId,
}

impl PermanentNodes {
    pub fn contains(&self, id: NodeId) -> bool {
        self.all().contains(&id)
    }

    /// Visible roots whose descendants are synced
    pub const fn tracked(&self) -> [NodeId; 3] {
        [self.bookmark_bar, self.other, self.mobile]
    }

    pub const fn all(&self) -> [NodeId; 6] {
        [
            self.root,
            self.bookmark_bar,
            self.other,
            self.mobile,
            self.deleted,
            self.pending,
        ]
    }
}

/// Snapshot of a subtree that has already been removed from the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    pub date_added: i64,
    pub favicon: Option<String>,
    pub children: Vec<RemovedNode>,
}

/// A change the tree reports after it happened.
///
/// Indices are positions at the time of the change; handlers that run later
/// should look nodes up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    NodeAdded {
        node: NodeId,
        parent: NodeId,
        index: usize,
    },
    NodeRemoved {
        parent: NodeId,
        index: usize,
        node: RemovedNode,
    },
    NodeChanged {
        node: NodeId,
    },
    NodeMoved {
        node: NodeId,
        old_parent: NodeId,
        old_index: usize,
        new_parent: NodeId,
        new_index: usize,
    },
    ChildrenReordered {
        node: NodeId,
    },
    AllNodesRemoved {
        removed: Vec<RemovedNode>,
    },
}

/// Observer + mutation interface of the host bookmark tree
pub trait BookmarkTree {
    fn permanent(&self) -> PermanentNodes;

    fn node(&self, id: NodeId) -> Option<&BookmarkNode>;

    /// Add a folder at `index` (clamped) under `parent`
    fn add_folder(&mut self, parent: NodeId, index: usize, title: &str) -> Result<NodeId>;

    /// Add a leaf at `index` (clamped) under `parent`
    fn add_url(
        &mut self,
        parent: NodeId,
        index: usize,
        title: &str,
        url: &str,
        date_added: i64,
    ) -> Result<NodeId>;

    fn set_title(&mut self, id: NodeId, title: &str) -> Result<()>;

    fn set_url(&mut self, id: NodeId, url: &str) -> Result<()>;

    fn set_date_added(&mut self, id: NodeId, date_added: i64) -> Result<()>;

    fn set_favicon(&mut self, id: NodeId, favicon: Option<&str>) -> Result<()>;

    /// Move `id` so that it ends up at `index` (clamped) among the children
    /// of `new_parent`
    fn move_node(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> Result<()>;

    fn remove(&mut self, id: NodeId) -> Result<RemovedNode>;

    /// Replace the child order of `parent` with `order`, a permutation of
    /// its current children
    fn reorder_children(&mut self, parent: NodeId, order: &[NodeId]) -> Result<()>;

    /// Remove every user node under the visible roots
    fn remove_all_user_nodes(&mut self);

    /// Drain the events queued since the last call
    fn take_events(&mut self) -> Vec<TreeEvent>;

    /// While paused, mutations queue no events
    fn set_events_paused(&mut self, paused: bool);

    fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    fn index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    fn has_ancestor(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Pre-order descendants of `id`, excluding `id`
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }
}
