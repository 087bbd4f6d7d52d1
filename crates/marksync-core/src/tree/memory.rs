//! In-memory bookmark tree

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BookmarkNode, BookmarkTree, NodeId, NodeKind, PermanentNodes, RemovedNode, TreeEvent};
use crate::error::{Error, Result};

/// Serializable bookmark tree used by tests and the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTree {
    nodes: BTreeMap<NodeId, BookmarkNode>,
    permanent: PermanentNodes,
    next_id: i64,
    #[serde(skip)]
    events: Vec<TreeEvent>,
    #[serde(skip)]
    paused: bool,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Create a tree containing only the permanent nodes
    pub fn new() -> Self {
        let permanent = PermanentNodes {
            root: NodeId(1),
            bookmark_bar: NodeId(2),
            other: NodeId(3),
            mobile: NodeId(4),
            deleted: NodeId(5),
            pending: NodeId(6),
        };
        let mut tree = Self {
            nodes: BTreeMap::new(),
            permanent,
            next_id: 7,
            events: Vec::new(),
            paused: false,
        };

        tree.insert_raw(permanent.root, None, "root");
        for (id, title) in [
            (permanent.bookmark_bar, "Bookmarks bar"),
            (permanent.other, "Other bookmarks"),
            (permanent.mobile, "Mobile bookmarks"),
            (permanent.deleted, "Deleted"),
            (permanent.pending, "Pending"),
        ] {
            tree.insert_raw(id, Some(permanent.root), title);
            if let Some(root) = tree.nodes.get_mut(&permanent.root) {
                root.children.push(id);
            }
        }
        tree
    }

    fn insert_raw(&mut self, id: NodeId, parent: Option<NodeId>, title: &str) {
        self.nodes.insert(
            id,
            BookmarkNode {
                id,
                kind: NodeKind::Folder,
                title: title.to_string(),
                date_added: 0,
                favicon: None,
                parent,
                children: Vec::new(),
            },
        );
    }

    /// Every leaf with the given URL, in id order
    pub fn find_by_url(&self, url: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.url() == Some(url))
            .map(|node| node.id)
            .collect()
    }

    /// Every node with the given title, in id order
    pub fn find_by_title(&self, title: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.title == title)
            .map(|node| node.id)
            .collect()
    }

    fn emit(&mut self, event: TreeEvent) {
        if !self.paused {
            self.events.push(event);
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut BookmarkNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    fn require_folder(&self, id: NodeId) -> Result<()> {
        match self.nodes.get(&id) {
            Some(node) if node.is_folder() => Ok(()),
            Some(_) => Err(Error::InvalidInput(format!("node {id} is not a folder"))),
            None => Err(Error::NotFound(format!("node {id}"))),
        }
    }

    fn require_user_node(&self, id: NodeId) -> Result<()> {
        if self.permanent.contains(id) {
            return Err(Error::InvalidInput(format!(
                "node {id} is a permanent node"
            )));
        }
        if !self.nodes.contains_key(&id) {
            return Err(Error::NotFound(format!("node {id}")));
        }
        Ok(())
    }

    fn insert_child(&mut self, parent: NodeId, index: usize, node: BookmarkNode) -> Result<usize> {
        let id = node.id;
        self.nodes.insert(id, node);
        let parent_node = self.node_mut(parent)?;
        let index = index.min(parent_node.children.len());
        parent_node.children.insert(index, id);
        Ok(index)
    }

    fn add_node(&mut self, parent: NodeId, index: usize, kind: NodeKind, title: &str, date_added: i64) -> Result<NodeId> {
        self.require_folder(parent)?;
        if parent == self.permanent.root {
            return Err(Error::InvalidInput(
                "cannot add nodes directly under the root".into(),
            ));
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;
        let index = self.insert_child(
            parent,
            index,
            BookmarkNode {
                id,
                kind,
                title: title.to_string(),
                date_added,
                favicon: None,
                parent: Some(parent),
                children: Vec::new(),
            },
        )?;
        self.emit(TreeEvent::NodeAdded {
            node: id,
            parent,
            index,
        });
        Ok(id)
    }

    fn detach(&mut self, id: NodeId) -> Result<(NodeId, usize)> {
        let parent = self
            .nodes
            .get(&id)
            .and_then(|node| node.parent)
            .ok_or_else(|| Error::NotFound(format!("parent of node {id}")))?;
        let parent_node = self.node_mut(parent)?;
        let index = parent_node
            .children
            .iter()
            .position(|child| *child == id)
            .ok_or_else(|| Error::Consistency(format!("node {id} missing from its parent")))?;
        parent_node.children.remove(index);
        Ok((parent, index))
    }

    fn snapshot_and_drop(&mut self, id: NodeId) -> Option<RemovedNode> {
        let node = self.nodes.remove(&id)?;
        let children = node
            .children
            .iter()
            .filter_map(|child| self.snapshot_and_drop(*child))
            .collect();
        Some(RemovedNode {
            id: node.id,
            kind: node.kind,
            title: node.title,
            date_added: node.date_added,
            favicon: node.favicon,
            children,
        })
    }
}

impl BookmarkTree for MemoryTree {
    fn permanent(&self) -> PermanentNodes {
        self.permanent
    }

    fn node(&self, id: NodeId) -> Option<&BookmarkNode> {
        self.nodes.get(&id)
    }

    fn add_folder(&mut self, parent: NodeId, index: usize, title: &str) -> Result<NodeId> {
        let now = chrono::Utc::now().timestamp_millis();
        self.add_node(parent, index, NodeKind::Folder, title, now)
    }

    fn add_url(
        &mut self,
        parent: NodeId,
        index: usize,
        title: &str,
        url: &str,
        date_added: i64,
    ) -> Result<NodeId> {
        let kind = NodeKind::Url {
            url: url.to_string(),
        };
        self.add_node(parent, index, kind, title, date_added)
    }

    fn set_title(&mut self, id: NodeId, title: &str) -> Result<()> {
        self.require_user_node(id)?;
        let node = self.node_mut(id)?;
        if node.title == title {
            return Ok(());
        }
        node.title = title.to_string();
        self.emit(TreeEvent::NodeChanged { node: id });
        Ok(())
    }

    fn set_url(&mut self, id: NodeId, url: &str) -> Result<()> {
        self.require_user_node(id)?;
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Url { url: current } if current == url => return Ok(()),
            NodeKind::Url { url: current } => *current = url.to_string(),
            NodeKind::Folder => {
                return Err(Error::InvalidInput(format!("node {id} is a folder")));
            }
        }
        self.emit(TreeEvent::NodeChanged { node: id });
        Ok(())
    }

    fn set_date_added(&mut self, id: NodeId, date_added: i64) -> Result<()> {
        self.require_user_node(id)?;
        let node = self.node_mut(id)?;
        if node.date_added == date_added {
            return Ok(());
        }
        node.date_added = date_added;
        self.emit(TreeEvent::NodeChanged { node: id });
        Ok(())
    }

    fn set_favicon(&mut self, id: NodeId, favicon: Option<&str>) -> Result<()> {
        self.require_user_node(id)?;
        let node = self.node_mut(id)?;
        if node.favicon.as_deref() == favicon {
            return Ok(());
        }
        node.favicon = favicon.map(str::to_string);
        self.emit(TreeEvent::NodeChanged { node: id });
        Ok(())
    }

    fn move_node(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> Result<()> {
        self.require_user_node(id)?;
        self.require_folder(new_parent)?;
        if new_parent == self.permanent.root {
            return Err(Error::InvalidInput(
                "cannot move nodes directly under the root".into(),
            ));
        }
        if new_parent == id || self.has_ancestor(new_parent, id) {
            return Err(Error::InvalidInput(format!(
                "cannot move node {id} into its own subtree"
            )));
        }

        let (old_parent, old_index) = self.detach(id)?;
        let parent_node = self.node_mut(new_parent)?;
        let new_index = index.min(parent_node.children.len());
        parent_node.children.insert(new_index, id);
        self.node_mut(id)?.parent = Some(new_parent);

        if old_parent != new_parent || old_index != new_index {
            self.emit(TreeEvent::NodeMoved {
                node: id,
                old_parent,
                old_index,
                new_parent,
                new_index,
            });
        }
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> Result<RemovedNode> {
        self.require_user_node(id)?;
        let (parent, index) = self.detach(id)?;
        let removed = self
            .snapshot_and_drop(id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        self.emit(TreeEvent::NodeRemoved {
            parent,
            index,
            node: removed.clone(),
        });
        Ok(removed)
    }

    fn reorder_children(&mut self, parent: NodeId, order: &[NodeId]) -> Result<()> {
        let node = self.node_mut(parent)?;
        let mut current = node.children.clone();
        let mut requested = order.to_vec();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(Error::InvalidInput(format!(
                "new order is not a permutation of the children of {parent}"
            )));
        }
        node.children = order.to_vec();
        self.emit(TreeEvent::ChildrenReordered { node: parent });
        Ok(())
    }

    fn remove_all_user_nodes(&mut self) {
        let mut removed = Vec::new();
        for root in self.permanent.tracked() {
            let children = self.children(root).to_vec();
            if let Some(root_node) = self.nodes.get_mut(&root) {
                root_node.children.clear();
            }
            removed.extend(children.into_iter().filter_map(|child| self.snapshot_and_drop(child)));
        }
        self.emit(TreeEvent::AllNodesRemoved { removed });
    }

    fn take_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }

    fn set_events_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}
