use marksync_core::db::{ObjectKind, ObjectMap, SqliteObjectMap};
use marksync_core::{BookmarkTree, MemoryTree, NodeId};
use serde::Serialize;

use crate::commands::common::{open_service, Workspace};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TreeListItem {
    pub id: i64,
    pub depth: usize,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub folder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

pub fn run_list(workspace: &Workspace, verbose: bool, as_json: bool) -> Result<(), CliError> {
    let service = open_service(workspace)?;
    let objects = SqliteObjectMap::new(service.database().connection());
    let items = collect_items(service.tree(), &objects)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_tree_lines(&items, verbose) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Depth-first listing of the three visible roots and everything below them
pub fn collect_items(
    tree: &MemoryTree,
    objects: &impl ObjectMap,
) -> Result<Vec<TreeListItem>, CliError> {
    let mut items = Vec::new();
    for root in tree.permanent().tracked() {
        push_subtree(tree, objects, root, 0, &mut items)?;
    }
    Ok(items)
}

fn push_subtree(
    tree: &MemoryTree,
    objects: &impl ObjectMap,
    id: NodeId,
    depth: usize,
    items: &mut Vec<TreeListItem>,
) -> Result<(), CliError> {
    let Some(node) = tree.node(id) else {
        return Ok(());
    };
    let local_id = id.local_id();
    let meta = objects.get(ObjectKind::Bookmark, &local_id)?;
    items.push(TreeListItem {
        id: id.0,
        depth,
        title: node.title.clone(),
        url: node.url().map(str::to_string),
        folder: node.is_folder(),
        object_id: meta.as_ref().map(|meta| meta.object_id.clone()),
        order: meta.and_then(|meta| meta.order),
    });
    for child in tree.children(id) {
        push_subtree(tree, objects, *child, depth + 1, items)?;
    }
    Ok(())
}

pub fn format_tree_lines(items: &[TreeListItem], verbose: bool) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let indent = "  ".repeat(item.depth);
            let marker = if item.folder { "+" } else { "-" };
            let mut line = format!("{indent}{marker} [{}] {}", item.id, item.title);
            if let Some(url) = &item.url {
                line.push_str(&format!(" <{url}>"));
            }
            if verbose {
                if let Some(order) = &item.order {
                    line.push_str(&format!("  order={order}"));
                }
                if let Some(object_id) = &item.object_id {
                    line.push_str(&format!("  object={object_id}"));
                }
            }
            line
        })
        .collect()
}
