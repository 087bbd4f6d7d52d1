use marksync_core::BookmarkTree;

use crate::commands::common::{
    edit_tree, insertion_index, normalize_title, require_folder, require_node, Workspace,
};
use crate::error::CliError;

pub fn run_rename(workspace: &Workspace, id: i64, title: &str) -> Result<(), CliError> {
    let title = normalize_title(title).ok_or(CliError::EmptyTitle)?;
    edit_tree(workspace, |tree| {
        let node = require_node(tree, id)?;
        Ok(tree.set_title(node, &title)?)
    })?;
    println!("{id}");
    Ok(())
}

pub fn run_move(
    workspace: &Workspace,
    id: i64,
    parent: i64,
    index: Option<usize>,
) -> Result<(), CliError> {
    edit_tree(workspace, |tree| {
        let node = require_node(tree, id)?;
        let parent = require_folder(tree, parent)?;
        let index = insertion_index(tree, parent, index);
        Ok(tree.move_node(node, parent, index)?)
    })?;
    println!("{id}");
    Ok(())
}
