use marksync_core::BookmarkTree;

use crate::commands::common::{edit_tree, require_node, Workspace};
use crate::error::CliError;

pub fn run_delete(workspace: &Workspace, id: i64) -> Result<(), CliError> {
    let removed = edit_tree(workspace, |tree| {
        let node = require_node(tree, id)?;
        Ok(tree.remove(node)?)
    })?;
    println!("Deleted {} ({})", removed.id, removed.title);
    Ok(())
}
