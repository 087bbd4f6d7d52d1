use marksync_core::util::unix_millis_now;
use marksync_core::{BookmarkTree, NodeId};

use crate::commands::common::{
    edit_tree, insertion_index, normalize_title, parent_or_bar, Workspace,
};
use crate::error::CliError;

pub fn run_add(
    workspace: &Workspace,
    url: &str,
    title: Option<&str>,
    parent: Option<i64>,
    index: Option<usize>,
) -> Result<(), CliError> {
    let title = title.and_then(normalize_title).unwrap_or_else(|| url.to_string());
    let id = add_url(workspace, url, &title, parent, index)?;
    println!("Added bookmark {id}");
    Ok(())
}

pub fn run_mkdir(
    workspace: &Workspace,
    title: &str,
    parent: Option<i64>,
    index: Option<usize>,
) -> Result<(), CliError> {
    let title = normalize_title(title).ok_or(CliError::EmptyTitle)?;
    let id = edit_tree(workspace, |tree| {
        let parent = parent_or_bar(tree, parent)?;
        let index = insertion_index(tree, parent, index);
        Ok(tree.add_folder(parent, index, &title)?)
    })?;
    println!("Created folder {id}");
    Ok(())
}

pub fn add_url(
    workspace: &Workspace,
    url: &str,
    title: &str,
    parent: Option<i64>,
    index: Option<usize>,
) -> Result<NodeId, CliError> {
    edit_tree(workspace, |tree| {
        let parent = parent_or_bar(tree, parent)?;
        let index = insertion_index(tree, parent, index);
        Ok(tree.add_url(parent, index, title, url, unix_millis_now())?)
    })
}
