use std::fs;
use std::path::{Path, PathBuf};

use marksync_core::db::Database;
use marksync_core::{
    BookmarkTree, DirRelay, MemoryTree, NodeId, SyncConfig, SyncService, SyncState, TickReport,
};

use crate::error::CliError;

pub const TREE_FILE: &str = "bookmarks.json";
pub const DATABASE_FILE: &str = "marksync.db";
const RELAY_DIR: &str = "relay";

pub type Service = SyncService<DirRelay, MemoryTree>;

/// Where one device keeps its state and which relay it talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub data_dir: PathBuf,
    pub relay_dir: PathBuf,
}

impl Workspace {
    pub fn resolve(data_dir: Option<PathBuf>, relay: Option<PathBuf>) -> Result<Self, CliError> {
        let data_dir = data_dir
            .or_else(|| dirs::data_dir().map(|dir| dir.join("marksync")))
            .ok_or_else(|| {
                CliError::Config("cannot determine a data directory, pass --data-dir".to_string())
            })?;
        Ok(Self::new(data_dir, relay))
    }

    pub fn new(data_dir: PathBuf, relay: Option<PathBuf>) -> Self {
        let relay_dir = relay.unwrap_or_else(|| data_dir.join(RELAY_DIR));
        Self {
            data_dir,
            relay_dir,
        }
    }

    pub fn tree_path(&self) -> PathBuf {
        self.data_dir.join(TREE_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

pub fn load_tree(path: &Path) -> Result<MemoryTree, CliError> {
    if !path.exists() {
        return Ok(MemoryTree::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write through a temporary file so an interrupted save leaves the old tree
pub fn save_tree(path: &Path, tree: &MemoryTree) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(tree)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn open_service(workspace: &Workspace) -> Result<Service, CliError> {
    fs::create_dir_all(&workspace.data_dir)?;
    let tree = load_tree(&workspace.tree_path())?;
    let db = Database::open(workspace.database_path())?;
    let relay = DirRelay::new(&workspace.relay_dir);
    Ok(SyncService::new(db, tree, relay, SyncConfig::default())?)
}

pub fn save_service(workspace: &Workspace, service: &Service) -> Result<(), CliError> {
    save_tree(&workspace.tree_path(), service.tree())
}

/// Apply a tree edit, record it for the next sync and persist the tree
pub fn edit_tree<R>(
    workspace: &Workspace,
    edit: impl FnOnce(&mut MemoryTree) -> Result<R, CliError>,
) -> Result<R, CliError> {
    let mut service = open_service(workspace)?;
    let result = edit(service.tree_mut())?;
    service.handle_local_changes()?;
    save_service(workspace, &service)?;
    Ok(result)
}

pub fn require_node(tree: &MemoryTree, id: i64) -> Result<NodeId, CliError> {
    let node = NodeId(id);
    if tree.node(node).is_none() {
        return Err(CliError::NodeNotFound(id));
    }
    Ok(node)
}

pub fn require_folder(tree: &MemoryTree, id: i64) -> Result<NodeId, CliError> {
    let node = require_node(tree, id)?;
    if tree.node(node).is_some_and(|found| !found.is_folder()) {
        return Err(CliError::NotAFolder(id));
    }
    Ok(node)
}

/// Explicit parent folder, or the bookmarks bar
pub fn parent_or_bar(tree: &MemoryTree, parent: Option<i64>) -> Result<NodeId, CliError> {
    parent.map_or_else(
        || Ok(tree.permanent().bookmark_bar),
        |id| require_folder(tree, id),
    )
}

/// Requested index clamped to the end of `parent`
pub fn insertion_index(tree: &MemoryTree, parent: NodeId, index: Option<usize>) -> usize {
    let len = tree.children(parent).len();
    index.map_or(len, |index| index.min(len))
}

pub fn normalize_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_state(state: SyncState) -> &'static str {
    match state {
        SyncState::NotConfigured => "not configured",
        SyncState::Initializing => "initializing",
        SyncState::Active => "active",
        SyncState::Disabled => "disabled",
    }
}

pub fn format_tick_report(report: &TickReport) -> String {
    let applied = &report.applied;
    let mut line = format!(
        "Fetched {} records: {} created, {} updated, {} deleted, {} confirmed, {} parked, {} ignored. Sent {} records.",
        report.fetched,
        applied.created,
        applied.updated,
        applied.deleted,
        applied.confirmed,
        applied.parked,
        applied.ignored,
        report.sent
    );
    if report.chain_reset {
        line.push_str(" This device left the sync chain.");
    }
    line
}
