use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "Keep a bookmark tree in sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding this device's bookmarks and sync database
    #[arg(long, global = true, value_name = "PATH", env = "MARKSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Relay directory shared by every device in the chain
    #[arg(long, global = true, value_name = "PATH", env = "MARKSYNC_RELAY")]
    pub relay: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or join a sync chain
    #[command(subcommand)]
    Setup(SetupCommands),
    /// Print the sync words of the current chain
    Words,
    /// Show sync state and settings
    Status,
    /// Turn sync or one of its categories on or off
    Toggle {
        #[arg(value_enum)]
        setting: SyncSetting,
        #[arg(value_enum)]
        value: Switch,
    },
    /// Add a bookmark
    Add {
        url: String,
        /// Bookmark title (defaults to the URL)
        #[arg(short, long)]
        title: Option<String>,
        /// Parent folder id (defaults to the bookmarks bar)
        #[arg(short, long)]
        parent: Option<i64>,
        /// Position among the parent's children (defaults to the end)
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// Create a folder
    Mkdir {
        title: String,
        #[arg(short, long)]
        parent: Option<i64>,
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// Rename a bookmark or folder
    Rename { id: i64, title: String },
    /// Move a bookmark or folder
    #[command(alias = "mv")]
    Move {
        id: i64,
        /// Destination folder id
        #[arg(short, long)]
        parent: i64,
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// Delete a bookmark or folder
    #[command(alias = "rm")]
    Delete { id: i64 },
    /// Show the bookmark tree
    #[command(alias = "ls")]
    List {
        /// Include sync object ids and order keys
        #[arg(long)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Exchange records with the relay
    Sync {
        /// Keep syncing until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// List devices in the sync chain
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Remove a device from the sync chain by its object id
    Forget { object_id: String },
    /// Leave the sync chain and drop all sync metadata
    Reset,
    /// Order key utilities
    #[command(subcommand)]
    Order(OrderCommands),
}

#[derive(Subcommand)]
pub enum SetupCommands {
    /// Start a new chain on this device
    New {
        /// Name other devices see for this one
        #[arg(long)]
        name: Option<String>,
    },
    /// Join an existing chain with its sync words
    Join {
        words: Vec<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Sort order keys the way siblings are sorted
    Sort { keys: Vec<String> },
    /// Mint a key strictly between two siblings of a parent
    Between {
        /// Order key of the parent folder
        parent: String,
        /// Key of the sibling before the new position
        #[arg(long)]
        after: Option<String>,
        /// Key of the sibling after the new position
        #[arg(long)]
        before: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SyncSetting {
    Sync,
    Bookmarks,
    History,
    Preferences,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}
