//! marksync-core - bookmark sync engine
//!
//! This crate contains the order-key arithmetic, the sync metadata store,
//! the change processor reconciling a local bookmark tree with remote
//! records, the device registry and the sync service driving it all
//! against a relay.

pub mod config;
pub mod db;
pub mod devices;
pub mod error;
pub mod models;
pub mod order;
pub mod processor;
pub mod state;
pub mod sync;
pub mod tree;
pub mod util;

pub use config::{Platform, SyncConfig};
pub use devices::{ChainChange, DeviceRegistry};
pub use error::{Error, Result};
pub use models::{Action, Category, SyncDevice, SyncPrefs, SyncRecord};
pub use processor::{ApplyStats, ChangeProcessor, RootOrders};
pub use state::SyncState;
pub use sync::{
    DirRelay, MemoryRelay, SetupOutcome, SyncClient, SyncService, TickOutcome, TickReport,
};
pub use tree::{BookmarkTree, MemoryTree, NodeId};
