//! Relay clients.
//!
//! A relay stores records per chain and category and hands them back in the
//! order it received them. It stamps every stored record with a strictly
//! increasing `sync_timestamp`; fetches ask for records stamped after a
//! given time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Category, SyncRecord};
use crate::util::unix_millis_now;

/// Transport seam between the sync service and a relay
#[allow(async_fn_in_trait)]
pub trait SyncClient {
    /// Bind to the chain `chain_id`. Without `create`, a chain the relay has
    /// never seen is rejected with [`Error::SyncSetup`].
    async fn open_chain(&mut self, chain_id: &str, create: bool) -> Result<()>;

    /// Forget the bound chain
    fn close_chain(&mut self);

    /// Records of `category` stamped after `start_at`, oldest first, at most `max`
    async fn fetch_records(
        &self,
        category: Category,
        start_at: i64,
        max: usize,
    ) -> Result<Vec<SyncRecord>>;

    async fn send_records(&self, category: Category, records: &[SyncRecord]) -> Result<()>;
}

fn next_stamp(last: i64) -> i64 {
    unix_millis_now().max(last + 1)
}

fn no_chain() -> Error {
    Error::SyncSetup("no sync chain is open".into())
}

#[derive(Debug, Default)]
struct RelayState {
    chains: HashMap<String, HashMap<Category, Vec<SyncRecord>>>,
    last_stamp: i64,
    offline: bool,
}

/// In-process relay shared by several device handles
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
    chain: Option<String>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle on the same relay, not bound to any chain
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            chain: None,
        }
    }

    /// Make every request fail with a transport error until switched back
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Every record stored for `category` in the bound chain
    pub async fn stored(&self, category: Category) -> Vec<SyncRecord> {
        let state = self.state.lock().await;
        self.chain
            .as_ref()
            .and_then(|chain| state.chains.get(chain))
            .and_then(|categories| categories.get(&category))
            .cloned()
            .unwrap_or_default()
    }
}

impl SyncClient for MemoryRelay {
    async fn open_chain(&mut self, chain_id: &str, create: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(Error::Transport("relay offline".into()));
        }
        if !state.chains.contains_key(chain_id) {
            if !create {
                return Err(Error::SyncSetup("unknown sync chain".into()));
            }
            state.chains.insert(chain_id.to_string(), HashMap::new());
        }
        drop(state);
        self.chain = Some(chain_id.to_string());
        Ok(())
    }

    fn close_chain(&mut self) {
        self.chain = None;
    }

    async fn fetch_records(
        &self,
        category: Category,
        start_at: i64,
        max: usize,
    ) -> Result<Vec<SyncRecord>> {
        let chain = self.chain.as_ref().ok_or_else(no_chain)?;
        let state = self.state.lock().await;
        if state.offline {
            return Err(Error::Transport("relay offline".into()));
        }
        let records = state
            .chains
            .get(chain)
            .and_then(|categories| categories.get(&category))
            .map(|records| {
                records
                    .iter()
                    .filter(|record| record.sync_timestamp.unwrap_or_default() > start_at)
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn send_records(&self, category: Category, records: &[SyncRecord]) -> Result<()> {
        let chain = self.chain.as_ref().ok_or_else(no_chain)?;
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(Error::Transport("relay offline".into()));
        }

        let mut stamp = state.last_stamp;
        let mut stamped = Vec::with_capacity(records.len());
        for record in records {
            stamp = next_stamp(stamp);
            let mut record = record.clone();
            record.sync_timestamp = Some(stamp);
            stamped.push(record);
        }
        state.last_stamp = stamp;
        state
            .chains
            .entry(chain.clone())
            .or_default()
            .entry(category)
            .or_default()
            .extend(stamped);
        Ok(())
    }
}

/// Relay backed by a shared directory: one sub-directory per chain and one
/// JSON-lines file per category
#[derive(Debug, Clone)]
pub struct DirRelay {
    root: PathBuf,
    chain_dir: Option<PathBuf>,
}

impl DirRelay {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chain_dir: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_file(&self, category: Category) -> Result<PathBuf> {
        let dir = self.chain_dir.as_ref().ok_or_else(no_chain)?;
        Ok(dir.join(format!("{}.jsonl", category.as_str().to_ascii_lowercase())))
    }

    async fn read_records(path: &Path) -> Result<Vec<SyncRecord>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match SyncRecord::from_json(line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(path = %path.display(), line = line_no + 1, %error, "Skipping malformed relay record");
                }
            }
        }
        Ok(records)
    }
}

impl SyncClient for DirRelay {
    async fn open_chain(&mut self, chain_id: &str, create: bool) -> Result<()> {
        let dir = self.root.join(chain_id);
        if !tokio::fs::try_exists(&dir).await? {
            if !create {
                return Err(Error::SyncSetup("unknown sync chain".into()));
            }
            tokio::fs::create_dir_all(&dir).await?;
        }
        self.chain_dir = Some(dir);
        Ok(())
    }

    fn close_chain(&mut self) {
        self.chain_dir = None;
    }

    async fn fetch_records(
        &self,
        category: Category,
        start_at: i64,
        max: usize,
    ) -> Result<Vec<SyncRecord>> {
        let path = self.category_file(category)?;
        let records = Self::read_records(&path)
            .await?
            .into_iter()
            .filter(|record| record.sync_timestamp.unwrap_or_default() > start_at)
            .take(max)
            .collect();
        Ok(records)
    }

    async fn send_records(&self, category: Category, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.category_file(category)?;
        let mut stamp = Self::read_records(&path)
            .await?
            .iter()
            .filter_map(|record| record.sync_timestamp)
            .max()
            .unwrap_or_default();

        let mut out = String::new();
        for record in records {
            stamp = next_stamp(stamp);
            let mut record = record.clone();
            record.sync_timestamp = Some(stamp);
            out.push_str(&record.to_json()?);
            out.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
