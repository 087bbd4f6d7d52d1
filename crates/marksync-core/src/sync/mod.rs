//! Sync service: chain setup, the periodic tick and chain reset.
//!
//! [`SyncService`] owns everything one device needs to take part in a
//! chain: the local database, the bookmark tree, a relay client and the
//! runtime configuration. All of it is driven from a single task through
//! `&mut self`.

mod backoff;
mod client;
mod words;

pub use backoff::Backoff;
pub use client::{DirRelay, MemoryRelay, SyncClient};
pub use words::{chain_id, generate_seed, parse_sync_words, sync_words, SEED_LEN};

use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::db::{
    generate_object_id, Database, PrefsRepository, SqliteObjectMap, SqlitePrefsRepository,
};
use crate::devices::{ChainChange, DeviceRegistry};
use crate::error::{Error, Result};
use crate::models::{Action, Category, SyncDevice, SyncPrefs, SyncRecord};
use crate::processor::{ApplyStats, ChangeProcessor, RootOrders};
use crate::state::SyncState;
use crate::tree::BookmarkTree;
use crate::util::{normalize_device_name, unix_millis_now};

const DEFAULT_DEVICE_NAME: &str = "marksync device";

/// Result of a setup request that was not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Started,
    AlreadyConfigured,
    InProgress,
}

/// What one successful tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub applied: ApplyStats,
    pub sent: usize,
    /// The device registry forced this device out of its chain
    pub chain_reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sync is not configured or switched off
    Idle,
    Synced(TickReport),
    /// The relay could not be reached; try again after the given delay
    Retry(Duration),
}

/// One device's view of a sync chain
pub struct SyncService<C: SyncClient, T: BookmarkTree> {
    db: Database,
    tree: T,
    client: C,
    config: SyncConfig,
    prefs: SyncPrefs,
    chain_open: bool,
    setup_in_progress: bool,
    backoff: Backoff,
    history_cursor: i64,
}

fn change_processor<'a, T: BookmarkTree>(
    tree: &'a mut T,
    objects: &'a SqliteObjectMap<'a>,
    prefs: &SyncPrefs,
    config: &SyncConfig,
) -> ChangeProcessor<'a, T, SqliteObjectMap<'a>> {
    let device_id = prefs.this_device_id.clone().unwrap_or_default();
    let roots = RootOrders::from_base(prefs.bookmarks_base_order.as_deref().unwrap_or_default());
    ChangeProcessor::new(tree, objects, device_id, roots).with_park_orphans(config.park_orphans)
}

fn latest_timestamp(records: &[SyncRecord]) -> Option<i64> {
    records.iter().filter_map(|record| record.sync_timestamp).max()
}

impl<C: SyncClient, T: BookmarkTree> SyncService<C, T> {
    /// Build a service over an opened database; persisted prefs are loaded
    /// immediately, the relay is contacted on the first tick
    pub fn new(db: Database, tree: T, client: C, config: SyncConfig) -> Result<Self> {
        let prefs = SqlitePrefsRepository::new(db.connection()).load()?;
        let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        Ok(Self {
            db,
            tree,
            client,
            config,
            prefs,
            chain_open: false,
            setup_in_progress: false,
            backoff,
            history_cursor: 0,
        })
    }

    pub const fn state(&self) -> SyncState {
        if !self.prefs.is_configured() {
            SyncState::NotConfigured
        } else if !self.prefs.sync_enabled {
            SyncState::Disabled
        } else if self.prefs.last_fetch_time.is_none() {
            SyncState::Initializing
        } else {
            SyncState::Active
        }
    }

    pub const fn prefs(&self) -> &SyncPrefs {
        &self.prefs
    }

    pub fn devices(&self) -> &[SyncDevice] {
        &self.prefs.devices
    }

    pub const fn tree(&self) -> &T {
        &self.tree
    }

    /// Mutable access to the tree; edits are picked up on the next tick
    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn client(&self) -> &C {
        &self.client
    }

    pub const fn database(&self) -> &Database {
        &self.db
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.backoff.failures()
    }

    /// Sync words of the configured chain
    pub fn sync_words(&self) -> Result<Option<String>> {
        self.prefs
            .seed
            .as_deref()
            .map(|seed| {
                hex::decode(seed)
                    .map(|bytes| sync_words(&bytes))
                    .map_err(|e| Error::Format(format!("stored seed: {e}")))
            })
            .transpose()
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Start a fresh chain with this device as its first member
    pub async fn setup_new_chain(&mut self, device_name: Option<String>) -> Result<SetupOutcome> {
        if let Some(outcome) = self.setup_conflict() {
            return Ok(outcome);
        }
        let seed = generate_seed();
        self.setup(&seed, device_name, true).await
    }

    /// Join the chain identified by `words`.
    ///
    /// Words the relay has never seen fail with [`Error::SyncSetup`] and
    /// leave the device unconfigured.
    pub async fn setup_with_sync_words(
        &mut self,
        words: &str,
        device_name: Option<String>,
    ) -> Result<SetupOutcome> {
        if let Some(outcome) = self.setup_conflict() {
            return Ok(outcome);
        }
        let seed = parse_sync_words(words)?;
        self.setup(&seed, device_name, false).await
    }

    fn setup_conflict(&self) -> Option<SetupOutcome> {
        if self.setup_in_progress {
            tracing::info!("Ignoring sync setup: another setup is in progress");
            Some(SetupOutcome::InProgress)
        } else if self.prefs.is_configured() {
            tracing::info!("Ignoring sync setup: already configured");
            Some(SetupOutcome::AlreadyConfigured)
        } else {
            None
        }
    }

    async fn setup(
        &mut self,
        seed: &[u8],
        device_name: Option<String>,
        create: bool,
    ) -> Result<SetupOutcome> {
        self.setup_in_progress = true;
        let result = self.configure(seed, device_name, create).await;
        self.setup_in_progress = false;

        match result {
            Ok(()) => Ok(SetupOutcome::Started),
            Err(error) => {
                tracing::warn!(%error, "Sync setup failed, clearing partial state");
                self.client.close_chain();
                self.chain_open = false;
                self.prefs = SyncPrefs::default();
                SqlitePrefsRepository::new(self.db.connection()).clear()?;
                Err(error)
            }
        }
    }

    async fn configure(
        &mut self,
        seed: &[u8],
        device_name: Option<String>,
        create: bool,
    ) -> Result<()> {
        let chain = chain_id(seed);
        self.client.open_chain(&chain, create).await?;
        self.chain_open = true;

        let device_id = rand::random::<u32>().to_string();
        let base_order = format!("{}.{device_id}.", self.config.platform.order_prefix());
        let prefs = SyncPrefs {
            seed: Some(hex::encode(seed)),
            this_device_id: Some(device_id),
            this_device_name: normalize_device_name(device_name.as_deref())
                .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            this_device_object_id: Some(generate_object_id()),
            sync_enabled: true,
            bookmarks_base_order: Some(base_order),
            ..SyncPrefs::default()
        };
        SqlitePrefsRepository::new(self.db.connection()).save(&prefs)?;
        tracing::info!(
            chain = %chain,
            device_id = prefs.this_device_id.as_deref().unwrap_or_default(),
            created = create,
            "Sync chain configured"
        );
        self.prefs = prefs;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Toggles
    // ------------------------------------------------------------------

    pub fn set_sync_enabled(&mut self, enabled: bool) -> Result<()> {
        self.prefs.sync_enabled = enabled;
        self.save_prefs()
    }

    pub fn set_sync_bookmarks(&mut self, enabled: bool) -> Result<()> {
        self.prefs.sync_bookmarks = enabled;
        self.save_prefs()
    }

    pub fn set_sync_history(&mut self, enabled: bool) -> Result<()> {
        self.prefs.sync_history = enabled;
        self.save_prefs()
    }

    pub fn set_sync_preferences(&mut self, enabled: bool) -> Result<()> {
        self.prefs.sync_preferences = enabled;
        self.save_prefs()
    }

    fn save_prefs(&self) -> Result<()> {
        SqlitePrefsRepository::new(self.db.connection()).save(&self.prefs)
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one sync cycle.
    ///
    /// Transport failures are absorbed into [`TickOutcome::Retry`]; any other
    /// error is returned.
    pub async fn tick(&mut self, now: i64) -> Result<TickOutcome> {
        if !self.prefs.is_configured() || !self.prefs.sync_enabled {
            self.handle_local_changes()?;
            return Ok(TickOutcome::Idle);
        }

        match self.sync_once(now).await {
            Ok(report) => {
                self.backoff.succeed();
                tracing::debug!(?report, "Sync tick complete");
                Ok(TickOutcome::Synced(report))
            }
            Err(error) if error.is_transient() => {
                let delay = self.backoff.fail();
                tracing::warn!(
                    %error,
                    failures = self.backoff.failures(),
                    retry_in_secs = delay.as_secs(),
                    "Sync tick failed"
                );
                Ok(TickOutcome::Retry(delay))
            }
            Err(error) => Err(error),
        }
    }

    async fn sync_once(&mut self, now: i64) -> Result<TickReport> {
        let mut report = TickReport::default();
        self.ensure_chain().await?;

        self.handle_local_changes()?;
        if self.prefs.last_fetch_time.is_none() {
            report.sent += self.send_initial(now).await?;
        }

        let (fetched, change) = self.sync_devices().await?;
        report.fetched += fetched;
        if change != ChainChange::Unchanged {
            report.chain_reset = true;
            return Ok(report);
        }

        if self.prefs.sync_bookmarks {
            let (fetched, applied) = self.sync_bookmarks().await?;
            report.fetched += fetched;
            report.applied += applied;
        }
        if self.prefs.sync_history {
            report.fetched += self.fetch_history().await?;
        }
        if self.prefs.sync_preferences {
            report.fetched += self.fetch_preferences().await?;
        }
        if self.prefs.sync_bookmarks {
            report.sent += self.send_unsynced(now).await?;
        }

        self.prefs.last_fetch_time = Some(now);
        self.save_prefs()?;
        Ok(report)
    }

    async fn ensure_chain(&mut self) -> Result<()> {
        if self.chain_open {
            return Ok(());
        }
        let seed = self
            .prefs
            .seed
            .as_deref()
            .ok_or_else(|| Error::SyncSetup("sync is not configured".into()))?;
        let seed = hex::decode(seed).map_err(|e| Error::Format(format!("stored seed: {e}")))?;
        self.client.open_chain(&chain_id(&seed), true).await?;
        self.chain_open = true;
        Ok(())
    }

    /// Turn queued tree edits into sync metadata now instead of on the next
    /// tick. Without a chain the edits are dropped; the initial sync of the
    /// next chain covers them.
    pub fn handle_local_changes(&mut self) -> Result<()> {
        if !self.prefs.is_configured() {
            self.tree.take_events();
            return Ok(());
        }
        let objects = SqliteObjectMap::new(self.db.connection());
        change_processor(&mut self.tree, &objects, &self.prefs, &self.config).handle_events()
    }

    /// First tick: announce this device and queue every local bookmark
    async fn send_initial(&mut self, now: i64) -> Result<usize> {
        let device = self.own_device_record(Action::Create)?;
        let mut sent = self.send_chunked(Category::Preferences, &[device]).await?;

        if self.prefs.sync_bookmarks {
            let records = {
                let objects = SqliteObjectMap::new(self.db.connection());
                change_processor(&mut self.tree, &objects, &self.prefs, &self.config)
                    .initial_sync(now)?
            };
            sent += self.send_chunked(Category::Bookmarks, &records).await?;
        }
        Ok(sent)
    }

    /// Merge device records and leave the chain when the registry says so
    async fn sync_devices(&mut self) -> Result<(usize, ChainChange)> {
        let start = self.prefs.latest_device_record_time.unwrap_or_default();
        let records = self.fetch_since(Category::Preferences, start).await?;
        if records.is_empty() {
            return Ok((0, ChainChange::Unchanged));
        }
        let this_device_id = self.prefs.this_device_id.clone().unwrap_or_default();

        let mut registry = DeviceRegistry::from_devices(std::mem::take(&mut self.prefs.devices));
        let change = registry.merge_records(&records, &this_device_id);
        self.prefs.devices = registry.into_devices();
        self.prefs.latest_device_record_time =
            latest_timestamp(&records).max(self.prefs.latest_device_record_time);
        self.save_prefs()?;

        match change {
            ChainChange::ThisDeviceDeleted => {
                tracing::info!("This device was removed from its sync chain");
                self.reset_sync().await?;
            }
            ChainChange::LastDeviceStanding => {
                tracing::info!("Only this device is left in the sync chain, leaving it");
                self.reset_sync().await?;
            }
            ChainChange::Unchanged => {}
        }
        Ok((records.len(), change))
    }

    async fn sync_bookmarks(&mut self) -> Result<(usize, ApplyStats)> {
        let start = self.prefs.latest_record_time.unwrap_or_default();
        let records = self.fetch_since(Category::Bookmarks, start).await?;
        if records.is_empty() {
            return Ok((0, ApplyStats::default()));
        }

        let fetched = records.len();
        let latest = latest_timestamp(&records);
        let stats = {
            let objects = SqliteObjectMap::new(self.db.connection());
            let mut processor =
                change_processor(&mut self.tree, &objects, &self.prefs, &self.config);
            let resolved = processor.resolve(records)?;
            processor.apply_changes_from_sync_model(&resolved)?
        };

        self.prefs.latest_record_time = latest.max(self.prefs.latest_record_time);
        self.save_prefs()?;
        tracing::info!(fetched, ?stats, "Applied remote bookmark changes");
        Ok((fetched, stats))
    }

    async fn fetch_history(&mut self) -> Result<usize> {
        let records = self
            .fetch_since(Category::HistorySites, self.history_cursor)
            .await?;
        if let Some(latest) = latest_timestamp(&records) {
            self.history_cursor = latest;
        }
        if !records.is_empty() {
            tracing::debug!(count = records.len(), "Fetched history records, nothing stores them locally");
        }
        Ok(records.len())
    }

    /// Preference records on the shared record cursor. Device records among
    /// them are left to `sync_devices`, which runs whatever the toggle says;
    /// nothing else is stored locally.
    async fn fetch_preferences(&self) -> Result<usize> {
        let start = self.prefs.latest_record_time.unwrap_or_default();
        let records = self.fetch_since(Category::Preferences, start).await?;
        let settings = records
            .iter()
            .filter(|record| record.as_device().is_none())
            .count();
        if settings > 0 {
            tracing::debug!(count = settings, "Fetched preference records, nothing stores them locally");
        }
        Ok(settings)
    }

    async fn send_unsynced(&mut self, now: i64) -> Result<usize> {
        let records = {
            let objects = SqliteObjectMap::new(self.db.connection());
            change_processor(&mut self.tree, &objects, &self.prefs, &self.config)
                .send_unsynced(now, self.config.resend_min_interval_ms())?
        };
        self.send_chunked(Category::Bookmarks, &records).await
    }

    /// Every record of `category` after `start_at`, page by page
    async fn fetch_since(&self, category: Category, start_at: i64) -> Result<Vec<SyncRecord>> {
        let page_size = self.config.fetch_page_size.max(1);
        let mut start = start_at;
        let mut records = Vec::new();

        loop {
            let page = tokio::time::timeout(
                self.config.fetch_timeout,
                self.client.fetch_records(category, start, page_size),
            )
            .await
            .map_err(|_| Error::Timeout)??;

            let full = page.len() >= page_size;
            let latest = latest_timestamp(&page);
            records.extend(page);
            match latest {
                Some(latest) if full && latest > start => start = latest,
                _ => break,
            }
        }
        Ok(records)
    }

    async fn send_chunked(&self, category: Category, records: &[SyncRecord]) -> Result<usize> {
        for chunk in records.chunks(self.config.send_batch_size.max(1)) {
            tokio::time::timeout(
                self.config.fetch_timeout,
                self.client.send_records(category, chunk),
            )
            .await
            .map_err(|_| Error::Timeout)??;
        }
        if !records.is_empty() {
            tracing::debug!(%category, count = records.len(), "Sent records");
        }
        Ok(records.len())
    }

    fn own_device_record(&self, action: Action) -> Result<SyncRecord> {
        let (Some(device_id), Some(object_id)) = (
            self.prefs.this_device_id.as_deref(),
            self.prefs.this_device_object_id.as_deref(),
        ) else {
            return Err(Error::SyncSetup("sync is not configured".into()));
        };
        Ok(SyncRecord::device(
            action,
            device_id,
            object_id,
            self.prefs.this_device_name.as_str(),
        ))
    }

    // ------------------------------------------------------------------
    // Leaving the chain
    // ------------------------------------------------------------------

    /// Ask every device of the chain to drop `object_id`. Deleting this
    /// device's own record resets sync.
    pub async fn delete_device(&mut self, object_id: &str) -> Result<()> {
        let registry = DeviceRegistry::from_devices(self.prefs.devices.clone());
        let device = registry
            .find_by_object_id(object_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device {object_id}")))?;

        if self.prefs.this_device_id.as_deref() == Some(device.device_id.as_str()) {
            return self.reset_sync().await;
        }

        self.ensure_chain().await?;
        let record = SyncRecord::device(
            Action::Delete,
            device.device_id.as_str(),
            device.object_id.as_str(),
            device.name.as_str(),
        );
        self.send_chunked(Category::Preferences, &[record]).await?;
        tracing::info!(object_id, name = %device.name, "Requested device removal");
        Ok(())
    }

    /// Leave the chain: announce this device's removal if possible, then
    /// forget every piece of sync state
    pub async fn reset_sync(&mut self) -> Result<()> {
        if self.prefs.is_configured() {
            if let Err(error) = self.announce_own_delete().await {
                tracing::warn!(%error, "Could not send this device's delete record");
            }
        }

        self.tree.take_events();
        {
            let objects = SqliteObjectMap::new(self.db.connection());
            change_processor(&mut self.tree, &objects, &self.prefs, &self.config)
                .clear_sync_data()?;
        }
        SqlitePrefsRepository::new(self.db.connection()).clear()?;

        self.prefs = SyncPrefs::default();
        self.client.close_chain();
        self.chain_open = false;
        self.setup_in_progress = false;
        self.history_cursor = 0;
        self.backoff.succeed();
        tracing::info!("Sync reset");
        Ok(())
    }

    async fn announce_own_delete(&mut self) -> Result<()> {
        self.ensure_chain().await?;
        let record = self.own_device_record(Action::Delete)?;
        self.send_chunked(Category::Preferences, &[record]).await?;
        Ok(())
    }

    /// Tick every poll interval, or after the backoff delay following a
    /// failure, until `shutdown` completes
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Sync loop stopped");
                    return Ok(());
                }
                () = tokio::time::sleep(wait) => {}
            }

            wait = match self.tick(unix_millis_now()).await? {
                TickOutcome::Retry(delay) => delay,
                TickOutcome::Idle | TickOutcome::Synced(_) => self.config.poll_interval,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ObjectKind, ObjectMap};
    use crate::tree::MemoryTree;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Device = SyncService<MemoryRelay, MemoryTree>;

    /// Memory relay that remembers which categories were fetched
    #[derive(Default)]
    struct RecordingRelay {
        relay: MemoryRelay,
        fetches: Arc<Mutex<Vec<Category>>>,
    }

    impl SyncClient for RecordingRelay {
        async fn open_chain(&mut self, chain_id: &str, create: bool) -> Result<()> {
            self.relay.open_chain(chain_id, create).await
        }

        fn close_chain(&mut self) {
            self.relay.close_chain();
        }

        async fn fetch_records(
            &self,
            category: Category,
            start_at: i64,
            max: usize,
        ) -> Result<Vec<SyncRecord>> {
            self.fetches.lock().unwrap().push(category);
            self.relay.fetch_records(category, start_at, max).await
        }

        async fn send_records(&self, category: Category, records: &[SyncRecord]) -> Result<()> {
            self.relay.send_records(category, records).await
        }
    }

    /// Accepts chains and sends but never answers a fetch
    #[derive(Default)]
    struct StalledRelay(MemoryRelay);

    impl SyncClient for StalledRelay {
        async fn open_chain(&mut self, chain_id: &str, create: bool) -> Result<()> {
            self.0.open_chain(chain_id, create).await
        }

        fn close_chain(&mut self) {
            self.0.close_chain();
        }

        async fn fetch_records(
            &self,
            _category: Category,
            _start_at: i64,
            _max: usize,
        ) -> Result<Vec<SyncRecord>> {
            std::future::pending().await
        }

        async fn send_records(&self, category: Category, records: &[SyncRecord]) -> Result<()> {
            self.0.send_records(category, records).await
        }
    }

    fn service_over<C: SyncClient>(client: C) -> SyncService<C, MemoryTree> {
        SyncService::new(
            Database::open_in_memory().unwrap(),
            MemoryTree::new(),
            client,
            SyncConfig::default(),
        )
        .unwrap()
    }

    fn device(relay: &MemoryRelay) -> Device {
        device_with(relay, SyncConfig::default())
    }

    fn device_with(relay: &MemoryRelay, config: SyncConfig) -> Device {
        SyncService::new(
            Database::open_in_memory().unwrap(),
            MemoryTree::new(),
            relay.connect(),
            config,
        )
        .unwrap()
    }

    async fn joined_pair(relay: &MemoryRelay) -> (Device, Device) {
        let mut a = device(relay);
        a.setup_new_chain(Some("a".into())).await.unwrap();
        let words = a.sync_words().unwrap().unwrap();
        let mut b = device(relay);
        b.setup_with_sync_words(&words, Some("b".into()))
            .await
            .unwrap();
        (a, b)
    }

    async fn stored_device_actions(client: &MemoryRelay) -> Vec<Action> {
        client
            .stored(Category::Preferences)
            .await
            .into_iter()
            .map(|record| record.action)
            .collect()
    }

    #[tokio::test]
    async fn test_setup_is_guarded() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        assert_eq!(service.state(), SyncState::NotConfigured);

        let outcome = service.setup_new_chain(Some(" laptop ".into())).await.unwrap();
        assert_eq!(outcome, SetupOutcome::Started);
        assert_eq!(service.state(), SyncState::Initializing);
        assert_eq!(service.prefs().this_device_name, "laptop");

        let base = service.prefs().bookmarks_base_order.clone().unwrap();
        let device_id = service.prefs().this_device_id.clone().unwrap();
        assert_eq!(base, format!("1.{device_id}."));

        let again = service.setup_new_chain(None).await.unwrap();
        assert_eq!(again, SetupOutcome::AlreadyConfigured);
        let words = service.sync_words().unwrap().unwrap();
        let join = service.setup_with_sync_words(&words, None).await.unwrap();
        assert_eq!(join, SetupOutcome::AlreadyConfigured);
    }

    #[tokio::test]
    async fn test_wrong_words_leave_device_unconfigured() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        let words = sync_words(&generate_seed());

        let result = service.setup_with_sync_words(&words, None).await;
        assert!(matches!(result, Err(Error::SyncSetup(_))));
        assert_eq!(service.state(), SyncState::NotConfigured);

        let stored = SqlitePrefsRepository::new(service.database().connection())
            .load()
            .unwrap();
        assert!(!stored.is_configured());
        assert_eq!(service.tick(1).await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_first_tick_announces_device_and_bookmarks() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        let bar = service.tree().permanent().bookmark_bar;
        let folder = service.tree_mut().add_folder(bar, 0, "News").unwrap();
        service
            .tree_mut()
            .add_url(folder, 0, "Example", "https://example.com/", 1)
            .unwrap();

        service.setup_new_chain(None).await.unwrap();
        let TickOutcome::Synced(report) = service.tick(1_000).await.unwrap() else {
            panic!("expected a synced tick");
        };
        assert_eq!(report.sent, 3);
        assert_eq!(service.state(), SyncState::Active);

        let bookmarks = service.client().stored(Category::Bookmarks).await;
        assert_eq!(bookmarks.len(), 2);
        assert!(bookmarks.iter().all(|record| record.action == Action::Create));
        assert_eq!(stored_device_actions(service.client()).await, vec![Action::Create]);
        assert_eq!(service.devices().len(), 1);

        // The echoes of the initial batch confirm every node.
        service.tick(2_000).await.unwrap();
        let objects = SqliteObjectMap::new(service.database().connection());
        let metas = objects.list(ObjectKind::Bookmark).unwrap();
        assert_eq!(metas.len(), 2);
        assert!(metas.iter().all(|(_, meta)| !meta.is_dirty()));
    }

    #[tokio::test]
    async fn test_disabled_sync_is_idle() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        service.setup_new_chain(None).await.unwrap();
        service.set_sync_enabled(false).unwrap();
        assert_eq!(service.state(), SyncState::Disabled);
        assert_eq!(service.tick(1).await.unwrap(), TickOutcome::Idle);
        assert!(service.client().stored(Category::Preferences).await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failures_back_off() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        service.setup_new_chain(None).await.unwrap();
        relay.set_offline(true).await;

        let minute = Duration::from_secs(60);
        assert_eq!(
            service.tick(1).await.unwrap(),
            TickOutcome::Retry(10 * minute)
        );
        assert_eq!(
            service.tick(2).await.unwrap(),
            TickOutcome::Retry(20 * minute)
        );
        assert_eq!(service.consecutive_failures(), 2);

        relay.set_offline(false).await;
        assert!(matches!(
            service.tick(3).await.unwrap(),
            TickOutcome::Synced(_)
        ));
        assert_eq!(service.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_relay_times_out_into_retry() {
        let mut service = service_over(StalledRelay::default());
        service.setup_new_chain(None).await.unwrap();

        assert_eq!(
            service.tick(1).await.unwrap(),
            TickOutcome::Retry(Duration::from_secs(10 * 60))
        );
        assert_eq!(service.consecutive_failures(), 1);
        assert_eq!(service.prefs().last_fetch_time, None);

        assert!(matches!(
            service.fetch_since(Category::Bookmarks, 0).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_preferences_toggle_gates_settings_fetch() {
        let relay = RecordingRelay::default();
        let fetches = Arc::clone(&relay.fetches);
        let preference_fetches = || {
            fetches
                .lock()
                .unwrap()
                .iter()
                .filter(|category| **category == Category::Preferences)
                .count()
        };

        let mut service = service_over(relay);
        service.setup_new_chain(None).await.unwrap();
        service.tick(1).await.unwrap();
        // The device list plus the settings fetch
        assert_eq!(preference_fetches(), 2);

        service.set_sync_preferences(false).unwrap();
        service.tick(2).await.unwrap();
        assert_eq!(preference_fetches(), 3);
        assert_eq!(service.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_announces_delete_and_clears_state() {
        let relay = MemoryRelay::new();
        let mut service = device(&relay);
        let bar = service.tree().permanent().bookmark_bar;
        service
            .tree_mut()
            .add_url(bar, 0, "Example", "https://example.com/", 1)
            .unwrap();
        service.setup_new_chain(None).await.unwrap();
        service.tick(1).await.unwrap();

        let client = service.client().clone();
        service.reset_sync().await.unwrap();

        assert_eq!(service.state(), SyncState::NotConfigured);
        assert_eq!(
            stored_device_actions(&client).await,
            vec![Action::Create, Action::Delete]
        );

        let objects = SqliteObjectMap::new(service.database().connection());
        assert!(objects.list(ObjectKind::Bookmark).unwrap().is_empty());
        assert_eq!(service.tree().children(bar).len(), 1);
    }

    #[tokio::test]
    async fn test_joined_devices_see_each_other() {
        let relay = MemoryRelay::new();
        let (mut a, mut b) = joined_pair(&relay).await;
        a.tick(1).await.unwrap();
        b.tick(2).await.unwrap();
        a.tick(3).await.unwrap();

        let mut names: Vec<&str> = a.devices().iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(b.devices().len(), 2);
    }

    #[tokio::test]
    async fn test_last_device_standing_leaves_chain() {
        let relay = MemoryRelay::new();
        let (mut a, mut b) = joined_pair(&relay).await;
        a.tick(1).await.unwrap();
        b.tick(2).await.unwrap();
        a.tick(3).await.unwrap();

        b.reset_sync().await.unwrap();
        let TickOutcome::Synced(report) = a.tick(4).await.unwrap() else {
            panic!("expected a synced tick");
        };
        assert!(report.chain_reset);
        assert_eq!(report.sent, 0);
        assert_eq!(a.state(), SyncState::NotConfigured);
        // The reset ended the tick; nothing re-saved the cleared prefs.
        assert_eq!(a.prefs().last_fetch_time, None);
        assert_eq!(a.prefs().latest_record_time, None);
    }

    #[tokio::test]
    async fn test_deleted_device_resets_itself() {
        let relay = MemoryRelay::new();
        let (mut a, mut b) = joined_pair(&relay).await;
        a.tick(1).await.unwrap();
        b.tick(2).await.unwrap();
        a.tick(3).await.unwrap();

        let b_object_id = b.prefs().this_device_object_id.clone().unwrap();
        a.delete_device(&b_object_id).await.unwrap();
        b.tick(4).await.unwrap();
        assert_eq!(b.state(), SyncState::NotConfigured);

        assert!(matches!(
            a.delete_device("unknown").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_until_shutdown() {
        let relay = MemoryRelay::new();
        let config = SyncConfig::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(80));
        let mut service = device_with(&relay, config);
        service.setup_new_chain(None).await.unwrap();
        relay.set_offline(true).await;

        // Failed ticks at 0, 10, 30 and 70 seconds; the next would be at 150.
        service
            .run(tokio::time::sleep(Duration::from_secs(100)))
            .await
            .unwrap();
        assert_eq!(service.consecutive_failures(), 4);
    }
}
