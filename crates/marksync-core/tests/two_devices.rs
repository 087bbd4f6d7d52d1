//! Multi-device scenarios against a shared relay.
//!
//! Run with: `cargo test -p marksync-core --test two_devices`

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use marksync_core::db::{Database, ObjectKind, ObjectMap, SqliteObjectMap};
use marksync_core::sync::{generate_seed, sync_words};
use marksync_core::util::unix_millis_now;
use marksync_core::{
    Action, BookmarkTree, Category, DirRelay, Error, MemoryRelay, MemoryTree, NodeId,
    SetupOutcome, SyncClient, SyncConfig, SyncService, SyncState, TickOutcome,
};

type Device<C = MemoryRelay> = SyncService<C, MemoryTree>;

fn device(relay: &MemoryRelay) -> Device {
    SyncService::new(
        Database::open_in_memory().unwrap(),
        MemoryTree::new(),
        relay.connect(),
        SyncConfig::default(),
    )
    .unwrap()
}

async fn pair(relay: &MemoryRelay) -> (Device, Device) {
    let mut a = device(relay);
    a.setup_new_chain(Some("desktop".into())).await.unwrap();
    let words = a.sync_words().unwrap().unwrap();
    let mut b = device(relay);
    let outcome = b
        .setup_with_sync_words(&words, Some("laptop".into()))
        .await
        .unwrap();
    assert_eq!(outcome, SetupOutcome::Started);
    (a, b)
}

async fn tick<C: SyncClient>(service: &mut Device<C>) {
    let outcome = service.tick(unix_millis_now()).await.unwrap();
    assert!(
        matches!(outcome, TickOutcome::Synced(_)),
        "unexpected tick outcome {outcome:?}"
    );
}

async fn rounds(a: &mut Device, b: &mut Device, count: usize) {
    for _ in 0..count {
        tick(a).await;
        tick(b).await;
    }
}

fn titles(tree: &MemoryTree, folder: NodeId) -> Vec<String> {
    tree.children(folder)
        .iter()
        .filter_map(|id| tree.node(*id))
        .map(|node| node.title.clone())
        .collect()
}

/// The single visible node with `title`
fn visible(tree: &MemoryTree, title: &str) -> NodeId {
    let deleted = tree.permanent().deleted;
    let found: Vec<NodeId> = tree
        .find_by_title(title)
        .into_iter()
        .filter(|id| !tree.has_ancestor(*id, deleted))
        .collect();
    assert_eq!(found.len(), 1, "expected exactly one `{title}`");
    found[0]
}

fn object_id<C: SyncClient>(service: &Device<C>, id: NodeId) -> String {
    SqliteObjectMap::new(service.database().connection())
        .get_object_id_by_local_id(ObjectKind::Bookmark, &id.local_id())
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn concurrent_first_children_converge() {
    let relay = MemoryRelay::new();
    let (mut a, mut b) = pair(&relay).await;

    let bar = a.tree().permanent().bookmark_bar;
    a.tree_mut().add_folder(bar, 0, "Shared").unwrap();
    rounds(&mut a, &mut b, 1).await;
    let shared_a = visible(a.tree(), "Shared");
    let shared_b = visible(b.tree(), "Shared");

    // Both devices insert a first child before hearing from each other.
    a.tree_mut()
        .add_url(shared_a, 0, "From A", "https://a.example/", 1)
        .unwrap();
    b.tree_mut()
        .add_url(shared_b, 0, "From B", "https://b.example/", 2)
        .unwrap();
    rounds(&mut a, &mut b, 3).await;

    let on_a = titles(a.tree(), shared_a);
    let on_b = titles(b.tree(), shared_b);
    assert_eq!(on_a.len(), 2);
    assert_eq!(on_a, on_b);
}

#[tokio::test]
async fn bookmark_round_trips_to_second_device() {
    let relay = MemoryRelay::new();
    let (mut a, mut b) = pair(&relay).await;

    let bar = a.tree().permanent().bookmark_bar;
    let folder = a.tree_mut().add_folder(bar, 0, "Reading").unwrap();
    let leaf = a
        .tree_mut()
        .add_url(folder, 0, "Rust", "https://www.rust-lang.org/", 1_700_000_000_000)
        .unwrap();
    rounds(&mut a, &mut b, 1).await;

    let copy = visible(b.tree(), "Rust");
    let node = b.tree().node(copy).unwrap();
    assert_eq!(node.url(), Some("https://www.rust-lang.org/"));
    assert!(!node.is_folder());
    assert_eq!(node.date_added, 1_700_000_000_000);

    let parent = b.tree().parent(copy).unwrap();
    assert!(b.tree().node(parent).unwrap().is_folder());
    assert_eq!(object_id(&b, parent), object_id(&a, folder));
    assert_eq!(object_id(&b, copy), object_id(&a, leaf));
    assert_eq!(b.tree().parent(parent), Some(b.tree().permanent().bookmark_bar));
}

#[tokio::test]
async fn local_delete_reaches_peer_and_tombstone_clears() {
    let relay = MemoryRelay::new();
    let (mut a, mut b) = pair(&relay).await;

    let bar = a.tree().permanent().bookmark_bar;
    let leaf = a
        .tree_mut()
        .add_url(bar, 0, "Old", "https://old.example/", 1)
        .unwrap();
    rounds(&mut a, &mut b, 1).await;
    visible(b.tree(), "Old");

    a.tree_mut().remove(leaf).unwrap();
    tick(&mut a).await;
    let deleted = a.tree().permanent().deleted;
    assert_eq!(a.tree().children(deleted).len(), 1);

    let deletes = a
        .client()
        .stored(Category::Bookmarks)
        .await
        .into_iter()
        .filter(|record| record.action == Action::Delete)
        .count();
    assert_eq!(deletes, 1);

    tick(&mut b).await;
    assert!(b.tree().find_by_title("Old").is_empty());

    // The echo of the delete retires the tombstone.
    tick(&mut a).await;
    assert!(a.tree().children(deleted).is_empty());
}

#[tokio::test]
async fn lone_device_leaves_chain() {
    let relay = MemoryRelay::new();
    let (mut a, mut b) = pair(&relay).await;
    rounds(&mut a, &mut b, 1).await;
    tick(&mut a).await;
    assert_eq!(a.devices().len(), 2);

    b.reset_sync().await.unwrap();
    let client = a.client().clone();
    let a_object_id = a.prefs().this_device_object_id.clone().unwrap();
    tick(&mut a).await;

    assert_eq!(a.state(), SyncState::NotConfigured);
    let self_delete = client
        .stored(Category::Preferences)
        .await
        .into_iter()
        .any(|record| record.action == Action::Delete && record.object_id == a_object_id);
    assert!(self_delete);
}

#[tokio::test]
async fn wrong_words_are_rejected() {
    let relay = MemoryRelay::new();
    let (mut a, _b) = pair(&relay).await;
    let words = a.sync_words().unwrap().unwrap();
    a.reset_sync().await.unwrap();

    let mut stranger = device(&relay);
    let unknown = sync_words(&generate_seed());
    let result = stranger.setup_with_sync_words(&unknown, None).await;
    assert!(matches!(result, Err(Error::SyncSetup(_))));
    assert_eq!(stranger.state(), SyncState::NotConfigured);

    // The original words still open the chain after its creator left.
    let rejoin = stranger.setup_with_sync_words(&words, None).await.unwrap();
    assert_eq!(rejoin, SetupOutcome::Started);

    let mut other = device(&relay);
    let garbage = other.setup_with_sync_words("not words", None).await;
    assert!(matches!(garbage, Err(Error::SyncSetup(_))));
}

#[tokio::test]
async fn directory_relay_survives_restart() {
    let tmp = tempdir().unwrap();
    let relay_dir = tmp.path().join("relay");
    let db_path = tmp.path().join("a.db");

    let mut a: Device<DirRelay> = SyncService::new(
        Database::open(&db_path).unwrap(),
        MemoryTree::new(),
        DirRelay::new(&relay_dir),
        SyncConfig::default(),
    )
    .unwrap();
    a.setup_new_chain(None).await.unwrap();
    let bar = a.tree().permanent().bookmark_bar;
    a.tree_mut()
        .add_url(bar, 0, "Docs", "https://docs.rs/", 1)
        .unwrap();
    tick(&mut a).await;
    let words = a.sync_words().unwrap().unwrap();
    let tree = a.tree().clone();
    drop(a);

    // Reopen from disk: prefs and metadata persist, the chain is reopened lazily.
    let mut reopened: Device<DirRelay> = SyncService::new(
        Database::open(&db_path).unwrap(),
        tree,
        DirRelay::new(&relay_dir),
        SyncConfig::default(),
    )
    .unwrap();
    assert_eq!(reopened.state(), SyncState::Active);
    tick(&mut reopened).await;

    let mut b: Device<DirRelay> = SyncService::new(
        Database::open(tmp.path().join("b.db")).unwrap(),
        MemoryTree::new(),
        DirRelay::new(&relay_dir),
        SyncConfig::default(),
    )
    .unwrap();
    b.setup_with_sync_words(&words, None).await.unwrap();
    tick(&mut b).await;
    let copy = visible(b.tree(), "Docs");
    assert_eq!(b.tree().node(copy).unwrap().url(), Some("https://docs.rs/"));
    assert_eq!(b.devices().len(), 2);
}
