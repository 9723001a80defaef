//! SyncEngine — one continuously-merged view per note title.
//!
//! The first subscriber for a title creates its SyncedView: a merge task
//! that folds local store changes and a single poller's remote snapshots
//! through the version resolver, persists remote winners back to the store,
//! and fans the resolved stream out to every subscriber. Re-subscribing to
//! an active title attaches to the existing view instead of spawning a
//! second poller; when the last subscriber detaches the view is torn down
//! and its poller cancelled.

use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::model::Note;
use crate::remote::{HttpNoteApi, NoteApi};
use crate::store::NoteStore;
use crate::sync::poller::{Poller, PollerHandle};
use crate::sync::resolver::{self, Source};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const ERROR_CHANNEL_CAPACITY: usize = 128;

/// Per-title merged state: the note last published to subscribers, the
/// subscriber set, and the background tasks feeding it.
struct SyncedView {
    subscribers: DashMap<u64, mpsc::UnboundedSender<Note>>,
    /// Best-known note published so far. Guards the publish path: reads,
    /// version comparison, write-back and fan-out all happen under this
    /// lock, so delivered versions are monotonically non-decreasing.
    published: Mutex<Option<Note>>,
    poller: PollerHandle,
    cancel: CancellationToken,
}

impl SyncedView {
    /// Deliver to every subscriber, pruning any whose receiver is gone.
    fn fan_out(&self, note: &Note) {
        self.subscribers
            .retain(|_, tx| tx.send(note.clone()).is_ok());
    }
}

struct EngineInner {
    store: Arc<NoteStore>,
    api: Arc<dyn NoteApi>,
    poll_interval: Duration,
    views: DashMap<String, Arc<SyncedView>>,
    next_subscriber_id: AtomicU64,
    error_tx: broadcast::Sender<SyncError>,
}

/// A live subscription to one title's resolved note stream.
///
/// Dropping the subscription detaches it from the view; the last detach for
/// a title cancels that title's poller.
pub struct NoteSubscription {
    title: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Note>,
    inner: Arc<EngineInner>,
}

impl NoteSubscription {
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Next resolved note. Returns `None` once the engine side has gone
    /// away entirely.
    pub async fn recv(&mut self) -> Option<Note> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Note> {
        self.rx.try_recv().ok()
    }
}

impl Drop for NoteSubscription {
    fn drop(&mut self) {
        self.inner.detach(&self.title, self.id);
    }
}

/// The synchronization engine. Cheap to clone handles out of via `Arc`;
/// construct one per application with an explicitly-owned store and remote
/// client.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(store: Arc<NoteStore>, api: Arc<dyn NoteApi>, poll_interval: Duration) -> Self {
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                store,
                api,
                poll_interval,
                views: DashMap::new(),
                next_subscriber_id: AtomicU64::new(1),
                error_tx,
            }),
        }
    }

    /// Assemble an engine from config: opens the SQLite store at the
    /// configured path and talks to the configured remote service.
    pub fn with_config(config: &SyncConfig) -> Result<Self, StoreError> {
        let store = Arc::new(NoteStore::new(&config.db_path)?);
        let api: Arc<dyn NoteApi> = Arc::new(HttpNoteApi::new(&config.base_url));
        Ok(Self::new(store, api, config.poll_interval))
    }

    /// The engine's local store (single source of truth for local versions).
    pub fn store(&self) -> &Arc<NoteStore> {
        &self.inner.store
    }

    /// Side channel for transport and background-persistence failures.
    /// Distinct from the note streams: subscribers never see errors there.
    pub fn errors(&self) -> broadcast::Receiver<SyncError> {
        self.inner.error_tx.subscribe()
    }

    /// Subscribe to the continuously-merged view of `title`.
    ///
    /// Never blocks: the stream handle is returned immediately and the first
    /// state arrives asynchronously once either side produces one. A title
    /// with no local and no remote record is not an error; the stream simply
    /// stays silent until a record appears.
    ///
    /// Must be called from within a tokio runtime (background tasks are
    /// spawned for the first subscriber of a title).
    pub fn subscribe(&self, title: &str) -> NoteSubscription {
        let inner = &self.inner;
        let id = inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            // Attach while holding the map entry, so a concurrent
            // last-unsubscribe cannot tear the view down between the lookup
            // and the insertion. The publish lock makes the late subscriber
            // either get the current best-known note here or catch the
            // in-progress publish via fan_out, never both and never neither.
            let entry = inner
                .views
                .entry(title.to_string())
                .or_insert_with(|| inner.spawn_view(title));
            let published = entry.published.lock().unwrap();
            if let Some(current) = published.clone() {
                let _ = tx.send(current);
            }
            entry.subscribers.insert(id, tx);
        }

        log::debug!("[SYNC] subscriber {} attached to '{}'", id, title);
        NoteSubscription {
            title: title.to_string(),
            id,
            rx,
            inner: Arc::clone(inner),
        }
    }

    /// Explicit counterpart to dropping the subscription.
    pub fn unsubscribe(&self, subscription: NoteSubscription) {
        drop(subscription);
    }

    /// Local-only commit: the new version is exactly one above the version
    /// currently stored for this title (1 for a brand-new title), no matter
    /// how often polling has run in the meantime. Returns the new version.
    /// May block briefly on storage I/O, never on the network.
    pub fn save(&self, note: &Note) -> Result<u64, StoreError> {
        let saved = self.inner.store.save_increment(&note.title, &note.content)?;
        log::info!("[SYNC] saved '{}' at v{}", saved.title, saved.version);
        Ok(saved.version)
    }

    /// Fire-and-forget push of `note` to the remote. Never blocks the
    /// caller; failures land on the error channel and do not roll back any
    /// already-committed local save.
    pub fn publish(&self, note: &Note) {
        let api = Arc::clone(&self.inner.api);
        let error_tx = self.inner.error_tx.clone();
        let note = note.clone();
        tokio::spawn(async move {
            match api.push(&note).await {
                Ok(()) => log::debug!("[SYNC] pushed '{}' v{}", note.title, note.version),
                Err(e) => {
                    log::warn!("[SYNC] push for '{}' failed: {}", note.title, e);
                    let _ = error_tx.send(SyncError::Push {
                        title: note.title.clone(),
                        detail: e.to_string(),
                    });
                }
            }
        });
    }

    /// The standard "user edited and wants to sync" path: commit locally,
    /// then push the post-increment note.
    pub fn save_and_publish(&self, note: &Note) -> Result<Note, StoreError> {
        let version = self.save(note)?;
        let saved = Note::with_version(note.title.clone(), note.content.clone(), version);
        self.publish(&saved);
        Ok(saved)
    }

    /// Number of live views (equivalently, live pollers): one per
    /// actively-subscribed title.
    pub fn active_view_count(&self) -> usize {
        self.inner.views.len()
    }

    pub fn has_active_view(&self, title: &str) -> bool {
        self.inner.views.contains_key(title)
    }
}

impl EngineInner {
    /// Start the poller and merge task for a title's first subscriber.
    fn spawn_view(self: &Arc<Self>, title: &str) -> Arc<SyncedView> {
        log::info!("[SYNC] starting view for '{}'", title);

        let cancel = CancellationToken::new();
        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
        let poller = Poller::start(
            Arc::clone(&self.api),
            title.to_string(),
            self.poll_interval,
            poll_tx,
            self.error_tx.clone(),
        );

        let view = Arc::new(SyncedView {
            subscribers: DashMap::new(),
            published: Mutex::new(None),
            poller,
            cancel: cancel.clone(),
        });

        let inner = Arc::clone(self);
        let task_view = Arc::clone(&view);
        let title = title.to_string();
        let mut local_rx = self.store.subscribe_changes();

        tokio::spawn(async move {
            // Seed from whatever the local store already has so the first
            // subscriber sees a state without waiting for the remote.
            match inner.store.get(&title) {
                Ok(Some(note)) => inner.apply_local(&task_view, note),
                Ok(None) => {}
                Err(e) => {
                    log::error!("[SYNC] initial load for '{}' failed: {}", title, e);
                    let _ = inner.error_tx.send(SyncError::Storage {
                        title: title.clone(),
                        detail: e.to_string(),
                    });
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = local_rx.recv() => match changed {
                        Ok(note) if note.title == title => {
                            inner.apply_local(&task_view, note);
                        }
                        Ok(_) => {} // write for some other title
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::warn!(
                                "[SYNC] '{}' missed {} local change events, reloading",
                                title, missed
                            );
                            match inner.store.get(&title) {
                                Ok(Some(note)) => inner.apply_local(&task_view, note),
                                Ok(None) => {}
                                Err(e) => {
                                    log::error!("[SYNC] reload for '{}' failed: {}", title, e);
                                    let _ = inner.error_tx.send(SyncError::Storage {
                                        title: title.clone(),
                                        detail: e.to_string(),
                                    });
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    snapshot = poll_rx.recv() => match snapshot {
                        Some(remote) => {
                            // A snapshot buffered before cancellation must
                            // not outlive the view: once torn down, nothing
                            // may mutate the store on its behalf.
                            if cancel.is_cancelled() {
                                break;
                            }
                            inner.apply_remote(&task_view, &title, remote);
                        }
                        None => break, // poller gone
                    },
                }
            }
            log::debug!("[SYNC] merge task for '{}' stopped", title);
        });

        view
    }

    /// Merge a local store change into the view. A purely local write is
    /// already durable, so the only question is whether it advances the
    /// published version.
    fn apply_local(&self, view: &SyncedView, note: Note) {
        let mut published = view.published.lock().unwrap();
        let Some(resolution) = resolver::resolve(Some(&note), published.as_ref()) else {
            return;
        };
        let changed = published.as_ref().map(|cur| cur.version) != Some(resolution.note.version);
        if !changed {
            return;
        }
        log::debug!(
            "[SYNC] publishing '{}' v{} (local)",
            resolution.note.title,
            resolution.note.version
        );
        view.fan_out(&resolution.note);
        *published = Some(resolution.note);
    }

    /// Merge a poller snapshot into the view. `None` means the remote had
    /// nothing new (absent record or failed fetch): the local side wins
    /// unconditionally and nothing changes. A remote winner is written back
    /// to the store — the only path by which remote data mutates local
    /// state.
    fn apply_remote(&self, view: &SyncedView, title: &str, snapshot: Option<Note>) {
        let mut published = view.published.lock().unwrap();
        let Some(resolution) = resolver::resolve(published.as_ref(), snapshot.as_ref()) else {
            return;
        };
        let changed = published.as_ref().map(|cur| cur.version) != Some(resolution.note.version);
        if !changed {
            return;
        }
        if resolution.source == Source::Remote {
            if let Err(e) = self.store.upsert(&resolution.note) {
                log::error!("[SYNC] failed to persist remote winner for '{}': {}", title, e);
                let _ = self.error_tx.send(SyncError::Storage {
                    title: title.to_string(),
                    detail: e.to_string(),
                });
                return;
            }
        }
        log::debug!(
            "[SYNC] publishing '{}' v{} (remote)",
            resolution.note.title,
            resolution.note.version
        );
        view.fan_out(&resolution.note);
        *published = Some(resolution.note);
    }

    /// Detach one subscriber; tear the whole view down if it was the last.
    fn detach(&self, title: &str, id: u64) {
        if let Some(view) = self.views.get(title) {
            view.subscribers.remove(&id);
        }
        // remove_if holds the map shard lock, so a concurrent subscribe
        // cannot attach between the emptiness check and the removal.
        if let Some((_, view)) = self
            .views
            .remove_if(title, |_, view| view.subscribers.is_empty())
        {
            view.poller.cancel();
            view.cancel.cancel();
            log::info!("[SYNC] last subscriber for '{}' gone, view torn down", title);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use async_trait::async_trait;

    /// Remote fake: fixed fetch response, recorded pushes.
    struct FakeApi {
        fetch_response: Result<Note, ApiError>,
        pushes: Mutex<Vec<Note>>,
    }

    impl FakeApi {
        fn not_found() -> Arc<Self> {
            Arc::new(Self {
                fetch_response: Err(ApiError::NotFound),
                pushes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NoteApi for FakeApi {
        async fn fetch(&self, _title: &str) -> Result<Note, ApiError> {
            self.fetch_response.clone()
        }

        async fn push(&self, note: &Note) -> Result<(), ApiError> {
            self.pushes.lock().unwrap().push(note.clone());
            Ok(())
        }
    }

    fn engine_with(api: Arc<FakeApi>) -> SyncEngine {
        let store = Arc::new(NoteStore::open_in_memory().unwrap());
        SyncEngine::new(store, api, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_second_subscribe_reuses_view() {
        let engine = engine_with(FakeApi::not_found());

        let sub_a = engine.subscribe("Groceries");
        let sub_b = engine.subscribe("Groceries");
        assert_eq!(engine.active_view_count(), 1);

        // First unsubscribe keeps the view (and its poller) alive.
        engine.unsubscribe(sub_a);
        assert!(engine.has_active_view("Groceries"));

        // Second one tears it down.
        engine.unsubscribe(sub_b);
        assert!(!engine.has_active_view("Groceries"));
        assert_eq!(engine.active_view_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_titles_get_distinct_views() {
        let engine = engine_with(FakeApi::not_found());

        let _a = engine.subscribe("A");
        let _b = engine.subscribe("B");
        assert_eq!(engine.active_view_count(), 2);
    }

    #[tokio::test]
    async fn test_save_is_strictly_monotonic_through_engine() {
        let engine = engine_with(FakeApi::not_found());
        let note = Note::new("Journal", "first");

        assert_eq!(engine.save(&note).unwrap(), 1);
        assert_eq!(engine.save(&note).unwrap(), 2);
        assert_eq!(engine.save(&note).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_save_and_publish_pushes_post_increment_version() {
        let api = FakeApi::not_found();
        let engine = engine_with(Arc::clone(&api));

        let saved = engine
            .save_and_publish(&Note::new("Groceries", "Milk"))
            .unwrap();
        assert_eq!(saved.version, 1);

        // publish is fire-and-forget; give the spawned push a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pushes = api.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0], Note::with_version("Groceries", "Milk", 1));
    }

    /// Remote fake whose fetches park on a semaphore until released.
    struct GatedApi {
        gate: tokio::sync::Semaphore,
        note: Note,
    }

    #[async_trait]
    impl NoteApi for GatedApi {
        async fn fetch(&self, _title: &str) -> Result<Note, ApiError> {
            let _permit = self.gate.acquire().await.expect("gate closed");
            Ok(self.note.clone())
        }

        async fn push(&self, _note: &Note) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initial_load_failure_reported_on_error_channel() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("notes.db");
        let store = Arc::new(NoteStore::new(&db_path).unwrap());
        // Break the schema out from under the store so the view's first
        // read fails.
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute("DROP TABLE notes", [])
            .unwrap();

        let engine = SyncEngine::new(store, FakeApi::not_found(), Duration::from_millis(20));
        let mut errors = engine.errors();
        let _sub = engine.subscribe("T");

        let err = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .expect("no storage error reported")
            .expect("error channel closed");
        match err {
            SyncError::Storage { title, .. } => assert_eq!(title, "T"),
            other => panic!("unexpected error variant: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_teardown_drops_remote_result_completing_afterwards() {
        let api = Arc::new(GatedApi {
            gate: tokio::sync::Semaphore::new(0),
            note: Note::with_version("T", "late arrival", 9),
        });
        let store = Arc::new(NoteStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(store, Arc::clone(&api) as Arc<dyn NoteApi>, Duration::from_millis(10));

        let sub = engine.subscribe("T");
        // Let the first fetch start and park on the gate.
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(sub);
        assert_eq!(engine.active_view_count(), 0);

        // The fetch completes only after teardown; its result must be
        // dropped, never upserted into the store of a dead view.
        api.gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.store().get("T").unwrap(), None);
    }

    #[tokio::test]
    async fn test_late_subscriber_receives_current_state() {
        let engine = engine_with(FakeApi::not_found());
        engine
            .store()
            .upsert(&Note::with_version("Groceries", "Milk", 3))
            .unwrap();

        let mut first = engine.subscribe("Groceries");
        let seen = tokio::time::timeout(Duration::from_secs(1), first.recv())
            .await
            .expect("no initial state")
            .unwrap();
        assert_eq!(seen.version, 3);

        // A second subscriber attaches to the same view and still gets the
        // best-known note immediately.
        let mut second = engine.subscribe("Groceries");
        let seen = tokio::time::timeout(Duration::from_secs(1), second.recv())
            .await
            .expect("no state for late subscriber")
            .unwrap();
        assert_eq!(seen.version, 3);
    }
}
