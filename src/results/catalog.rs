use futures_util::future::join_all;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::layout::{MediaSource, ResultDir};
use super::schema::{MediaKind, ResultEntry, ResultId, ResultKey, UploadStatus};
use crate::config::TelemetryConfig;
use crate::error::{StoreError, StoreResult};
use crate::telemetry::TelemetryDecoder;

const EVENT_CAPACITY: usize = 256;

/// Immutable catalog snapshot, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ResultEntry>,
}

impl Catalog {
    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ResultId) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_by_key(&self, key: &ResultKey) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn contains(&self, id: ResultId) -> bool {
        self.get(id).is_some()
    }

    /// True iff any entry is selected.
    pub fn selection_mode_active(&self) -> bool {
        self.entries.iter().any(|e| e.selected)
    }

    fn next_id(&self) -> ResultId {
        self.entries.iter().map(|e| e.id).max().map_or(0, |max| max + 1)
    }

    fn get_mut_by_key(&mut self, key: &ResultKey) -> Option<&mut ResultEntry> {
        self.entries.iter_mut().find(|e| &e.key == key)
    }
}

/// Change notifications for catalog observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    Reloaded { count: usize },
    Created { id: ResultId, key: ResultKey },
    StatusChanged { key: ResultKey, status: UploadStatus },
    SelectionChanged { id: ResultId, selected: bool },
    Deleted { key: ResultKey },
}

/// Durable catalog of results, one directory per result under `root`.
///
/// Readers get `Arc<Catalog>` snapshots. Every mutation clones the current
/// snapshot, edits the copy and swaps it in under the write lock, so
/// concurrent upload tasks and readers never see a half-applied change.
pub struct ResultStore {
    root: PathBuf,
    catalog: RwLock<Arc<Catalog>>,
    events: broadcast::Sender<CatalogEvent>,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CatalogEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn modify<R>(&self, f: impl FnOnce(&mut Catalog) -> R) -> R {
        let mut guard = self.catalog.write();
        let mut next = (**guard).clone();
        let out = f(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Rebuild the catalog from the result directories under `root`.
    ///
    /// Directories that are not named `<millis>.<Image|Video>` are skipped,
    /// including half-built ones from an interrupted [`ResultStore::create`].
    /// A result directory whose title cannot be read fails the whole call.
    /// Results already in the catalog keep a live in-flight or ready status.
    pub async fn initialize(&self) -> StoreResult<Arc<Catalog>> {
        let mut found = Vec::new();
        match fs::read_dir(&self.root).await {
            Ok(mut dir) => loop {
                let entry = match dir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => return Err(StoreError::io(&self.root, e)),
                };
                let is_dir = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(entry.path(), e))?
                    .is_dir();
                if !is_dir {
                    continue;
                }
                let name = entry.file_name();
                let Some((key, created_at, kind)) = name.to_str().and_then(ResultKey::parse) else {
                    warn!("Skipping unrecognised directory {}", entry.path().display());
                    continue;
                };
                found.push((key, created_at, kind, ResultDir::new(entry.path())));
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Results directory {} does not exist yet", self.root.display());
            }
            Err(e) => return Err(StoreError::io(&self.root, e)),
        }

        found.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));

        let mut entries = Vec::with_capacity(found.len());
        for (id, (key, created_at, media_kind, dir)) in found.into_iter().enumerate() {
            let title = dir.read_title().await?;
            let upload_status = if dir.has_data().await {
                UploadStatus::READY
            } else {
                UploadStatus::FAILED
            };
            entries.push(ResultEntry {
                id: id as ResultId,
                key,
                dir: dir.path().to_path_buf(),
                media_kind,
                title,
                upload_status,
                created_at,
                selected: false,
            });
        }

        let snapshot = {
            let mut guard = self.catalog.write();
            for entry in &mut entries {
                // a running upload, or a ready it already published, is newer
                // than what the scan saw
                if let Some(live) = guard.get_by_key(&entry.key) {
                    if !live.upload_status.is_failed() {
                        entry.upload_status = live.upload_status;
                    }
                }
            }
            let snapshot = Arc::new(Catalog { entries });
            *guard = Arc::clone(&snapshot);
            snapshot
        };
        info!("Loaded {} results from {}", snapshot.len(), self.root.display());
        self.emit(CatalogEvent::Reloaded {
            count: snapshot.len(),
        });
        Ok(snapshot)
    }

    /// Write a new result directory and add it to the catalog as
    /// `Uploading(0)`. The directory only appears under its result name once
    /// title and media are in place. Nothing is added if any file cannot be
    /// written.
    pub async fn create(
        &self,
        title: &str,
        media_kind: MediaKind,
        source: MediaSource,
    ) -> StoreResult<(ResultId, PathBuf)> {
        if title.trim().is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        let (staged_at, staged) = ResultDir::stage(&self.root, media_kind).await?;
        let committed = async {
            staged.write_title(title).await?;
            staged.install_media(source).await?;
            staged.commit(&self.root, staged_at, media_kind).await
        }
        .await;
        let (key, created_at, dir) = match committed {
            Ok(committed) => committed,
            Err(e) => {
                staged.remove().await;
                return Err(e);
            }
        };

        let path = dir.path().to_path_buf();
        let entry_key = key.clone();
        let entry_path = path.clone();
        let title = title.to_string();
        let id = self.modify(move |catalog| {
            let id = catalog.next_id();
            catalog.entries.push(ResultEntry {
                id,
                key: entry_key,
                dir: entry_path,
                media_kind,
                title,
                upload_status: UploadStatus::STARTED,
                created_at,
                selected: false,
            });
            id
        });

        info!("Created result {} ({})", id, key);
        self.emit(CatalogEvent::Created { id, key });
        Ok((id, path))
    }

    /// Replace the status of `id`. Unknown ids are ignored.
    pub fn update_status(&self, id: ResultId, status: UploadStatus) {
        if let Some(key) = self.key_of(id) {
            self.set_status(&key, status);
        }
    }

    /// Replace the status of the result stored under `key`. Returns false if
    /// it is gone.
    pub fn set_status(&self, key: &ResultKey, status: UploadStatus) -> bool {
        let changed = self.modify(|catalog| match catalog.get_mut_by_key(key) {
            Some(entry) => {
                let changed = entry.upload_status != status;
                entry.upload_status = status;
                Some(changed)
            }
            None => None,
        });
        match changed {
            Some(true) => {
                self.emit(CatalogEvent::StatusChanged {
                    key: key.clone(),
                    status,
                });
                true
            }
            Some(false) => true,
            None => {
                debug!("Dropping status {} for deleted result {}", status.code(), key);
                false
            }
        }
    }

    /// Apply an upload progress tick. Only moves an in-flight status
    /// forward; a tick arriving late or out of order never lowers the
    /// percentage or overwrites a terminal status.
    pub fn record_progress(&self, key: &ResultKey, status: UploadStatus) -> bool {
        let applied = self.modify(|catalog| {
            let entry = catalog.get_mut_by_key(key)?;
            if entry.upload_status.is_in_flight() && status > entry.upload_status {
                entry.upload_status = status;
                Some(true)
            } else {
                Some(false)
            }
        });
        if applied == Some(true) {
            self.emit(CatalogEvent::StatusChanged {
                key: key.clone(),
                status,
            });
        }
        applied.unwrap_or(false)
    }

    pub fn set_selected(&self, id: ResultId, selected: bool) {
        let changed = self.modify(|catalog| {
            let entry = catalog.entries.iter_mut().find(|e| e.id == id)?;
            let changed = entry.selected != selected;
            entry.selected = selected;
            Some(changed)
        });
        if changed == Some(true) {
            self.emit(CatalogEvent::SelectionChanged { id, selected });
        }
    }

    /// Remove every selected result from the catalog and from disk. Each
    /// removal is independent and best-effort. Returns the removed keys.
    pub async fn delete_selected(&self) -> Vec<ResultKey> {
        let removed = self.modify(|catalog| {
            let (removed, kept) = std::mem::take(&mut catalog.entries)
                .into_iter()
                .partition::<Vec<_>, _>(|e| e.selected);
            catalog.entries = kept;
            removed
        });

        join_all(
            removed
                .iter()
                .map(|entry| async move { ResultDir::new(&entry.dir).remove().await }),
        )
        .await;

        let keys: Vec<ResultKey> = removed.into_iter().map(|e| e.key).collect();
        for key in &keys {
            info!("Deleted result {}", key);
            self.emit(CatalogEvent::Deleted { key: key.clone() });
        }
        keys
    }

    pub fn list(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    pub fn get(&self, id: ResultId) -> Option<ResultEntry> {
        self.list().get(id).cloned()
    }

    pub fn key_of(&self, id: ResultId) -> Option<ResultKey> {
        self.list().get(id).map(|e| e.key.clone())
    }

    pub fn contains_key(&self, key: &ResultKey) -> bool {
        self.list().get_by_key(key).is_some()
    }

    pub fn selection_mode_active(&self) -> bool {
        self.list().selection_mode_active()
    }

    /// Open the telemetry of a ready result.
    pub async fn load_telemetry(
        &self,
        id: ResultId,
        config: &TelemetryConfig,
    ) -> StoreResult<TelemetryDecoder> {
        let entry = self.get(id).ok_or(StoreError::UnknownResult(id))?;
        if !entry.upload_status.is_ready() {
            return Err(StoreError::TelemetryNotReady(id));
        }
        let data = ResultDir::new(&entry.dir).read_data().await?;
        Ok(TelemetryDecoder::new(data, config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn image(bytes: &'static [u8]) -> MediaSource {
        MediaSource::Bytes(Bytes::from_static(bytes))
    }

    #[tokio::test]
    async fn create_writes_files_and_starts_uploading() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());

        let (id, dir) = store.create("Beach", MediaKind::Image, image(b"jpeg")).await.unwrap();
        assert_eq!(id, 0);
        assert_eq!(std::fs::read_to_string(dir.join("title")).unwrap(), "Beach");
        assert_eq!(std::fs::read(dir.join("media")).unwrap(), b"jpeg");
        assert!(dir.file_name().unwrap().to_str().unwrap().ends_with(".Image"));

        let entry = store.get(id).unwrap();
        assert_eq!(entry.upload_status, UploadStatus::STARTED);
        assert_eq!(entry.title, "Beach");
        assert!(!entry.selected);
    }

    #[tokio::test]
    async fn create_rejects_empty_title() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let err = store.create("  ", MediaKind::Image, image(b"x")).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyTitle));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn failed_media_copy_leaves_no_trace() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("results");
        let store = ResultStore::new(&root);
        let missing = tmp.path().join("does-not-exist.mp4");

        let err = store
            .create("Clip", MediaKind::Video, MediaSource::Copy(missing))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(store.list().is_empty());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn ids_follow_max_plus_one() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (a, _) = store.create("a", MediaKind::Image, image(b"1")).await.unwrap();
        let (b, _) = store.create("b", MediaKind::Image, image(b"2")).await.unwrap();
        let (c, _) = store.create("c", MediaKind::Video, image(b"3")).await.unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        store.set_selected(b, true);
        store.delete_selected().await;
        let (d, _) = store.create("d", MediaKind::Image, image(b"4")).await.unwrap();
        assert_eq!(d, 3);

        let order: Vec<_> = store.list().iter().map(|e| e.title.clone()).collect();
        assert_eq!(order, ["a", "c", "d"]);
    }

    #[tokio::test]
    async fn initialize_rebuilds_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for (name, title, data) in [
            ("2000.Video", "second", false),
            ("1000.Image", "first", true),
        ] {
            let dir = root.join(name);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("title"), title).unwrap();
            std::fs::write(dir.join("media"), b"m").unwrap();
            if data {
                std::fs::write(dir.join("data"), [0u8; 32]).unwrap();
            }
        }
        std::fs::create_dir(root.join("scratch")).unwrap();
        std::fs::write(root.join("3000.Image"), b"not a directory").unwrap();

        let store = ResultStore::new(root);
        let snapshot = store.initialize().await.unwrap();
        let entries: Vec<_> = snapshot.iter().collect();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[0].title, "first");
        assert_eq!(entries[0].media_kind, MediaKind::Image);
        assert_eq!(entries[0].created_at, 1000);
        assert_eq!(entries[0].upload_status, UploadStatus::READY);

        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[1].media_kind, MediaKind::Video);
        assert_eq!(entries[1].upload_status, UploadStatus::FAILED);

        // a second call yields a fresh, equal snapshot
        let again = store.initialize().await.unwrap();
        assert_eq!(again.len(), 2);
        assert!(!Arc::ptr_eq(&snapshot, &again));
    }

    #[tokio::test]
    async fn initialize_fails_on_missing_title() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("1000.Image")).unwrap();
        let store = ResultStore::new(tmp.path());
        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, StoreError::UnreadableTitle { .. }));
    }

    #[tokio::test]
    async fn initialize_on_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path().join("nope"));
        assert!(store.initialize().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn initialize_skips_half_built_result() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        store.create("kept", MediaKind::Image, image(b"1")).await.unwrap();
        // create interrupted before title and media were written
        std::fs::create_dir(tmp.path().join(".1000.Video.tmp")).unwrap();

        let snapshot = ResultStore::new(tmp.path()).initialize().await.unwrap();
        let titles: Vec<_> = snapshot.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["kept"]);
    }

    #[tokio::test]
    async fn initialize_keeps_status_of_running_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (running, _) = store.create("running", MediaKind::Image, image(b"1")).await.unwrap();
        let (stalled, _) = store.create("stalled", MediaKind::Image, image(b"2")).await.unwrap();
        let running_key = store.key_of(running).unwrap();
        let stalled_key = store.key_of(stalled).unwrap();
        store.record_progress(&running_key, UploadStatus::from_code(60));
        store.set_status(&stalled_key, UploadStatus::FAILED);

        let snapshot = store.initialize().await.unwrap();
        let status = |key: &ResultKey| snapshot.get_by_key(key).unwrap().upload_status;
        assert_eq!(status(&running_key).code(), 60);
        assert_eq!(status(&stalled_key), UploadStatus::FAILED);

        // a fresh process has no upload running and sees only the disk
        let reopened = ResultStore::new(tmp.path()).initialize().await.unwrap();
        assert!(reopened.iter().all(|e| e.upload_status == UploadStatus::FAILED));
    }

    #[tokio::test]
    async fn selection_mode_tracks_any_selected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (a, _) = store.create("a", MediaKind::Image, image(b"1")).await.unwrap();
        let (b, _) = store.create("b", MediaKind::Image, image(b"2")).await.unwrap();

        assert!(!store.selection_mode_active());
        store.set_selected(a, true);
        store.set_selected(b, true);
        assert!(store.selection_mode_active());
        store.set_selected(a, false);
        assert!(store.selection_mode_active());
        store.set_selected(b, false);
        assert!(!store.selection_mode_active());
    }

    #[tokio::test]
    async fn delete_selected_removes_directory_and_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (keep, _) = store.create("keep", MediaKind::Image, image(b"1")).await.unwrap();
        let (gone, dir) = store.create("gone", MediaKind::Image, image(b"2")).await.unwrap();
        std::fs::write(dir.join("data"), [0u8; 64]).unwrap();

        store.set_selected(gone, true);
        let removed = store.delete_selected().await;

        assert_eq!(removed.len(), 1);
        assert!(!dir.exists());
        assert!(store.get(gone).is_none());
        assert!(store.get(keep).is_some());
        assert!(!store.selection_mode_active());
    }

    #[tokio::test]
    async fn updates_for_deleted_results_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (id, _) = store.create("x", MediaKind::Image, image(b"1")).await.unwrap();
        let key = store.key_of(id).unwrap();

        store.set_selected(id, true);
        store.delete_selected().await;

        store.update_status(id, UploadStatus::READY);
        assert!(!store.set_status(&key, UploadStatus::FAILED));
        assert!(!store.record_progress(&key, UploadStatus::from_code(50)));
        store.set_selected(id, true);
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn progress_never_moves_backwards_or_past_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (id, _) = store.create("x", MediaKind::Image, image(b"1")).await.unwrap();
        let key = store.key_of(id).unwrap();

        assert!(store.record_progress(&key, UploadStatus::from_code(40)));
        assert!(!store.record_progress(&key, UploadStatus::from_code(30)));
        assert_eq!(store.get(id).unwrap().upload_status.code(), 40);

        store.set_status(&key, UploadStatus::FAILED);
        assert!(!store.record_progress(&key, UploadStatus::from_code(60)));
        assert_eq!(store.get(id).unwrap().upload_status, UploadStatus::FAILED);
    }

    #[tokio::test]
    async fn load_telemetry_requires_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let (id, dir) = store.create("x", MediaKind::Video, image(b"1")).await.unwrap();
        let config = TelemetryConfig::default();

        assert!(matches!(
            store.load_telemetry(id, &config).await,
            Err(StoreError::TelemetryNotReady(_))
        ));
        assert!(matches!(
            store.load_telemetry(99, &config).await,
            Err(StoreError::UnknownResult(99))
        ));

        std::fs::write(dir.join("data"), [0u8; 64]).unwrap();
        store.update_status(id, UploadStatus::READY);
        let decoder = store.load_telemetry(id, &config).await.unwrap();
        assert_eq!(decoder.frame_count(), 2);
    }

    #[tokio::test]
    async fn events_report_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let mut events = store.subscribe();

        let (id, _) = store.create("x", MediaKind::Image, image(b"1")).await.unwrap();
        let key = store.key_of(id).unwrap();
        store.update_status(id, UploadStatus::READY);
        store.update_status(id, UploadStatus::READY);

        assert_eq!(
            events.recv().await.unwrap(),
            CatalogEvent::Created { id, key: key.clone() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CatalogEvent::StatusChanged {
                key,
                status: UploadStatus::READY
            }
        );
        assert!(events.try_recv().is_err());
    }
}
