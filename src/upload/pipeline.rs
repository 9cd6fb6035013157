use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::body::{MediaBody, ProgressFn};
use super::transport::{HttpTransport, UploadTransport};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::results::{MediaKind, ResultDir, ResultId, ResultKey, ResultStore, UploadStatus};

/// Runs uploads in the background and reports every outcome through the
/// [`ResultStore`]. Nothing is returned to the caller except a handle it is
/// free to drop.
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<ResultStore>,
    transport: Arc<dyn UploadTransport>,
    chunk_size: usize,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<ResultStore>,
        transport: Arc<dyn UploadTransport>,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            transport,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Pipeline talking HTTP to the configured analysis service.
    pub fn from_config(store: Arc<ResultStore>, config: &UploadConfig) -> Result<Self, UploadError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(store, Arc::new(transport), config.chunk_size))
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Start uploading `media_file` for result `id`. Status moves through
    /// `0..=100` as bytes go out, then to ready once the response is on
    /// disk, or to failed on any error.
    pub fn upload(&self, id: ResultId, media_file: PathBuf, kind: MediaKind) -> JoinHandle<()> {
        let key = self.store.key_of(id);
        let this = self.clone();
        tokio::spawn(async move {
            let Some(key) = key else {
                warn!("Upload requested for unknown result {}", id);
                return;
            };
            this.run(key, media_file, kind).await;
        })
    }

    /// Re-run the upload of a failed result with its own media file.
    /// Returns `None` unless the result exists and is failed.
    pub fn retry(&self, id: ResultId) -> Option<JoinHandle<()>> {
        let entry = self.store.get(id)?;
        if !entry.upload_status.is_failed() {
            debug!("Not retrying result {} in state {}", id, entry.upload_status);
            return None;
        }
        info!("Retrying upload of result {}", id);
        let media = ResultDir::new(&entry.dir).media();
        Some(self.upload(id, media, entry.media_kind))
    }

    async fn run(&self, key: ResultKey, media_file: PathBuf, kind: MediaKind) {
        if !self.store.set_status(&key, UploadStatus::STARTED) {
            return;
        }
        match self.attempt(&key, &media_file, kind).await {
            Ok(()) => {}
            Err(e) => {
                warn!("Upload of {} failed: {}", key, e);
                self.store.set_status(&key, UploadStatus::FAILED);
            }
        }
    }

    async fn attempt(
        &self,
        key: &ResultKey,
        media_file: &Path,
        kind: MediaKind,
    ) -> Result<(), UploadError> {
        let store = Arc::clone(&self.store);
        let progress_key = key.clone();
        let on_progress: ProgressFn = Arc::new(move |sent, total| {
            let status = UploadStatus::from_progress(sent, total);
            debug!("{}: {}/{} bytes ({})", progress_key, sent, total, status);
            store.record_progress(&progress_key, status);
        });

        let body = MediaBody::open(media_file, self.chunk_size, on_progress).await?;
        info!("Uploading {} ({} bytes)", key, body.len);
        let payload = self.transport.upload(kind, body).await?;
        self.store.record_progress(key, UploadStatus::PROCESSING);

        let Some(dir) = self.store.list().get_by_key(key).map(|e| ResultDir::new(&e.dir)) else {
            debug!("Result {} deleted while uploading, discarding response", key);
            return Ok(());
        };
        if self.persist(key, &dir, &payload).await? {
            self.store.set_status(key, UploadStatus::READY);
            info!("Result {} ready ({} bytes of telemetry)", key, payload.len());
        }
        Ok(())
    }

    /// Write the telemetry into `dir`. Returns false if the result was
    /// deleted meanwhile; the directory is then removed again, since the
    /// delete may have swept it before the file landed.
    async fn persist(
        &self,
        key: &ResultKey,
        dir: &ResultDir,
        payload: &[u8],
    ) -> Result<bool, UploadError> {
        dir.write_data(payload)
            .await
            .map_err(|source| UploadError::Persist {
                path: dir.data(),
                source,
            })?;
        if self.store.contains_key(key) {
            return Ok(true);
        }
        debug!("Result {} deleted while saving telemetry, removing leftovers", key);
        dir.remove().await;
        Ok(false)
    }
}
