use bytes::Bytes;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::schema::{MediaKind, ResultKey};
use crate::error::{StoreError, StoreResult};

pub const MEDIA_FILE: &str = "media";
pub const TITLE_FILE: &str = "title";
pub const DATA_FILE: &str = "data";
const DATA_PART_FILE: &str = "data.part";

/// Where the bytes of a new result come from.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// A picked file, copied into the result directory.
    Copy(PathBuf),
    /// A freshly captured temp file, moved into the result directory.
    Move(PathBuf),
    Bytes(Bytes),
}

/// Paths inside one result directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDir {
    path: PathBuf,
}

impl ResultDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media(&self) -> PathBuf {
        self.path.join(MEDIA_FILE)
    }

    pub fn title(&self) -> PathBuf {
        self.path.join(TITLE_FILE)
    }

    pub fn data(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Create a hidden `.<nowMillis>.<kind>.tmp` directory under `root` to
    /// fill before [`ResultDir::commit`]. The name never parses as a result
    /// key, so a leftover from a crash is skipped on load.
    pub async fn stage(root: &Path, kind: MediaKind) -> StoreResult<(i64, Self)> {
        fs::create_dir_all(root)
            .await
            .map_err(|e| StoreError::io(root, e))?;

        let mut created_at = Utc::now().timestamp_millis();
        loop {
            let path = root.join(staging_name(&ResultKey::new(created_at, kind)));
            match fs::create_dir(&path).await {
                Ok(()) => return Ok((created_at, Self::new(path))),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => created_at += 1,
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
    }

    /// Rename a staged directory to its final `<millis>.<kind>` name. Bumps
    /// the timestamp while the name is taken, so two creations in one
    /// millisecond both succeed.
    pub async fn commit(
        &self,
        root: &Path,
        mut created_at: i64,
        kind: MediaKind,
    ) -> StoreResult<(ResultKey, i64, Self)> {
        loop {
            let key = ResultKey::new(created_at, kind);
            let path = root.join(key.as_str());
            match fs::rename(&self.path, &path).await {
                Ok(()) => return Ok((key, created_at, Self::new(path))),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::AlreadyExists
                            | ErrorKind::DirectoryNotEmpty
                            | ErrorKind::NotADirectory
                    ) =>
                {
                    created_at += 1
                }
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
        }
    }

    pub async fn write_title(&self, title: &str) -> StoreResult<()> {
        let path = self.title();
        fs::write(&path, title.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    pub async fn read_title(&self) -> StoreResult<String> {
        fs::read_to_string(self.title())
            .await
            .map_err(|source| StoreError::UnreadableTitle {
                dir: self.path.clone(),
                source,
            })
    }

    pub async fn install_media(&self, source: MediaSource) -> StoreResult<()> {
        let dest = self.media();
        match source {
            MediaSource::Bytes(data) => fs::write(&dest, &data)
                .await
                .map_err(|e| StoreError::io(&dest, e)),
            MediaSource::Copy(src) => fs::copy(&src, &dest)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::io(&src, e)),
            MediaSource::Move(src) => {
                if fs::rename(&src, &dest).await.is_ok() {
                    return Ok(());
                }
                // rename fails across filesystems; fall back to copy + remove
                fs::copy(&src, &dest)
                    .await
                    .map_err(|e| StoreError::io(&src, e))?;
                if let Err(e) = fs::remove_file(&src).await {
                    warn!("Failed to remove moved media source {}: {}", src.display(), e);
                }
                Ok(())
            }
        }
    }

    pub async fn has_data(&self) -> bool {
        fs::metadata(self.data())
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Write telemetry next to the final file and rename it into place, so
    /// `data` is either absent or complete.
    pub async fn write_data(&self, payload: &[u8]) -> std::io::Result<()> {
        let part = self.path.join(DATA_PART_FILE);
        fs::write(&part, payload).await?;
        fs::rename(&part, self.data()).await
    }

    pub async fn read_data(&self) -> StoreResult<Vec<u8>> {
        let path = self.data();
        fs::read(&path).await.map_err(|e| StoreError::io(&path, e))
    }

    /// Best-effort removal of data, media, title and the directory itself.
    /// Each step is independent; missing files are fine.
    pub async fn remove(&self) {
        for file in [self.data(), self.media(), self.title()] {
            match fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {}", file.display(), e),
            }
        }
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed result directory {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", self.path.display(), e),
        }
    }
}

fn staging_name(key: &ResultKey) -> String {
    format!(".{key}.tmp")
}

/// Guess MIME type from filename extension. Only media types are known;
/// everything else is `application/octet-stream`.
pub fn guess_mime_type(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
    .to_string()
}
