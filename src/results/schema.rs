use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Process-local display index of a result. Recomputed on every
/// [`super::ResultStore::initialize`].
pub type ResultId = u32;

/// Stable identity of a result across restarts: its directory name,
/// `<createdAtMillis>.<Image|Video>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultKey(String);

impl ResultKey {
    pub fn new(created_at: i64, kind: MediaKind) -> Self {
        Self(format!("{}.{}", created_at, kind.as_str()))
    }

    /// Parse a directory name. Returns `None` for anything that is not
    /// `<digits>.<Image|Video>`.
    pub fn parse(name: &str) -> Option<(Self, i64, MediaKind)> {
        let (prefix, suffix) = name.split_once('.')?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let created_at = prefix.parse::<i64>().ok()?;
        let kind = suffix.parse::<MediaKind>().ok()?;
        Some((Self(name.to_string()), created_at, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Wire and directory-name spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
        }
    }

    /// Classify a MIME type. Only `image/*` and `video/*` are media.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        if mime_type.starts_with("image/") {
            Some(Self::Image)
        } else if mime_type.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Image" | "image" => Ok(Self::Image),
            "Video" | "video" => Ok(Self::Video),
            other => Err(format!("unknown media kind '{other}'")),
        }
    }
}

/// Upload status code. The integer ranges are a public contract:
///
/// * `0..100`  uploading, percent of media bytes sent
/// * `100`     fully sent, waiting on the server
/// * `> 100`   telemetry persisted (canonical `200`)
/// * `< 0`     failed, retriable (canonical `-1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadStatus(i32);

impl UploadStatus {
    pub const STARTED: Self = Self(0);
    pub const PROCESSING: Self = Self(100);
    pub const READY: Self = Self(200);
    pub const FAILED: Self = Self(-1);

    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// `floor(sent * 100 / total)`, capped at `PROCESSING`. An empty body
    /// counts as fully sent.
    pub fn from_progress(sent: u64, total: u64) -> Self {
        if total == 0 {
            return Self::PROCESSING;
        }
        let percent = (u128::from(sent) * 100 / u128::from(total)).min(100);
        Self(percent as i32)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn phase(self) -> UploadPhase {
        match self.0 {
            c if c < 0 => UploadPhase::Failed,
            c if c < 100 => UploadPhase::Uploading(c as u8),
            100 => UploadPhase::Processing,
            _ => UploadPhase::Ready,
        }
    }

    pub fn is_ready(self) -> bool {
        self.phase() == UploadPhase::Ready
    }

    pub fn is_failed(self) -> bool {
        self.phase() == UploadPhase::Failed
    }

    /// Uploading or processing: an upload task still owns this result.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self.phase(),
            UploadPhase::Uploading(_) | UploadPhase::Processing
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase() {
            UploadPhase::Uploading(p) => write!(f, "uploading {p}%"),
            UploadPhase::Processing => f.write_str("processing"),
            UploadPhase::Ready => f.write_str("ready"),
            UploadPhase::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Uploading(u8),
    Processing,
    Ready,
    Failed,
}

/// One captured or imported item in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    pub id: ResultId,
    pub key: ResultKey,
    pub dir: PathBuf,
    pub media_kind: MediaKind,
    pub title: String,
    pub upload_status: UploadStatus,
    /// Epoch milliseconds, taken from the directory name.
    pub created_at: i64,
    #[serde(skip)]
    pub selected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_directory_name() {
        let key = ResultKey::new(1_700_000_000_123, MediaKind::Video);
        assert_eq!(key.as_str(), "1700000000123.Video");
        let (parsed, created_at, kind) = ResultKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(created_at, 1_700_000_000_123);
        assert_eq!(kind, MediaKind::Video);
    }

    #[test]
    fn parse_rejects_foreign_directories() {
        assert!(ResultKey::parse("cache").is_none());
        assert!(ResultKey::parse(".Image").is_none());
        assert!(ResultKey::parse("12ab.Image").is_none());
        assert!(ResultKey::parse("123.Audio").is_none());
        assert!(ResultKey::parse("-5.Image").is_none());
    }

    #[test]
    fn progress_percent_floors() {
        assert_eq!(UploadStatus::from_progress(0, 1000).code(), 0);
        assert_eq!(UploadStatus::from_progress(999, 1000).code(), 99);
        assert_eq!(UploadStatus::from_progress(1, 3).code(), 33);
        assert_eq!(UploadStatus::from_progress(1000, 1000), UploadStatus::PROCESSING);
        assert_eq!(UploadStatus::from_progress(0, 0), UploadStatus::PROCESSING);
    }

    #[test]
    fn phases_follow_code_ranges() {
        assert_eq!(UploadStatus::from_code(42).phase(), UploadPhase::Uploading(42));
        assert_eq!(UploadStatus::PROCESSING.phase(), UploadPhase::Processing);
        assert_eq!(UploadStatus::from_code(101).phase(), UploadPhase::Ready);
        assert_eq!(UploadStatus::from_code(-7).phase(), UploadPhase::Failed);
        assert!(UploadStatus::READY.is_ready());
        assert!(UploadStatus::FAILED.is_failed());
        assert!(UploadStatus::STARTED.is_in_flight());
    }

    #[test]
    fn media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("audio/wav"), None);
    }
}
