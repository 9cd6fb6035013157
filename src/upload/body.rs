use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::UploadError;

/// Called with `(bytes_sent_so_far, total_bytes)` each time a chunk is
/// handed to the transport. May run on any runtime thread.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Streamed media file with progress reporting.
pub struct MediaBody {
    pub stream: BoxStream<'static, io::Result<Bytes>>,
    pub len: u64,
}

impl MediaBody {
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        on_progress: ProgressFn,
    ) -> Result<Self, UploadError> {
        let media_err = |source| UploadError::Media {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).await.map_err(media_err)?;
        let len = file.metadata().await.map_err(media_err)?.len();

        let mut sent = 0u64;
        let stream = chunks(file, chunk_size.max(1))
            .inspect_ok(move |chunk| {
                sent += chunk.len() as u64;
                on_progress(sent, len);
            })
            .boxed();

        Ok(Self { stream, len })
    }
}

/// Read `file` in chunks of exactly `chunk_size` bytes; only the last chunk
/// may be shorter.
fn chunks(file: File, chunk_size: usize) -> impl futures_util::Stream<Item = io::Result<Bytes>> {
    stream::try_unfold(file, move |file| next_chunk(file, chunk_size))
}

async fn next_chunk(mut file: File, chunk_size: usize) -> io::Result<Option<(Bytes, File)>> {
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some((Bytes::from(buf), file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn reports_cumulative_progress_per_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("media");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let body = MediaBody::open(&path, 300, Arc::new(move |sent, total| sink.lock().push((sent, total))))
            .await
            .unwrap();
        assert_eq!(body.len, 1000);

        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, [300, 300, 300, 100]);
        assert_eq!(
            *ticks.lock(),
            [(300, 1000), (600, 1000), (900, 1000), (1000, 1000)]
        );
    }

    #[tokio::test]
    async fn empty_file_yields_no_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("media");
        std::fs::write(&path, b"").unwrap();

        let body = MediaBody::open(&path, 64, Arc::new(|_, _| {})).await.unwrap();
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_media_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = MediaBody::open(&tmp.path().join("gone"), 64, Arc::new(|_, _| {}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UploadError::Media { .. }));
    }
}
