use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::debug;

use super::body::MediaBody;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::results::MediaKind;

/// Sends one media file to the analysis service and returns the raw
/// response payload.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, kind: MediaKind, body: MediaBody) -> Result<Bytes, UploadError>;
}

/// `POST <base>/upload` as multipart with a `fileType` text part and a
/// `file` part streaming the media.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// No request or read timeout is set: analysis of long videos can keep
    /// the response open for minutes.
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint(),
        })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(&self, kind: MediaKind, body: MediaBody) -> Result<Bytes, UploadError> {
        let file = Part::stream_with_length(Body::wrap_stream(body.stream), body.len)
            .file_name("file")
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("fileType", kind.as_str())
            .part("file", file);

        debug!("POST {} ({} bytes, {})", self.endpoint, body.len, kind);
        let response = self.client.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }
}
