//! Capture-to-playback engine for emotion analysis.
//!
//! * [`results`] keeps the on-disk catalog of captured items and their
//!   upload status.
//! * [`upload`] streams media to the analysis service and stores the reply.
//! * [`telemetry`] decodes that reply into per-frame emotion values for any
//!   playback timestamp.

pub mod config;
pub mod error;
pub mod results;
pub mod telemetry;
pub mod upload;

pub use config::Config;
pub use error::{DecodeError, StoreError, UploadError};
pub use results::{MediaKind, MediaSource, ResultStore, UploadStatus};
pub use telemetry::{Emotion, EmotionValues, TelemetryDecoder};
pub use upload::UploadPipeline;
