//! Upload pipeline.
//!
//! One background task per upload streams the media file to the analysis
//! service, turns transport progress into catalog status updates and writes
//! the service's answer into the result's `data` file.

pub mod body;
pub mod pipeline;
pub mod transport;

pub use body::{MediaBody, ProgressFn};
pub use pipeline::UploadPipeline;
pub use transport::{HttpTransport, UploadTransport};
