//! Result catalog.
//!
//! Every captured or imported item lives in its own directory under the
//! results root, named `<createdAtMillis>.<Image|Video>` and holding three
//! files: `media`, `title` and, once analysed, `data`. [`ResultStore`] keeps
//! the in-memory catalog of those directories and is the only place upload
//! status is tracked.

pub mod catalog;
pub mod layout;
pub mod schema;

pub use catalog::{Catalog, CatalogEvent, ResultStore};
pub use layout::{guess_mime_type, MediaSource, ResultDir};
pub use schema::{MediaKind, ResultEntry, ResultId, ResultKey, UploadPhase, UploadStatus};
