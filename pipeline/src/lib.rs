//! Drives a source directory and a `(ContentStore, MetadataStore)` pair
//! through a backup or restore, locally or over `strongbox-protocol`.

mod backup;
mod error;
mod options;
mod result;
mod restore;
mod walker;

pub use backup::BackupPipeline;
pub use error::PipelineError;
pub use options::{BackupOptions, OnIntegrityError, RestoreOptions};
pub use result::{FileError, PipelineResult};
pub use restore::RestorePipeline;
pub use walker::walk_regular_files;
