use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Session-fatal and recoverable error categories.
///
/// Per-item conditions (unreadable file, failed metadata extraction, failed
/// sidecar write, per-file copy or verify failure) are not raised through
/// this type: they are aggregated into the session report as warnings and
/// counts, and only influence the terminal state.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Source root missing or unreadable. Detected before any write.
    #[error("source directory {} is not readable: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Archive root exists but cannot be read for indexing.
    #[error("archive directory {} is not readable: {source}", path.display())]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Archive root cannot be created or written. Detected before any
    /// media file is copied.
    #[error("archive directory {} is not writable: {source}", path.display())]
    ArchiveUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Batch name rejected by validation. Interactive suppliers are
    /// re-prompted; a flag-supplied name fails the session with this.
    #[error("invalid batch name: {0}")]
    InvalidBatchName(String),

    /// Operator input could not be read from the prompt channel.
    #[error("prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
