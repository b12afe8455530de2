//! Error types for pageseq operations.

use thiserror::Error;

use crate::types::{BindingId, LessonId, PageId};

/// Result type alias using [`PageSeqError`].
pub type Result<T> = std::result::Result<T, PageSeqError>;

/// Error types for pageseq operations.
#[derive(Debug, Error)]
pub enum PageSeqError {
    // ==================== Lookup Errors ====================
    /// Page id does not resolve to a row.
    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    /// No page occupies the given position in the lesson.
    #[error("No page at sequence {sequence} in {lesson_id}")]
    SequenceNotFound { lesson_id: LessonId, sequence: u32 },

    /// Question binding id does not resolve to a row.
    #[error("Question binding not found: {0}")]
    BindingNotFound(BindingId),

    // ==================== Sequencing Errors ====================
    /// A multi-row invariant was found broken (duplicate or missing sequence,
    /// dangling link, cross-lesson write).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Caller supplied an out-of-range argument.
    #[error("Validation error: {0}")]
    ValidationError(String),

    // ==================== Storage Errors ====================
    /// General storage/I/O error.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// WAL (Write-Ahead Log) errors.
    #[error("WAL error: {0}")]
    WalError(String),

    /// Checksum validation failure.
    #[error("Checksum mismatch: {0}")]
    ChecksumError(String),

    /// Store file corruption detected.
    #[error("Corrupted store: {0}")]
    CorruptedStore(String),

    /// Invalid snapshot magic bytes.
    #[error("Invalid store file: {0}")]
    InvalidStoreFile(String),

    /// Unsupported snapshot or WAL version.
    #[error("Unsupported store version: {version} (max supported: {max_supported})")]
    UnsupportedVersion { version: u32, max_supported: u32 },

    /// Write attempted on a store opened read-only.
    #[error("Store is opened read-only")]
    ReadOnly,
}

impl PageSeqError {
    /// Returns true for the lookup failures (page, sequence, binding).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PageSeqError::PageNotFound(_)
                | PageSeqError::SequenceNotFound { .. }
                | PageSeqError::BindingNotFound(_)
        )
    }
}
