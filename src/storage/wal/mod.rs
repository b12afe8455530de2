//! Write-Ahead Logging (WAL) for crash recovery.
//!
//! Every committed lesson transaction is appended here before its rows are
//! published to the in-memory table.
//!
//! # Architecture
//!
//! The WAL consists of:
//! - A header with magic bytes, version, and store ID
//! - Sequential length-prefixed records, each optionally followed by a CRC32
//! - Checkpoint markers written just before truncation
//!
//! # Recovery Process
//!
//! On open:
//! 1. Load the checkpoint snapshot, if any
//! 2. Validate the WAL header against the snapshot's store ID
//! 3. Replay data records of committed transactions only
//! 4. Checkpoint, which rewrites the snapshot and truncates the WAL

mod checkpointer;
mod reader;
mod record;
mod writer;

pub use checkpointer::Checkpointer;
pub use reader::{ReplayResult, WalReader, WalReplayer};
pub use record::{WalPayload, WalRecord, WalRecordType};
pub use writer::WalWriter;

use crate::error::{PageSeqError, Result};

/// Magic bytes for WAL file identification.
pub const WAL_MAGIC: &[u8; 8] = b"PGSEQWAL";

/// Current WAL format version.
pub const WAL_VERSION: u32 = 1;

/// WAL header stored at the beginning of the WAL file.
#[derive(Debug, Clone)]
pub struct WalHeader {
    /// Magic bytes for file identification.
    pub magic: [u8; 8],
    /// WAL format version.
    pub version: u32,
    /// Store UUID for validation.
    pub store_id: uuid::Uuid,
    /// Whether checksums are enabled for records.
    pub enable_checksums: bool,
}

impl WalHeader {
    /// Creates a new WAL header with the given store ID.
    #[must_use]
    pub fn new(store_id: uuid::Uuid, enable_checksums: bool) -> Self {
        Self {
            magic: *WAL_MAGIC,
            version: WAL_VERSION,
            store_id,
            enable_checksums,
        }
    }

    /// Validates the WAL header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.magic != *WAL_MAGIC {
            return Err(PageSeqError::WalError("Invalid WAL magic bytes".into()));
        }

        if self.version > WAL_VERSION {
            return Err(PageSeqError::UnsupportedVersion {
                version: self.version,
                max_supported: WAL_VERSION,
            });
        }

        Ok(())
    }

    /// Returns the serialized size of the header.
    #[must_use]
    pub const fn serialized_size() -> usize {
        8  // magic
        + 4  // version
        + 16 // store_id
        + 1 // enable_checksums
    }
}
