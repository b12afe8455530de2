//! Checkpoint coordination for WAL management.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::storage::snapshot;
use crate::storage::table::TableData;
use crate::storage::wal::{WalRecord, WalWriter};

/// Coordinates checkpoints: snapshot the table, then truncate the WAL.
#[derive(Debug)]
pub struct Checkpointer {
    /// Next checkpoint ID.
    next_checkpoint_id: AtomicU64,
}

impl Checkpointer {
    /// Creates a new checkpointer whose first checkpoint gets `first_id`.
    #[must_use]
    pub fn new(first_id: u64) -> Self {
        Self {
            next_checkpoint_id: AtomicU64::new(first_id.max(1)),
        }
    }

    /// Returns and increments the next checkpoint ID.
    pub fn next_id(&self) -> u64 {
        self.next_checkpoint_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current checkpoint ID (without incrementing).
    #[must_use]
    pub fn current_id(&self) -> u64 {
        self.next_checkpoint_id.load(Ordering::Relaxed)
    }

    /// Performs a checkpoint operation.
    ///
    /// This:
    /// 1. Writes the snapshot file (atomically replacing the previous one)
    /// 2. Writes a checkpoint record to WAL and syncs it
    /// 3. Truncates WAL (its records are now in the snapshot), which also
    ///    clears a poisoned writer
    ///
    /// A crash between steps 1 and 3 leaves records in the WAL that the new
    /// snapshot already contains; replay is idempotent, so that is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn checkpoint(
        &self,
        snapshot_path: &Path,
        store_id: uuid::Uuid,
        data: &TableData,
        wal_writer: Option<&mut WalWriter>,
    ) -> Result<u64> {
        let checkpoint_id = self.next_id();

        snapshot::write_snapshot(snapshot_path, store_id, checkpoint_id, data)?;

        if let Some(wal_writer) = wal_writer {
            // A poisoned log refuses appends; the snapshot already supersedes it
            if !wal_writer.is_poisoned() {
                let lsn = wal_writer.next_lsn();
                let record = WalRecord::checkpoint(0, lsn, checkpoint_id);
                wal_writer.append(&record)?;
                wal_writer.sync()?;
            }
            wal_writer.truncate()?;
        }

        tracing::info!(
            checkpoint_id,
            pages = data.pages.len(),
            bindings = data.bindings.len(),
            "checkpoint complete"
        );

        Ok(checkpoint_id)
    }
}

impl Default for Checkpointer {
    fn default() -> Self {
        Self::new(1)
    }
}
