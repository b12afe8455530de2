//! WAL writer for append-only log writing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PageSeqError, Result};
use crate::storage::wal::{WalHeader, WalRecord};

/// Writer for appending records to the WAL.
pub struct WalWriter {
    /// Path to the WAL file.
    path: PathBuf,
    /// Buffered writer for efficient I/O.
    writer: BufWriter<File>,
    /// Whether checksums are enabled.
    enable_checksums: bool,
    /// Next LSN to assign.
    next_lsn: AtomicU64,
    /// Store ID written into the header.
    store_id: uuid::Uuid,
    /// File offset just past the last whole record handed to `append`.
    end: u64,
    /// Set when a failed batch could not be cut back out of the file.
    poisoned: bool,
    /// Makes `sync` fail after flushing.
    #[cfg(test)]
    pub(crate) fail_sync: bool,
    /// Makes `rollback_to` fail.
    #[cfg(test)]
    pub(crate) fail_rollback: bool,
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("path", &self.path)
            .field("next_lsn", &self.next_lsn.load(Ordering::Relaxed))
            .field("end", &self.end)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl WalWriter {
    /// Creates a new WAL file or opens an existing one for appending.
    ///
    /// `next_lsn` continues the numbering of records already in the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or opened.
    pub fn new(
        path: &Path,
        store_id: uuid::Uuid,
        enable_checksums: bool,
        next_lsn: u64,
    ) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PageSeqError::WalError(format!("Failed to open WAL file: {e}")))?;

        let mut writer = BufWriter::new(file);

        let file_len = writer
            .get_ref()
            .metadata()
            .map_err(|e| PageSeqError::WalError(format!("Failed to get WAL metadata: {e}")))?
            .len();

        // A file shorter than its header never got past creation
        if !exists || file_len < WalHeader::serialized_size() as u64 {
            writer
                .get_mut()
                .set_len(0)
                .map_err(|e| PageSeqError::WalError(format!("Failed to reset WAL: {e}")))?;
            writer
                .seek(SeekFrom::Start(0))
                .map_err(|e| PageSeqError::WalError(format!("Failed to seek WAL: {e}")))?;
            let header = WalHeader::new(store_id, enable_checksums);
            Self::write_header_internal(&mut writer, &header)?;
        }

        let end = writer
            .seek(SeekFrom::End(0))
            .map_err(|e| PageSeqError::WalError(format!("Failed to seek WAL: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            enable_checksums,
            next_lsn: AtomicU64::new(next_lsn.max(1)),
            store_id,
            end,
            poisoned: false,
            #[cfg(test)]
            fail_sync: false,
            #[cfg(test)]
            fail_rollback: false,
        })
    }

    fn write_header_internal(writer: &mut BufWriter<File>, header: &WalHeader) -> Result<()> {
        writer
            .write_all(&header.magic)
            .map_err(|e| PageSeqError::WalError(format!("Failed to write WAL magic: {e}")))?;

        writer
            .write_all(&header.version.to_le_bytes())
            .map_err(|e| PageSeqError::WalError(format!("Failed to write WAL version: {e}")))?;

        writer
            .write_all(header.store_id.as_bytes())
            .map_err(|e| PageSeqError::WalError(format!("Failed to write store ID: {e}")))?;

        writer
            .write_all(&[u8::from(header.enable_checksums)])
            .map_err(|e| PageSeqError::WalError(format!("Failed to write checksum flag: {e}")))?;

        writer
            .flush()
            .map_err(|e| PageSeqError::WalError(format!("Failed to flush WAL header: {e}")))?;

        Ok(())
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the store ID.
    #[must_use]
    pub fn store_id(&self) -> uuid::Uuid {
        self.store_id
    }

    /// File offset just past the last appended record, buffered or not.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.end
    }

    /// Returns true if an earlier failed batch is still in the file.
    ///
    /// Appends are refused until [`truncate`](Self::truncate) succeeds.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns and increments the next LSN.
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a record to the WAL.
    ///
    /// Returns the LSN assigned to the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        if self.poisoned {
            return Err(PageSeqError::WalError(
                "WAL holds a failed batch that could not be removed; checkpoint or reopen the store"
                    .to_string(),
            ));
        }

        let serialized = record.serialize()?;

        let len = u32::try_from(serialized.len()).map_err(|_| {
            PageSeqError::WalError(format!(
                "WAL record of {} bytes exceeds the length prefix",
                serialized.len()
            ))
        })?;

        let mut frame = Vec::with_capacity(serialized.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&serialized);
        if self.enable_checksums {
            frame.extend_from_slice(&crc32fast::hash(&serialized).to_le_bytes());
        }

        self.writer
            .write_all(&frame)
            .map_err(|e| PageSeqError::WalError(format!("Failed to write record: {e}")))?;
        self.end += frame.len() as u64;

        Ok(record.lsn)
    }

    /// Cuts the file back to `offset`, dropping every record appended after
    /// it, buffered ones included.
    ///
    /// On failure the writer is poisoned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be shortened or synced.
    pub fn rollback_to(&mut self, offset: u64) -> Result<()> {
        self.poisoned = true;

        #[cfg(test)]
        if self.fail_rollback {
            return Err(PageSeqError::WalError("injected rollback failure".to_string()));
        }

        self.discard_buffer()?;

        self.writer
            .get_mut()
            .set_len(offset)
            .map_err(|e| PageSeqError::WalError(format!("Failed to cut back WAL: {e}")))?;
        self.writer
            .seek(SeekFrom::Start(offset))
            .map_err(|e| PageSeqError::WalError(format!("Failed to seek WAL: {e}")))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| PageSeqError::WalError(format!("Failed to sync WAL: {e}")))?;

        self.end = offset;
        self.poisoned = false;
        Ok(())
    }

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| PageSeqError::WalError(format!("Failed to flush WAL: {e}")))
    }

    /// Syncs the WAL file to disk (fsync).
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;

        #[cfg(test)]
        if self.fail_sync {
            return Err(PageSeqError::WalError("injected sync failure".to_string()));
        }

        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| PageSeqError::WalError(format!("Failed to sync WAL: {e}")))
    }

    /// Truncates the WAL file, keeping only the header.
    ///
    /// Used after a successful checkpoint. Clears a poisoned writer.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub fn truncate(&mut self) -> Result<()> {
        let header_size = WalHeader::serialized_size() as u64;

        self.discard_buffer()?;

        self.writer
            .get_mut()
            .set_len(header_size)
            .map_err(|e| PageSeqError::WalError(format!("Failed to truncate WAL: {e}")))?;

        self.writer
            .seek(SeekFrom::End(0))
            .map_err(|e| PageSeqError::WalError(format!("Failed to seek after truncate: {e}")))?;

        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| PageSeqError::WalError(format!("Failed to sync WAL: {e}")))?;

        self.next_lsn.store(1, Ordering::Relaxed);
        self.end = header_size;
        self.poisoned = false;

        Ok(())
    }

    /// Drops bytes still sitting in the buffer without writing them.
    fn discard_buffer(&mut self) -> Result<()> {
        let file = self
            .writer
            .get_ref()
            .try_clone()
            .map_err(|e| PageSeqError::WalError(format!("Failed to reopen WAL handle: {e}")))?;
        let (_, _discarded) =
            std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::record::WalPayload;
    use crate::types::{LessonId, PageId};
    use tempfile::TempDir;

    fn create_test_writer() -> (WalWriter, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("wal.log");
        let writer = WalWriter::new(&wal_path, uuid::Uuid::new_v4(), true, 1).unwrap();
        (writer, temp_dir)
    }

    #[test]
    fn test_create_wal() {
        let (writer, _temp) = create_test_writer();
        assert!(writer.path().exists());
        assert_eq!(
            writer.path().metadata().unwrap().len(),
            WalHeader::serialized_size() as u64
        );
    }

    #[test]
    fn test_append_record() {
        let (mut writer, _temp) = create_test_writer();

        let lsn = writer.next_lsn();
        let record = WalRecord::begin_transaction(1, lsn, LessonId::new(1));

        let returned_lsn = writer.append(&record).unwrap();
        assert_eq!(returned_lsn, lsn);

        writer.flush().unwrap();
    }

    #[test]
    fn test_lsn_continues_from_given_value() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("wal.log");
        let writer = WalWriter::new(&wal_path, uuid::Uuid::new_v4(), false, 17).unwrap();
        assert_eq!(writer.next_lsn(), 17);
        assert_eq!(writer.next_lsn(), 18);
    }

    #[test]
    fn test_reopen_keeps_existing_records() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("wal.log");
        let store_id = uuid::Uuid::new_v4();

        let size_after_first = {
            let mut writer = WalWriter::new(&wal_path, store_id, true, 1).unwrap();
            let lsn = writer.next_lsn();
            writer.append(&WalRecord::commit(1, lsn)).unwrap();
            writer.sync().unwrap();
            wal_path.metadata().unwrap().len()
        };

        let mut writer = WalWriter::new(&wal_path, store_id, true, 2).unwrap();
        let lsn = writer.next_lsn();
        writer.append(&WalRecord::commit(2, lsn)).unwrap();
        writer.sync().unwrap();

        assert!(wal_path.metadata().unwrap().len() > size_after_first);
    }

    #[test]
    fn test_truncate() {
        let (mut writer, _temp) = create_test_writer();

        for i in 1..=5 {
            let lsn = writer.next_lsn();
            let record = WalRecord::data(
                i,
                lsn,
                WalPayload::PageDeletion {
                    lesson_id: LessonId::new(1),
                    page_id: PageId::new(i),
                },
            );
            writer.append(&record).unwrap();
        }
        writer.flush().unwrap();

        let size_before = writer.path().metadata().unwrap().len();

        writer.truncate().unwrap();

        let size_after = writer.path().metadata().unwrap().len();

        assert!(size_after < size_before);
        assert_eq!(size_after, WalHeader::serialized_size() as u64);
        assert_eq!(writer.next_lsn(), 1);
    }

    #[test]
    fn test_rollback_drops_flushed_and_buffered_records() {
        let (mut writer, _temp) = create_test_writer();
        let lsn = writer.next_lsn();
        writer.append(&WalRecord::commit(1, lsn)).unwrap();
        writer.flush().unwrap();
        let mark = writer.end_offset();

        // One record reaches the file, the next stays buffered
        let lsn = writer.next_lsn();
        writer
            .append(&WalRecord::begin_transaction(2, lsn, LessonId::new(1)))
            .unwrap();
        writer.flush().unwrap();
        let lsn = writer.next_lsn();
        writer.append(&WalRecord::commit(2, lsn)).unwrap();

        writer.rollback_to(mark).unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.end_offset(), mark);
        assert_eq!(writer.path().metadata().unwrap().len(), mark);
        assert!(!writer.is_poisoned());

        let mut reader = crate::storage::wal::WalReader::open(writer.path()).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_id, 1);
    }

    #[test]
    fn test_failed_rollback_poisons_until_truncate() {
        let (mut writer, _temp) = create_test_writer();
        let mark = writer.end_offset();
        let lsn = writer.next_lsn();
        writer.append(&WalRecord::commit(1, lsn)).unwrap();

        writer.fail_rollback = true;
        assert!(writer.rollback_to(mark).is_err());
        assert!(writer.is_poisoned());
        assert!(matches!(
            writer.append(&WalRecord::commit(2, 2)),
            Err(PageSeqError::WalError(_))
        ));

        writer.truncate().unwrap();
        assert!(!writer.is_poisoned());
        assert_eq!(writer.end_offset(), WalHeader::serialized_size() as u64);
        writer.append(&WalRecord::commit(3, 1)).unwrap();
    }
}
