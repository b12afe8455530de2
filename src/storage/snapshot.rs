//! Checkpoint snapshot file.
//!
//! # Layout
//!
//! - Bytes `[0..4]`: `u32` LE length of the serialized header
//! - Next `len` bytes: bincode-serialized [`SnapshotHeader`]
//! - Remaining bytes: bincode-serialized [`TableData`], `body_len` long
//!
//! The snapshot is written to a sibling temp file, synced, then renamed over
//! the previous one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PageSeqError, Result};
use crate::storage::table::TableData;

/// Magic bytes for snapshot file identification.
pub const MAGIC_BYTES: &[u8; 8] = b"PGSEQSNP";

/// Current snapshot format version.
pub const CURRENT_VERSION: u32 = 1;

/// Header stored at the front of the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic bytes for file identification ("PGSEQSNP").
    pub magic: [u8; 8],
    /// Snapshot format version.
    pub version: u32,
    /// Unique store identifier, shared with the WAL header.
    pub store_id: Uuid,
    /// Checkpoint that produced this snapshot.
    pub checkpoint_id: u64,
    /// Length of the body in bytes.
    pub body_len: u64,
    /// CRC32 of the body.
    pub body_checksum: u32,
    /// CRC32 of the header (excluding this field).
    pub checksum: u32,
}

impl SnapshotHeader {
    /// Creates a header for an empty body.
    #[must_use]
    pub fn new(store_id: Uuid, checkpoint_id: u64) -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: CURRENT_VERSION,
            store_id,
            checkpoint_id,
            body_len: 0,
            body_checksum: 0,
            checksum: 0,
        }
    }

    /// Validates magic bytes and version.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC_BYTES {
            return Err(PageSeqError::InvalidStoreFile(
                "Invalid snapshot magic bytes".into(),
            ));
        }

        if self.version > CURRENT_VERSION {
            return Err(PageSeqError::UnsupportedVersion {
                version: self.version,
                max_supported: CURRENT_VERSION,
            });
        }

        Ok(())
    }

    /// Computes the checksum for this header.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut header_copy = self.clone();
        header_copy.checksum = 0;

        if let Ok(bytes) = bincode::serialize(&header_copy) {
            crc32fast::hash(&bytes)
        } else {
            0
        }
    }

    /// Updates the checksum field.
    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Verifies the header checksum.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serializes the header to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            PageSeqError::StorageError(format!("Failed to serialize snapshot header: {e}"))
        })
    }

    /// Deserializes a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| {
            PageSeqError::CorruptedStore(format!("Failed to deserialize snapshot header: {e}"))
        })
    }
}

/// Writes a snapshot of `data` to `path`.
///
/// # Errors
///
/// Returns an error if serialization or any file operation fails.
pub fn write_snapshot(
    path: &Path,
    store_id: Uuid,
    checkpoint_id: u64,
    data: &TableData,
) -> Result<()> {
    let body = bincode::serialize(data)
        .map_err(|e| PageSeqError::StorageError(format!("Failed to serialize table data: {e}")))?;

    let mut header = SnapshotHeader::new(store_id, checkpoint_id);
    header.body_len = body.len() as u64;
    header.body_checksum = crc32fast::hash(&body);
    header.update_checksum();
    let header_bytes = header.serialize()?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| PageSeqError::StorageError("Snapshot header too large".into()))?;

    let tmp_path = path.with_extension("snap.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(|e| {
            PageSeqError::StorageError(format!("Failed to create snapshot file: {e}"))
        })?;
        file.write_all(&header_len.to_le_bytes())
            .and_then(|()| file.write_all(&header_bytes))
            .and_then(|()| file.write_all(&body))
            .map_err(|e| PageSeqError::StorageError(format!("Failed to write snapshot: {e}")))?;
        file.sync_all()
            .map_err(|e| PageSeqError::StorageError(format!("Failed to sync snapshot: {e}")))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| PageSeqError::StorageError(format!("Failed to install snapshot: {e}")))?;

    Ok(())
}

/// Reads and verifies the snapshot at `path`.
///
/// # Errors
///
/// Returns an error if the file is unreadable, has a bad header, or fails a
/// checksum.
pub fn read_snapshot(path: &Path) -> Result<(SnapshotHeader, TableData)> {
    let bytes = fs::read(path)
        .map_err(|e| PageSeqError::StorageError(format!("Failed to read snapshot: {e}")))?;

    if bytes.len() < 4 {
        return Err(PageSeqError::CorruptedStore(
            "Snapshot too short for header length".into(),
        ));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[0..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;

    let header_end = 4 + header_len;
    if header_end > bytes.len() {
        return Err(PageSeqError::CorruptedStore(format!(
            "Snapshot header length {header_len} exceeds file size {}",
            bytes.len()
        )));
    }

    let header = SnapshotHeader::deserialize(&bytes[4..header_end])?;
    header.validate()?;
    if !header.verify_checksum() {
        return Err(PageSeqError::ChecksumError(
            "Snapshot header checksum mismatch".into(),
        ));
    }

    let body = &bytes[header_end..];
    if body.len() as u64 != header.body_len {
        return Err(PageSeqError::CorruptedStore(format!(
            "Snapshot body is {} bytes, header records {}",
            body.len(),
            header.body_len
        )));
    }
    if crc32fast::hash(body) != header.body_checksum {
        return Err(PageSeqError::ChecksumError(
            "Snapshot body checksum mismatch".into(),
        ));
    }

    let data = bincode::deserialize(body).map_err(|e| {
        PageSeqError::CorruptedStore(format!("Failed to deserialize table data: {e}"))
    })?;

    Ok((header, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PageStore, PageTable};
    use crate::types::{LessonId, PageData};
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_header() {
        let store_id = Uuid::new_v4();
        let mut header = SnapshotHeader::new(store_id, 3);

        assert_eq!(header.magic, *MAGIC_BYTES);
        assert_eq!(header.version, CURRENT_VERSION);
        assert_eq!(header.store_id, store_id);

        header.update_checksum();
        assert!(header.verify_checksum());

        header.body_len = 99;
        assert!(!header.verify_checksum());
    }

    #[test]
    fn test_header_validation() {
        let header = SnapshotHeader::new(Uuid::new_v4(), 1);
        assert!(header.validate().is_ok());

        let mut bad_header = header.clone();
        bad_header.magic = [0u8; 8];
        assert!(matches!(
            bad_header.validate(),
            Err(PageSeqError::InvalidStoreFile(_))
        ));

        let mut future_header = header;
        future_header.version = CURRENT_VERSION + 1;
        assert!(future_header.validate().is_err());
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pages.snap");
        let store_id = Uuid::new_v4();

        let mut table = PageTable::new();
        let lesson = LessonId::new(1);
        table.create(lesson, 1, PageData::new("One", "a")).unwrap();
        table.create(lesson, 2, PageData::new("Two", "b")).unwrap();

        write_snapshot(&path, store_id, 4, &table.to_data()).unwrap();
        let (header, data) = read_snapshot(&path).unwrap();

        assert_eq!(header.store_id, store_id);
        assert_eq!(header.checkpoint_id, 4);
        let restored = PageTable::from_data(data).unwrap();
        assert_eq!(restored.count(lesson).unwrap(), 2);
        assert_eq!(restored.get_by_sequence(lesson, 2).unwrap().title, "Two");
        assert!(!temp.path().join("pages.snap.tmp").exists());
    }

    #[test]
    fn test_corrupted_body_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pages.snap");

        let mut table = PageTable::new();
        table
            .create(LessonId::new(1), 1, PageData::new("One", "a"))
            .unwrap();
        write_snapshot(&path, Uuid::new_v4(), 1, &table.to_data()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_snapshot(&path),
            Err(PageSeqError::ChecksumError(_))
        ));
    }

    #[test]
    fn test_truncated_file_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pages.snap");
        fs::write(&path, [1u8, 0]).unwrap();
        assert!(matches!(
            read_snapshot(&path),
            Err(PageSeqError::CorruptedStore(_))
        ));
    }
}
