//! WAL reader for sequential log reading and replay.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{PageSeqError, Result};
use crate::storage::wal::{WalHeader, WalRecord, WalRecordType};

/// Reader for WAL files.
pub struct WalReader {
    /// Path to the WAL file.
    path: PathBuf,
    /// Buffered reader.
    reader: BufReader<File>,
    /// WAL header.
    header: WalHeader,
    /// End of the last complete record.
    position: u64,
    /// Set when the log ends inside a record (crash mid-append).
    torn_tail: bool,
}

impl WalReader {
    /// Opens a WAL file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has an invalid header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PageSeqError::WalError(format!("Failed to open WAL file: {e}")))?;

        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        header.validate()?;

        let position = WalHeader::serialized_size() as u64;

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            header,
            position,
            torn_tail: false,
        })
    }

    fn read_header(reader: &mut BufReader<File>) -> Result<WalHeader> {
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|e| PageSeqError::WalError(format!("Failed to read WAL magic: {e}")))?;

        let mut version_bytes = [0u8; 4];
        reader
            .read_exact(&mut version_bytes)
            .map_err(|e| PageSeqError::WalError(format!("Failed to read WAL version: {e}")))?;
        let version = u32::from_le_bytes(version_bytes);

        let mut uuid_bytes = [0u8; 16];
        reader
            .read_exact(&mut uuid_bytes)
            .map_err(|e| PageSeqError::WalError(format!("Failed to read store ID: {e}")))?;
        let store_id = uuid::Uuid::from_bytes(uuid_bytes);

        let mut checksum_flag = [0u8; 1];
        reader
            .read_exact(&mut checksum_flag)
            .map_err(|e| PageSeqError::WalError(format!("Failed to read checksum flag: {e}")))?;
        let enable_checksums = checksum_flag[0] != 0;

        Ok(WalHeader {
            magic,
            version,
            store_id,
            enable_checksums,
        })
    }

    /// Returns the WAL header.
    #[must_use]
    pub fn header(&self) -> &WalHeader {
        &self.header
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the byte offset just past the last complete record read.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns true if reading stopped at an incomplete trailing record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Reads exactly `buf.len()` bytes; `Ok(false)` on end of file.
    fn read_or_eof(&mut self, buf: &mut [u8], what: &str) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(PageSeqError::WalError(format!("Failed to read {what}: {e}"))),
        }
    }

    /// Reads the next record from the WAL.
    ///
    /// Returns `None` at end of file, including when the final record was only
    /// partially written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or is corrupted.
    pub fn read_record(&mut self) -> Result<Option<WalRecord>> {
        let mut len_bytes = [0u8; 4];
        if !self.read_or_eof(&mut len_bytes, "record length")? {
            // A clean end leaves no bytes behind; anything else is a torn length
            let file_len = self
                .reader
                .get_ref()
                .metadata()
                .map_err(|e| PageSeqError::WalError(format!("Failed to get WAL metadata: {e}")))?
                .len();
            self.torn_tail = file_len > self.position;
            return Ok(None);
        }

        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut data = vec![0u8; len];
        if !self.read_or_eof(&mut data, "record data")? {
            self.torn_tail = true;
            return Ok(None);
        }

        let mut consumed = 4 + len as u64;

        if self.header.enable_checksums {
            let mut checksum_bytes = [0u8; 4];
            if !self.read_or_eof(&mut checksum_bytes, "checksum")? {
                self.torn_tail = true;
                return Ok(None);
            }
            consumed += 4;

            let expected_checksum = u32::from_le_bytes(checksum_bytes);
            let actual_checksum = crc32fast::hash(&data);

            if expected_checksum != actual_checksum {
                return Err(PageSeqError::ChecksumError(format!(
                    "WAL record checksum mismatch at position {}",
                    self.position
                )));
            }
        }

        let record = WalRecord::deserialize(&data)?;
        self.position += consumed;

        Ok(Some(record))
    }

    /// Reads all records from the WAL.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be read.
    pub fn read_all(&mut self) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();

        while let Some(record) = self.read_record()? {
            records.push(record);
        }

        Ok(records)
    }

    /// Resets the reader to the beginning of the records.
    ///
    /// # Errors
    ///
    /// Returns an error if seeking fails.
    pub fn reset(&mut self) -> Result<()> {
        let header_size = WalHeader::serialized_size() as u64;
        self.reader
            .seek(SeekFrom::Start(header_size))
            .map_err(|e| PageSeqError::WalError(format!("Failed to reset WAL reader: {e}")))?;
        self.position = header_size;
        self.torn_tail = false;
        Ok(())
    }
}

/// Result of WAL replay.
#[derive(Debug, Default)]
pub struct ReplayResult {
    /// Number of records read.
    pub records_read: usize,
    /// Number of data records belonging to committed transactions.
    pub records_to_apply: usize,
    /// Number of transactions committed.
    pub transactions_committed: usize,
    /// Number of transactions rolled back (aborted or never committed).
    pub transactions_rolled_back: usize,
    /// IDs of committed transactions.
    pub committed_txs: HashSet<u64>,
    /// Highest transaction ID seen.
    pub max_transaction_id: u64,
    /// Highest LSN seen.
    pub max_lsn: u64,
}

/// Replays WAL records to recover store state.
pub struct WalReplayer {
    /// Transactions begun but not yet resolved.
    active_txs: HashSet<u64>,
    /// Transactions that wrote a commit record.
    committed_txs: HashSet<u64>,
    /// Transactions that wrote an abort record.
    aborted_txs: HashSet<u64>,
    /// Every record read, in log order.
    records: Vec<WalRecord>,
    max_transaction_id: u64,
    max_lsn: u64,
}

impl WalReplayer {
    /// Creates a new WAL replayer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active_txs: HashSet::new(),
            committed_txs: HashSet::new(),
            aborted_txs: HashSet::new(),
            records: Vec::new(),
            max_transaction_id: 0,
            max_lsn: 0,
        }
    }

    /// Processes records from a WAL reader.
    ///
    /// This is the first pass that identifies committed transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn analyze(&mut self, reader: &mut WalReader) -> Result<()> {
        while let Some(record) = reader.read_record()? {
            self.observe(record);
        }
        Ok(())
    }

    /// Feeds a single record through the analysis pass.
    pub fn observe(&mut self, record: WalRecord) {
        match record.record_type {
            WalRecordType::BeginTransaction => {
                self.active_txs.insert(record.transaction_id);
            }
            WalRecordType::Commit => {
                self.active_txs.remove(&record.transaction_id);
                self.committed_txs.insert(record.transaction_id);
            }
            WalRecordType::Abort => {
                self.active_txs.remove(&record.transaction_id);
                self.aborted_txs.insert(record.transaction_id);
            }
            _ => {}
        }

        self.max_transaction_id = self.max_transaction_id.max(record.transaction_id);
        self.max_lsn = self.max_lsn.max(record.lsn);
        self.records.push(record);
    }

    /// Returns the replay result.
    #[must_use]
    pub fn result(&self) -> ReplayResult {
        ReplayResult {
            records_read: self.records.len(),
            records_to_apply: self.records_to_apply().count(),
            transactions_committed: self.committed_txs.len(),
            transactions_rolled_back: self.active_txs.len() + self.aborted_txs.len(),
            committed_txs: self.committed_txs.clone(),
            max_transaction_id: self.max_transaction_id,
            max_lsn: self.max_lsn,
        }
    }

    /// Returns data records of committed transactions, in log order.
    pub fn records_to_apply(&self) -> impl Iterator<Item = &WalRecord> {
        self.records.iter().filter(|r| {
            r.payload.is_data() && self.committed_txs.contains(&r.transaction_id)
        })
    }

    /// Returns the set of committed transaction IDs.
    #[must_use]
    pub fn committed_transactions(&self) -> &HashSet<u64> {
        &self.committed_txs
    }

    /// Returns IDs of transactions that never committed.
    #[must_use]
    pub fn rolled_back_transactions(&self) -> HashSet<u64> {
        self.active_txs.union(&self.aborted_txs).copied().collect()
    }
}

impl Default for WalReplayer {
    fn default() -> Self {
        Self::new()
    }
}
