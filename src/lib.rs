//! pageseq - ordered lesson pages
//!
//! A lesson owns an ordered list of pages. The order is stored twice: as a
//! dense 1-based `sequence` number and as a doubly-linked chain of
//! previous/next page ids. [`PageSequencer`] keeps both consistent under
//! insertion, deletion and reordering, running every operation as one atomic
//! transaction over the lesson's page set.
//!
//! Storage is injected: [`LessonStore`] is the bundled implementation, either
//! in-memory or persistent (checkpoint snapshot plus write-ahead log).

pub mod error;
pub mod navigation;
pub mod questions;
pub mod sequencer;
pub mod storage;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

pub use error::{PageSeqError, Result};
pub use navigation::{IndexEntry, ManagementRow, NavLinks, Navigator};
pub use questions::QuestionBinder;
pub use sequencer::{LinkChain, PageSequencer, SequenceIndex};
pub use storage::{BindingStore, LessonStorage, LessonTransaction, LessonTxn, PageStore};
pub use types::{
    BindingId, ContentFormat, LessonId, Page, PageData, PageId, QuestionBinding, QuestionId,
};

use storage::snapshot;
use storage::wal::WalHeader;
use storage::{
    Checkpointer, LessonLocks, PageTable, TableData, WalPayload, WalReader, WalRecord,
    WalReplayer, WalWriter,
};

/// File name of the checkpoint snapshot inside a store directory.
pub const SNAPSHOT_FILE: &str = "pages.snap";

/// File name of the write-ahead log inside a store directory.
pub const WAL_FILE: &str = "wal.log";

/// Configuration for opening or creating a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Enable WAL record checksums for new logs (default: true).
    pub wal_checksums: bool,
    /// Force WAL sync after each commit (default: true).
    pub wal_sync: bool,
    /// Open in read-only mode (default: false).
    pub read_only: bool,
    /// Checkpoint on close when there are unsaved commits (default: true).
    pub checkpoint_on_close: bool,
    /// Label of the "no page" choice in title listings (default: "none").
    pub no_link_label: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_checksums: true,
            wal_sync: true,
            read_only: false,
            checkpoint_on_close: true,
            no_link_label: questions::NO_PAGE_LABEL.to_string(),
        }
    }
}

/// Page and binding storage shared by every lesson.
///
/// Can be used in two modes:
/// - In-memory: Use `LessonStore::new()` for transient data
/// - Persistent: Use `LessonStore::open()` for disk-backed storage
///
/// All writes go through [`LessonTxn`]s obtained from
/// [`begin`](LessonStorage::begin). A commit is logged, then published to the
/// shared table under one write lock, so readers see either none or all of it.
pub struct LessonStore {
    /// Committed rows.
    table: RwLock<PageTable>,
    /// Lessons currently held by a transaction.
    locks: LessonLocks,
    /// WAL writer (None for in-memory or read-only mode).
    wal_writer: Mutex<Option<WalWriter>>,
    /// Checkpointer for WAL management.
    checkpointer: Checkpointer,
    /// Next page id to hand out.
    next_page_id: AtomicU64,
    /// Next binding id to hand out.
    next_binding_id: AtomicU64,
    /// Next transaction ID.
    next_tx_id: AtomicU64,
    /// Store directory path (None for in-memory mode).
    store_path: Option<PathBuf>,
    /// Identity shared by the snapshot and WAL headers.
    store_id: Uuid,
    /// Store configuration.
    config: StoreConfig,
    /// Whether commits happened since the last checkpoint.
    dirty: AtomicBool,
}

impl std::fmt::Debug for LessonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonStore")
            .field("store_id", &self.store_id)
            .field("store_path", &self.store_path)
            .field("pages", &self.table.read().page_count())
            .finish_non_exhaustive()
    }
}

impl Default for LessonStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LessonStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a new in-memory store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self::assemble(PageTable::new(), None, Uuid::new_v4(), None, config, 1, 1)
    }

    fn assemble(
        table: PageTable,
        store_path: Option<PathBuf>,
        store_id: Uuid,
        wal_writer: Option<WalWriter>,
        config: StoreConfig,
        next_tx_id: u64,
        next_checkpoint_id: u64,
    ) -> Self {
        LessonStore {
            next_page_id: AtomicU64::new(table.next_page_id()),
            next_binding_id: AtomicU64::new(table.next_binding_id()),
            table: RwLock::new(table),
            locks: LessonLocks::new(),
            wal_writer: Mutex::new(wal_writer),
            checkpointer: Checkpointer::new(next_checkpoint_id),
            next_tx_id: AtomicU64::new(next_tx_id),
            store_path,
            store_id,
            config,
            dirty: AtomicBool::new(false),
        }
    }

    /// Opens or creates a persistent store in the given directory.
    ///
    /// Recovery loads the snapshot, replays committed WAL transactions and,
    /// unless read-only, checkpoints so the WAL starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The snapshot or WAL is corrupted
    /// - The snapshot and WAL belong to different stores
    /// - The format version is unsupported
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        if !path.exists() {
            if config.read_only {
                return Err(PageSeqError::StorageError(format!(
                    "Store directory {} does not exist",
                    path.display()
                )));
            }
            std::fs::create_dir_all(path).map_err(|e| {
                PageSeqError::StorageError(format!("Failed to create store directory: {e}"))
            })?;
        }

        let snapshot_path = path.join(SNAPSHOT_FILE);
        let wal_path = path.join(WAL_FILE);

        let (mut table, mut store_id, last_checkpoint) = if snapshot_path.exists() {
            let (header, data) = snapshot::read_snapshot(&snapshot_path)?;
            (
                PageTable::from_data(data)?,
                Some(header.store_id),
                header.checkpoint_id,
            )
        } else {
            (PageTable::new(), None, 0)
        };

        let mut wal_checksums = config.wal_checksums;
        let mut max_tx_id = 0;
        let mut max_lsn = 0;
        let mut needs_checkpoint = false;

        // A WAL shorter than its header never got past creation
        let wal_len = std::fs::metadata(&wal_path).map_or(0, |m| m.len());
        if wal_len >= WalHeader::serialized_size() as u64 {
            let mut reader = WalReader::open(&wal_path)?;
            let wal_store_id = reader.header().store_id;
            match store_id {
                Some(id) if id != wal_store_id => {
                    return Err(PageSeqError::CorruptedStore(format!(
                        "WAL belongs to store {wal_store_id}, snapshot to {id}"
                    )));
                }
                Some(_) => {}
                None => store_id = Some(wal_store_id),
            }
            wal_checksums = reader.header().enable_checksums;

            let mut replayer = WalReplayer::new();
            replayer.analyze(&mut reader)?;
            for record in replayer.records_to_apply() {
                table.replay(&record.payload);
            }

            let result = replayer.result();
            if result.records_read > 0 {
                tracing::info!(
                    records = result.records_read,
                    applied = result.records_to_apply,
                    committed = result.transactions_committed,
                    rolled_back = result.transactions_rolled_back,
                    "WAL recovery"
                );
            }
            if reader.has_torn_tail() {
                tracing::warn!(
                    valid_bytes = reader.position(),
                    "WAL ends in a partial record; discarding it"
                );
            }

            needs_checkpoint = result.records_read > 0 || reader.has_torn_tail();
            max_tx_id = result.max_transaction_id;
            max_lsn = result.max_lsn;
        }

        let store_id = store_id.unwrap_or_else(Uuid::new_v4);

        let wal_writer = if config.read_only {
            None
        } else {
            Some(WalWriter::new(
                &wal_path,
                store_id,
                wal_checksums,
                max_lsn + 1,
            )?)
        };

        let read_only = config.read_only;
        let store = Self::assemble(
            table,
            Some(path.to_path_buf()),
            store_id,
            wal_writer,
            config,
            max_tx_id + 1,
            last_checkpoint + 1,
        );

        if needs_checkpoint && !read_only {
            store.checkpoint()?;
        }

        tracing::info!(
            path = %path.display(),
            store_id = %store_id,
            pages = store.table.read().page_count(),
            "store opened"
        );

        Ok(store)
    }

    /// Returns the store identity.
    #[must_use]
    pub fn store_id(&self) -> Uuid {
        self.store_id
    }

    /// Returns the store directory (None for in-memory stores).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if commits happened since the last checkpoint.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Lessons owning at least one page or binding.
    #[must_use]
    pub fn lessons(&self) -> Vec<LessonId> {
        self.table.read().lesson_ids()
    }

    /// Loads a committed page.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if no such row exists.
    pub fn page(&self, page_id: PageId) -> Result<Page> {
        self.table.read().get(page_id)
    }

    /// Committed pages of a lesson ordered by sequence (ties by id).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn ordered_pages(&self, lesson_id: LessonId) -> Result<Vec<Page>> {
        let mut pages = self.table.read().lesson_pages(lesson_id)?;
        pages.sort_by_key(|p| (p.sequence, p.id));
        Ok(pages)
    }

    /// Exports every committed row.
    #[must_use]
    pub fn table_data(&self) -> TableData {
        self.table.read().to_data()
    }

    pub(crate) fn allocate_page_id(&self) -> PageId {
        PageId::new(self.next_page_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn allocate_binding_id(&self) -> BindingId {
        BindingId::new(self.next_binding_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Logs and publishes one transaction's writes.
    ///
    /// Holds the WAL lock, then the table write lock, for the whole publish so
    /// log order matches apply order and no reader sees a partial batch. A
    /// failed publish leaves neither table rows nor WAL records behind.
    pub(crate) fn publish(&self, lesson_id: LessonId, writes: &[WalPayload]) -> Result<()> {
        if self.config.read_only {
            return Err(PageSeqError::ReadOnly);
        }

        let mut wal = self.wal_writer.lock();
        let mut table = self.table.write();

        let Some(writer) = wal.as_mut() else {
            table.apply_batch(writes)?;
            self.dirty.store(true, Ordering::Release);
            return Ok(());
        };

        if writer.is_poisoned() {
            return Err(PageSeqError::WalError(
                "WAL holds a failed transaction; checkpoint or reopen the store".to_string(),
            ));
        }

        let tx_id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        let mark = writer.end_offset();

        if let Err(e) = Self::log_writes(writer, tx_id, lesson_id, writes) {
            self.discard_tail(writer, mark, tx_id);
            return Err(e);
        }

        let undo_log = match table.apply_batch_logged(writes) {
            Ok(undo_log) => undo_log,
            Err(e) => {
                self.discard_tail(writer, mark, tx_id);
                return Err(e);
            }
        };

        let lsn = writer.next_lsn();
        let durable = writer.append(&WalRecord::commit(tx_id, lsn)).and_then(|_| {
            if self.config.wal_sync {
                writer.sync()
            } else {
                writer.flush()
            }
        });
        if let Err(e) = durable {
            table.rollback(undo_log);
            self.discard_tail(writer, mark, tx_id);
            return Err(e);
        }

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn log_writes(
        writer: &mut WalWriter,
        tx_id: u64,
        lesson_id: LessonId,
        writes: &[WalPayload],
    ) -> Result<()> {
        let lsn = writer.next_lsn();
        writer.append(&WalRecord::begin_transaction(tx_id, lsn, lesson_id))?;
        for payload in writes {
            let lsn = writer.next_lsn();
            writer.append(&WalRecord::data(tx_id, lsn, payload.clone()))?;
        }
        Ok(())
    }

    /// Removes a failed transaction's records so replay cannot revive it.
    ///
    /// If the log cannot be cut back the writer stays poisoned and the store
    /// is marked dirty, so the next checkpoint replaces the log.
    fn discard_tail(&self, writer: &mut WalWriter, mark: u64, tx_id: u64) {
        match writer.rollback_to(mark) {
            Ok(()) => tracing::debug!(tx_id, "discarded failed transaction from WAL"),
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(tx_id, error = %e, "failed to discard WAL tail; log poisoned");
            }
        }
    }

    /// Forces a checkpoint: writes the snapshot and truncates the WAL.
    ///
    /// A no-op for in-memory and read-only stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or the WAL cannot be
    /// truncated.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(path) = self.store_path.as_deref() else {
            return Ok(());
        };
        if self.config.read_only {
            return Ok(());
        }

        let mut wal = self.wal_writer.lock();
        let data = self.table.read().to_data();
        self.checkpointer
            .checkpoint(&path.join(SNAPSHOT_FILE), self.store_id, &data, wal.as_mut())?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Closes the store, checkpointing unsaved commits if configured.
    ///
    /// This is called automatically when the store is dropped, but calling it
    /// explicitly allows error handling.
    ///
    /// # Errors
    ///
    /// Returns an error if the final checkpoint fails.
    pub fn close(&self) -> Result<()> {
        if self.store_path.is_none() {
            return Ok(());
        }
        if self.is_dirty() && self.config.checkpoint_on_close {
            self.checkpoint()?;
        }
        Ok(())
    }
}

impl LessonStorage for LessonStore {
    type Txn<'a> = LessonTxn<'a>;

    fn begin(&self, lesson_id: LessonId) -> Result<LessonTxn<'_>> {
        let guard = self.locks.acquire(lesson_id);
        let (pages, bindings) = {
            let table = self.table.read();
            (
                table.lesson_pages(lesson_id)?,
                table.lesson_bindings(lesson_id),
            )
        };
        Ok(LessonTxn::new(self, guard, pages, bindings))
    }

    fn no_link_label(&self) -> &str {
        &self.config.no_link_label
    }
}

impl Drop for LessonStore {
    fn drop(&mut self) {
        // Attempt to close gracefully, ignore errors during drop
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to checkpoint on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LESSON: LessonId = LessonId::new(1);

    #[test]
    fn test_in_memory_commit_publishes() {
        let store = LessonStore::new();
        let mut txn = store.begin(LESSON).unwrap();
        let id = txn.create(LESSON, 1, PageData::new("One", "")).unwrap();

        // Not visible until commit
        assert!(store.page(id).is_err());
        txn.commit().unwrap();

        assert_eq!(store.page(id).unwrap().title, "One");
        assert!(store.is_dirty());
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let store = LessonStore::new();
        {
            let mut txn = store.begin(LESSON).unwrap();
            txn.create(LESSON, 1, PageData::new("Lost", "")).unwrap();
        }
        assert!(store.ordered_pages(LESSON).unwrap().is_empty());
        assert!(!store.locks.is_held(LESSON));
    }

    #[test]
    fn test_read_your_writes_inside_transaction() {
        let store = LessonStore::new();
        let mut txn = store.begin(LESSON).unwrap();
        let id = txn.create(LESSON, 1, PageData::new("One", "")).unwrap();
        let mut page = txn.get(id).unwrap();
        page.sequence = 2;
        txn.update(&page).unwrap();

        assert_eq!(txn.get_by_sequence(LESSON, 2).unwrap().id, id);
        assert_eq!(txn.count(LESSON).unwrap(), 1);
    }

    #[test]
    fn test_transaction_rejects_other_lesson() {
        let store = LessonStore::new();
        let mut txn = store.begin(LESSON).unwrap();
        let result = txn.create(LessonId::new(2), 1, PageData::default());
        assert!(matches!(result, Err(PageSeqError::InvariantViolation(_))));
    }

    #[test]
    fn test_open_creates_directory_and_wal() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("store");
        let store = LessonStore::open(&dir, StoreConfig::default()).unwrap();
        assert!(dir.join(WAL_FILE).exists());
        assert_eq!(store.path(), Some(dir.as_path()));
    }

    #[test]
    fn test_read_only_rejects_commit() {
        let temp = TempDir::new().unwrap();
        drop(LessonStore::open(temp.path(), StoreConfig::default()).unwrap());

        let config = StoreConfig {
            read_only: true,
            ..StoreConfig::default()
        };
        let store = LessonStore::open(temp.path(), config).unwrap();
        let mut txn = store.begin(LESSON).unwrap();
        txn.create(LESSON, 1, PageData::default()).unwrap();
        assert!(matches!(txn.commit(), Err(PageSeqError::ReadOnly)));
    }

    #[test]
    fn test_read_only_missing_directory() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig {
            read_only: true,
            ..StoreConfig::default()
        };
        assert!(LessonStore::open(&temp.path().join("absent"), config).is_err());
    }

    fn durable_store(dir: &Path) -> LessonStore {
        let config = StoreConfig {
            checkpoint_on_close: false,
            ..StoreConfig::default()
        };
        LessonStore::open(dir, config).unwrap()
    }

    fn commit_page(store: &LessonStore, sequence: u32, title: &str) -> Result<PageId> {
        let mut txn = store.begin(LESSON)?;
        let id = txn.create(LESSON, sequence, PageData::new(title, ""))?;
        txn.commit()?;
        Ok(id)
    }

    fn titles(store: &LessonStore) -> Vec<String> {
        store
            .ordered_pages(LESSON)
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect()
    }

    #[test]
    fn test_failed_sync_is_not_replayed() {
        let temp = TempDir::new().unwrap();
        {
            let store = durable_store(temp.path());
            commit_page(&store, 1, "A").unwrap();

            store.wal_writer.lock().as_mut().unwrap().fail_sync = true;
            let err = commit_page(&store, 2, "Lost").unwrap_err();
            assert!(matches!(err, PageSeqError::WalError(_)));
            assert_eq!(titles(&store), ["A"]);

            store.wal_writer.lock().as_mut().unwrap().fail_sync = false;
            commit_page(&store, 2, "B").unwrap();
        }

        let store = durable_store(temp.path());
        assert_eq!(titles(&store), ["A", "B"]);
        assert_eq!(store.table.read().pages_at_sequence(LESSON, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_unremovable_failure_blocks_commits_until_checkpoint() {
        let temp = TempDir::new().unwrap();
        let store = durable_store(temp.path());
        commit_page(&store, 1, "A").unwrap();

        {
            let mut wal = store.wal_writer.lock();
            let writer = wal.as_mut().unwrap();
            writer.fail_sync = true;
            writer.fail_rollback = true;
        }
        assert!(commit_page(&store, 2, "Lost").is_err());
        {
            let mut wal = store.wal_writer.lock();
            let writer = wal.as_mut().unwrap();
            writer.fail_sync = false;
            writer.fail_rollback = false;
        }

        assert!(matches!(
            commit_page(&store, 2, "Blocked"),
            Err(PageSeqError::WalError(_))
        ));
        assert_eq!(titles(&store), ["A"]);
        assert!(store.is_dirty());

        store.checkpoint().unwrap();
        commit_page(&store, 2, "B").unwrap();
        drop(store);

        let store = durable_store(temp.path());
        assert_eq!(titles(&store), ["A", "B"]);
    }
}
