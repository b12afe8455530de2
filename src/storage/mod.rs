//! Storage module for lesson pages.
//!
//! This module provides the persistence boundary for pageseq, including:
//! - The [`PageStore`] and [`BindingStore`] contracts every backend satisfies
//! - The committed in-memory table ([`PageTable`])
//! - Lesson-scoped transactions ([`LessonTxn`]) and their locks ([`locks`])
//! - Checkpoint snapshots ([`snapshot`])
//! - Write-ahead logging ([`wal`])

mod table;
mod txn;

pub mod locks;
pub mod snapshot;
pub mod wal;

pub use locks::{LessonGuard, LessonLocks};
pub use snapshot::{SnapshotHeader, CURRENT_VERSION, MAGIC_BYTES};
pub use table::{PageTable, TableData, Undo};
pub use txn::LessonTxn;
pub use wal::{
    Checkpointer, ReplayResult, WalPayload, WalReader, WalRecord, WalRecordType, WalReplayer,
    WalWriter,
};

use crate::error::{PageSeqError, Result};
use crate::types::{BindingId, LessonId, Page, PageData, PageId, QuestionBinding, QuestionId};

/// Sole gateway to page rows.
///
/// Implementations enforce existence checks only. Sequence density and link
/// validity are the sequencer's business; a store persists what it is given.
pub trait PageStore {
    /// Loads a page by id.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if no such row is visible.
    fn get(&self, page_id: PageId) -> Result<Page>;

    /// Returns the ids of every page at `sequence` in the lesson, in id order.
    ///
    /// More than one id means the lesson's ordering is already broken.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    fn pages_at_sequence(&self, lesson_id: LessonId, sequence: u32) -> Result<Vec<PageId>>;

    /// Loads the page at `sequence` in the lesson.
    ///
    /// If several rows share the position, any one of them is returned.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::SequenceNotFound`] if the position is empty.
    fn get_by_sequence(&self, lesson_id: LessonId, sequence: u32) -> Result<Page> {
        let ids = self.pages_at_sequence(lesson_id, sequence)?;
        match ids.first() {
            Some(&id) => self.get(id),
            None => Err(PageSeqError::SequenceNotFound {
                lesson_id,
                sequence,
            }),
        }
    }

    /// Creates an unlinked page and returns its new id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn create(&mut self, lesson_id: LessonId, sequence: u32, data: PageData) -> Result<PageId>;

    /// Overwrites an existing page row, refreshing `modified_at`.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the row does not exist.
    fn update(&mut self, page: &Page) -> Result<()>;

    /// Removes a page row.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the lesson has no such page.
    fn delete(&mut self, lesson_id: LessonId, page_id: PageId) -> Result<()>;

    /// Counts the pages of a lesson.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    fn count(&self, lesson_id: LessonId) -> Result<u32>;

    /// Returns every page of a lesson in id order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    fn lesson_pages(&self, lesson_id: LessonId) -> Result<Vec<Page>>;
}

/// Storage for question-to-page bindings.
pub trait BindingStore {
    /// Returns every binding of a lesson in id order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    fn bindings(&self, lesson_id: LessonId) -> Result<Vec<QuestionBinding>>;

    /// Loads a binding by id.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::BindingNotFound`] if no such row is visible.
    fn get_binding(&self, binding_id: BindingId) -> Result<QuestionBinding>;

    /// Creates a binding and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn create_binding(
        &mut self,
        lesson_id: LessonId,
        question_id: QuestionId,
        page_id: Option<PageId>,
    ) -> Result<BindingId>;

    /// Overwrites an existing binding.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::BindingNotFound`] if the row does not exist.
    fn update_binding(&mut self, binding: &QuestionBinding) -> Result<()>;
}

/// A unit of work over one lesson's pages and bindings.
///
/// Reads observe earlier writes of the same transaction. Dropping the
/// transaction without calling [`commit`](LessonTransaction::commit) discards
/// every write.
pub trait LessonTransaction: PageStore + BindingStore {
    /// The lesson this transaction is scoped to.
    fn lesson_id(&self) -> LessonId;

    /// Publishes all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the writes cannot be made durable; nothing is
    /// published in that case.
    fn commit(self) -> Result<()>;
}

/// Factory of lesson transactions.
///
/// Transactions on the same lesson are serialized; transactions on different
/// lessons proceed independently.
pub trait LessonStorage {
    /// Transaction type handed out by [`begin`](LessonStorage::begin).
    type Txn<'a>: LessonTransaction
    where
        Self: 'a;

    /// Opens a transaction on a lesson, blocking while another transaction
    /// holds the same lesson.
    ///
    /// # Errors
    ///
    /// Returns an error if the lesson cannot be loaded.
    fn begin(&self, lesson_id: LessonId) -> Result<Self::Txn<'_>>;

    /// Label of the "no page" choice in title listings.
    fn no_link_label(&self) -> &str {
        crate::questions::NO_PAGE_LABEL
    }
}
