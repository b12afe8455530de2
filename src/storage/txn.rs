//! Lesson-scoped transactions.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{PageSeqError, Result};
use crate::storage::locks::LessonGuard;
use crate::storage::wal::WalPayload;
use crate::storage::{BindingStore, LessonTransaction, PageStore};
use crate::types::{BindingId, LessonId, Page, PageData, PageId, QuestionBinding, QuestionId};
use crate::LessonStore;

/// Working copy of one lesson's rows plus the writes made to it.
///
/// The lesson is held exclusively from [`LessonStore::begin`] until the
/// transaction commits or drops. Reads are served from the working copy, so
/// they see this transaction's earlier writes and nothing else. Rows of other
/// lessons are invisible; writing one is an invariant violation.
pub struct LessonTxn<'a> {
    store: &'a LessonStore,
    lesson_id: LessonId,
    _guard: LessonGuard<'a>,
    pages: BTreeMap<PageId, Page>,
    bindings: BTreeMap<BindingId, QuestionBinding>,
    writes: Vec<WalPayload>,
    committed: bool,
}

impl std::fmt::Debug for LessonTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonTxn")
            .field("lesson_id", &self.lesson_id)
            .field("pages", &self.pages.len())
            .field("pending_writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl<'a> LessonTxn<'a> {
    pub(crate) fn new(
        store: &'a LessonStore,
        guard: LessonGuard<'a>,
        pages: Vec<Page>,
        bindings: Vec<QuestionBinding>,
    ) -> Self {
        LessonTxn {
            store,
            lesson_id: guard.lesson_id(),
            _guard: guard,
            pages: pages.into_iter().map(|p| (p.id, p)).collect(),
            bindings: bindings.into_iter().map(|b| (b.id, b)).collect(),
            writes: Vec::new(),
            committed: false,
        }
    }

    /// Number of writes not yet committed.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    fn check_scope(&self, lesson_id: LessonId) -> Result<()> {
        if lesson_id == self.lesson_id {
            Ok(())
        } else {
            Err(PageSeqError::InvariantViolation(format!(
                "Transaction on {} cannot touch {lesson_id}",
                self.lesson_id
            )))
        }
    }
}

impl PageStore for LessonTxn<'_> {
    fn get(&self, page_id: PageId) -> Result<Page> {
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(PageSeqError::PageNotFound(page_id))
    }

    fn pages_at_sequence(&self, lesson_id: LessonId, sequence: u32) -> Result<Vec<PageId>> {
        self.check_scope(lesson_id)?;
        Ok(self
            .pages
            .values()
            .filter(|p| p.sequence == sequence)
            .map(|p| p.id)
            .collect())
    }

    fn create(&mut self, lesson_id: LessonId, sequence: u32, data: PageData) -> Result<PageId> {
        self.check_scope(lesson_id)?;
        let id = self.store.allocate_page_id();
        let page = Page::new(id, lesson_id, sequence, data, Utc::now());
        self.writes.push(WalPayload::PageInsertion { page: page.clone() });
        self.pages.insert(id, page);
        Ok(id)
    }

    fn update(&mut self, page: &Page) -> Result<()> {
        self.check_scope(page.lesson_id)?;
        let existing = self
            .pages
            .get_mut(&page.id)
            .ok_or(PageSeqError::PageNotFound(page.id))?;
        let mut row = page.clone();
        row.created_at = existing.created_at;
        row.modified_at = Utc::now();
        *existing = row.clone();
        self.writes.push(WalPayload::PageUpdate { page: row });
        Ok(())
    }

    fn delete(&mut self, lesson_id: LessonId, page_id: PageId) -> Result<()> {
        self.check_scope(lesson_id)?;
        self.pages
            .remove(&page_id)
            .ok_or(PageSeqError::PageNotFound(page_id))?;
        self.writes
            .push(WalPayload::PageDeletion { lesson_id, page_id });
        Ok(())
    }

    fn count(&self, lesson_id: LessonId) -> Result<u32> {
        self.check_scope(lesson_id)?;
        Ok(self.pages.len() as u32)
    }

    fn lesson_pages(&self, lesson_id: LessonId) -> Result<Vec<Page>> {
        self.check_scope(lesson_id)?;
        Ok(self.pages.values().cloned().collect())
    }
}

impl BindingStore for LessonTxn<'_> {
    fn bindings(&self, lesson_id: LessonId) -> Result<Vec<QuestionBinding>> {
        self.check_scope(lesson_id)?;
        Ok(self.bindings.values().cloned().collect())
    }

    fn get_binding(&self, binding_id: BindingId) -> Result<QuestionBinding> {
        self.bindings
            .get(&binding_id)
            .cloned()
            .ok_or(PageSeqError::BindingNotFound(binding_id))
    }

    fn create_binding(
        &mut self,
        lesson_id: LessonId,
        question_id: QuestionId,
        page_id: Option<PageId>,
    ) -> Result<BindingId> {
        self.check_scope(lesson_id)?;
        let binding = QuestionBinding {
            id: self.store.allocate_binding_id(),
            lesson_id,
            question_id,
            page_id,
        };
        let id = binding.id;
        self.writes.push(WalPayload::BindingInsertion {
            binding: binding.clone(),
        });
        self.bindings.insert(id, binding);
        Ok(id)
    }

    fn update_binding(&mut self, binding: &QuestionBinding) -> Result<()> {
        self.check_scope(binding.lesson_id)?;
        let existing = self
            .bindings
            .get_mut(&binding.id)
            .ok_or(PageSeqError::BindingNotFound(binding.id))?;
        *existing = binding.clone();
        self.writes.push(WalPayload::BindingUpdate {
            binding: binding.clone(),
        });
        Ok(())
    }
}

impl LessonTransaction for LessonTxn<'_> {
    fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    fn commit(mut self) -> Result<()> {
        if !self.writes.is_empty() {
            self.store.publish(self.lesson_id, &self.writes)?;
            tracing::debug!(lesson = %self.lesson_id, writes = self.writes.len(), "transaction committed");
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for LessonTxn<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.writes.is_empty() {
            tracing::debug!(
                lesson = %self.lesson_id,
                discarded = self.writes.len(),
                "transaction rolled back"
            );
        }
    }
}
