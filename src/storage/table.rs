//! Committed page and binding rows with lesson and position indexes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PageSeqError, Result};
use crate::storage::wal::WalPayload;
use crate::storage::PageStore;
use crate::types::{BindingId, LessonId, Page, PageData, PageId, QuestionBinding};

/// Serializable table contents (indexes are rebuilt on load).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableData {
    /// Page rows in id order.
    pub pages: Vec<Page>,
    /// Binding rows in id order.
    pub bindings: Vec<QuestionBinding>,
    /// Lowest page id never handed out.
    pub next_page_id: u64,
    /// Lowest binding id never handed out.
    pub next_binding_id: u64,
}

/// Inverse of one applied write, used to roll a half-applied batch back.
#[derive(Debug, Clone)]
pub enum Undo {
    /// Drop a page that the write inserted.
    RemovePage(PageId),
    /// Put back the previous image of a page.
    RestorePage(Page),
    /// Drop a binding that the write inserted.
    RemoveBinding(BindingId),
    /// Put back the previous image of a binding.
    RestoreBinding(QuestionBinding),
}

/// Page rows of every lesson.
///
/// The `(lesson, sequence)` index holds a set per position so a broken
/// ordering is representable and detectable instead of silently overwritten.
#[derive(Debug, Clone)]
pub struct PageTable {
    pages: HashMap<PageId, Page>,
    lesson_pages: HashMap<LessonId, BTreeSet<PageId>>,
    positions: HashMap<(LessonId, u32), BTreeSet<PageId>>,
    bindings: BTreeMap<BindingId, QuestionBinding>,
    next_page_id: u64,
    next_binding_id: u64,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        PageTable {
            pages: HashMap::new(),
            lesson_pages: HashMap::new(),
            positions: HashMap::new(),
            bindings: BTreeMap::new(),
            next_page_id: 1,
            next_binding_id: 1,
        }
    }

    /// Rebuilds a table from serialized data.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::CorruptedStore`] if a page or binding id
    /// appears twice.
    pub fn from_data(data: TableData) -> Result<Self> {
        let mut table = PageTable::new();
        for page in data.pages {
            let id = page.id;
            table.insert_row(page).map_err(|_| {
                PageSeqError::CorruptedStore(format!("Duplicate {id} in snapshot"))
            })?;
        }
        for binding in data.bindings {
            let id = binding.id;
            if table.bindings.insert(id, binding).is_some() {
                return Err(PageSeqError::CorruptedStore(format!(
                    "Duplicate {id} in snapshot"
                )));
            }
            table.next_binding_id = table.next_binding_id.max(id.get() + 1);
        }
        table.next_page_id = table.next_page_id.max(data.next_page_id);
        table.next_binding_id = table.next_binding_id.max(data.next_binding_id);
        Ok(table)
    }

    /// Exports table data for serialization.
    #[must_use]
    pub fn to_data(&self) -> TableData {
        let mut pages: Vec<Page> = self.pages.values().cloned().collect();
        pages.sort_by_key(|p| p.id);
        TableData {
            pages,
            bindings: self.bindings.values().cloned().collect(),
            next_page_id: self.next_page_id,
            next_binding_id: self.next_binding_id,
        }
    }

    /// Lowest page id never handed out.
    #[must_use]
    pub fn next_page_id(&self) -> u64 {
        self.next_page_id
    }

    /// Lowest binding id never handed out.
    #[must_use]
    pub fn next_binding_id(&self) -> u64 {
        self.next_binding_id
    }

    /// Total number of page rows across lessons.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Lessons owning at least one page or binding, ascending.
    #[must_use]
    pub fn lesson_ids(&self) -> Vec<LessonId> {
        let mut ids: BTreeSet<LessonId> = self.lesson_pages.keys().copied().collect();
        ids.extend(self.bindings.values().map(|b| b.lesson_id));
        ids.into_iter().collect()
    }

    /// Bindings of a lesson in id order.
    #[must_use]
    pub fn lesson_bindings(&self, lesson_id: LessonId) -> Vec<QuestionBinding> {
        self.bindings
            .values()
            .filter(|b| b.lesson_id == lesson_id)
            .cloned()
            .collect()
    }

    fn index_page(&mut self, page: &Page) {
        self.lesson_pages
            .entry(page.lesson_id)
            .or_default()
            .insert(page.id);
        self.positions
            .entry((page.lesson_id, page.sequence))
            .or_default()
            .insert(page.id);
    }

    fn unindex_page(&mut self, page: &Page) {
        if let Some(ids) = self.lesson_pages.get_mut(&page.lesson_id) {
            ids.remove(&page.id);
            if ids.is_empty() {
                self.lesson_pages.remove(&page.lesson_id);
            }
        }
        let key = (page.lesson_id, page.sequence);
        if let Some(ids) = self.positions.get_mut(&key) {
            ids.remove(&page.id);
            if ids.is_empty() {
                self.positions.remove(&key);
            }
        }
    }

    /// Inserts a row with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::InvariantViolation`] if the id is taken.
    pub fn insert_row(&mut self, page: Page) -> Result<()> {
        if self.pages.contains_key(&page.id) {
            return Err(PageSeqError::InvariantViolation(format!(
                "{} already exists",
                page.id
            )));
        }
        self.next_page_id = self.next_page_id.max(page.id.get() + 1);
        self.index_page(&page);
        self.pages.insert(page.id, page);
        Ok(())
    }

    /// Replaces a row as given and returns the previous image.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the row does not exist.
    pub fn replace_row(&mut self, page: Page) -> Result<Page> {
        let old = self
            .pages
            .remove(&page.id)
            .ok_or(PageSeqError::PageNotFound(page.id))?;
        self.unindex_page(&old);
        self.index_page(&page);
        self.pages.insert(page.id, page);
        Ok(old)
    }

    /// Removes a row and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the row does not exist.
    pub fn remove_row(&mut self, page_id: PageId) -> Result<Page> {
        let old = self
            .pages
            .remove(&page_id)
            .ok_or(PageSeqError::PageNotFound(page_id))?;
        self.unindex_page(&old);
        Ok(old)
    }

    /// Applies one logged write, returning its inverse.
    ///
    /// Control payloads (begin/commit/abort/checkpoint) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write conflicts with the current rows.
    pub fn apply(&mut self, payload: &WalPayload) -> Result<Option<Undo>> {
        let undo = match payload {
            WalPayload::PageInsertion { page } => {
                self.insert_row(page.clone())?;
                Undo::RemovePage(page.id)
            }
            WalPayload::PageUpdate { page } => Undo::RestorePage(self.replace_row(page.clone())?),
            WalPayload::PageDeletion { lesson_id, page_id } => {
                match self.pages.get(page_id) {
                    Some(page) if page.lesson_id == *lesson_id => {}
                    _ => return Err(PageSeqError::PageNotFound(*page_id)),
                }
                Undo::RestorePage(self.remove_row(*page_id)?)
            }
            WalPayload::BindingInsertion { binding } => {
                if self.bindings.contains_key(&binding.id) {
                    return Err(PageSeqError::InvariantViolation(format!(
                        "{} already exists",
                        binding.id
                    )));
                }
                self.next_binding_id = self.next_binding_id.max(binding.id.get() + 1);
                self.bindings.insert(binding.id, binding.clone());
                Undo::RemoveBinding(binding.id)
            }
            WalPayload::BindingUpdate { binding } => {
                let slot = self
                    .bindings
                    .get_mut(&binding.id)
                    .ok_or(PageSeqError::BindingNotFound(binding.id))?;
                Undo::RestoreBinding(std::mem::replace(slot, binding.clone()))
            }
            WalPayload::BeginTransaction { .. }
            | WalPayload::Commit { .. }
            | WalPayload::Abort { .. }
            | WalPayload::Checkpoint { .. } => return Ok(None),
        };
        Ok(Some(undo))
    }

    /// Reverts one applied write.
    pub fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::RemovePage(id) => {
                let _ = self.remove_row(id);
            }
            Undo::RestorePage(page) => {
                let _ = self.remove_row(page.id);
                self.index_page(&page);
                self.pages.insert(page.id, page);
            }
            Undo::RemoveBinding(id) => {
                self.bindings.remove(&id);
            }
            Undo::RestoreBinding(binding) => {
                self.bindings.insert(binding.id, binding);
            }
        }
    }

    /// Applies a batch of writes all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns the first failing write's error after undoing the writes
    /// applied before it.
    pub fn apply_batch(&mut self, payloads: &[WalPayload]) -> Result<()> {
        self.apply_batch_logged(payloads).map(|_| ())
    }

    /// Like [`apply_batch`](Self::apply_batch), but hands back the undo log so
    /// a caller can still revert the batch after it succeeded.
    ///
    /// # Errors
    ///
    /// Returns the first failing write's error; nothing stays applied.
    pub fn apply_batch_logged(&mut self, payloads: &[WalPayload]) -> Result<Vec<Undo>> {
        let mut undo_log = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match self.apply(payload) {
                Ok(Some(undo)) => undo_log.push(undo),
                Ok(None) => {}
                Err(e) => {
                    self.rollback(undo_log);
                    return Err(e);
                }
            }
        }
        Ok(undo_log)
    }

    /// Reverts an undo log, newest entry first.
    pub fn rollback(&mut self, mut undo_log: Vec<Undo>) {
        while let Some(undo) = undo_log.pop() {
            self.undo(undo);
        }
    }

    /// Applies a recovered write, tolerating rows that already reflect it.
    pub fn replay(&mut self, payload: &WalPayload) {
        match payload {
            WalPayload::PageInsertion { page } | WalPayload::PageUpdate { page } => {
                let _ = self.remove_row(page.id);
                let _ = self.insert_row(page.clone());
            }
            WalPayload::PageDeletion { page_id, .. } => {
                let _ = self.remove_row(*page_id);
                self.next_page_id = self.next_page_id.max(page_id.get() + 1);
            }
            WalPayload::BindingInsertion { binding } | WalPayload::BindingUpdate { binding } => {
                self.next_binding_id = self.next_binding_id.max(binding.id.get() + 1);
                self.bindings.insert(binding.id, binding.clone());
            }
            _ => {}
        }
    }

    fn lesson_ids_of(&self, lesson_id: LessonId) -> impl Iterator<Item = &PageId> {
        self.lesson_pages
            .get(&lesson_id)
            .into_iter()
            .flat_map(BTreeSet::iter)
    }
}

impl PageStore for PageTable {
    fn get(&self, page_id: PageId) -> Result<Page> {
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(PageSeqError::PageNotFound(page_id))
    }

    fn pages_at_sequence(&self, lesson_id: LessonId, sequence: u32) -> Result<Vec<PageId>> {
        Ok(self
            .positions
            .get(&(lesson_id, sequence))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn create(&mut self, lesson_id: LessonId, sequence: u32, data: PageData) -> Result<PageId> {
        let id = PageId::new(self.next_page_id);
        let page = Page::new(id, lesson_id, sequence, data, Utc::now());
        self.insert_row(page)?;
        Ok(id)
    }

    fn update(&mut self, page: &Page) -> Result<()> {
        let existing = self
            .pages
            .get(&page.id)
            .ok_or(PageSeqError::PageNotFound(page.id))?;
        let mut row = page.clone();
        row.created_at = existing.created_at;
        row.modified_at = Utc::now();
        self.replace_row(row)?;
        Ok(())
    }

    fn delete(&mut self, lesson_id: LessonId, page_id: PageId) -> Result<()> {
        match self.pages.get(&page_id) {
            Some(page) if page.lesson_id == lesson_id => {
                self.remove_row(page_id)?;
                Ok(())
            }
            _ => Err(PageSeqError::PageNotFound(page_id)),
        }
    }

    fn count(&self, lesson_id: LessonId) -> Result<u32> {
        Ok(self.lesson_pages.get(&lesson_id).map_or(0, |ids| ids.len() as u32))
    }

    fn lesson_pages(&self, lesson_id: LessonId) -> Result<Vec<Page>> {
        Ok(self
            .lesson_ids_of(lesson_id)
            .filter_map(|id| self.pages.get(id).cloned())
            .collect())
    }
}
