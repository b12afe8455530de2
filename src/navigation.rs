//! Read-only navigation views over a lesson.
//!
//! These produce plain data for whatever renders the lesson: where the
//! home/previous/next buttons lead, the page index, and the rows of the
//! page-management screen.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{PageSeqError, Result};
use crate::questions;
use crate::storage::{BindingStore, LessonStorage, PageStore};
use crate::types::{LessonId, Page, PageId};

/// Navigation targets of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavLinks {
    /// Lesson landing page.
    pub home: LessonId,
    /// Target of "previous", following the page's link.
    pub prev: Option<PageId>,
    /// Target of "next", following the page's link.
    pub next: Option<PageId>,
}

/// One line of the page index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub page_id: PageId,
    pub sequence: u32,
    pub title: String,
}

/// One row of the page-management screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementRow {
    pub page_id: PageId,
    pub sequence: u32,
    pub title: String,
    /// Sequence of the page the previous link leads to.
    pub prev_sequence: Option<u32>,
    /// Sequence of the page the next link leads to.
    pub next_sequence: Option<u32>,
    pub can_move_up: bool,
    pub can_move_down: bool,
    /// Whether a question is attached to the page.
    pub has_question: bool,
}

/// Read-only lesson views.
#[derive(Debug)]
pub struct Navigator<S: LessonStorage> {
    storage: Arc<S>,
    no_link_label: String,
}

impl<S: LessonStorage> Clone for Navigator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            no_link_label: self.no_link_label.clone(),
        }
    }
}

impl<S: LessonStorage> Navigator<S> {
    /// Creates a navigator labelling the "no link" choice as the storage
    /// does (see [`StoreConfig::no_link_label`](crate::StoreConfig::no_link_label)).
    pub fn new(storage: Arc<S>) -> Self {
        let no_link_label = storage.no_link_label().to_string();
        Self {
            storage,
            no_link_label,
        }
    }

    /// Overrides the storage's label for the "no link" choice.
    #[must_use]
    pub fn with_no_link_label(mut self, label: impl Into<String>) -> Self {
        self.no_link_label = label.into();
        self
    }

    /// Where a page's navigation buttons lead. Follows links, not sequence.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page is not in the lesson.
    pub fn nav_links(&self, lesson_id: LessonId, page_id: PageId) -> Result<NavLinks> {
        let txn = self.storage.begin(lesson_id)?;
        let page = txn.get(page_id)?;
        if page.lesson_id != lesson_id {
            return Err(PageSeqError::PageNotFound(page_id));
        }
        Ok(NavLinks {
            home: lesson_id,
            prev: page.prev_page_id,
            next: page.next_page_id,
        })
    }

    /// The page a learner starts on, if the lesson has any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn first_page(&self, lesson_id: LessonId) -> Result<Option<PageId>> {
        let txn = self.storage.begin(lesson_id)?;
        match txn.get_by_sequence(lesson_id, 1) {
            Ok(page) => Ok(Some(page.id)),
            Err(PageSeqError::SequenceNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Pages in sequence order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn page_index(&self, lesson_id: LessonId) -> Result<Vec<IndexEntry>> {
        let txn = self.storage.begin(lesson_id)?;
        Ok(ordered(&txn, lesson_id)?
            .into_iter()
            .map(|p| IndexEntry {
                page_id: p.id,
                sequence: p.sequence,
                title: p.title,
            })
            .collect())
    }

    /// Link-target choices: every page title in sequence order, then the
    /// "no link" label.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn page_titles(&self, lesson_id: LessonId) -> Result<Vec<(Option<PageId>, String)>> {
        let txn = self.storage.begin(lesson_id)?;
        questions::titles_with_none(&txn, lesson_id, &self.no_link_label)
    }

    /// Rows of the page-management screen in sequence order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn management_rows(&self, lesson_id: LessonId) -> Result<Vec<ManagementRow>> {
        let txn = self.storage.begin(lesson_id)?;
        let pages = ordered(&txn, lesson_id)?;
        let count = txn.count(lesson_id)?;

        let sequences: HashMap<PageId, u32> = pages.iter().map(|p| (p.id, p.sequence)).collect();
        let with_question: BTreeSet<PageId> = txn
            .bindings(lesson_id)?
            .into_iter()
            .filter_map(|b| b.page_id)
            .collect();

        Ok(pages
            .into_iter()
            .map(|p| ManagementRow {
                page_id: p.id,
                sequence: p.sequence,
                prev_sequence: p.prev_page_id.and_then(|id| sequences.get(&id).copied()),
                next_sequence: p.next_page_id.and_then(|id| sequences.get(&id).copied()),
                can_move_up: p.sequence != 1,
                can_move_down: p.sequence != count,
                has_question: with_question.contains(&p.id),
                title: p.title,
            })
            .collect())
    }
}

fn ordered<T: PageStore>(store: &T, lesson_id: LessonId) -> Result<Vec<Page>> {
    let mut pages = store.lesson_pages(lesson_id)?;
    pages.sort_by_key(|p| (p.sequence, p.id));
    Ok(pages)
}
