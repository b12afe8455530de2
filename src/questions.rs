//! Question-to-page bindings.
//!
//! A lesson's questions may each be attached to one of its pages. Bindings are
//! written through the same lesson transactions as pages, so deleting a page
//! and detaching its questions commit together.

use std::sync::Arc;

use crate::error::{PageSeqError, Result};
use crate::storage::{BindingStore, LessonStorage, LessonTransaction, PageStore};
use crate::types::{BindingId, LessonId, PageId, QuestionBinding, QuestionId};

/// Label of the "no page" choice in title listings.
pub const NO_PAGE_LABEL: &str = "none";

/// Clears the page of every binding attached to `page_id`. Returns how many
/// bindings were detached.
pub(crate) fn detach_page<T: BindingStore>(
    store: &mut T,
    lesson_id: LessonId,
    page_id: PageId,
) -> Result<usize> {
    let mut detached = 0;
    for mut binding in store.bindings(lesson_id)? {
        if binding.page_id == Some(page_id) {
            binding.page_id = None;
            store.update_binding(&binding)?;
            detached += 1;
        }
    }
    Ok(detached)
}

/// Page titles in sequence order followed by a trailing "no page" choice.
pub(crate) fn titles_with_none<T: PageStore>(
    store: &T,
    lesson_id: LessonId,
    none_label: &str,
) -> Result<Vec<(Option<PageId>, String)>> {
    let mut pages = store.lesson_pages(lesson_id)?;
    pages.sort_by_key(|p| (p.sequence, p.id));
    let mut titles: Vec<(Option<PageId>, String)> =
        pages.into_iter().map(|p| (Some(p.id), p.title)).collect();
    titles.push((None, none_label.to_string()));
    Ok(titles)
}

/// Attaches questions to pages.
#[derive(Debug)]
pub struct QuestionBinder<S: LessonStorage> {
    storage: Arc<S>,
}

impl<S: LessonStorage> Clone for QuestionBinder<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: LessonStorage> QuestionBinder<S> {
    /// Creates a binder over the given storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Attaches a question to a page.
    ///
    /// Returns `None` if that question is already attached to that page.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page is not in the lesson.
    pub fn attach(
        &self,
        lesson_id: LessonId,
        question_id: QuestionId,
        page_id: PageId,
    ) -> Result<Option<BindingId>> {
        let mut txn = self.storage.begin(lesson_id)?;
        ensure_page(&txn, lesson_id, page_id)?;

        let duplicate = txn
            .bindings(lesson_id)?
            .iter()
            .any(|b| b.question_id == question_id && b.page_id == Some(page_id));
        if duplicate {
            return Ok(None);
        }

        let binding_id = txn.create_binding(lesson_id, question_id, Some(page_id))?;
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, %question_id, page = %page_id, "question attached");
        Ok(Some(binding_id))
    }

    /// The question attached to a page, if any. When several are attached,
    /// the one bound first wins.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn question_for_page(
        &self,
        lesson_id: LessonId,
        page_id: PageId,
    ) -> Result<Option<QuestionId>> {
        let txn = self.storage.begin(lesson_id)?;
        Ok(txn
            .bindings(lesson_id)?
            .into_iter()
            .find(|b| b.page_id == Some(page_id))
            .map(|b| b.question_id))
    }

    /// Every binding of a lesson in id order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn bindings(&self, lesson_id: LessonId) -> Result<Vec<QuestionBinding>> {
        let txn = self.storage.begin(lesson_id)?;
        txn.bindings(lesson_id)
    }

    /// Moves a binding to another page, or detaches it with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::BindingNotFound`] if the binding is not in the
    /// lesson, or [`PageSeqError::PageNotFound`] if the new page is not.
    pub fn reassign(
        &self,
        lesson_id: LessonId,
        binding_id: BindingId,
        page_id: Option<PageId>,
    ) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let mut binding = txn.get_binding(binding_id)?;
        if binding.lesson_id != lesson_id {
            return Err(PageSeqError::BindingNotFound(binding_id));
        }
        if let Some(page_id) = page_id {
            ensure_page(&txn, lesson_id, page_id)?;
        }

        binding.page_id = page_id;
        txn.update_binding(&binding)?;
        txn.commit()
    }

    /// Page titles in sequence order plus a trailing "no page" choice labelled
    /// by [`LessonStorage::no_link_label`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be read.
    pub fn page_titles(&self, lesson_id: LessonId) -> Result<Vec<(Option<PageId>, String)>> {
        let txn = self.storage.begin(lesson_id)?;
        titles_with_none(&txn, lesson_id, self.storage.no_link_label())
    }
}

fn ensure_page<T: PageStore>(store: &T, lesson_id: LessonId, page_id: PageId) -> Result<()> {
    match store.get(page_id) {
        Ok(page) if page.lesson_id == lesson_id => Ok(()),
        Ok(_) => Err(PageSeqError::PageNotFound(page_id)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageData;
    use crate::{LessonStore, PageSequencer};

    const LESSON: LessonId = LessonId::new(1);

    fn setup(pages: u32) -> (QuestionBinder<LessonStore>, Vec<PageId>, Arc<LessonStore>) {
        let store = Arc::new(LessonStore::new());
        let sequencer = PageSequencer::new(Arc::clone(&store));
        let ids = (0..pages)
            .map(|i| {
                sequencer
                    .insert_page(LESSON, i, PageData::new(format!("P{}", i + 1), ""))
                    .unwrap()
            })
            .collect();
        (QuestionBinder::new(Arc::clone(&store)), ids, store)
    }

    #[test]
    fn test_attach_and_lookup() {
        let (binder, ids, _store) = setup(2);
        let binding = binder.attach(LESSON, QuestionId::new(7), ids[1]).unwrap();
        assert!(binding.is_some());

        assert_eq!(
            binder.question_for_page(LESSON, ids[1]).unwrap(),
            Some(QuestionId::new(7))
        );
        assert_eq!(binder.question_for_page(LESSON, ids[0]).unwrap(), None);
    }

    #[test]
    fn test_attach_duplicate_returns_none() {
        let (binder, ids, _store) = setup(1);
        assert!(binder
            .attach(LESSON, QuestionId::new(7), ids[0])
            .unwrap()
            .is_some());
        assert!(binder
            .attach(LESSON, QuestionId::new(7), ids[0])
            .unwrap()
            .is_none());
        assert_eq!(binder.bindings(LESSON).unwrap().len(), 1);
    }

    #[test]
    fn test_attach_to_missing_page() {
        let (binder, _ids, _store) = setup(1);
        let err = binder
            .attach(LESSON, QuestionId::new(7), PageId::new(99))
            .unwrap_err();
        assert!(matches!(err, PageSeqError::PageNotFound(_)));
        assert!(binder.bindings(LESSON).unwrap().is_empty());
    }

    #[test]
    fn test_reassign_and_detach() {
        let (binder, ids, _store) = setup(2);
        let binding = binder
            .attach(LESSON, QuestionId::new(7), ids[0])
            .unwrap()
            .unwrap();

        binder.reassign(LESSON, binding, Some(ids[1])).unwrap();
        assert_eq!(
            binder.question_for_page(LESSON, ids[1]).unwrap(),
            Some(QuestionId::new(7))
        );

        binder.reassign(LESSON, binding, None).unwrap();
        assert_eq!(binder.bindings(LESSON).unwrap()[0].page_id, None);

        assert!(matches!(
            binder.reassign(LESSON, BindingId::new(99), None),
            Err(PageSeqError::BindingNotFound(_))
        ));
    }

    #[test]
    fn test_page_titles_has_trailing_none() {
        let (binder, ids, _store) = setup(2);
        let titles = binder.page_titles(LESSON).unwrap();
        assert_eq!(
            titles,
            vec![
                (Some(ids[0]), "P1".to_string()),
                (Some(ids[1]), "P2".to_string()),
                (None, "none".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_titles_use_configured_label() {
        let config = crate::StoreConfig {
            no_link_label: "(end)".to_string(),
            ..crate::StoreConfig::default()
        };
        let store = Arc::new(LessonStore::with_config(config));
        let page = PageSequencer::new(Arc::clone(&store))
            .insert_page(LESSON, 0, PageData::new("Only", ""))
            .unwrap();

        let titles = QuestionBinder::new(store).page_titles(LESSON).unwrap();
        assert_eq!(
            titles,
            vec![
                (Some(page), "Only".to_string()),
                (None, "(end)".to_string()),
            ]
        );
    }
}
