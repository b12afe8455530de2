//! Page sequencing.
//!
//! [`PageSequencer`] is the only writer of `sequence` and link fields. Each
//! operation opens one lesson transaction, composes [`SequenceIndex`] and
//! [`LinkChain`] over it, and commits. On any error the transaction is dropped
//! and nothing it wrote becomes visible.
//!
//! After every completed operation a lesson's sequences are exactly `1..=N`
//! and every link names an existing page of the same lesson.

mod link_chain;
mod sequence_index;

pub use link_chain::LinkChain;
pub use sequence_index::SequenceIndex;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{PageSeqError, Result};
use crate::questions;
use crate::storage::{BindingStore, LessonStorage, LessonTransaction, PageStore};
use crate::types::{LessonId, Page, PageData, PageId};

/// Inserts, deletes and reorders the pages of lessons.
#[derive(Debug)]
pub struct PageSequencer<S: LessonStorage> {
    storage: Arc<S>,
}

impl<S: LessonStorage> Clone for PageSequencer<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: LessonStorage> PageSequencer<S> {
    /// Creates a sequencer over the given storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// The underlying storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Creates a page directly after `after_sequence` (0 inserts at the
    /// front) and returns its id.
    ///
    /// Pages behind the insertion point shift back by one. The new page
    /// starts with no links.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::ValidationError`] if `after_sequence` exceeds
    /// the lesson's page count.
    pub fn insert_page(
        &self,
        lesson_id: LessonId,
        after_sequence: u32,
        data: PageData,
    ) -> Result<PageId> {
        let mut txn = self.storage.begin(lesson_id)?;
        let count = txn.count(lesson_id)?;
        if after_sequence > count {
            return Err(PageSeqError::ValidationError(format!(
                "Cannot insert after sequence {after_sequence}: {lesson_id} has {count} pages"
            )));
        }

        // Highest first, so no two pages ever share a sequence.
        let mut index = SequenceIndex::new(&mut txn);
        for sequence in (after_sequence + 1..=count).rev() {
            let page_id = index.expect_id_at(lesson_id, sequence)?;
            index.increment(page_id)?;
        }

        let page_id = txn.create(lesson_id, after_sequence + 1, data)?;
        txn.commit()?;

        tracing::debug!(
            lesson = %lesson_id,
            page = %page_id,
            sequence = after_sequence + 1,
            shifted = count - after_sequence,
            "page inserted"
        );
        Ok(page_id)
    }

    /// Deletes a page, bridging links around it and closing the gap it
    /// leaves.
    ///
    /// `sequence` must be the page's current sequence. Questions attached to
    /// the page are detached.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page is not in the
    /// lesson, [`PageSeqError::ValidationError`] if `sequence` does not match,
    /// or [`PageSeqError::InvariantViolation`] if the lesson's ordering is
    /// already broken.
    pub fn delete_page(&self, lesson_id: LessonId, page_id: PageId, sequence: u32) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let page = lesson_page(&txn, lesson_id, page_id)?;
        if page.sequence != sequence {
            return Err(PageSeqError::ValidationError(format!(
                "{page_id} is at sequence {}, not {sequence}",
                page.sequence
            )));
        }

        let bridged = LinkChain::new(&mut txn).detach_and_bridge(lesson_id, &page)?;
        let detached = questions::detach_page(&mut txn, lesson_id, page_id)?;
        txn.delete(lesson_id, page_id)?;

        let last_page = txn.count(lesson_id)? + 1;
        let first_successor = sequence.checked_add(1).ok_or_else(|| {
            PageSeqError::InvariantViolation(format!("{page_id} sequence overflow"))
        })?;
        let mut index = SequenceIndex::new(&mut txn);
        let successors = (first_successor..=last_page)
            .map(|seq| index.expect_id_at(lesson_id, seq))
            .collect::<Result<Vec<_>>>()?;
        for successor in &successors {
            index.decrement(*successor)?;
        }

        txn.commit()?;

        tracing::debug!(
            lesson = %lesson_id,
            page = %page_id,
            sequence,
            bridged,
            detached,
            shifted = successors.len(),
            "page deleted"
        );
        Ok(())
    }

    /// Swaps the page at `sequence` with the one in front of it.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::ValidationError`] unless
    /// `2 <= sequence <= count`.
    pub fn move_page_up(&self, lesson_id: LessonId, sequence: u32) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let count = txn.count(lesson_id)?;
        if sequence < 2 || sequence > count {
            return Err(PageSeqError::ValidationError(format!(
                "Cannot move sequence {sequence} up in {lesson_id} with {count} pages"
            )));
        }

        let mut index = SequenceIndex::new(&mut txn);
        let moving = index.expect_id_at(lesson_id, sequence)?;
        let displaced = index.expect_id_at(lesson_id, sequence - 1)?;
        index.decrement(moving)?;
        index.increment(displaced)?;
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, page = %moving, from = sequence, "page moved up");
        Ok(())
    }

    /// Swaps the page at `sequence` with the one behind it.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::ValidationError`] unless
    /// `1 <= sequence < count`.
    pub fn move_page_down(&self, lesson_id: LessonId, sequence: u32) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let count = txn.count(lesson_id)?;
        if sequence < 1 || sequence >= count {
            return Err(PageSeqError::ValidationError(format!(
                "Cannot move sequence {sequence} down in {lesson_id} with {count} pages"
            )));
        }

        let mut index = SequenceIndex::new(&mut txn);
        let moving = index.expect_id_at(lesson_id, sequence)?;
        let displaced = index.expect_id_at(lesson_id, sequence + 1)?;
        index.increment(moving)?;
        index.decrement(displaced)?;
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, page = %moving, from = sequence, "page moved down");
        Ok(())
    }

    /// Returns true if `page` holds its lesson's highest sequence.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be counted.
    pub fn is_last_page(&self, page: &Page) -> Result<bool> {
        let mut txn = self.storage.begin(page.lesson_id)?;
        let last = SequenceIndex::new(&mut txn).is_last(page)?;
        Ok(last)
    }

    /// Replaces a page's title and contents, leaving its position and links
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page is not in the lesson.
    pub fn update_page(&self, lesson_id: LessonId, page_id: PageId, data: PageData) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let mut page = lesson_page(&txn, lesson_id, page_id)?;
        page.apply_data(data);
        txn.update(&page)?;
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, page = %page_id, "page updated");
        Ok(())
    }

    /// Sets a page's previous and next links. A page may link to itself.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page is not in the
    /// lesson, or [`PageSeqError::ValidationError`] if a target is not.
    pub fn set_page_links(
        &self,
        lesson_id: LessonId,
        page_id: PageId,
        prev: Option<PageId>,
        next: Option<PageId>,
    ) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let mut page = lesson_page(&txn, lesson_id, page_id)?;

        let links = LinkChain::new(&mut txn);
        links.validate_target(lesson_id, prev)?;
        links.validate_target(lesson_id, next)?;

        page.prev_page_id = prev;
        page.next_page_id = next;
        txn.update(&page)?;
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, page = %page_id, ?prev, ?next, "links set");
        Ok(())
    }

    /// Links every page to its sequence neighbours, making the lesson linear.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::InvariantViolation`] if the lesson's sequences
    /// are not dense.
    pub fn link_in_sequence_order(&self, lesson_id: LessonId) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let ordered = SequenceIndex::new(&mut txn).ordered_ids(lesson_id)?;

        let mut relinked = 0usize;
        for (i, &page_id) in ordered.iter().enumerate() {
            let prev = i.checked_sub(1).map(|j| ordered[j]);
            let next = ordered.get(i + 1).copied();
            let mut page = txn.get(page_id)?;
            if page.prev_page_id != prev || page.next_page_id != next {
                page.prev_page_id = prev;
                page.next_page_id = next;
                txn.update(&page)?;
                relinked += 1;
            }
        }
        txn.commit()?;

        tracing::debug!(lesson = %lesson_id, relinked, "lesson linked in sequence order");
        Ok(())
    }

    /// Checks a lesson's committed pages and bindings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::InvariantViolation`] describing the first
    /// problem found: sequences that are not exactly `1..=N`, a link to a
    /// missing page, or a question bound to a missing page.
    pub fn verify_lesson(&self, lesson_id: LessonId) -> Result<()> {
        let mut txn = self.storage.begin(lesson_id)?;
        let ordered = SequenceIndex::new(&mut txn).ordered_ids(lesson_id)?;

        if let Some((page, target)) = LinkChain::new(&mut txn)
            .dangling_links(lesson_id)?
            .first()
        {
            return Err(PageSeqError::InvariantViolation(format!(
                "{page} links to missing {target}"
            )));
        }

        let existing: BTreeSet<PageId> = ordered.into_iter().collect();
        for binding in txn.bindings(lesson_id)? {
            if let Some(page_id) = binding.page_id {
                if !existing.contains(&page_id) {
                    return Err(PageSeqError::InvariantViolation(format!(
                        "{} binds {} to missing {page_id}",
                        binding.id, binding.question_id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn lesson_page<T: PageStore>(store: &T, lesson_id: LessonId, page_id: PageId) -> Result<Page> {
    match store.get(page_id) {
        Ok(page) if page.lesson_id == lesson_id => Ok(page),
        Ok(_) => Err(PageSeqError::PageNotFound(page_id)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LessonStore;

    const LESSON: LessonId = LessonId::new(1);

    fn sequencer_with(titles: &[&str]) -> (PageSequencer<LessonStore>, Vec<PageId>) {
        let sequencer = PageSequencer::new(Arc::new(LessonStore::new()));
        let ids = titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                sequencer
                    .insert_page(LESSON, i as u32, PageData::new(*title, ""))
                    .unwrap()
            })
            .collect();
        (sequencer, ids)
    }

    fn titles(sequencer: &PageSequencer<LessonStore>) -> Vec<String> {
        sequencer
            .storage()
            .ordered_pages(LESSON)
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect()
    }

    #[test]
    fn test_append_assigns_next_sequence() {
        let (sequencer, ids) = sequencer_with(&["A", "B", "C"]);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(
                sequencer.storage().page(*id).unwrap().sequence,
                i as u32 + 1
            );
        }
        assert_eq!(titles(&sequencer), ["A", "B", "C"]);
    }

    #[test]
    fn test_insert_in_middle_shifts_successors() {
        let (sequencer, _) = sequencer_with(&["A", "B", "C"]);
        sequencer
            .insert_page(LESSON, 1, PageData::new("X", ""))
            .unwrap();
        assert_eq!(titles(&sequencer), ["A", "X", "B", "C"]);
        sequencer.verify_lesson(LESSON).unwrap();
    }

    #[test]
    fn test_insert_at_front() {
        let (sequencer, _) = sequencer_with(&["A", "B"]);
        sequencer
            .insert_page(LESSON, 0, PageData::new("X", ""))
            .unwrap();
        assert_eq!(titles(&sequencer), ["X", "A", "B"]);
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let (sequencer, _) = sequencer_with(&["A"]);
        let err = sequencer
            .insert_page(LESSON, 2, PageData::new("X", ""))
            .unwrap_err();
        assert!(matches!(err, PageSeqError::ValidationError(_)));
        assert_eq!(titles(&sequencer), ["A"]);
    }

    #[test]
    fn test_delete_middle_renumbers_and_bridges() {
        let (sequencer, ids) = sequencer_with(&["A", "B", "C"]);
        sequencer.link_in_sequence_order(LESSON).unwrap();

        sequencer.delete_page(LESSON, ids[1], 2).unwrap();

        let store = sequencer.storage();
        let a = store.page(ids[0]).unwrap();
        let c = store.page(ids[2]).unwrap();
        assert_eq!((a.sequence, c.sequence), (1, 2));
        assert_eq!(a.next_page_id, Some(ids[2]));
        assert_eq!(c.prev_page_id, Some(ids[0]));
        sequencer.verify_lesson(LESSON).unwrap();
    }

    #[test]
    fn test_delete_last_shifts_nothing() {
        let (sequencer, ids) = sequencer_with(&["A", "B"]);
        sequencer.delete_page(LESSON, ids[1], 2).unwrap();
        assert_eq!(titles(&sequencer), ["A"]);
        assert_eq!(sequencer.storage().page(ids[0]).unwrap().sequence, 1);
    }

    #[test]
    fn test_delete_with_wrong_sequence_rejected() {
        let (sequencer, ids) = sequencer_with(&["A", "B"]);
        let err = sequencer.delete_page(LESSON, ids[0], 2).unwrap_err();
        assert!(matches!(err, PageSeqError::ValidationError(_)));
        assert_eq!(titles(&sequencer), ["A", "B"]);
    }

    #[test]
    fn test_delete_missing_page() {
        let (sequencer, _) = sequencer_with(&["A"]);
        let err = sequencer
            .delete_page(LESSON, PageId::new(99), 1)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_at_max_sequence_reports_overflow() {
        let (sequencer, ids) = sequencer_with(&["A"]);
        let stray = {
            let mut txn = sequencer.storage().begin(LESSON).unwrap();
            let id = txn
                .create(LESSON, u32::MAX, PageData::new("Stray", ""))
                .unwrap();
            txn.commit().unwrap();
            id
        };

        let err = sequencer.delete_page(LESSON, stray, u32::MAX).unwrap_err();
        assert!(matches!(err, PageSeqError::InvariantViolation(_)));
        assert!(sequencer.storage().page(stray).is_ok());
        assert!(sequencer.storage().page(ids[0]).is_ok());
    }

    #[test]
    fn test_moves() {
        let (sequencer, _) = sequencer_with(&["A", "B", "C"]);
        sequencer.move_page_up(LESSON, 3).unwrap();
        assert_eq!(titles(&sequencer), ["A", "C", "B"]);
        sequencer.move_page_down(LESSON, 1).unwrap();
        assert_eq!(titles(&sequencer), ["C", "A", "B"]);
    }

    #[test]
    fn test_move_boundaries_rejected() {
        let (sequencer, _) = sequencer_with(&["A", "B"]);
        for result in [
            sequencer.move_page_up(LESSON, 1),
            sequencer.move_page_up(LESSON, 3),
            sequencer.move_page_down(LESSON, 2),
            sequencer.move_page_down(LESSON, 0),
        ] {
            assert!(matches!(result, Err(PageSeqError::ValidationError(_))));
        }
        assert_eq!(titles(&sequencer), ["A", "B"]);
    }

    #[test]
    fn test_is_last_page() {
        let (sequencer, ids) = sequencer_with(&["A", "B"]);
        let store = sequencer.storage();
        assert!(!sequencer.is_last_page(&store.page(ids[0]).unwrap()).unwrap());
        assert!(sequencer.is_last_page(&store.page(ids[1]).unwrap()).unwrap());
    }

    #[test]
    fn test_update_page_keeps_position() {
        let (sequencer, ids) = sequencer_with(&["A", "B"]);
        sequencer
            .update_page(LESSON, ids[1], PageData::new("Renamed", "body"))
            .unwrap();
        let page = sequencer.storage().page(ids[1]).unwrap();
        assert_eq!(page.title, "Renamed");
        assert_eq!(page.sequence, 2);
    }

    #[test]
    fn test_set_page_links_validates_targets() {
        let (sequencer, ids) = sequencer_with(&["A", "B"]);
        sequencer
            .set_page_links(LESSON, ids[0], None, Some(ids[0]))
            .unwrap();
        assert_eq!(
            sequencer.storage().page(ids[0]).unwrap().next_page_id,
            Some(ids[0])
        );

        let err = sequencer
            .set_page_links(LESSON, ids[0], Some(PageId::new(99)), None)
            .unwrap_err();
        assert!(matches!(err, PageSeqError::ValidationError(_)));
    }

    #[test]
    fn test_link_in_sequence_order() {
        let (sequencer, ids) = sequencer_with(&["A", "B", "C"]);
        sequencer.link_in_sequence_order(LESSON).unwrap();

        let store = sequencer.storage();
        let links: Vec<_> = ids
            .iter()
            .map(|id| {
                let page = store.page(*id).unwrap();
                (page.prev_page_id, page.next_page_id)
            })
            .collect();
        assert_eq!(
            links,
            vec![
                (None, Some(ids[1])),
                (Some(ids[0]), Some(ids[2])),
                (Some(ids[1]), None),
            ]
        );
    }
}
