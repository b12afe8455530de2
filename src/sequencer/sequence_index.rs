//! Integer ordering bookkeeping.
//!
//! Pages of a lesson carry a dense 1-based `sequence`. [`SequenceIndex`]
//! shifts single pages by one position and resolves positions back to ids,
//! treating zero or several pages at a position as a broken ordering.

use crate::error::{PageSeqError, Result};
use crate::storage::PageStore;
use crate::types::{LessonId, Page, PageId};

/// Sequence arithmetic over a page store.
///
/// Not safe against concurrent callers on its own; run it inside a lesson
/// transaction.
#[derive(Debug)]
pub struct SequenceIndex<'s, S: PageStore> {
    store: &'s mut S,
}

impl<'s, S: PageStore> SequenceIndex<'s, S> {
    /// Wraps a store.
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    /// Moves a page one position toward the front and returns its new
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page does not exist, or
    /// [`PageSeqError::InvariantViolation`] if it already sits at sequence 1.
    pub fn decrement(&mut self, page_id: PageId) -> Result<u32> {
        let mut page = self.store.get(page_id)?;
        page.sequence = page
            .sequence
            .checked_sub(1)
            .filter(|&seq| seq >= 1)
            .ok_or_else(|| {
                PageSeqError::InvariantViolation(format!(
                    "{page_id} cannot move below sequence 1"
                ))
            })?;
        self.store.update(&page)?;
        Ok(page.sequence)
    }

    /// Moves a page one position toward the back and returns its new
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::PageNotFound`] if the page does not exist, or
    /// [`PageSeqError::InvariantViolation`] if the sequence would overflow.
    pub fn increment(&mut self, page_id: PageId) -> Result<u32> {
        let mut page = self.store.get(page_id)?;
        page.sequence = page.sequence.checked_add(1).ok_or_else(|| {
            PageSeqError::InvariantViolation(format!("{page_id} sequence overflow"))
        })?;
        self.store.update(&page)?;
        Ok(page.sequence)
    }

    /// Resolves the single page at `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::SequenceNotFound`] if the position is empty and
    /// [`PageSeqError::InvariantViolation`] if several pages share it.
    pub fn id_at(&self, lesson_id: LessonId, sequence: u32) -> Result<PageId> {
        match self.store.pages_at_sequence(lesson_id, sequence)?.as_slice() {
            [] => Err(PageSeqError::SequenceNotFound {
                lesson_id,
                sequence,
            }),
            [id] => Ok(*id),
            many => Err(PageSeqError::InvariantViolation(format!(
                "{} pages share sequence {sequence} in {lesson_id}",
                many.len()
            ))),
        }
    }

    /// Like [`id_at`](Self::id_at), for positions that density guarantees
    /// are occupied.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::InvariantViolation`] if the position is empty
    /// or shared.
    pub fn expect_id_at(&self, lesson_id: LessonId, sequence: u32) -> Result<PageId> {
        self.id_at(lesson_id, sequence).map_err(|e| match e {
            PageSeqError::SequenceNotFound { .. } => PageSeqError::InvariantViolation(format!(
                "{lesson_id} has no page at sequence {sequence}"
            )),
            other => other,
        })
    }

    /// Returns true if `page` holds the lesson's highest sequence.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be counted.
    pub fn is_last(&self, page: &Page) -> Result<bool> {
        Ok(page.sequence == self.store.count(page.lesson_id)?)
    }

    /// Page ids in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::InvariantViolation`] unless the sequences form
    /// exactly `1..=N`.
    pub fn ordered_ids(&self, lesson_id: LessonId) -> Result<Vec<PageId>> {
        let mut pages = self.store.lesson_pages(lesson_id)?;
        pages.sort_by_key(|p| (p.sequence, p.id));
        pages
            .iter()
            .zip(1u32..)
            .map(|(page, expected)| {
                if page.sequence == expected {
                    Ok(page.id)
                } else {
                    Err(PageSeqError::InvariantViolation(format!(
                        "{lesson_id} expected sequence {expected}, found {} on {}",
                        page.sequence, page.id
                    )))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageTable;
    use crate::types::PageData;

    const LESSON: LessonId = LessonId::new(1);

    fn table_with(n: u32) -> (PageTable, Vec<PageId>) {
        let mut table = PageTable::new();
        let ids = (1..=n)
            .map(|seq| {
                table
                    .create(LESSON, seq, PageData::new(format!("P{seq}"), ""))
                    .unwrap()
            })
            .collect();
        (table, ids)
    }

    #[test]
    fn test_increment_and_decrement() {
        let (mut table, ids) = table_with(2);
        let mut index = SequenceIndex::new(&mut table);
        assert_eq!(index.increment(ids[0]).unwrap(), 2);
        assert_eq!(index.decrement(ids[1]).unwrap(), 1);
        assert_eq!(index.id_at(LESSON, 1).unwrap(), ids[1]);
        assert_eq!(index.id_at(LESSON, 2).unwrap(), ids[0]);
    }

    #[test]
    fn test_decrement_below_one_rejected() {
        let (mut table, ids) = table_with(1);
        let mut index = SequenceIndex::new(&mut table);
        assert!(matches!(
            index.decrement(ids[0]),
            Err(PageSeqError::InvariantViolation(_))
        ));
        assert_eq!(table.get(ids[0]).unwrap().sequence, 1);
    }

    #[test]
    fn test_missing_page() {
        let (mut table, _) = table_with(1);
        let mut index = SequenceIndex::new(&mut table);
        assert!(index.increment(PageId::new(42)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_id_at_distinguishes_empty_and_shared() {
        let (mut table, ids) = table_with(2);
        let mut index = SequenceIndex::new(&mut table);

        assert!(matches!(
            index.id_at(LESSON, 3),
            Err(PageSeqError::SequenceNotFound { sequence: 3, .. })
        ));
        assert!(matches!(
            index.expect_id_at(LESSON, 3),
            Err(PageSeqError::InvariantViolation(_))
        ));

        index.decrement(ids[1]).unwrap();
        assert!(matches!(
            index.id_at(LESSON, 1),
            Err(PageSeqError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_is_last() {
        let (mut table, ids) = table_with(3);
        let last = table.get(ids[2]).unwrap();
        let first = table.get(ids[0]).unwrap();
        let index = SequenceIndex::new(&mut table);
        assert!(index.is_last(&last).unwrap());
        assert!(!index.is_last(&first).unwrap());
    }

    #[test]
    fn test_ordered_ids_requires_density() {
        let (mut table, ids) = table_with(3);
        let mut index = SequenceIndex::new(&mut table);
        index.increment(ids[0]).unwrap();
        index.decrement(ids[1]).unwrap();
        assert_eq!(
            index.ordered_ids(LESSON).unwrap(),
            vec![ids[1], ids[0], ids[2]]
        );

        index.increment(ids[2]).unwrap();
        assert!(matches!(
            index.ordered_ids(LESSON),
            Err(PageSeqError::InvariantViolation(_))
        ));
    }
}
