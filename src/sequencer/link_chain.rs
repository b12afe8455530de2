//! Previous/next link maintenance.

use std::collections::BTreeSet;

use crate::error::{PageSeqError, Result};
use crate::storage::PageStore;
use crate::types::{LessonId, Page, PageId};

/// Link repair and validation over a page store.
///
/// Links are free-form: any page of the lesson may point at any other (or at
/// itself), so repairs scan the whole lesson rather than trusting the removed
/// page's own neighbours.
#[derive(Debug)]
pub struct LinkChain<'s, S: PageStore> {
    store: &'s mut S,
}

impl<'s, S: PageStore> LinkChain<'s, S> {
    /// Wraps a store.
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    /// Redirects every link aimed at `removed` to the page `removed` itself
    /// pointed at in that direction. Returns the number of pages rewritten.
    ///
    /// `removed` must be the row as it was before deletion. A self-link on
    /// the removed page bridges to nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be scanned or a page
    /// cannot be updated.
    pub fn detach_and_bridge(&mut self, lesson_id: LessonId, removed: &Page) -> Result<usize> {
        let bridge_prev = removed.prev_page_id.filter(|&id| id != removed.id);
        let bridge_next = removed.next_page_id.filter(|&id| id != removed.id);

        let mut rewritten = 0;
        for mut page in self.store.lesson_pages(lesson_id)? {
            if page.id == removed.id || !page.links_to(removed.id) {
                continue;
            }
            if page.next_page_id == Some(removed.id) {
                page.next_page_id = bridge_next;
            }
            if page.prev_page_id == Some(removed.id) {
                page.prev_page_id = bridge_prev;
            }
            self.store.update(&page)?;
            rewritten += 1;
        }

        tracing::debug!(removed = %removed.id, rewritten, "links bridged");
        Ok(rewritten)
    }

    /// Checks that a link target names a page of the lesson.
    ///
    /// # Errors
    ///
    /// Returns [`PageSeqError::ValidationError`] if `target` is `Some` page
    /// that does not exist in the lesson.
    pub fn validate_target(&self, lesson_id: LessonId, target: Option<PageId>) -> Result<()> {
        let Some(target) = target else {
            return Ok(());
        };
        match self.store.get(target) {
            Ok(page) if page.lesson_id == lesson_id => Ok(()),
            Ok(_) | Err(PageSeqError::PageNotFound(_)) => Err(PageSeqError::ValidationError(
                format!("Link target {target} is not a page of {lesson_id}"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Links that point outside the lesson's current pages, as
    /// `(page, target)` pairs in page id order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lesson cannot be scanned.
    pub fn dangling_links(&self, lesson_id: LessonId) -> Result<Vec<(PageId, PageId)>> {
        let pages = self.store.lesson_pages(lesson_id)?;
        let existing: BTreeSet<PageId> = pages.iter().map(|p| p.id).collect();

        let mut dangling: Vec<(PageId, PageId)> = pages
            .iter()
            .flat_map(|p| {
                [p.prev_page_id, p.next_page_id]
                    .into_iter()
                    .flatten()
                    .map(move |target| (p.id, target))
            })
            .filter(|(_, target)| !existing.contains(target))
            .collect();
        dangling.sort();
        Ok(dangling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageTable;
    use crate::types::PageData;

    const LESSON: LessonId = LessonId::new(1);

    /// Three pages linked 1 <-> 2 <-> 3.
    fn chain() -> (PageTable, Vec<PageId>) {
        let mut table = PageTable::new();
        let ids: Vec<PageId> = (1..=3)
            .map(|seq| {
                table
                    .create(LESSON, seq, PageData::new(format!("P{seq}"), ""))
                    .unwrap()
            })
            .collect();
        for (i, id) in ids.iter().enumerate() {
            let mut page = table.get(*id).unwrap();
            page.prev_page_id = i.checked_sub(1).map(|j| ids[j]);
            page.next_page_id = ids.get(i + 1).copied();
            table.update(&page).unwrap();
        }
        (table, ids)
    }

    #[test]
    fn test_bridge_middle_page() {
        let (mut table, ids) = chain();
        let removed = table.get(ids[1]).unwrap();

        let rewritten = LinkChain::new(&mut table)
            .detach_and_bridge(LESSON, &removed)
            .unwrap();
        assert_eq!(rewritten, 2);

        assert_eq!(table.get(ids[0]).unwrap().next_page_id, Some(ids[2]));
        assert_eq!(table.get(ids[2]).unwrap().prev_page_id, Some(ids[0]));
    }

    #[test]
    fn test_bridge_end_page_clears_link() {
        let (mut table, ids) = chain();
        let removed = table.get(ids[2]).unwrap();

        LinkChain::new(&mut table)
            .detach_and_bridge(LESSON, &removed)
            .unwrap();
        assert_eq!(table.get(ids[1]).unwrap().next_page_id, None);
    }

    #[test]
    fn test_bridge_rewrites_branch_links() {
        let (mut table, ids) = chain();
        // First page jumps straight to the last one.
        let mut first = table.get(ids[0]).unwrap();
        first.prev_page_id = Some(ids[2]);
        table.update(&first).unwrap();

        let removed = table.get(ids[2]).unwrap();
        LinkChain::new(&mut table)
            .detach_and_bridge(LESSON, &removed)
            .unwrap();

        // prev of the removed page was ids[1].
        assert_eq!(table.get(ids[0]).unwrap().prev_page_id, Some(ids[1]));
    }

    #[test]
    fn test_self_link_bridges_to_nothing() {
        let (mut table, ids) = chain();
        let mut last = table.get(ids[2]).unwrap();
        last.next_page_id = Some(ids[2]);
        table.update(&last).unwrap();

        let removed = table.get(ids[2]).unwrap();
        let mut links = LinkChain::new(&mut table);
        links.detach_and_bridge(LESSON, &removed).unwrap();
        table.delete(LESSON, ids[2]).unwrap();

        assert!(LinkChain::new(&mut table)
            .dangling_links(LESSON)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_validate_target() {
        let (mut table, ids) = chain();
        let other = table
            .create(LessonId::new(2), 1, PageData::default())
            .unwrap();
        let links = LinkChain::new(&mut table);

        assert!(links.validate_target(LESSON, None).is_ok());
        assert!(links.validate_target(LESSON, Some(ids[0])).is_ok());
        assert!(matches!(
            links.validate_target(LESSON, Some(other)),
            Err(PageSeqError::ValidationError(_))
        ));
        assert!(matches!(
            links.validate_target(LESSON, Some(PageId::new(99))),
            Err(PageSeqError::ValidationError(_))
        ));
    }

    #[test]
    fn test_dangling_links_after_raw_delete() {
        let (mut table, ids) = chain();
        table.delete(LESSON, ids[1]).unwrap();

        let dangling = LinkChain::new(&mut table).dangling_links(LESSON).unwrap();
        assert_eq!(dangling, vec![(ids[0], ids[1]), (ids[2], ids[1])]);
    }
}
