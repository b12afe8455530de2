//! Per-lesson exclusivity.
//!
//! A lesson's whole page set is the unit of locking. Holding a
//! [`LessonGuard`] excludes every other guard for the same lesson; guards for
//! different lessons never wait on each other.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

use crate::types::LessonId;

/// Registry of lessons currently held by a transaction.
#[derive(Debug, Default)]
pub struct LessonLocks {
    held: Mutex<HashSet<LessonId>>,
    released: Condvar,
}

impl LessonLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lesson is free, then holds it until the guard drops.
    pub fn acquire(&self, lesson_id: LessonId) -> LessonGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(&lesson_id) {
            self.released.wait(&mut held);
        }
        held.insert(lesson_id);
        LessonGuard {
            locks: self,
            lesson_id,
        }
    }

    /// Holds the lesson if it is free, without blocking.
    pub fn try_acquire(&self, lesson_id: LessonId) -> Option<LessonGuard<'_>> {
        let mut held = self.held.lock();
        if !held.insert(lesson_id) {
            return None;
        }
        Some(LessonGuard {
            locks: self,
            lesson_id,
        })
    }

    /// Returns true if some guard currently holds the lesson.
    #[must_use]
    pub fn is_held(&self, lesson_id: LessonId) -> bool {
        self.held.lock().contains(&lesson_id)
    }

    fn release(&self, lesson_id: LessonId) {
        self.held.lock().remove(&lesson_id);
        self.released.notify_all();
    }
}

/// Exclusive hold on one lesson; released on drop.
#[derive(Debug)]
pub struct LessonGuard<'a> {
    locks: &'a LessonLocks,
    lesson_id: LessonId,
}

impl LessonGuard<'_> {
    /// The held lesson.
    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }
}

impl Drop for LessonGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.lesson_id);
    }
}
