//! Question-to-page binding record.

use serde::{Deserialize, Serialize};

use super::{BindingId, LessonId, PageId, QuestionId};

/// Associates a question from the external question bank with a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBinding {
    /// Binding row id.
    pub id: BindingId,
    /// Lesson the binding belongs to.
    pub lesson_id: LessonId,
    /// Bound question.
    pub question_id: QuestionId,
    /// Page showing the question, `None` when detached.
    pub page_id: Option<PageId>,
}
