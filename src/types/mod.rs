//! Record and identifier types shared by every layer.

mod binding;
mod ids;
mod page;

pub use binding::QuestionBinding;
pub use ids::{BindingId, LessonId, PageId, QuestionId};
pub use page::{ContentFormat, Page, PageData};
