//! Identifier newtypes.
//!
//! Every identifier is a plain `u64` surrogate wrapped in its own type so a
//! lesson id can never be passed where a page id is expected. There is no
//! reserved "no link" value; absent links are `Option<PageId>::None`.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

id_type!(
    /// Stable identifier of a page, assigned by the store and never reused.
    PageId,
    "Page"
);

id_type!(
    /// Identifier of the lesson instance that owns a set of pages.
    LessonId,
    "Lesson"
);

id_type!(
    /// Identifier of a question held by the external question bank.
    QuestionId,
    "Question"
);

id_type!(
    /// Identifier of a question-to-page binding row.
    BindingId,
    "Binding"
);
