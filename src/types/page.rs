//! Page record and its caller-supplied payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LessonId, PageId};

/// Markup format of a page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentFormat {
    /// HTML produced by a rich-text editor.
    #[default]
    Html,
    /// Plain text.
    Plain,
    /// Markdown source.
    Markdown,
    /// Legacy auto-formatted text.
    Moodle,
}

impl ContentFormat {
    /// Returns the short name used in listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ContentFormat::Html => "html",
            ContentFormat::Plain => "plain",
            ContentFormat::Markdown => "markdown",
            ContentFormat::Moodle => "moodle",
        }
    }
}

/// Display payload of a page. Opaque to sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageData {
    /// Page title shown in indexes and navigation.
    pub title: String,
    /// Page body.
    pub contents: String,
    /// Markup format of `contents`.
    pub contents_format: ContentFormat,
}

impl PageData {
    /// Creates an HTML page payload.
    #[must_use]
    pub fn new(title: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            contents: contents.into(),
            contents_format: ContentFormat::Html,
        }
    }

    /// Sets the content format.
    #[must_use]
    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.contents_format = format;
        self
    }
}

/// One unit of lesson content.
///
/// `sequence` and the link fields are owned by the sequencer; stores persist
/// whatever they are handed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Surrogate id, immutable once assigned.
    pub id: PageId,
    /// Owning lesson.
    pub lesson_id: LessonId,
    /// 1-based rank within the lesson.
    pub sequence: u32,
    /// Page title.
    pub title: String,
    /// Page body.
    pub contents: String,
    /// Markup format of `contents`.
    pub contents_format: ContentFormat,
    /// Page reached by "previous", if any.
    pub prev_page_id: Option<PageId>,
    /// Page reached by "next", if any.
    pub next_page_id: Option<PageId>,
    /// Set once when the row is created.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every write.
    pub modified_at: DateTime<Utc>,
}

impl Page {
    /// Builds a fresh, unlinked page record.
    #[must_use]
    pub fn new(
        id: PageId,
        lesson_id: LessonId,
        sequence: u32,
        data: PageData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            lesson_id,
            sequence,
            title: data.title,
            contents: data.contents,
            contents_format: data.contents_format,
            prev_page_id: None,
            next_page_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Replaces the display payload, leaving sequencing fields alone.
    pub fn apply_data(&mut self, data: PageData) {
        self.title = data.title;
        self.contents = data.contents;
        self.contents_format = data.contents_format;
    }

    /// Returns the display payload.
    #[must_use]
    pub fn data(&self) -> PageData {
        PageData {
            title: self.title.clone(),
            contents: self.contents.clone(),
            contents_format: self.contents_format,
        }
    }

    /// Returns true if either link points at `target`.
    #[must_use]
    pub fn links_to(&self, target: PageId) -> bool {
        self.prev_page_id == Some(target) || self.next_page_id == Some(target)
    }
}
