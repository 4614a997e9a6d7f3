use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

/// Location of a node inside one parsed document.
///
/// Positions taken from different documents are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentPosition {
    pub document: u64,
    pub index: usize,
}

impl DocumentPosition {
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        (self.document == other.document).then(|| self.index.cmp(&other.index))
    }
}

/// Read-only view of a DOM node that a message or heading points at.
pub trait DomElement: fmt::Debug {
    fn tag_name(&self) -> String;

    fn text_content(&self) -> String;

    /// `h1`..`h6` descendants, in document order.
    fn headings(&self) -> Vec<ElementRef>;

    fn document_position(&self) -> Option<DocumentPosition>;
}

pub type ElementRef = Rc<dyn DomElement>;

/// Value used to decide which of two messages comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Order(i64),
    Position(DocumentPosition),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip)]
    pub element: Option<ElementRef>,
}

impl MessageRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    #[must_use]
    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = Some(markdown.into());
        self
    }

    #[must_use]
    pub fn with_element(mut self, element: ElementRef) -> Self {
        self.element = Some(element);
        self
    }

    pub fn anchor(&self) -> Option<Anchor> {
        if let Some(order) = self.order {
            return Some(Anchor::Order(order));
        }

        self.element
            .as_ref()
            .and_then(|element| element.document_position())
            .map(Anchor::Position)
    }

    pub fn has_comparable_anchor(&self) -> bool {
        self.anchor().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub id: String,
    pub user: MessageRecord,
    pub assistant_segments: Vec<MessageRecord>,
    pub assistant_text: String,
}

impl Turn {
    /// First assistant segment, if any.
    pub fn assistant(&self) -> Option<&MessageRecord> {
        self.assistant_segments.first()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_index: Option<usize>,
    #[serde(skip)]
    pub target: Option<ElementRef>,
}

impl TocEntry {
    pub fn new(level: u8, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            segment_index: None,
            heading_index: None,
            target: None,
        }
    }

    fn target_position(&self) -> Option<DocumentPosition> {
        self.target
            .as_ref()
            .and_then(|target| target.document_position())
    }
}

impl PartialEq for TocEntry {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.text == other.text
            && self.segment_index == other.segment_index
            && self.heading_index == other.heading_index
            && self.target_position() == other.target_position()
    }
}

impl Eq for TocEntry {}

impl fmt::Display for TocEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(usize::from(self.level.saturating_sub(1)));
        write!(f, "{indent}- {}", self.text)
    }
}
