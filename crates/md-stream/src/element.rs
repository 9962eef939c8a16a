//! Markdown elements - the stable output of parsing.
//!
//! Elements are immutable values. Equality is structural and recursive,
//! which is what the reconciler relies on when deciding whether a displayed
//! node can be kept as-is.

use std::ops::Range;

/// A complete, stable content element ready for display.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Paragraph of styled text
    Text(StyledText),

    /// Heading with an anchor id (slug of the title) and level (1-6)
    Heading {
        id: String,
        level: u8,
        text: StyledText,
    },

    /// Blockquote, `level` is the nesting depth starting at 1
    Quote { children: Vec<Element>, level: u8 },

    /// Ordered or unordered list, `level` is the nesting depth starting at 1
    List { items: Vec<ListItem>, level: u8 },

    /// Fenced code block
    CodeBlock {
        language: Option<String>,
        raw: String,
    },

    /// Table with header cells and data rows
    Table {
        headers: Vec<StyledText>,
        rows: Vec<Vec<StyledText>>,
    },

    /// Standalone image
    Image { source: String, alt: String },

    /// Display formula (`$$ ... $$`)
    Formula { expression: String },

    /// `<details>` block with a summary line
    Collapsible {
        summary: StyledText,
        children: Vec<Element>,
    },

    /// Thematic break (---, ***, ___)
    Rule,

    /// Verbatim text: html blocks, or constructs flushed unterminated
    RawBlock { text: String },

    /// Extension block from a ```@kind fence
    Custom { kind: String, payload: String },
}

impl Element {
    /// Short name used in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Text(_) => "text",
            Element::Heading { .. } => "heading",
            Element::Quote { .. } => "quote",
            Element::List { .. } => "list",
            Element::CodeBlock { .. } => "code",
            Element::Table { .. } => "table",
            Element::Image { .. } => "image",
            Element::Formula { .. } => "formula",
            Element::Collapsible { .. } => "collapsible",
            Element::Rule => "rule",
            Element::RawBlock { .. } => "raw",
            Element::Custom { .. } => "custom",
        }
    }

    /// Is this a container whose children are displayed as their own nodes?
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Element::Quote { .. } | Element::List { .. } | Element::Collapsible { .. }
        )
    }

    /// The child lists of a container, one slot per list.
    ///
    /// Quotes and collapsibles have a single slot, lists have one slot per
    /// item. Leaves have none.
    pub fn child_slots(&self) -> Vec<&[Element]> {
        match self {
            Element::Quote { children, .. } | Element::Collapsible { children, .. } => {
                vec![children.as_slice()]
            }
            Element::List { items, .. } => items.iter().map(|i| i.children.as_slice()).collect(),
            _ => Vec::new(),
        }
    }

    /// The text a character-by-character reveal walks over, if any.
    pub fn revealable_text(&self) -> Option<RevealText> {
        match self {
            Element::Text(text) | Element::Heading { text, .. } => Some(RevealText {
                text: text.plain_text(),
                len: text.char_len(),
                atomic: text.atomic_ranges(),
            }),
            Element::CodeBlock { raw, .. } => Some(RevealText {
                text: raw.clone(),
                len: raw.chars().count(),
                atomic: Vec::new(),
            }),
            _ => None,
        }
    }
}

/// An element's visible text, with its length and indivisible spans in
/// chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealText {
    pub text: String,
    pub len: usize,
    pub atomic: Vec<Range<usize>>,
}

/// A list item (may contain nested elements).
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    /// The literal marker: `-`, `*`, `+`, or `3.`
    pub marker: String,
    pub children: Vec<Element>,
}

/// Styled text: an ordered run of inline elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyledText {
    pub runs: Vec<Inline>,
}

impl StyledText {
    pub fn new(runs: Vec<Inline>) -> Self {
        Self { runs }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            runs: vec![Inline::Text(text.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.display_text().is_empty())
    }

    /// The visible text with all markup removed.
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.display_text()).collect()
    }

    pub fn char_len(&self) -> usize {
        self.runs.iter().map(|r| r.display_text().chars().count()).sum()
    }

    /// Char ranges of the plain text that must appear all at once.
    pub fn atomic_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut pos = 0;
        for run in &self.runs {
            let len = run.display_text().chars().count();
            if run.is_atomic() && len > 0 {
                ranges.push(pos..pos + len);
            }
            pos += len;
        }
        ranges
    }
}

/// Inline elements within styled text.
#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    /// Plain text
    Text(String),

    /// Styled text (bold, italic, etc.)
    Styled { style: InlineStyle, text: String },

    /// Inline code (`code`)
    Code(String),

    /// Link [text](url)
    Link { text: String, url: String },

    /// Image ![alt](url)
    Image { alt: String, url: String },

    /// Inline formula ($x$ or $$x$$ inside a line)
    Formula(String),

    /// Hard line break
    LineBreak,
}

impl Inline {
    /// What this run contributes to the visible text.
    pub fn display_text(&self) -> &str {
        match self {
            Inline::Text(s) | Inline::Code(s) | Inline::Formula(s) => s,
            Inline::Styled { text, .. } | Inline::Link { text, .. } => text,
            Inline::Image { alt, .. } => alt,
            Inline::LineBreak => "\n",
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Inline::Link { .. } | Inline::Image { .. } | Inline::Formula(_)
        )
    }
}

/// Inline text styles (can be combined).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineStyle {
    Bold,
    Italic,
    BoldItalic,
    Strikethrough,
}

/// A navigable heading anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub id: String,
    pub level: u8,
    pub title: String,
}

/// An image referenced by the document, for the host to prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub source: String,
    pub alt: String,
}
