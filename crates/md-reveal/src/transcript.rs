//! A plain-text view, used by `md-replay` and in tests.

use md_stream::{Element, ListItem, StyledText};

use crate::scheduler::RevealToken;
use crate::tree::{DisplayNode, DisplayTree};
use crate::view::{BlockStart, Reveal, Size, ViewFactory};

const LINE_HEIGHT: f32 = 20.0;
const CHAR_WIDTH: f32 = 8.0;
const BLOCK_MARGIN: f32 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptNode {
    /// Unique per build, so identity survives only through updates
    pub serial: u64,
    pub kind: &'static str,
    pub text: String,
    pub reveal: Reveal,
}

/// Renders elements as text and counts what the reconciler asks of it.
#[derive(Debug, Default)]
pub struct TranscriptView {
    next_serial: u64,
    defer_blocks: bool,
    pending_blocks: Vec<RevealToken>,

    pub builds: usize,
    pub updates: usize,
    pub destroyed: usize,
    pub placements: usize,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report block reveals as pending until the tokens are completed.
    pub fn deferring_blocks() -> Self {
        Self {
            defer_blocks: true,
            ..Self::default()
        }
    }

    pub fn take_pending_blocks(&mut self) -> Vec<RevealToken> {
        std::mem::take(&mut self.pending_blocks)
    }
}

impl ViewFactory for TranscriptView {
    type Node = TranscriptNode;

    fn build(&mut self, element: &Element) -> TranscriptNode {
        self.builds += 1;
        self.next_serial += 1;
        TranscriptNode {
            serial: self.next_serial,
            kind: element.kind_name(),
            text: element_text(element),
            reveal: Reveal::Full,
        }
    }

    fn try_update(&mut self, node: &mut TranscriptNode, _old: &Element, new: &Element) -> bool {
        if node.kind != new.kind_name() {
            return false;
        }
        self.updates += 1;
        node.text = element_text(new);
        true
    }

    fn measure(&self, element: &Element, width: f32) -> Size {
        let per_line = if width > 0.0 {
            ((width / CHAR_WIDTH) as usize).max(1)
        } else {
            usize::MAX
        };
        let lines: usize = element_text(element)
            .lines()
            .map(|line| line.chars().count().div_ceil(per_line).max(1))
            .sum();
        Size {
            width,
            height: lines.max(1) as f32 * LINE_HEIGHT + BLOCK_MARGIN,
        }
    }

    fn place(
        &mut self,
        _node: &TranscriptNode,
        _parent: Option<&TranscriptNode>,
        _slot: usize,
        _index: usize,
    ) {
        self.placements += 1;
    }

    fn destroy(&mut self, _node: TranscriptNode) {
        self.destroyed += 1;
    }

    fn apply_reveal(&mut self, node: &mut TranscriptNode, reveal: Reveal) {
        node.reveal = reveal;
    }

    fn reveal_block(&mut self, _node: &mut TranscriptNode, token: RevealToken) -> BlockStart {
        if self.defer_blocks {
            self.pending_blocks.push(token);
            BlockStart::Pending
        } else {
            BlockStart::Done
        }
    }
}

/// What is currently visible, one paragraph per top-level node.
pub fn render_visible(tree: &DisplayTree<TranscriptNode>) -> String {
    tree.nodes()
        .iter()
        .filter_map(visible_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn visible_text(node: &DisplayNode<TranscriptNode>) -> Option<String> {
    match node.reveal {
        Reveal::Hidden => None,
        Reveal::Full => Some(node.handle.text.clone()),
        Reveal::Partial(_) => {
            let shown = node.element.revealable_text()?;
            let prefix: String = shown.text.chars().take(node.visible_chars()).collect();
            Some(match &node.element {
                Element::Heading { level, .. } => heading_prefix(*level) + &prefix,
                _ => prefix,
            })
        }
    }
}

fn heading_prefix(level: u8) -> String {
    "#".repeat(level as usize) + " "
}

/// Plain text rendering of a whole element.
pub fn element_text(element: &Element) -> String {
    match element {
        Element::Text(text) => text.plain_text(),
        Element::Heading { level, text, .. } => heading_prefix(*level) + &text.plain_text(),
        Element::Quote { children, .. } => children
            .iter()
            .map(element_text)
            .flat_map(|text| text.lines().map(|l| format!("> {l}")).collect::<Vec<_>>())
            .collect::<Vec<_>>()
            .join("\n"),
        Element::List { items, level } => list_text(items, *level),
        Element::CodeBlock { raw, .. } => raw.trim_end().to_string(),
        Element::Table { headers, rows } => std::iter::once(headers)
            .chain(rows)
            .map(|row| row_text(row))
            .collect::<Vec<_>>()
            .join("\n"),
        Element::Image { alt, source } => format!("[image: {}]", if alt.is_empty() { source } else { alt }),
        Element::Formula { expression } => format!("$$ {expression} $$"),
        Element::Collapsible { summary, children } => {
            let mut out = format!("▸ {}", summary.plain_text());
            for child in children {
                out.push('\n');
                out.push_str(&element_text(child));
            }
            out
        }
        Element::Rule => "---".to_string(),
        Element::RawBlock { text } => text.clone(),
        Element::Custom { kind, payload } => format!("[{kind}] {}", payload.trim_end()),
    }
}

fn list_text(items: &[ListItem], level: u8) -> String {
    let indent = "  ".repeat(level.saturating_sub(1) as usize);
    items
        .iter()
        .map(|item| {
            let body = item
                .children
                .iter()
                .map(|child| match child {
                    // Nested lists indent themselves
                    Element::List { .. } => element_text(child),
                    _ => format!("{indent}{} {}", item.marker, element_text(child)),
                })
                .collect::<Vec<_>>();
            if body.is_empty() {
                format!("{indent}{}", item.marker)
            } else {
                body.join("\n")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn row_text(row: &[StyledText]) -> String {
    let cells: Vec<String> = row.iter().map(StyledText::plain_text).collect();
    format!("| {} |", cells.join(" | "))
}
