//! Detection of syntactically incomplete structures at the end of a buffer.

use crate::scan::{self, Line};

/// The kind of unterminated construct the buffer ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Fenced code block waiting for its closing ```
    CodeFence,

    /// Display formula waiting for its closing $$
    FormulaBlock,

    /// Table rows still arriving
    Table,

    /// List items still arriving
    List,

    /// Blockquote lines still arriving
    Quote,

    /// `<details>` block waiting for `</details>`
    Collapsible,
}

/// Classify whether `text` ends mid-construct.
///
/// Checked in order: fence, formula, table, list/quote, collapsible. The
/// first match wins. Ambiguity is reported as pending rather than risking a
/// malformed element.
pub fn detect_pending(text: &str) -> Option<PendingKind> {
    let open = scan::open_constructs(text);
    if open.fence.is_some() {
        return Some(PendingKind::CodeFence);
    }
    if open.formula.is_some() {
        return Some(PendingKind::FormulaBlock);
    }

    if let Some(kind) = trailing_line_kind(text) {
        return Some(kind);
    }

    if open.details.is_some() {
        return Some(PendingKind::Collapsible);
    }

    None
}

/// Table/list/quote classification of the last non-blank line, if no blank
/// line follows it.
fn trailing_line_kind(text: &str) -> Option<PendingKind> {
    let lines = scan::lines(text);
    let (idx, last) = last_non_blank(&lines)?;

    if blank_line_follows(&lines, idx) {
        return None;
    }

    if scan::is_table_row(last.text) {
        Some(PendingKind::Table)
    } else if scan::is_quote(last.text) {
        Some(PendingKind::Quote)
    } else if scan::list_marker(last.text).is_some() || scan::is_bare_list_marker(last.text) {
        Some(PendingKind::List)
    } else {
        None
    }
}

pub(crate) fn last_non_blank<'a, 'b>(lines: &'b [Line<'a>]) -> Option<(usize, &'b Line<'a>)> {
    lines.iter().enumerate().rev().find(|(_, l)| !l.is_blank())
}

/// Is there a complete blank line after `lines[idx]`?
pub(crate) fn blank_line_follows(lines: &[Line<'_>], idx: usize) -> bool {
    lines[idx].terminated
        && lines[idx + 1..]
            .iter()
            .any(|l| l.is_blank() && l.terminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclosed_fence_is_pending() {
        assert_eq!(detect_pending("text\n```rust\nfn"), Some(PendingKind::CodeFence));
        assert_eq!(detect_pending("```\na\n```\n```\n"), Some(PendingKind::CodeFence));
        assert_eq!(detect_pending("```\na\n```\n"), None);
    }

    #[test]
    fn test_fence_wins_over_formula() {
        assert_eq!(
            detect_pending("$$\nx\n```\n"),
            Some(PendingKind::FormulaBlock)
        );
        assert_eq!(
            detect_pending("```\n$$\n"),
            Some(PendingKind::CodeFence)
        );
    }

    #[test]
    fn test_trailing_table_and_lists() {
        assert_eq!(detect_pending("| a | b |\n|---|---|\n"), Some(PendingKind::Table));
        assert_eq!(detect_pending("| a | b |\n|---|---|\n\n"), None);
        assert_eq!(detect_pending("intro\n\n- one\n- two"), Some(PendingKind::List));
        assert_eq!(detect_pending("1. one\n"), Some(PendingKind::List));
        assert_eq!(detect_pending("> quoted\n"), Some(PendingKind::Quote));
        assert_eq!(detect_pending("> quoted\n\nafter\n"), None);
    }

    #[test]
    fn test_plain_text_is_not_pending() {
        assert_eq!(detect_pending(""), None);
        assert_eq!(detect_pending("hello wor"), None);
        assert_eq!(detect_pending("# Title\n\nbody\n"), None);
    }

    #[test]
    fn test_open_details() {
        assert_eq!(
            detect_pending("<details>\n<summary>More</summary>\n\nbody\n"),
            Some(PendingKind::Collapsible)
        );
        assert_eq!(
            detect_pending("<details>\n<summary>More</summary>\nbody\n</details>\n"),
            None
        );
    }
}
