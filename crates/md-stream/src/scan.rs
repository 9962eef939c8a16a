//! Line scanning shared by the pending-structure detector and the grammar.
//!
//! Both sides must agree on where fences, display formulas and `<details>`
//! blocks open and close, otherwise the parser could be handed a region the
//! grammar considers unterminated.

/// One line of a buffer, by byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line<'a> {
    /// Offset of the first byte of the line
    pub start: usize,
    /// Offset of the start of the next line (past the `\n`, if any)
    pub next: usize,
    /// Line contents without the trailing newline
    pub text: &'a str,
    /// Whether the line ended with `\n`
    pub terminated: bool,
}

impl Line<'_> {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Split a buffer into lines, keeping byte offsets.
pub(crate) fn lines(text: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for piece in text.split_inclusive('\n') {
        let terminated = piece.ends_with('\n');
        let body = piece.strip_suffix('\n').unwrap_or(piece);
        let body = body.strip_suffix('\r').unwrap_or(body);
        out.push(Line {
            start,
            next: start + piece.len(),
            text: body,
            terminated,
        });
        start += piece.len();
    }
    out
}

/// An opening code fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fence {
    pub len: usize,
    pub info: String,
}

/// Does this line open a backtick code fence?
pub(crate) fn fence_open(line: &str) -> Option<Fence> {
    let trimmed = line.trim_start();
    let len = trimmed.chars().take_while(|&c| c == '`').count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim();
    // Backticks in the info string mean this is inline code, not a fence
    if info.contains('`') {
        return None;
    }
    Some(Fence {
        len,
        info: info.to_string(),
    })
}

/// Does this line close a fence opened with `open_len` backticks?
pub(crate) fn fence_closes(line: &str, open_len: usize) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|&c| c == '`').count();
    len >= open_len && len == trimmed.len()
}

/// Does this line open a display formula block that is not closed on the
/// same line?
pub(crate) fn formula_open(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("$$")
        .map(|rest| !rest.contains("$$"))
        .unwrap_or(false)
}

/// A single-line display formula: `$$ x^2 $$` alone on its line.
pub(crate) fn formula_single_line(line: &str) -> Option<&str> {
    let inner = line.trim().strip_prefix("$$")?.strip_suffix("$$")?;
    if inner.contains("$$") || inner.trim().is_empty() {
        return None;
    }
    Some(inner.trim())
}

/// `<details>` only opens a block at the start of a line.
pub(crate) fn details_opens(line: &str) -> usize {
    usize::from(line.trim_start().starts_with("<details"))
}

pub(crate) fn details_closes(line: &str) -> usize {
    line.matches("</details>").count()
}

/// List marker at the start of a (possibly indented) line.
///
/// Returns the indent, the marker, and the byte offset of the item content.
pub(crate) fn list_marker(line: &str) -> Option<(usize, &str, usize)> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();

    let marker_len = if trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed.starts_with("+ ")
    {
        1
    } else {
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 || digits > 9 {
            return None;
        }
        let rest = &trimmed[digits..];
        if rest.starts_with(". ") || rest.starts_with(") ") {
            digits + 1
        } else {
            return None;
        }
    };

    // `* * *` is a rule, not a list
    if is_rule(line) {
        return None;
    }

    Some((
        indent,
        &trimmed[..marker_len],
        indent + marker_len + 1,
    ))
}

/// An empty list item (`-` alone) still counts as list syntax.
pub(crate) fn is_bare_list_marker(line: &str) -> bool {
    matches!(line.trim(), "-" | "*" | "+")
}

pub(crate) fn is_quote(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

pub(crate) fn is_table_row(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

pub(crate) fn is_rule(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(first) = trimmed.chars().next() else {
        return false;
    };
    if !matches!(first, '-' | '*' | '_') {
        return false;
    }
    trimmed.chars().filter(|&c| c == first).count() >= 3
        && trimmed.chars().all(|c| c == first || c == ' ')
}

/// ATX heading level and title.
pub(crate) fn heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level as u8, rest.trim().trim_end_matches('#').trim_end()))
}

/// Constructs still open at the end of a buffer, as line-start offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OpenConstructs {
    pub fence: Option<usize>,
    pub formula: Option<usize>,
    pub details: Option<usize>,
}

impl OpenConstructs {
    pub fn any(&self) -> bool {
        self.fence.is_some() || self.formula.is_some() || self.details.is_some()
    }

    /// Start of the outermost open construct, or `usize::MAX`.
    pub fn earliest(&self) -> usize {
        [self.fence, self.formula, self.details]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// Walk the buffer tracking fences, display formulas and `<details>`.
///
/// Formula and details markers inside fenced code are ignored. A display
/// formula opens on a line starting with `$$` and closes at the next line
/// containing `$$`. A line with an odd number of inline `$$` is reported as
/// an open formula only if it is the last line, since an inline formula
/// can't continue across lines.
pub(crate) fn open_constructs(text: &str) -> OpenConstructs {
    let mut fence: Option<(usize, usize)> = None;
    let mut formula: Option<usize> = None;
    let mut details: Vec<usize> = Vec::new();
    let mut dangling_inline: Option<usize> = None;

    for line in lines(text) {
        dangling_inline = None;

        if let Some((_, open_len)) = fence {
            if fence_closes(line.text, open_len) {
                fence = None;
            }
            continue;
        }

        if formula.is_some() {
            if line.text.contains("$$") {
                formula = None;
            }
            continue;
        }

        if let Some(f) = fence_open(line.text) {
            fence = Some((line.start, f.len));
            continue;
        }

        if formula_open(line.text) {
            formula = Some(line.start);
            continue;
        }

        if line.text.matches("$$").count() % 2 == 1 {
            dangling_inline = Some(line.start);
        }

        for _ in 0..details_opens(line.text) {
            details.push(line.start);
        }
        for _ in 0..details_closes(line.text) {
            details.pop();
        }
    }

    OpenConstructs {
        fence: fence.map(|(start, _)| start),
        formula: formula.or(dangling_inline),
        details: details.first().copied(),
    }
}

/// Is `offset` a point where the block structure restarts cleanly?
///
/// True at the buffer start, or right after a blank line when no fence,
/// formula or `<details>` block is open. Parsing the text before and after
/// such a point separately gives the same elements as parsing it whole.
pub(crate) fn is_block_boundary(text: &str, offset: usize) -> bool {
    if offset == 0 {
        return true;
    }
    if offset > text.len() || !text.is_char_boundary(offset) {
        return false;
    }

    let prefix = &text[..offset];
    if !prefix.ends_with('\n') {
        return false;
    }
    let Some(last) = lines(prefix).pop() else {
        return false;
    };
    last.is_blank() && !open_constructs(prefix).any()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_keep_offsets() {
        let ls = lines("ab\n\ncd");
        assert_eq!(ls.len(), 3);
        assert_eq!((ls[0].start, ls[0].next, ls[0].text), (0, 3, "ab"));
        assert!(ls[1].is_blank());
        assert_eq!((ls[2].start, ls[2].terminated), (4, false));
    }

    #[test]
    fn test_fences() {
        assert_eq!(fence_open("```rust").map(|f| f.info), Some("rust".to_string()));
        assert!(fence_open("``not a fence").is_none());
        assert!(fence_closes("````", 3));
        assert!(!fence_closes("``` x", 3));
    }

    #[test]
    fn test_open_constructs() {
        assert_eq!(open_constructs("a\n```\ncode\n").fence, Some(2));
        assert_eq!(open_constructs("a\n```\ncode\n```\n").fence, None);
        assert_eq!(open_constructs("$$\nx\n").formula, Some(0));
        assert_eq!(open_constructs("```\n$$\n```\n").formula, None);
        assert_eq!(open_constructs("see $$x").formula, Some(0));
        assert_eq!(open_constructs("see $$x\nmore\n").formula, None);
        assert_eq!(
            open_constructs("<details>\n<summary>s</summary>\n").details,
            Some(0)
        );
    }

    #[test]
    fn test_block_boundary() {
        let text = "para\n\nnext";
        assert!(is_block_boundary(text, 0));
        assert!(is_block_boundary(text, 6));
        assert!(!is_block_boundary(text, 5));
        assert!(!is_block_boundary("```\n\ncode", 5));
    }

    #[test]
    fn test_list_markers() {
        assert_eq!(list_marker("- a"), Some((0, "-", 2)));
        assert_eq!(list_marker("  12. b"), Some((2, "12.", 6)));
        assert_eq!(list_marker("* * *"), None);
        assert_eq!(list_marker("-a"), None);
    }
}
