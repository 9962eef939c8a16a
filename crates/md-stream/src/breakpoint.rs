//! Finding the offset up to which buffered text can be parsed safely.

use crate::partial::{last_non_blank, PendingKind};
use crate::scan;

/// Offset up to which `text` is guaranteed not to end mid-construct.
///
/// The result always lies in `[previous, text.len()]`: once an offset was
/// declared safe it is never taken back. Callers that invalidate their
/// cache pass `previous = 0`.
pub fn resolve_safe_breakpoint(text: &str, previous: usize, pending: Option<PendingKind>) -> usize {
    let raw = match pending {
        Some(kind) => pending_breakpoint(text, kind),
        None => line_boundary(text),
    };

    raw.max(previous).min(text.len())
}

fn pending_breakpoint(text: &str, kind: PendingKind) -> usize {
    let open = scan::open_constructs(text);
    match kind {
        PendingKind::CodeFence => open.fence.unwrap_or_else(|| line_boundary(text)),
        PendingKind::FormulaBlock => open.formula.unwrap_or_else(|| line_boundary(text)),
        PendingKind::Collapsible => open.details.unwrap_or_else(|| line_boundary(text)),
        PendingKind::Table => table_run_start(text).min(open.earliest()),
        PendingKind::List | PendingKind::Quote => {
            after_last_blank_line(text).min(open.earliest())
        }
    }
}

/// The text length, backed off to just after the last newline when the
/// final line may still be extended.
pub(crate) fn line_boundary(text: &str) -> usize {
    if text.ends_with('\n') {
        text.len()
    } else {
        text.rfind('\n').map(|i| i + 1).unwrap_or(0)
    }
}

/// Start of the contiguous run of table rows the buffer ends with.
fn table_run_start(text: &str) -> usize {
    let lines = scan::lines(text);
    let Some((idx, _)) = last_non_blank(&lines) else {
        return 0;
    };

    let mut start = lines[idx].start;
    for line in lines[..idx].iter().rev() {
        if !scan::is_table_row(line.text) {
            break;
        }
        start = line.start;
    }
    start
}

/// Just after the last blank line that precedes the trailing block.
///
/// Blank lines inside fences, formulas or `<details>` don't count.
fn after_last_blank_line(text: &str) -> usize {
    let lines = scan::lines(text);
    let Some((idx, _)) = last_non_blank(&lines) else {
        return 0;
    };

    lines[..idx]
        .iter()
        .rev()
        .find(|l| l.is_blank() && scan::is_block_boundary(text, l.next))
        .map(|l| l.next)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial::detect_pending;

    fn resolve(text: &str) -> usize {
        resolve_safe_breakpoint(text, 0, detect_pending(text))
    }

    #[test]
    fn test_complete_lines() {
        assert_eq!(resolve("one\ntwo\n"), 8);
        assert_eq!(resolve("one\ntw"), 4);
        assert_eq!(resolve("partial"), 0);
        assert_eq!(resolve(""), 0);
    }

    #[test]
    fn test_open_fence_stays_unparsed() {
        let text = "intro\n\n```rust\nfn main() {\n";
        assert_eq!(resolve(text), 7);
    }

    #[test]
    fn test_table_run() {
        let text = "intro\n| a | b |\n|---|---|\n| 1 | 2 |\n";
        assert_eq!(resolve(text), 6);
    }

    #[test]
    fn test_list_backs_off_to_blank_line() {
        let text = "intro\n\n- one\n- two\n";
        assert_eq!(resolve(text), 7);
    }

    #[test]
    fn test_list_after_blank_line_inside_construct() {
        // the only blank line sits inside a closed fence
        assert_eq!(resolve("```\n\n```\n- a\n"), 0);
        assert_eq!(resolve("$$\n\n$$\n> q\n"), 0);
        // open details wins over the list inside it
        assert_eq!(resolve("<details>\n<summary>More</summary>\n\n- a\n"), 0);
        assert_eq!(resolve("intro\n\n<details>\n\n| a |\n"), 7);
    }

    #[test]
    fn test_never_regresses() {
        let text = "hello\n- item\n";
        assert_eq!(resolve_safe_breakpoint(text, 6, detect_pending(text)), 6);
        assert_eq!(resolve_safe_breakpoint("hi\n", 10, None), 3);
    }
}
