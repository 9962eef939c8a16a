//! Inline element parsing for bold, italic, code, links, formulas, etc.

use crate::element::{Inline, InlineStyle, StyledText};

/// Parses inline elements from complete block text.
///
/// Unclosed markers are left as plain text. Adjacent text runs are merged.
pub fn parse_inline(text: &str) -> StyledText {
    let mut result = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut plain_start = 0;

    // Skip the iterator forward to a byte offset.
    macro_rules! skip_to {
        ($pos:expr) => {{
            let pos = $pos;
            while chars.peek().map(|(idx, _)| *idx < pos).unwrap_or(false) {
                chars.next();
            }
            plain_start = pos;
        }};
    }

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                // Escaped punctuation is literal
                if let Some(&(j, next)) = chars.peek() {
                    if next.is_ascii_punctuation() {
                        flush_plain(&mut result, &text[plain_start..i]);
                        result.push(Inline::Text(next.to_string()));
                        chars.next();
                        plain_start = j + next.len_utf8();
                    }
                }
            }

            '`' => {
                let mut backtick_count = 1;
                while chars.peek().map(|(_, c)| *c == '`').unwrap_or(false) {
                    chars.next();
                    backtick_count += 1;
                }

                let start_pos = i + backtick_count;
                if let Some(end_pos) = find_closing_backticks(&text[start_pos..], backtick_count) {
                    flush_plain(&mut result, &text[plain_start..i]);
                    let code = &text[start_pos..start_pos + end_pos];
                    // Strip single leading/trailing space if present (CommonMark rule)
                    let code = if code.len() > 1 && code.starts_with(' ') && code.ends_with(' ') {
                        &code[1..code.len() - 1]
                    } else {
                        code
                    };
                    result.push(Inline::Code(code.to_string()));
                    skip_to!(start_pos + end_pos + backtick_count);
                }
            }

            '$' => {
                let double = chars.peek().map(|(_, c)| *c == '$').unwrap_or(false);
                if double {
                    chars.next();
                }
                let delim = if double { "$$" } else { "$" };
                let content_start = i + delim.len();

                if let Some(end_pos) = find_closing_formula(&text[content_start..], delim) {
                    flush_plain(&mut result, &text[plain_start..i]);
                    let expr = &text[content_start..content_start + end_pos];
                    result.push(Inline::Formula(expr.trim().to_string()));
                    skip_to!(content_start + end_pos + delim.len());
                }
            }

            '*' | '_' => {
                let marker = c;
                let marker_start = i;

                let mut count = 1;
                while chars.peek().map(|(_, ch)| *ch == marker).unwrap_or(false) {
                    chars.next();
                    count += 1;
                }

                let can_open = marker == '*'
                    || text[..i]
                        .chars()
                        .last()
                        .map(|c| c.is_whitespace() || c.is_ascii_punctuation())
                        .unwrap_or(true);
                if !can_open {
                    continue;
                }

                let content_start = marker_start + count;
                if let Some((content, close_len, end_pos)) =
                    find_closing_emphasis(&text[content_start..], marker, count.min(3))
                {
                    if content.is_empty() {
                        continue;
                    }
                    flush_plain(&mut result, &text[plain_start..marker_start]);

                    let style = match close_len {
                        1 => InlineStyle::Italic,
                        2 => InlineStyle::Bold,
                        _ => InlineStyle::BoldItalic,
                    };
                    result.push(Inline::Styled {
                        style,
                        text: content.to_string(),
                    });
                    skip_to!(content_start + end_pos + close_len);
                }
            }

            '~' => {
                if chars.peek().map(|(_, c)| *c == '~').unwrap_or(false) {
                    chars.next();
                    let content_start = i + 2;

                    if let Some(end_pos) = text[content_start..].find("~~") {
                        flush_plain(&mut result, &text[plain_start..i]);
                        result.push(Inline::Styled {
                            style: InlineStyle::Strikethrough,
                            text: text[content_start..content_start + end_pos].to_string(),
                        });
                        skip_to!(content_start + end_pos + 2);
                    }
                }
            }

            '[' => {
                if let Some((link_text, url, total_len)) = parse_link(&text[i..]) {
                    flush_plain(&mut result, &text[plain_start..i]);
                    result.push(Inline::Link {
                        text: link_text,
                        url,
                    });
                    skip_to!(i + total_len);
                }
            }

            '!' => {
                if chars.peek().map(|(_, c)| *c == '[').unwrap_or(false) {
                    if let Some((alt, url, link_len)) = parse_link(&text[i + 1..]) {
                        flush_plain(&mut result, &text[plain_start..i]);
                        result.push(Inline::Image { alt, url });
                        skip_to!(i + 1 + link_len);
                    }
                }
            }

            '\n' => {
                // Hard line break: two spaces before newline
                if text[..i].ends_with("  ") && i - 2 >= plain_start {
                    flush_plain(&mut result, &text[plain_start..i - 2]);
                    result.push(Inline::LineBreak);
                    plain_start = i + 1;
                }
            }

            _ => {}
        }
    }

    flush_plain(&mut result, &text[plain_start..]);
    collapse_text_runs(&mut result);

    StyledText::new(result)
}

fn flush_plain(result: &mut Vec<Inline>, text: &str) {
    if !text.is_empty() {
        result.push(Inline::Text(text.to_string()));
    }
}

/// Find closing backticks matching the opening count.
fn find_closing_backticks(text: &str, count: usize) -> Option<usize> {
    let target: String = "`".repeat(count);
    let mut i = 0;

    while i < text.len() {
        if text[i..].starts_with(&target) {
            let after = i + count;
            if after >= text.len() || !text[after..].starts_with('`') {
                return Some(i);
            }
            // Longer backtick run, skip it
            while i < text.len() && text[i..].starts_with('`') {
                i += 1;
            }
        } else {
            i += text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        }
    }
    None
}

/// Find the closing formula delimiter.
///
/// Single-dollar formulas must hug their content (`$x$`, not `$ 5 and $`)
/// so prices in prose stay text.
fn find_closing_formula(text: &str, delim: &str) -> Option<usize> {
    let end = text.find(delim)?;
    let content = &text[..end];
    if content.trim().is_empty() || content.contains('\n') {
        return None;
    }
    if delim == "$"
        && (content.starts_with(char::is_whitespace) || content.ends_with(char::is_whitespace))
    {
        return None;
    }
    Some(end)
}

/// Find closing emphasis marker.
/// Returns (content, actual_close_len, end_position) if found.
fn find_closing_emphasis(
    text: &str,
    marker: char,
    open_count: usize,
) -> Option<(&str, usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c == marker {
            let mut count = 1;
            while i + count < chars.len() && chars[i + count].1 == marker {
                count += 1;
            }

            // Underscore can't close inside a word
            let can_close = marker != '_'
                || chars
                    .get(i + count)
                    .map(|(_, c)| c.is_whitespace() || c.is_ascii_punctuation())
                    .unwrap_or(true);

            if can_close && count >= open_count {
                let close_len = count.min(open_count);
                return Some((&text[..pos], close_len, pos));
            }

            i += count;
        } else {
            i += 1;
        }
    }
    None
}

/// Parse a link starting with `[`.
/// Returns (text, url, total_bytes_consumed)
fn parse_link(text: &str) -> Option<(String, String, usize)> {
    if !text.starts_with('[') {
        return None;
    }

    let bracket_end = find_balanced(text, '[', ']')?;
    let link_text = &text[1..bracket_end];

    let rest = &text[bracket_end + 1..];
    if !rest.starts_with('(') {
        return None;
    }

    let paren_end = find_balanced(rest, '(', ')')?;
    let url = &rest[1..paren_end];
    if url.contains('\n') {
        return None;
    }

    Some((
        link_text.to_string(),
        url.trim().to_string(),
        bracket_end + 1 + paren_end + 1,
    ))
}

/// Byte offset of the closer matching the opener at offset 0.
fn find_balanced(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Collapse adjacent Text runs into one.
fn collapse_text_runs(runs: &mut Vec<Inline>) {
    let mut merged: Vec<Inline> = Vec::with_capacity(runs.len());
    for run in runs.drain(..) {
        match (merged.last_mut(), run) {
            (Some(Inline::Text(prev)), Inline::Text(next)) => prev.push_str(&next),
            (_, run) => merged.push(run),
        }
    }
    *runs = merged;
}
