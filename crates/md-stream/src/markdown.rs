//! Reference block grammar for a pragmatic markdown subset.
//!
//! Blocks never span a blank line unless they are fenced (code, display
//! formula, `<details>`). The incremental parser depends on that: text on
//! either side of a blank line outside any fence parses independently.

use regex::Regex;
use tracing::trace;

use crate::element::{Element, Inline, ListItem, StyledText};
use crate::error::GrammarError;
use crate::grammar::{Grammar, GrammarOutput};
use crate::inline::parse_inline;
use crate::scan;

const DEFAULT_MAX_DEPTH: usize = 32;

/// Markdown grammar: headings, paragraphs, fenced code, display formulas,
/// quotes, lists, tables, rules, `<details>` and raw html blocks.
///
/// Patterns are compiled once at construction; build one grammar per
/// process and share it.
pub struct MarkdownGrammar {
    table_separator: Regex,
    summary: Regex,
    max_depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct Nesting {
    depth: usize,
    quote_level: u8,
    list_level: u8,
}

impl Nesting {
    fn root() -> Self {
        Self {
            depth: 0,
            quote_level: 0,
            list_level: 0,
        }
    }

    fn quote(self) -> Self {
        Self {
            depth: self.depth + 1,
            quote_level: self.quote_level.saturating_add(1),
            ..self
        }
    }

    fn list(self) -> Self {
        Self {
            depth: self.depth + 1,
            list_level: self.list_level.saturating_add(1),
            ..self
        }
    }

    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }
}

impl Default for MarkdownGrammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar for MarkdownGrammar {
    #[profiling::function]
    fn parse(&self, text: &str) -> Result<GrammarOutput, GrammarError> {
        let lines: Vec<&str> = scan::lines(text).iter().map(|l| l.text).collect();
        let elements = self.blocks(&lines, Nesting::root())?;
        trace!("grammar: {} bytes -> {} elements", text.len(), elements.len());
        Ok(GrammarOutput::from_elements(elements))
    }
}

impl MarkdownGrammar {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            table_separator: Regex::new(r"^\s*\|?\s*:?-+:?\s*(\|\s*:?-+:?\s*)*\|?\s*$")
                .expect("table separator pattern"),
            summary: Regex::new(r"(?s)<summary>(.*?)</summary>").expect("summary pattern"),
            max_depth,
        }
    }

    fn blocks(&self, lines: &[&str], nesting: Nesting) -> Result<Vec<Element>, GrammarError> {
        if nesting.depth > self.max_depth {
            return Err(GrammarError::NestingTooDeep(self.max_depth));
        }

        let mut out = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];

            if line.trim().is_empty() {
                i += 1;
                continue;
            }

            if let Some(fence) = scan::fence_open(line) {
                let (element, next) = fenced(lines, i, fence);
                out.push(element);
                i = next;
                continue;
            }

            if let Some(expression) = scan::formula_single_line(line) {
                out.push(Element::Formula {
                    expression: expression.to_string(),
                });
                i += 1;
                continue;
            }

            if scan::formula_open(line) {
                let (element, next) = formula_block(lines, i);
                out.push(element);
                i = next;
                continue;
            }

            if let Some((level, title)) = scan::heading(line) {
                out.push(Element::Heading {
                    id: slug(title),
                    level,
                    text: parse_inline(title),
                });
                i += 1;
                continue;
            }

            if scan::is_rule(line) {
                out.push(Element::Rule);
                i += 1;
                continue;
            }

            if scan::details_opens(line) > 0 {
                let (element, next) = self.details(lines, i, nesting)?;
                out.push(element);
                i = next;
                continue;
            }

            if scan::is_quote(line) {
                let (element, next) = self.quote(lines, i, nesting)?;
                out.push(element);
                i = next;
                continue;
            }

            if self.table_starts(lines, i) {
                let (element, next) = self.table(lines, i);
                out.push(element);
                i = next;
                continue;
            }

            if scan::list_marker(line).is_some() {
                let (element, next) = self.list(lines, i, nesting)?;
                out.push(element);
                i = next;
                continue;
            }

            if is_html_start(line) {
                let end = block_end(lines, i);
                out.push(Element::RawBlock {
                    text: lines[i..end].join("\n"),
                });
                i = end;
                continue;
            }

            let (element, next) = self.paragraph(lines, i);
            out.push(element);
            i = next;
        }

        Ok(out)
    }

    /// Does a line start a new block, ending a paragraph or lazy list line?
    fn interrupts(&self, lines: &[&str], i: usize) -> bool {
        let line = lines[i];
        line.trim().is_empty()
            || scan::fence_open(line).is_some()
            || scan::formula_open(line)
            || scan::formula_single_line(line).is_some()
            || scan::heading(line).is_some()
            || scan::is_rule(line)
            || scan::details_opens(line) > 0
            || scan::is_quote(line)
            || self.table_starts(lines, i)
            || scan::list_marker(line).is_some()
            || is_html_start(line)
    }

    fn paragraph(&self, lines: &[&str], start: usize) -> (Element, usize) {
        let mut end = start + 1;
        while end < lines.len() && !self.interrupts(lines, end) {
            end += 1;
        }

        let text = lines[start..end].join("\n");
        let styled = parse_inline(text.trim());

        // A paragraph holding nothing but an image is a standalone image
        let element = match styled.runs.as_slice() {
            [Inline::Image { alt, url }] => Element::Image {
                source: url.clone(),
                alt: alt.clone(),
            },
            _ => Element::Text(styled),
        };
        (element, end)
    }

    fn table_starts(&self, lines: &[&str], i: usize) -> bool {
        scan::is_table_row(lines[i])
            && lines
                .get(i + 1)
                .map(|l| self.table_separator.is_match(l))
                .unwrap_or(false)
    }

    fn table(&self, lines: &[&str], start: usize) -> (Element, usize) {
        let headers = split_row(lines[start]);
        let mut end = start + 2;
        let mut rows = Vec::new();
        while end < lines.len() && scan::is_table_row(lines[end]) {
            rows.push(split_row(lines[end]));
            end += 1;
        }
        (Element::Table { headers, rows }, end)
    }

    fn quote(
        &self,
        lines: &[&str],
        start: usize,
        nesting: Nesting,
    ) -> Result<(Element, usize), GrammarError> {
        let mut end = start;
        let mut inner = Vec::new();
        while end < lines.len() && scan::is_quote(lines[end]) {
            let trimmed = lines[end].trim_start();
            let content = &trimmed[1..];
            inner.push(content.strip_prefix(' ').unwrap_or(content));
            end += 1;
        }

        let nesting = nesting.quote();
        let children = self.blocks(&inner, nesting)?;
        Ok((
            Element::Quote {
                children,
                level: nesting.quote_level,
            },
            end,
        ))
    }

    fn list(
        &self,
        lines: &[&str],
        start: usize,
        nesting: Nesting,
    ) -> Result<(Element, usize), GrammarError> {
        let Some((base_indent, _, _)) = scan::list_marker(lines[start]) else {
            return Ok(self.paragraph(lines, start));
        };

        struct Item<'a> {
            marker: String,
            content_col: usize,
            lines: Vec<&'a str>,
        }

        let mut items: Vec<Item> = Vec::new();
        let mut open_fence: Option<usize> = None;
        let mut end = start;

        while end < lines.len() {
            let line = lines[end];

            if let Some(open_len) = open_fence {
                if let Some(item) = items.last_mut() {
                    item.lines.push(dedent(line, item.content_col));
                }
                if scan::fence_closes(line, open_len) {
                    open_fence = None;
                }
                end += 1;
                continue;
            }

            if line.trim().is_empty() {
                break;
            }

            if let Some((indent, marker, content)) = scan::list_marker(line) {
                if indent < base_indent + 2 {
                    items.push(Item {
                        marker: marker.to_string(),
                        content_col: content,
                        lines: vec![&line[content.min(line.len())..]],
                    });
                    end += 1;
                    continue;
                }
            }

            let indent = line.len() - line.trim_start().len();
            let Some(item) = items.last_mut() else {
                break;
            };
            if indent > base_indent {
                item.lines.push(dedent(line, item.content_col));
            } else if !self.interrupts(lines, end) {
                // Lazy continuation of the item's paragraph
                item.lines.push(line.trim_start());
            } else {
                break;
            }

            if let Some(fence) = scan::fence_open(line) {
                open_fence = Some(fence.len);
            }
            end += 1;
        }

        let nesting = nesting.list();
        let mut list_items = Vec::with_capacity(items.len());
        for item in items {
            list_items.push(ListItem {
                marker: item.marker,
                children: self.item_children(&item.lines, nesting)?,
            });
        }

        Ok((
            Element::List {
                items: list_items,
                level: nesting.list_level,
            },
            end,
        ))
    }

    /// The first line of an item is always text: a fence opener right
    /// after the marker is not treated as a fence.
    fn item_children(&self, lines: &[&str], nesting: Nesting) -> Result<Vec<Element>, GrammarError> {
        match lines.split_first() {
            Some((first, rest)) if scan::fence_open(first).is_some() => {
                let mut children = vec![Element::Text(parse_inline(first.trim()))];
                children.extend(self.blocks(rest, nesting)?);
                Ok(children)
            }
            _ => self.blocks(lines, nesting),
        }
    }

    fn details(
        &self,
        lines: &[&str],
        start: usize,
        nesting: Nesting,
    ) -> Result<(Element, usize), GrammarError> {
        let mut depth = 0usize;
        let mut open_fence: Option<usize> = None;
        let mut end = None;

        for (j, line) in lines.iter().enumerate().skip(start) {
            if let Some(open_len) = open_fence {
                if scan::fence_closes(line, open_len) {
                    open_fence = None;
                }
                continue;
            }
            if j > start {
                if let Some(fence) = scan::fence_open(line) {
                    open_fence = Some(fence.len);
                    continue;
                }
            }
            depth += scan::details_opens(line);
            depth = depth.saturating_sub(scan::details_closes(line));
            if depth == 0 {
                end = Some(j + 1);
                break;
            }
        }

        let Some(end) = end else {
            return Ok((
                Element::RawBlock {
                    text: lines[start..].join("\n"),
                },
                lines.len(),
            ));
        };

        let body = lines[start..end].join("\n");
        let body = strip_details_tags(&body);

        let (summary, body) = match self.summary.captures(body) {
            Some(caps) => {
                let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                let summary = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let mut rest = String::with_capacity(body.len());
                rest.push_str(&body[..whole.start]);
                rest.push_str(&body[whole.end..]);
                (parse_inline(summary.trim()), rest)
            }
            None => (StyledText::plain("Details"), body.to_string()),
        };

        let inner: Vec<&str> = body.lines().collect();
        let children = self.blocks(&inner, nesting.nested())?;
        Ok((Element::Collapsible { summary, children }, end))
    }
}

/// Fenced code (or a ```@kind extension block).
fn fenced(lines: &[&str], start: usize, fence: scan::Fence) -> (Element, usize) {
    let Some(close) = (start + 1..lines.len()).find(|&j| scan::fence_closes(lines[j], fence.len))
    else {
        return (
            Element::RawBlock {
                text: lines[start..].join("\n"),
            },
            lines.len(),
        );
    };

    let raw: String = lines[start + 1..close]
        .iter()
        .flat_map(|l| [*l, "\n"])
        .collect();

    let element = match fence.info.strip_prefix('@') {
        Some(kind) => Element::Custom {
            kind: kind.trim().to_string(),
            payload: raw,
        },
        None => Element::CodeBlock {
            language: fence.info.split_whitespace().next().map(str::to_string),
            raw,
        },
    };
    (element, close + 1)
}

/// Display formula spanning lines, opened by a line starting with `$$`.
fn formula_block(lines: &[&str], start: usize) -> (Element, usize) {
    let Some(close) = (start + 1..lines.len()).find(|&j| lines[j].contains("$$")) else {
        return (
            Element::RawBlock {
                text: lines[start..].join("\n"),
            },
            lines.len(),
        );
    };

    let first = lines[start].trim_start();
    let first = first.strip_prefix("$$").unwrap_or(first);
    let last = lines[close].split("$$").next().unwrap_or("");

    let mut parts = vec![first];
    parts.extend_from_slice(&lines[start + 1..close]);
    parts.push(last);

    let expression = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    (Element::Formula { expression }, close + 1)
}

fn block_end(lines: &[&str], start: usize) -> usize {
    (start..lines.len())
        .find(|&j| lines[j].trim().is_empty())
        .unwrap_or(lines.len())
}

fn is_html_start(line: &str) -> bool {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    chars.next() == Some('<')
        && chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
            .unwrap_or(false)
}

fn split_row(line: &str) -> Vec<StyledText> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed
        .split('|')
        .map(|cell| parse_inline(cell.trim()))
        .collect()
}

fn dedent(line: &str, cols: usize) -> &str {
    let indent = line.len() - line.trim_start().len();
    &line[indent.min(cols)..]
}

/// Remove the outer `<details ...>` opening tag and last `</details>`.
fn strip_details_tags(body: &str) -> &str {
    let after_open = body
        .find("<details")
        .and_then(|start| body[start..].find('>').map(|gt| start + gt + 1))
        .unwrap_or(0);
    let before_close = body.rfind("</details>").unwrap_or(body.len());
    if before_close < after_open {
        return "";
    }
    &body[after_open..before_close]
}

/// Anchor id for a heading title.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            dash = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !out.is_empty() && !dash {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
