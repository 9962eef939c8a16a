//! Spans that must be revealed as one unit, and simulated streaming that
//! respects them.

use std::ops::Range;

use regex::Regex;

/// What an atomic span holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    Formula,
    Image,
    Link,
}

/// A half-open byte interval of buffered text revealed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicRange {
    pub start: usize,
    pub end: usize,
    pub kind: AtomicKind,
}

impl AtomicRange {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Compiled patterns for formula, image and link syntax.
///
/// Construct once and pass it to whatever needs to scan for spans.
pub struct SpanPatterns {
    formula: Regex,
    image: Regex,
    link: Regex,
}

impl Default for SpanPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanPatterns {
    pub fn new() -> Self {
        Self {
            formula: Regex::new(r"\$\$[^\n]+?\$\$|\$[^$\s](?:[^$\n]*[^$\s])?\$")
                .expect("formula pattern"),
            image: Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").expect("image pattern"),
            link: Regex::new(r"\[[^\]\n]*\]\([^)\n]*\)").expect("link pattern"),
        }
    }

    /// All atomic spans of `text`, sorted by start, never overlapping.
    ///
    /// When spans overlap (a link pattern inside an image) the one that
    /// starts first wins.
    pub fn scan(&self, text: &str) -> Vec<AtomicRange> {
        let mut found: Vec<AtomicRange> = Vec::new();
        let patterns = [
            (&self.formula, AtomicKind::Formula),
            (&self.image, AtomicKind::Image),
            (&self.link, AtomicKind::Link),
        ];
        for (pattern, kind) in patterns {
            found.extend(pattern.find_iter(text).map(|m| AtomicRange {
                start: m.start(),
                end: m.end(),
                kind,
            }));
        }

        found.sort_by_key(|r| (r.start, std::cmp::Reverse(r.end)));

        let mut out: Vec<AtomicRange> = Vec::with_capacity(found.len());
        for range in found {
            if out.last().map(|prev| range.start < prev.end).unwrap_or(false) {
                continue;
            }
            out.push(range);
        }
        out
    }
}

/// Push a reveal boundary forward so it never lands inside a range.
///
/// `ranges` must be sorted by start. Units are whatever the ranges use
/// (bytes for buffered text, chars for element text).
pub fn extend_over_atomic(end: usize, ranges: &[Range<usize>]) -> usize {
    let mut end = end;
    for range in ranges {
        if range.start >= end {
            break;
        }
        if end < range.end {
            end = range.end;
        }
    }
    end
}

/// Replays a complete text as small chunks, the way a token stream would
/// deliver it, without ever cutting through an atomic span.
pub struct SimulatedStream {
    text: String,
    ranges: Vec<Range<usize>>,
    pos: usize,
    chars_per_chunk: usize,
}

impl SimulatedStream {
    pub fn new(text: impl Into<String>, patterns: &SpanPatterns, chars_per_chunk: usize) -> Self {
        let text = text.into();
        let ranges = patterns.scan(&text).iter().map(AtomicRange::range).collect();
        Self {
            text,
            ranges,
            pos: 0,
            chars_per_chunk: chars_per_chunk.max(1),
        }
    }

    /// Byte offset consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.text.len()
    }
}

impl Iterator for SimulatedStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.is_done() {
            return None;
        }

        let rest = &self.text[self.pos..];
        let step = rest
            .char_indices()
            .nth(self.chars_per_chunk)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());

        let end = extend_over_atomic(self.pos + step, &self.ranges).min(self.text.len());
        let chunk = self.text[self.pos..end].to_string();
        self.pos = end;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_kinds() {
        let patterns = SpanPatterns::new();
        let text = "a $$x^2$$ b ![img](i.png) c [link](u) d $y$";
        let kinds: Vec<_> = patterns.scan(text).iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AtomicKind::Formula,
                AtomicKind::Image,
                AtomicKind::Link,
                AtomicKind::Formula
            ]
        );
    }

    #[test]
    fn test_extend_over_atomic() {
        let ranges = vec![2..5, 8..10];
        assert_eq!(extend_over_atomic(1, &ranges), 1);
        assert_eq!(extend_over_atomic(2, &ranges), 2);
        assert_eq!(extend_over_atomic(3, &ranges), 5);
        assert_eq!(extend_over_atomic(9, &ranges), 10);
    }

    #[test]
    fn test_formula_arrives_in_one_chunk() {
        let patterns = SpanPatterns::new();
        let text = "See $$x^2$$ here";
        let span_start = text.find("$$").unwrap();
        let span_end = span_start + "$$x^2$$".len();

        let chunks: Vec<String> = SimulatedStream::new(text, &patterns, 1).collect();
        assert_eq!(chunks.concat(), text);

        let mut consumed = 0;
        for chunk in &chunks {
            consumed += chunk.len();
            assert!(
                consumed <= span_start || consumed >= span_end,
                "chunk boundary {} falls inside the formula",
                consumed
            );
        }
        assert!(chunks.iter().any(|c| c == "$$x^2$$"));
    }

    #[test]
    fn test_multibyte_chunks() {
        let patterns = SpanPatterns::new();
        let chunks: Vec<String> = SimulatedStream::new("héllo wörld", &patterns, 3).collect();
        assert_eq!(chunks, vec!["hél", "lo ", "wör", "ld"]);
    }
}
