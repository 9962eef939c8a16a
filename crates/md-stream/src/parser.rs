//! Incremental re-parsing of a growing buffer.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::breakpoint::{line_boundary, resolve_safe_breakpoint};
use crate::element::{Element, MediaRef, TocEntry};
use crate::error::Error;
use crate::grammar::{collect_headings, collect_media, Grammar};
use crate::partial::{detect_pending, PendingKind};
use crate::scan;

/// How far behind the last safe position a re-parse starts, in bytes.
pub const DEFAULT_WINDOW: usize = 160;

/// Where the parser stands in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseCursor {
    /// Everything received so far
    pub buffered_text: String,

    /// Offset up to which the buffer has been parsed. Only moves forward,
    /// except on [`IncrementalParser::reset`].
    pub last_safe_position: usize,

    /// Number of elements produced up to `last_safe_position`
    pub previous_element_count: usize,
}

/// A safe offset that follows a blank line outside any fence.
///
/// The elements before and after it parse independently, so a re-parse
/// that starts here only replaces elements from `element_count` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    offset: usize,
    element_count: usize,
}

/// The result of one parse step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseDelta {
    /// Elements parsed from `[parse_start, parse_end)`
    pub elements: Vec<Element>,

    pub parse_start: usize,
    pub parse_end: usize,

    /// Index in the document's element list where `elements` begin. All
    /// elements from here on were replaced.
    pub replaced_from: usize,

    /// Estimate of how many previously emitted elements the backtracked
    /// region covered. Informational only; `replaced_from` is exact.
    pub superseded_estimate: usize,
}

impl ParseDelta {
    fn empty(at: usize, replaced_from: usize) -> Self {
        Self {
            elements: Vec::new(),
            parse_start: at,
            parse_end: at,
            replaced_from,
            superseded_estimate: 0,
        }
    }

    /// True when the step produced nothing new.
    pub fn is_empty(&self) -> bool {
        self.parse_end <= self.parse_start
    }
}

/// Re-parses only the tail of a growing buffer.
///
/// Each step backs up `window` bytes from the last safe position (snapped
/// to the nearest block checkpoint), parses up to the new safe breakpoint,
/// and replaces everything emitted from that checkpoint onwards. The
/// resulting element list always equals a one-shot parse of the safe
/// prefix.
pub struct IncrementalParser {
    grammar: Arc<dyn Grammar>,
    window: usize,
    cursor: ParseCursor,
    elements: Vec<Element>,
    checkpoints: Vec<Checkpoint>,
    finished: bool,
}

impl IncrementalParser {
    pub fn new(grammar: Arc<dyn Grammar>) -> Self {
        Self::with_window(grammar, DEFAULT_WINDOW)
    }

    pub fn with_window(grammar: Arc<dyn Grammar>, window: usize) -> Self {
        Self {
            grammar,
            window,
            cursor: ParseCursor::default(),
            elements: Vec::new(),
            checkpoints: vec![Checkpoint {
                offset: 0,
                element_count: 0,
            }],
            finished: false,
        }
    }

    pub fn cursor(&self) -> &ParseCursor {
        &self.cursor
    }

    /// All elements parsed so far, in document order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn headings(&self) -> Vec<TocEntry> {
        collect_headings(&self.elements)
    }

    pub fn attachments(&self) -> Vec<MediaRef> {
        let mut out = Vec::new();
        collect_media(&self.elements, &mut out);
        out
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Buffer a chunk without parsing.
    pub fn append(&mut self, chunk: &str) -> Result<(), Error> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.cursor.buffered_text.push_str(chunk);
        Ok(())
    }

    /// Buffer a chunk and parse whatever became safe.
    pub fn push(&mut self, chunk: &str) -> Result<ParseDelta, Error> {
        self.append(chunk)?;
        self.parse_step()
    }

    /// Parse the buffer up to its current safe breakpoint.
    ///
    /// On a grammar failure the cursor stays where it was and the error is
    /// returned; the same region is retried on the next step.
    #[profiling::function]
    pub fn parse_step(&mut self) -> Result<ParseDelta, Error> {
        if self.finished {
            return Err(Error::Finished);
        }

        // A trailing partial line can look like a closing fence, so only
        // complete lines are considered while the stream is open
        let text = &self.cursor.buffered_text;
        let complete = &text[..line_boundary(text)];
        let last_safe = self.cursor.last_safe_position;
        let pending = detect_pending(complete);
        let parse_end = resolve_safe_breakpoint(complete, last_safe, pending);

        if parse_end <= last_safe {
            trace!("parse step: nothing new is safe (pending {:?})", pending);
            return Ok(ParseDelta::empty(last_safe, self.elements.len()));
        }

        let checkpoint = self.checkpoint_before(last_safe.saturating_sub(self.window));
        if parse_end <= checkpoint.offset {
            return Ok(ParseDelta::empty(last_safe, self.elements.len()));
        }

        let output = self
            .grammar
            .parse(&text[checkpoint.offset..parse_end])
            .map_err(|err| {
                warn!(
                    "grammar failed on {}..{}, will retry: {}",
                    checkpoint.offset, parse_end, err
                );
                Error::grammar(checkpoint.offset, parse_end, err)
            })?;

        Ok(self.commit(checkpoint, parse_end, output.elements))
    }

    /// Parse everything that remains once the stream has ended.
    ///
    /// A trailing unterminated fence, formula or `<details>` block is kept
    /// verbatim as a [`Element::RawBlock`], as is any region the grammar
    /// still refuses.
    #[profiling::function]
    pub fn finish(&mut self) -> Result<ParseDelta, Error> {
        if self.finished {
            return Err(Error::Finished);
        }

        let text = &self.cursor.buffered_text;
        let last_safe = self.cursor.last_safe_position;
        let end = text.len();

        let raw_from = match detect_pending(text) {
            Some(
                kind @ (PendingKind::CodeFence
                | PendingKind::FormulaBlock
                | PendingKind::Collapsible),
            ) => resolve_safe_breakpoint(text, last_safe, Some(kind)),
            _ => end,
        };

        let checkpoint = self.checkpoint_before(last_safe.saturating_sub(self.window));
        let mut elements = match self.grammar.parse(&text[checkpoint.offset..raw_from]) {
            Ok(output) => output.elements,
            Err(err) => {
                warn!(
                    "grammar failed on {}..{} at stream end, keeping raw text: {}",
                    checkpoint.offset, raw_from, err
                );
                raw_block(&text[checkpoint.offset..raw_from])
                    .into_iter()
                    .collect()
            }
        };

        if raw_from < end {
            debug!("flushing unterminated construct at {} as raw text", raw_from);
            elements.extend(raw_block(&text[raw_from..end]));
        }

        let delta = self.commit(checkpoint, end, elements);
        self.finished = true;
        Ok(delta)
    }

    /// Forget everything, ready for a new stream.
    pub fn reset(&mut self) {
        self.cursor = ParseCursor::default();
        self.elements.clear();
        self.checkpoints.clear();
        self.checkpoints.push(Checkpoint {
            offset: 0,
            element_count: 0,
        });
        self.finished = false;
    }

    fn checkpoint_before(&self, offset: usize) -> Checkpoint {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| c.offset <= offset)
            .copied()
            .unwrap_or(Checkpoint {
                offset: 0,
                element_count: 0,
            })
    }

    fn commit(&mut self, checkpoint: Checkpoint, parse_end: usize, parsed: Vec<Element>) -> ParseDelta {
        let last_safe = self.cursor.last_safe_position;
        let previous = self.cursor.previous_element_count;
        let superseded_estimate = superseded_estimate(last_safe, previous, last_safe - checkpoint.offset);

        self.elements.truncate(checkpoint.element_count);
        self.elements.extend(parsed.iter().cloned());

        self.checkpoints.retain(|c| c.offset <= checkpoint.offset);
        if parse_end > checkpoint.offset
            && scan::is_block_boundary(&self.cursor.buffered_text, parse_end)
        {
            self.checkpoints.push(Checkpoint {
                offset: parse_end,
                element_count: self.elements.len(),
            });
        }

        self.cursor.last_safe_position = parse_end;
        self.cursor.previous_element_count = self.elements.len();

        debug!(
            "parsed {}..{}: {} elements from index {} (~{} superseded), {} total",
            checkpoint.offset,
            parse_end,
            parsed.len(),
            checkpoint.element_count,
            superseded_estimate,
            self.elements.len()
        );

        ParseDelta {
            elements: parsed,
            parse_start: checkpoint.offset,
            parse_end,
            replaced_from: checkpoint.element_count,
            superseded_estimate,
        }
    }
}

/// `ceil(backtracked / average element size)`, capped at `previous`.
fn superseded_estimate(last_safe: usize, previous: usize, backtracked: usize) -> usize {
    if previous == 0 || last_safe == 0 {
        return 0;
    }
    // backtracked / (last_safe / previous), rounded up
    let estimate = (backtracked * previous).div_ceil(last_safe);
    estimate.min(previous)
}

fn raw_block(text: &str) -> Option<Element> {
    let text = text.trim_end();
    if text.trim().is_empty() {
        None
    } else {
        Some(Element::RawBlock {
            text: text.to_string(),
        })
    }
}
