//! Grouping streamed text into heading-delimited modules.

use tracing::trace;

use crate::partial::detect_pending;
use crate::scan;

pub const DEFAULT_MODULE_MIN_CHARS: usize = 240;

/// Accumulates chunks and releases them as complete modules.
///
/// A module is a run of text that can be handed to the parser as a unit:
/// a section between two top-level headings, or, for unheaded text, a run
/// of at least `min_chars` characters that ends on a blank line. Nothing
/// is released while the buffer ends inside an unterminated structure.
///
/// The released modules concatenated with [`ModuleBuffer::flush`] always
/// reproduce the input exactly.
#[derive(Debug, Clone)]
pub struct ModuleBuffer {
    pending: String,
    min_chars: usize,
}

impl Default for ModuleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MODULE_MIN_CHARS)
    }
}

impl ModuleBuffer {
    pub fn new(min_chars: usize) -> Self {
        Self {
            pending: String::new(),
            min_chars,
        }
    }

    /// Text received but not yet released.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn append(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        if let Some(kind) = detect_pending(&self.pending) {
            trace!("module buffer holding: pending {:?}", kind);
            return Vec::new();
        }

        let splits = self.split_points();
        if !splits.is_empty() {
            return self.release_sections(&splits);
        }

        if self.pending.chars().count() >= self.min_chars
            && scan::is_block_boundary(&self.pending, self.pending.len())
        {
            return vec![std::mem::take(&mut self.pending)];
        }

        Vec::new()
    }

    /// Whatever is left at the end of the stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Line offsets of the headings to split at: every H1 when there are
    /// at least two, otherwise every H2 when there are at least two.
    fn split_points(&self) -> Vec<usize> {
        let mut h1 = Vec::new();
        let mut h2 = Vec::new();
        let mut fence: Option<usize> = None;

        for line in scan::lines(&self.pending) {
            if let Some(open_len) = fence {
                if scan::fence_closes(line.text, open_len) {
                    fence = None;
                }
                continue;
            }
            if let Some(f) = scan::fence_open(line.text) {
                fence = Some(f.len);
                continue;
            }
            match scan::heading(line.text) {
                Some((1, _)) => h1.push(line.start),
                Some((2, _)) => h2.push(line.start),
                _ => {}
            }
        }

        if h1.len() >= 2 {
            h1
        } else if h2.len() >= 2 {
            h2
        } else {
            Vec::new()
        }
    }

    /// Release every section that a later heading has closed. The section
    /// opened by the last heading keeps growing.
    fn release_sections(&mut self, splits: &[usize]) -> Vec<String> {
        let mut modules = Vec::new();
        let mut start = 0;

        let first = splits[0];
        if !self.pending[..first].trim().is_empty() {
            modules.push(self.pending[..first].to_string());
            start = first;
        }

        for &next in &splits[1..] {
            modules.push(self.pending[start..next].to_string());
            start = next;
        }

        let last = *splits.last().unwrap_or(&0);
        self.pending.drain(..last);
        trace!("released {} modules", modules.len());
        modules
    }
}
