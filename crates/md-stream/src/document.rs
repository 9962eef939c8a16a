//! A whole streamed document: optional module buffering in front of the
//! incremental parser.

use std::sync::Arc;

use crate::element::{Element, MediaRef, TocEntry};
use crate::error::Error;
use crate::grammar::Grammar;
use crate::module::ModuleBuffer;
use crate::parser::{IncrementalParser, ParseDelta};

/// How incoming chunks reach the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunking {
    /// Every chunk is parsed as it arrives
    Direct,

    /// Chunks are grouped into heading-delimited modules first
    Modules { min_chars: usize },
}

pub struct DocumentParser {
    parser: IncrementalParser,
    modules: Option<ModuleBuffer>,
}

impl DocumentParser {
    pub fn new(grammar: Arc<dyn Grammar>, window: usize, chunking: Chunking) -> Self {
        let modules = match chunking {
            Chunking::Direct => None,
            Chunking::Modules { min_chars } => Some(ModuleBuffer::new(min_chars)),
        };
        Self {
            parser: IncrementalParser::with_window(grammar, window),
            modules,
        }
    }

    pub fn elements(&self) -> &[Element] {
        self.parser.elements()
    }

    pub fn headings(&self) -> Vec<TocEntry> {
        self.parser.headings()
    }

    pub fn attachments(&self) -> Vec<MediaRef> {
        self.parser.attachments()
    }

    pub fn is_finished(&self) -> bool {
        self.parser.is_finished()
    }

    pub fn parser(&self) -> &IncrementalParser {
        &self.parser
    }

    /// Feed one chunk. The delta is empty when the chunk only extended
    /// something still pending.
    pub fn push(&mut self, chunk: &str) -> Result<ParseDelta, Error> {
        match &mut self.modules {
            None => self.parser.push(chunk),
            Some(modules) => {
                let released = modules.append(chunk);
                if released.is_empty() {
                    return Ok(ParseDelta::default());
                }
                for module in &released {
                    self.parser.append(module)?;
                }
                self.parser.parse_step()
            }
        }
    }

    /// End of stream: release buffered text and parse the remainder.
    pub fn finish(&mut self) -> Result<ParseDelta, Error> {
        if let Some(rest) = self.modules.as_mut().and_then(ModuleBuffer::flush) {
            self.parser.append(&rest)?;
        }
        self.parser.finish()
    }

    pub fn reset(&mut self) {
        self.parser.reset();
        if let Some(modules) = &mut self.modules {
            modules.clear();
        }
    }

    /// Parse `text` from scratch as a complete document.
    pub fn replace(&mut self, text: &str) -> Result<ParseDelta, Error> {
        self.reset();
        self.parser.append(text)?;
        self.parser.finish()
    }

    /// Drop every parsed element and parse the buffered text again, e.g.
    /// after the host invalidated its layout. Text still held by the module
    /// buffer stays there.
    pub fn reparse(&mut self) -> Result<ParseDelta, Error> {
        let text = self.parser.cursor().buffered_text.clone();
        let finished = self.parser.is_finished();

        self.parser.reset();
        self.parser.append(&text)?;
        if finished {
            self.parser.finish()
        } else {
            self.parser.parse_step()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarkdownGrammar;
    use pretty_assertions::assert_eq;

    fn document(chunking: Chunking) -> DocumentParser {
        DocumentParser::new(Arc::new(MarkdownGrammar::new()), 64, chunking)
    }

    #[test]
    fn test_reparse_reproduces_elements() {
        let mut doc = document(Chunking::Direct);
        doc.push("# Title\n\nSome text.\n\nMore").unwrap();
        let before = doc.elements().to_vec();

        doc.reparse().unwrap();
        assert_eq!(doc.elements(), before.as_slice());
        assert!(!doc.is_finished());

        doc.finish().unwrap();
        let finished = doc.elements().to_vec();
        doc.reparse().unwrap();
        assert_eq!(doc.elements(), finished.as_slice());
        assert!(doc.is_finished());
    }

    #[test]
    fn test_modules_hold_text_until_released() {
        let mut doc = document(Chunking::Modules { min_chars: 1000 });
        let delta = doc.push("# One\n\nfirst\n\n").unwrap();
        assert!(delta.is_empty());
        assert!(doc.elements().is_empty());

        doc.push("# Two\n\nsecond\n\n").unwrap();
        assert_eq!(doc.elements().len(), 2, "first module released");

        doc.finish().unwrap();
        assert_eq!(doc.elements().len(), 4);
    }

    #[test]
    fn test_replace_parses_complete_text() {
        let mut doc = document(Chunking::Direct);
        doc.push("old text\n\n").unwrap();
        doc.replace("```\nunclosed").unwrap();

        assert!(doc.is_finished());
        assert_eq!(
            doc.elements(),
            &[Element::RawBlock {
                text: "```\nunclosed".to_string()
            }]
        );
    }
}
