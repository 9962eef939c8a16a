//! Incremental markdown parsing for text that arrives token by token.
//!
//! The buffer is only ever parsed up to a safe breakpoint, so the element
//! list never contains a half-received code fence, formula, table, list,
//! quote or `<details>` block. Re-parsing starts from a block checkpoint
//! near the end of the already-parsed text, which keeps each step cheap
//! while the result stays identical to a one-shot parse.

mod atomic;
mod breakpoint;
mod document;
mod element;
mod error;
mod grammar;
mod inline;
mod markdown;
mod module;
mod parser;
mod partial;
mod scan;

pub use atomic::{extend_over_atomic, AtomicKind, AtomicRange, SimulatedStream, SpanPatterns};
pub use breakpoint::resolve_safe_breakpoint;
pub use document::{Chunking, DocumentParser};
pub use element::{Element, Inline, InlineStyle, ListItem, MediaRef, RevealText, StyledText, TocEntry};
pub use error::{Error, GrammarError};
pub use grammar::{collect_headings, collect_media, unique_anchors, Grammar, GrammarOutput};
pub use inline::parse_inline;
pub use markdown::{slug, MarkdownGrammar};
pub use module::{ModuleBuffer, DEFAULT_MODULE_MIN_CHARS};
pub use parser::{IncrementalParser, ParseCursor, ParseDelta, DEFAULT_WINDOW};
pub use partial::{detect_pending, PendingKind};

#[cfg(test)]
mod tests;
