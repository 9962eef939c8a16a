//! Parsing off the UI thread.
//!
//! The document parser lives on one named background thread. Jobs go in
//! over a crossbeam channel, whole element snapshots come back over
//! another, and the UI thread drains them with `try_recv` on every poll.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use crossbeam_channel as chan;
use md_stream::{DocumentParser, Element, Error as ParseError, Grammar, MediaRef, TocEntry};
use tracing::{debug, error, trace};

use crate::config::ParserConfig;
use crate::guard::VersionGuard;
use crate::Error;

/// Work for the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseJob {
    /// Start a new, empty stream
    Begin { version: u64 },

    /// More streamed text
    Append(String),

    /// Replace everything with a complete document
    Reparse { text: String, version: u64 },

    /// Parse the buffered text again from scratch
    Refresh { version: u64 },

    /// The stream ended
    Finish,
}

/// A full snapshot of the parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseUpdate {
    pub version: u64,
    pub elements: Vec<Element>,
    pub headings: Vec<TocEntry>,
    pub attachments: Vec<MediaRef>,
    pub finished: bool,
}

/// Something that parses jobs and hands back updates.
pub trait ParseDriver {
    fn send(&mut self, job: ParseJob) -> Result<(), Error>;

    fn try_recv(&mut self) -> Option<ParseUpdate>;
}

/// The parser and the version its output belongs to.
struct WorkerState {
    doc: DocumentParser,
    version: u64,
    guard: VersionGuard,
}

impl WorkerState {
    fn new(grammar: Arc<dyn Grammar>, config: &ParserConfig, guard: VersionGuard) -> Self {
        Self {
            doc: DocumentParser::new(grammar, config.window, config.chunking()),
            version: guard.current(),
            guard,
        }
    }

    #[profiling::function]
    fn handle(&mut self, job: ParseJob) -> Option<ParseUpdate> {
        let result = match job {
            ParseJob::Begin { version } => {
                self.doc.reset();
                self.version = version;
                return Some(self.snapshot());
            }
            ParseJob::Append(chunk) => self.doc.push(&chunk),
            ParseJob::Reparse { text, version } => {
                if !self.guard.is_current(version) {
                    debug!("skipping stale reparse v{}", version);
                    return None;
                }
                self.version = version;
                self.doc.replace(&text)
            }
            ParseJob::Refresh { version } => {
                if !self.guard.is_current(version) {
                    debug!("skipping stale refresh v{}", version);
                    return None;
                }
                self.version = version;
                self.doc.reparse()
            }
            ParseJob::Finish => self.doc.finish(),
        };

        match result {
            Ok(delta) if delta.is_empty() && !self.doc.is_finished() => {
                trace!("v{}: nothing new", self.version);
                None
            }
            Ok(delta) => {
                trace!(
                    "v{}: replaced elements from {} ({} now)",
                    self.version,
                    delta.replaced_from,
                    self.doc.elements().len()
                );
                Some(self.snapshot())
            }
            Err(ParseError::Finished) => {
                debug!("v{}: stream already finished, dropping job", self.version);
                None
            }
            // Logged by the parser, retried with the next chunk
            Err(_) => None,
        }
    }

    fn snapshot(&self) -> ParseUpdate {
        ParseUpdate {
            version: self.version,
            elements: self.doc.elements().to_vec(),
            headings: self.doc.headings(),
            attachments: self.doc.attachments(),
            finished: self.doc.is_finished(),
        }
    }
}

/// Runs the parser on a dedicated thread.
pub struct ParseWorker {
    cmd_tx: Option<chan::Sender<ParseJob>>,
    msg_rx: chan::Receiver<ParseUpdate>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ParseWorker {
    pub fn spawn(
        grammar: Arc<dyn Grammar>,
        config: &ParserConfig,
        guard: VersionGuard,
    ) -> Result<Self, Error> {
        let (cmd_tx, cmd_rx) = chan::unbounded::<ParseJob>();
        let (msg_tx, msg_rx) = chan::unbounded::<ParseUpdate>();
        let mut state = WorkerState::new(grammar, config, guard);

        let handle = thread::Builder::new()
            .name("md-parse".to_string())
            .spawn(move || {
                while let Ok(job) = cmd_rx.recv() {
                    let Some(update) = state.handle(job) else {
                        continue;
                    };
                    if msg_tx.send(update).is_err() {
                        break;
                    }
                }
                debug!("parse worker exiting");
            })?;

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            msg_rx,
            handle: Some(handle),
        })
    }
}

impl ParseDriver for ParseWorker {
    fn send(&mut self, job: ParseJob) -> Result<(), Error> {
        let Some(tx) = &self.cmd_tx else {
            return Err(Error::WorkerDisconnected);
        };
        tx.send(job).map_err(|_| Error::WorkerDisconnected)
    }

    fn try_recv(&mut self) -> Option<ParseUpdate> {
        self.msg_rx.try_recv().ok()
    }
}

impl Drop for ParseWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.cmd_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("parse worker panicked");
            }
        }
    }
}

/// Parses on the calling thread, for hosts without threads and for tests.
pub struct InlineParser {
    state: WorkerState,
    updates: VecDeque<ParseUpdate>,
}

impl InlineParser {
    pub fn new(grammar: Arc<dyn Grammar>, config: &ParserConfig, guard: VersionGuard) -> Self {
        Self {
            state: WorkerState::new(grammar, config, guard),
            updates: VecDeque::new(),
        }
    }
}

impl ParseDriver for InlineParser {
    fn send(&mut self, job: ParseJob) -> Result<(), Error> {
        if let Some(update) = self.state.handle(job) {
            self.updates.push_back(update);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<ParseUpdate> {
        self.updates.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_stream::{MarkdownGrammar, StyledText};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn grammar() -> Arc<dyn Grammar> {
        Arc::new(MarkdownGrammar::new())
    }

    fn recv_blocking(worker: &mut ParseWorker) -> ParseUpdate {
        worker
            .msg_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker update")
    }

    #[test]
    fn test_inline_parser_streams() {
        let guard = VersionGuard::new();
        let mut parser = InlineParser::new(grammar(), &ParserConfig::default(), guard.clone());

        parser.send(ParseJob::Begin { version: guard.bump() }).unwrap();
        assert!(parser.try_recv().unwrap().elements.is_empty());

        parser.send(ParseJob::Append("Hello".to_string())).unwrap();
        assert_eq!(parser.try_recv(), None, "incomplete line is not parsed");

        parser.send(ParseJob::Append(" world\n\n".to_string())).unwrap();
        let update = parser.try_recv().unwrap();
        assert_eq!(update.elements, vec![Element::Text(StyledText::plain("Hello world"))]);
        assert!(!update.finished);

        parser.send(ParseJob::Finish).unwrap();
        let update = parser.try_recv().unwrap();
        assert!(update.finished);
        assert_eq!(update.version, guard.current());
    }

    #[test]
    fn test_stale_reparse_is_skipped() {
        let guard = VersionGuard::new();
        let mut parser = InlineParser::new(grammar(), &ParserConfig::default(), guard.clone());

        let stale = guard.bump();
        let current = guard.bump();
        parser
            .send(ParseJob::Reparse {
                text: "old".to_string(),
                version: stale,
            })
            .unwrap();
        parser
            .send(ParseJob::Reparse {
                text: "# new".to_string(),
                version: current,
            })
            .unwrap();

        let update = parser.try_recv().unwrap();
        assert_eq!(update.version, current);
        assert!(matches!(update.elements.as_slice(), [Element::Heading { .. }]));
        assert_eq!(parser.try_recv(), None);
    }

    #[test]
    fn test_worker_thread_round_trip() {
        let guard = VersionGuard::new();
        let mut worker =
            ParseWorker::spawn(grammar(), &ParserConfig::default(), guard.clone()).unwrap();

        worker.send(ParseJob::Begin { version: guard.bump() }).unwrap();
        worker.send(ParseJob::Append("# Title\n\nbody".to_string())).unwrap();
        worker.send(ParseJob::Finish).unwrap();

        let begin = recv_blocking(&mut worker);
        assert!(begin.elements.is_empty());
        let _partial = recv_blocking(&mut worker);
        let done = recv_blocking(&mut worker);

        assert!(done.finished);
        assert_eq!(done.elements.len(), 2);
        assert_eq!(done.headings[0].id, "title");
    }

    #[test]
    fn test_refresh_reemits_current_document() {
        let guard = VersionGuard::new();
        let mut parser = InlineParser::new(grammar(), &ParserConfig::default(), guard.clone());

        parser.send(ParseJob::Begin { version: guard.bump() }).unwrap();
        parser.send(ParseJob::Append("one\n\ntwo\n\n".to_string())).unwrap();
        let before = std::iter::from_fn(|| parser.try_recv()).last().unwrap();

        let version = guard.bump();
        parser.send(ParseJob::Refresh { version }).unwrap();
        let after = parser.try_recv().unwrap();

        assert_eq!(after.version, version);
        assert_eq!(after.elements, before.elements);
    }
}
