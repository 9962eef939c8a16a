//! Streaming markdown display: keeps a tree of host view nodes in step with
//! an incremental parse and reveals new content at a readable pace.
//!
//! A [`StreamSession`] owns the pipeline. Chunks go to a [`ParseWorker`],
//! snapshots come back and are diffed into the [`DisplayTree`] by the
//! [`Reconciler`], and new or grown nodes are queued on the
//! [`RevealScheduler`]. The host only implements [`ViewFactory`] and,
//! optionally, [`HostNotifier`].

mod args;
mod config;
mod error;
mod guard;
mod logging;
mod reconcile;
mod scheduler;
mod session;
mod transcript;
mod tree;
mod view;
mod worker;

pub use args::ReplayArgs;
pub use config::{ParserConfig, ReconcileConfig, RenderConfig, RevealConfig};
pub use error::Error;
pub use guard::VersionGuard;
pub use logging::{default_log_dir, setup_logging};
pub use reconcile::{reuse_compatible, ReconcileReport, Reconciler};
pub use scheduler::{
    RevealScheduler, RevealSink, RevealTask, RevealToken, SchedulerState, TextReveal,
};
pub use session::{StreamSession, StreamState};
pub use transcript::{element_text, render_visible, TranscriptNode, TranscriptView};
pub use tree::{DisplayNode, DisplayTree, NodeKey};
pub use view::{BlockStart, HostNotifier, Reveal, Size, ViewFactory};
pub use worker::{InlineParser, ParseDriver, ParseJob, ParseUpdate, ParseWorker};
