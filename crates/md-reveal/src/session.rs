//! One streamed message on the UI thread: parse updates in, reconciled
//! and progressively revealed view nodes out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use md_stream::{unique_anchors, Element, Grammar, MediaRef, TocEntry};
use tracing::{debug, info, warn};

use crate::config::RenderConfig;
use crate::guard::VersionGuard;
use crate::reconcile::Reconciler;
use crate::scheduler::{RevealScheduler, RevealSink, RevealTask, RevealToken, SchedulerState};
use crate::tree::{DisplayNode, DisplayTree, NodeKey};
use crate::view::{BlockStart, HostNotifier, Reveal, Size, ViewFactory};
use crate::worker::{InlineParser, ParseDriver, ParseJob, ParseUpdate, ParseWorker};
use crate::Error;

/// Lifecycle of the session's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing streamed yet
    Idle,

    Streaming,

    /// `end_stream` was called; waiting for the final parse and the reveal
    /// queue
    Ending,

    Complete,

    Stopped,
}

type Completion = Box<dyn FnOnce()>;

pub struct StreamSession<F: ViewFactory, H: HostNotifier> {
    factory: F,
    host: H,
    driver: Box<dyn ParseDriver>,
    guard: VersionGuard,
    reconciler: Reconciler,
    scheduler: RevealScheduler,

    tree: DisplayTree<F::Node>,
    elements: Vec<Element>,
    headings: Vec<TocEntry>,
    attachments: Vec<MediaRef>,
    resolved_headings: HashSet<String>,

    width: f32,
    size: Size,

    state: StreamState,

    /// Show new nodes at once instead of queueing reveals
    instant: bool,

    /// The last reconciliation ran while collapsibles were held
    held: bool,

    final_applied: bool,
    completion: Option<Completion>,
}

impl<F: ViewFactory, H: HostNotifier> StreamSession<F, H> {
    /// A session that parses on a background thread.
    pub fn new(
        factory: F,
        host: H,
        grammar: Arc<dyn Grammar>,
        config: &RenderConfig,
    ) -> Result<Self, Error> {
        let guard = VersionGuard::new();
        let worker = ParseWorker::spawn(grammar, &config.parser, guard.clone())?;
        Ok(Self::with_driver(factory, host, Box::new(worker), guard, config))
    }

    /// A session that parses on the calling thread.
    pub fn inline(factory: F, host: H, grammar: Arc<dyn Grammar>, config: &RenderConfig) -> Self {
        let guard = VersionGuard::new();
        let parser = InlineParser::new(grammar, &config.parser, guard.clone());
        Self::with_driver(factory, host, Box::new(parser), guard, config)
    }

    pub fn with_driver(
        factory: F,
        host: H,
        driver: Box<dyn ParseDriver>,
        guard: VersionGuard,
        config: &RenderConfig,
    ) -> Self {
        Self {
            factory,
            host,
            driver,
            guard,
            reconciler: Reconciler::new(config.reconcile.clone()),
            scheduler: RevealScheduler::new(config.reveal.clone()),
            tree: DisplayTree::default(),
            elements: Vec::new(),
            headings: Vec::new(),
            attachments: Vec::new(),
            resolved_headings: HashSet::new(),
            width: 0.0,
            size: Size::default(),
            state: StreamState::Idle,
            instant: false,
            held: false,
            final_applied: false,
            completion: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn reveal_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn tree(&self) -> &DisplayTree<F::Node> {
        &self.tree
    }

    pub fn headings(&self) -> &[TocEntry] {
        &self.headings
    }

    pub fn attachments(&self) -> &[MediaRef] {
        &self.attachments
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn version(&self) -> u64 {
        self.guard.current()
    }

    /// Start a new stream, abandoning whatever was shown before.
    pub fn begin_stream(&mut self) -> Result<(), Error> {
        let version = self.guard.bump();
        info!("begin stream v{}", version);

        self.scheduler.stop();
        self.state = StreamState::Streaming;
        self.instant = false;
        self.final_applied = false;
        self.completion = None;
        self.resolved_headings.clear();

        self.driver.send(ParseJob::Begin { version })
    }

    /// Feed streamed text. Starts a new stream when none is open.
    pub fn append_chunk(&mut self, text: &str) -> Result<(), Error> {
        match self.state {
            StreamState::Streaming => {}
            StreamState::Idle | StreamState::Complete | StreamState::Stopped => {
                self.begin_stream()?;
            }
            StreamState::Ending => {
                warn!("dropping {} bytes appended after end_stream", text.len());
                return Ok(());
            }
        }
        self.driver.send(ParseJob::Append(text.to_string()))
    }

    /// The stream is over. `completion` runs once the final parse has been
    /// applied and everything has been revealed.
    pub fn end_stream(&mut self, completion: impl FnOnce() + 'static) -> Result<(), Error> {
        match self.state {
            StreamState::Streaming => {}
            StreamState::Idle => self.begin_stream()?,
            StreamState::Ending | StreamState::Complete | StreamState::Stopped => {
                debug!("end_stream in {:?}, ignoring", self.state);
                return Ok(());
            }
        }

        self.state = StreamState::Ending;
        self.completion = Some(Box::new(completion));
        self.driver.send(ParseJob::Finish)
    }

    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    pub fn resume(&mut self) {
        self.scheduler.resume();
    }

    /// Cancel everything in flight and show what exists in full. Pending
    /// parse results are discarded and the completion never runs.
    pub fn stop(&mut self) {
        if self.state == StreamState::Stopped {
            return;
        }
        let version = self.guard.bump();
        info!("stream stopped (v{})", version);

        self.scheduler.stop();
        if self.completion.take().is_some() {
            debug!("dropping end_stream completion");
        }
        self.instant = true;
        self.state = StreamState::Stopped;
        reveal_all(&mut self.tree, &mut self.factory);
    }

    /// Replace the content with a complete document, shown without pacing.
    pub fn set_content(&mut self, text: &str) -> Result<(), Error> {
        let version = self.guard.bump();
        debug!("set content v{} ({} bytes)", version, text.len());

        self.scheduler.stop();
        self.completion = None;
        self.instant = true;
        self.final_applied = false;
        self.state = StreamState::Complete;

        self.driver.send(ParseJob::Reparse {
            text: text.to_string(),
            version,
        })
    }

    /// The host's layout width changed.
    pub fn set_width(&mut self, width: f32) -> Result<(), Error> {
        if width == self.width {
            return Ok(());
        }
        self.width = width;
        self.remeasure();

        let version = self.guard.bump();
        self.driver.send(ParseJob::Refresh { version })
    }

    pub fn mark_collapsible_interaction(&mut self, now: Instant) {
        self.reconciler.mark_collapsible_interaction(now);
    }

    /// The host finished rendering a block that was reported pending.
    pub fn complete_block(&mut self, token: RevealToken) -> bool {
        self.scheduler.complete_block(token)
    }

    /// Apply parse results and advance reveals. Returns when to poll next,
    /// or `None` when only new input or a block completion can change
    /// anything.
    #[profiling::function]
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        while let Some(update) = self.driver.try_recv() {
            if !self.guard.is_current(update.version) {
                debug!(
                    "discarding stale update v{} (current v{})",
                    update.version,
                    self.guard.current()
                );
                continue;
            }
            self.apply_update(update, now);
        }

        let mut hold = None;
        if self.held {
            match self.reconciler.hold_expires() {
                Some(until) if now < until => hold = Some(until),
                _ => {
                    debug!("collapsible hold expired, reconciling again");
                    self.reconcile(now);
                }
            }
        }

        let mut sink = TreeSink {
            tree: &mut self.tree,
            factory: &mut self.factory,
            drained: false,
        };
        let next = self.scheduler.poll(now, &mut sink);
        if sink.drained {
            self.host.reveal_drained();
        }

        self.check_complete();

        match (next, hold) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn apply_update(&mut self, update: ParseUpdate, now: Instant) {
        self.elements = update.elements;
        self.headings = update.headings;
        self.attachments = update.attachments;
        self.reconcile(now);

        if update.finished {
            self.final_applied = true;
        }
    }

    fn reconcile(&mut self, now: Instant) {
        let old = std::mem::take(&mut self.tree);
        let (tree, report) = self
            .reconciler
            .reconcile(old, &self.elements, &mut self.factory, now);
        self.tree = tree;
        self.held = self.reconciler.collapsibles_held(now);
        self.scheduler.forget(&report.destroyed_keys);

        if self.instant {
            reveal_all(&mut self.tree, &mut self.factory);
        } else {
            for &key in &report.built_keys {
                let Some(node) = self.tree.find_mut(key) else {
                    continue;
                };
                node.reveal = Reveal::Hidden;
                self.factory.apply_reveal(&mut node.handle, Reveal::Hidden);
                self.scheduler
                    .enqueue(RevealTask::for_element(key, &node.element, 0));
            }

            for &(key, visible) in &report.mutated_text {
                let Some(node) = self.tree.find_mut(key) else {
                    continue;
                };
                node.reveal = Reveal::Partial(visible);
                self.factory.apply_reveal(&mut node.handle, node.reveal);
                self.scheduler
                    .enqueue(RevealTask::for_element(key, &node.element, visible));
            }
        }

        self.remeasure();
        self.resolve_headings();
    }

    fn remeasure(&mut self) {
        let height = self
            .tree
            .elements()
            .map(|element| self.factory.measure(element, self.width).height)
            .sum::<f32>();
        let size = Size {
            width: self.width,
            height,
        };
        if size != self.size {
            self.size = size;
            self.host.size_changed(size);
        }
    }

    fn resolve_headings(&mut self) {
        let present = heading_anchors(self.tree.nodes());
        for heading in &self.headings {
            if self.resolved_headings.contains(&heading.id) || !present.contains(&heading.id) {
                continue;
            }
            self.resolved_headings.insert(heading.id.clone());
            self.host.heading_resolved(heading);
        }
    }

    fn check_complete(&mut self) {
        if self.state != StreamState::Ending
            || !self.final_applied
            || !self.scheduler.is_drained()
        {
            return;
        }

        info!("stream complete: {} elements", self.elements.len());
        self.state = StreamState::Complete;
        if let Some(completion) = self.completion.take() {
            completion();
        }
    }
}

fn reveal_all<F: ViewFactory>(tree: &mut DisplayTree<F::Node>, factory: &mut F) {
    for node in tree.nodes_mut() {
        if node.reveal != Reveal::Full {
            node.reveal = Reveal::Full;
            factory.apply_reveal(&mut node.handle, Reveal::Full);
        }
    }
}

/// Anchors of the top-level heading nodes, numbered the same way as the
/// document's heading list.
fn heading_anchors<N>(nodes: &[DisplayNode<N>]) -> HashSet<String> {
    unique_anchors(nodes.iter().filter_map(|node| match &node.element {
        Element::Heading { id, .. } => Some(id.as_str()),
        _ => None,
    }))
    .into_iter()
    .collect()
}

/// Routes scheduler progress to the displayed nodes.
struct TreeSink<'a, F: ViewFactory> {
    tree: &'a mut DisplayTree<F::Node>,
    factory: &'a mut F,
    drained: bool,
}

impl<F: ViewFactory> RevealSink for TreeSink<'_, F> {
    fn reveal(&mut self, key: NodeKey, reveal: Reveal) {
        if let Some(node) = self.tree.find_mut(key) {
            node.reveal = reveal;
            self.factory.apply_reveal(&mut node.handle, reveal);
        }
    }

    fn start_block(&mut self, key: NodeKey, token: RevealToken) -> BlockStart {
        match self.tree.find_mut(key) {
            Some(node) => self.factory.reveal_block(&mut node.handle, token),
            None => BlockStart::Done,
        }
    }

    fn drained(&mut self) {
        self.drained = true;
    }
}
