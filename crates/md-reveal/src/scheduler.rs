//! Paced, cooperative reveal of newly displayed content.
//!
//! Time is explicit: the host calls [`RevealScheduler::poll`] with the
//! current instant and gets back the instant it should poll again, the same
//! way an immediate-mode UI asks for a repaint after a delay. Work that fell
//! due between two polls is replayed in order against its own due time, so
//! a late poll never looks like a stall.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::{Duration, Instant};

use md_stream::{extend_over_atomic, Element};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::config::RevealConfig;
use crate::tree::NodeKey;
use crate::view::{BlockStart, Reveal};

/// Correlates a started task with its completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevealToken(u64);

/// Character-by-character reveal of a text node.
#[derive(Debug, Clone, PartialEq)]
pub struct TextReveal {
    pub key: NodeKey,

    /// Chars already visible when the task starts
    pub from: usize,

    pub total: usize,

    /// Char ranges that appear in one step
    pub atomic: Vec<Range<usize>>,

    text: Vec<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevealTask {
    /// Shown in one go
    Whole { key: NodeKey },

    Text(TextReveal),

    /// Shown once the host reports it rendered
    Block { key: NodeKey },
}

impl RevealTask {
    /// The task that reveals `element`, with `from` chars already visible.
    pub fn for_element(key: NodeKey, element: &Element, from: usize) -> Self {
        match element {
            Element::Text(_) | Element::Heading { .. } | Element::CodeBlock { .. } => {
                match element.revealable_text() {
                    Some(text) => RevealTask::Text(TextReveal {
                        key,
                        from: from.min(text.len),
                        total: text.len,
                        atomic: text.atomic,
                        text: text.text.chars().collect(),
                    }),
                    None => RevealTask::Whole { key },
                }
            }
            Element::Image { .. } | Element::Formula { .. } | Element::Custom { .. } => {
                RevealTask::Block { key }
            }
            Element::Table { .. }
            | Element::List { .. }
            | Element::Quote { .. }
            | Element::Collapsible { .. }
            | Element::RawBlock { .. }
            | Element::Rule => RevealTask::Whole { key },
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            RevealTask::Whole { key } | RevealTask::Block { key } => *key,
            RevealTask::Text(text) => text.key,
        }
    }

    fn is_block_level(&self) -> bool {
        !matches!(self, RevealTask::Text(_))
    }
}

/// Where reveal progress lands.
pub trait RevealSink {
    fn reveal(&mut self, key: NodeKey, reveal: Reveal);

    fn start_block(&mut self, key: NodeKey, token: RevealToken) -> BlockStart;

    /// The queue ran empty while running.
    fn drained(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Now,
    At(Instant),

    /// Waiting on [`RevealScheduler::complete_block`] or the watchdog
    External,
}

struct Active {
    task: RevealTask,
    token: RevealToken,

    /// Chars shown so far, for text tasks
    pos: usize,

    block_done: bool,
}

/// FIFO, single-flight reveal queue.
pub struct RevealScheduler {
    config: RevealConfig,
    state: SchedulerState,
    queue: VecDeque<RevealTask>,
    active: Option<Active>,
    wake: Wake,
    watchdog: Option<Instant>,
    rearm_watchdog: bool,
    catch_up: bool,
    next_token: u64,
    rng: StdRng,
}

impl RevealScheduler {
    pub fn new(config: RevealConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            state: SchedulerState::Idle,
            queue: VecDeque::new(),
            active: None,
            wake: Wake::Now,
            watchdog: None,
            rearm_watchdog: false,
            catch_up: false,
            next_token: 0,
            rng,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.active.is_none()
    }

    pub fn queued(&self) -> usize {
        self.queue.len() + usize::from(self.active.is_some())
    }

    /// Queue a task. A text task for a node that already has one queued or
    /// running extends that task instead.
    pub fn enqueue(&mut self, task: RevealTask) {
        if let RevealTask::Text(text) = &task {
            if self.extend_text(text) {
                return;
            }
        }

        trace!("enqueue {:?}", task.key());
        self.queue.push_back(task);

        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Running;
            self.wake = Wake::Now;
        }
    }

    /// Queue one task per node, in order, from `(key, element, visible)`
    /// triples where `visible` is how many chars are already shown.
    pub fn enqueue_nodes<'a>(
        &mut self,
        nodes: impl IntoIterator<Item = (NodeKey, &'a Element, usize)>,
    ) {
        for (key, element, visible) in nodes {
            self.enqueue(RevealTask::for_element(key, element, visible));
        }
    }

    fn extend_text(&mut self, update: &TextReveal) -> bool {
        let apply = |text: &mut TextReveal| {
            text.total = update.total;
            text.atomic = update.atomic.clone();
            text.text = update.text.clone();
            text.from = text.from.min(update.total);
        };

        if let Some(active) = &mut self.active {
            if let RevealTask::Text(text) = &mut active.task {
                if text.key == update.key {
                    apply(text);
                    active.pos = active.pos.min(text.total);
                    return true;
                }
            }
        }

        for task in self.queue.iter_mut() {
            if let RevealTask::Text(text) = task {
                if text.key == update.key {
                    apply(text);
                    return true;
                }
            }
        }

        false
    }

    /// Drop every task of the given nodes, which no longer exist.
    pub fn forget(&mut self, keys: &[NodeKey]) {
        if keys.is_empty() {
            return;
        }
        self.queue.retain(|task| !keys.contains(&task.key()));
        if self
            .active
            .as_ref()
            .is_some_and(|active| keys.contains(&active.task.key()))
        {
            debug!("active reveal's node was destroyed");
            self.active = None;
            self.watchdog = None;
            self.wake = Wake::Now;
        }
    }

    /// Stop revealing but keep the queue and progress.
    pub fn pause(&mut self) {
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Paused;
        }
    }

    /// Continue after [`RevealScheduler::pause`], catching up quickly until
    /// the queue drains.
    pub fn resume(&mut self) {
        if self.state != SchedulerState::Paused {
            return;
        }
        self.state = SchedulerState::Running;
        self.catch_up = true;
        self.rearm_watchdog = true;
        if self.wake != Wake::External {
            self.wake = Wake::Now;
        }
    }

    /// Drop all queued and in-flight work. Calling it again does nothing.
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Idle && self.is_drained() {
            return;
        }
        debug!("reveal stopped with {} tasks outstanding", self.queued());
        self.queue.clear();
        self.active = None;
        self.state = SchedulerState::Idle;
        self.wake = Wake::Now;
        self.watchdog = None;
        self.catch_up = false;
    }

    /// The host finished rendering a block. Stale tokens are ignored.
    pub fn complete_block(&mut self, token: RevealToken) -> bool {
        match &mut self.active {
            Some(active) if active.token == token && !active.block_done => {
                active.block_done = true;
                self.wake = Wake::Now;
                true
            }
            _ => {
                debug!("ignoring stale reveal token {:?}", token);
                false
            }
        }
    }

    /// Run everything due at `now`. Returns when to poll next, or `None`
    /// when there is nothing to wait for.
    #[profiling::function]
    pub fn poll(&mut self, now: Instant, sink: &mut impl RevealSink) -> Option<Instant> {
        if self.rearm_watchdog {
            self.rearm_watchdog = false;
            if self.active.is_some() {
                self.watchdog = Some(now + self.config.watchdog());
            }
        }

        while self.state == SchedulerState::Running {
            let tick = match self.wake {
                Wake::Now => Some(now),
                Wake::At(at) => Some(at),
                Wake::External => None,
            };
            let watchdog = self.watchdog.filter(|_| self.active.is_some());

            let (at, stalled) = match (tick, watchdog) {
                (Some(tick), Some(watchdog)) if watchdog < tick => (watchdog, true),
                (Some(tick), _) => (tick, false),
                (None, Some(watchdog)) => (watchdog, true),
                (None, None) => return None,
            };

            if at > now {
                return Some(at);
            }

            if stalled {
                self.force_complete(at, sink);
            } else {
                self.tick(at, sink);
            }
        }

        None
    }

    fn tick(&mut self, at: Instant, sink: &mut impl RevealSink) {
        if let Some(active) = self.active.take() {
            self.advance(active, at, sink);
            return;
        }

        match self.queue.pop_front() {
            Some(task) => self.start(task, at, sink),
            None => {
                debug!("reveal queue drained");
                self.state = SchedulerState::Idle;
                self.catch_up = false;
                self.watchdog = None;
                self.wake = Wake::Now;
                sink.drained();
            }
        }
    }

    fn start(&mut self, task: RevealTask, at: Instant, sink: &mut impl RevealSink) {
        self.next_token += 1;
        let token = RevealToken(self.next_token);
        self.watchdog = Some(at + self.config.watchdog());

        let key = task.key();
        trace!("start reveal {:?} ({:?})", key, token);

        let text_from = match &task {
            RevealTask::Text(text) => Some(text.from.min(text.total)),
            _ => None,
        };
        let active = |task: RevealTask, pos: usize| Active {
            task,
            token,
            pos,
            block_done: false,
        };

        if let Some(pos) = text_from {
            sink.reveal(key, Reveal::Partial(pos));
            self.advance(active(task, pos), at, sink);
        } else if matches!(task, RevealTask::Block { .. })
            && sink.start_block(key, token) == BlockStart::Pending
        {
            self.active = Some(active(task, 0));
            self.wake = Wake::External;
        } else {
            sink.reveal(key, Reveal::Full);
            self.finish(&task, at);
        }
    }

    fn advance(&mut self, mut active: Active, at: Instant, sink: &mut impl RevealSink) {
        let key = active.task.key();

        if !matches!(active.task, RevealTask::Text(_)) {
            if matches!(active.task, RevealTask::Block { .. }) && !active.block_done {
                self.active = Some(active);
                self.wake = Wake::External;
            } else {
                sink.reveal(key, Reveal::Full);
                self.finish(&active.task, at);
            }
            return;
        }

        let step = self.config.chars_per_step.max(1) * self.speed() as usize;
        let (end, total, last) = match &active.task {
            RevealTask::Text(text) => {
                let end = extend_over_atomic((active.pos + step).min(text.total), &text.atomic)
                    .min(text.total);
                (end, text.total, text.text.get(end.saturating_sub(1)).copied())
            }
            _ => return,
        };

        if end >= total {
            sink.reveal(key, Reveal::Full);
            self.finish(&active.task, at);
            return;
        }

        sink.reveal(key, Reveal::Partial(end));
        let delay = self.delay_after(last);
        active.pos = end;
        self.active = Some(active);
        self.wake = Wake::At(at + delay);
        self.watchdog = Some(at + self.config.watchdog());
    }

    /// The watchdog fired: show the stalled task in full and move on.
    fn force_complete(&mut self, at: Instant, sink: &mut impl RevealSink) {
        self.watchdog = None;
        let Some(active) = self.active.take() else {
            return;
        };
        debug!(
            "reveal of {:?} stalled, forcing completion",
            active.task.key()
        );
        sink.reveal(active.task.key(), Reveal::Full);
        self.finish(&active.task, at);
    }

    fn finish(&mut self, task: &RevealTask, at: Instant) {
        self.active = None;
        let gap = task.is_block_level()
            && self
                .queue
                .front()
                .is_some_and(RevealTask::is_block_level);

        self.wake = if gap {
            Wake::At(at + self.config.element_gap() / self.speed())
        } else {
            Wake::At(at)
        };
    }

    fn speed(&self) -> u32 {
        if self.catch_up {
            self.config.catch_up_factor.max(1)
        } else {
            1
        }
    }

    fn delay_after(&mut self, last: Option<char>) -> Duration {
        let pause = match last {
            Some('.' | '!' | '?' | '。' | '！' | '？') => self.config.sentence_pause_ms,
            Some(',' | ';' | ':' | '，' | '；' | '：' | '、') => self.config.clause_pause_ms,
            _ => 0,
        };
        let jitter = if self.config.jitter_ms > 0 {
            self.rng.random_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.step_ms + pause + jitter) / self.speed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_stream::{Inline, StyledText};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(NodeKey, Reveal)>,
        blocks: Vec<RevealToken>,
        defer_blocks: bool,
        drained: usize,
    }

    impl RevealSink for Recorder {
        fn reveal(&mut self, key: NodeKey, reveal: Reveal) {
            self.events.push((key, reveal));
        }

        fn start_block(&mut self, _key: NodeKey, token: RevealToken) -> BlockStart {
            self.blocks.push(token);
            if self.defer_blocks {
                BlockStart::Pending
            } else {
                BlockStart::Done
            }
        }

        fn drained(&mut self) {
            self.drained += 1;
        }
    }

    fn config() -> RevealConfig {
        RevealConfig::default().without_jitter()
    }

    fn text_task(key: u64, text: &str) -> RevealTask {
        RevealTask::for_element(NodeKey(key), &Element::Text(StyledText::plain(text)), 0)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_text_reveals_in_steps() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();
        let t0 = Instant::now();

        scheduler.enqueue(text_task(1, "abcdefghijklmno"));
        assert_eq!(scheduler.state(), SchedulerState::Running);

        assert_eq!(scheduler.poll(t0, &mut sink), Some(t0 + ms(12)));
        assert_eq!(
            sink.events,
            vec![(NodeKey(1), Reveal::Partial(0)), (NodeKey(1), Reveal::Partial(6))]
        );

        assert_eq!(scheduler.poll(t0 + ms(12), &mut sink), Some(t0 + ms(24)));
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Partial(12))));

        assert_eq!(scheduler.poll(t0 + ms(24), &mut sink), None);
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Full)));
        assert_eq!(sink.drained, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_punctuation_pauses() {
        let mut scheduler = RevealScheduler::new(RevealConfig {
            chars_per_step: 3,
            ..config()
        });
        let mut sink = Recorder::default();
        let t0 = Instant::now();

        scheduler.enqueue(text_task(1, "Hi, y. Bye now"));

        // "Hi," ends on a clause separator
        assert_eq!(scheduler.poll(t0, &mut sink), Some(t0 + ms(42)));

        // "Hi, y." ends on a sentence terminator
        let next = scheduler.poll(t0 + ms(42), &mut sink);
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Partial(6))));
        assert_eq!(next, Some(t0 + ms(134)));

        let next = scheduler.poll(t0 + ms(134), &mut sink);
        assert_eq!(next, Some(t0 + ms(146)));
    }

    #[test]
    fn test_atomic_span_revealed_at_once() {
        let element = Element::Text(StyledText::new(vec![
            Inline::Text("ab".to_string()),
            Inline::Formula("x^2+y^2".to_string()),
            Inline::Text("cd".to_string()),
        ]));
        let mut scheduler = RevealScheduler::new(RevealConfig {
            chars_per_step: 1,
            ..config()
        });
        let mut sink = Recorder::default();
        scheduler.enqueue(RevealTask::for_element(NodeKey(1), &element, 0));

        // Far in the future: everything due is replayed in order
        scheduler.poll(Instant::now() + Duration::from_secs(60), &mut sink);

        let shown: Vec<usize> = sink
            .events
            .iter()
            .filter_map(|(_, r)| match r {
                Reveal::Partial(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec![0, 1, 2, 9, 10]);
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Full)));
    }

    #[test]
    fn test_fifo_with_gap_between_blocks() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();
        let t0 = Instant::now();

        scheduler.enqueue(RevealTask::Whole { key: NodeKey(1) });
        scheduler.enqueue(RevealTask::Whole { key: NodeKey(2) });
        scheduler.enqueue(text_task(3, "hi"));

        assert_eq!(scheduler.poll(t0, &mut sink), Some(t0 + ms(40)));
        assert_eq!(sink.events, vec![(NodeKey(1), Reveal::Full)]);

        assert_eq!(scheduler.poll(t0 + ms(40), &mut sink), None);
        assert_eq!(
            sink.events,
            vec![
                (NodeKey(1), Reveal::Full),
                (NodeKey(2), Reveal::Full),
                (NodeKey(3), Reveal::Partial(0)),
                (NodeKey(3), Reveal::Full),
            ]
        );
        assert_eq!(sink.drained, 1);
    }

    #[test]
    fn test_block_waits_for_its_token() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder {
            defer_blocks: true,
            ..Default::default()
        };
        let t0 = Instant::now();

        scheduler.enqueue(RevealTask::Block { key: NodeKey(1) });
        scheduler.enqueue(RevealTask::Whole { key: NodeKey(2) });

        // Only the watchdog is left to wait for
        assert_eq!(scheduler.poll(t0, &mut sink), Some(t0 + ms(4000)));
        assert!(sink.events.is_empty());

        let token = sink.blocks[0];
        assert!(!scheduler.complete_block(RevealToken(999)), "stale token");
        assert!(scheduler.complete_block(token));

        scheduler.poll(t0 + ms(5), &mut sink);
        assert_eq!(sink.events, vec![(NodeKey(1), Reveal::Full)]);

        scheduler.poll(t0 + ms(45), &mut sink);
        assert_eq!(sink.events.last(), Some(&(NodeKey(2), Reveal::Full)));
        assert!(!scheduler.complete_block(token), "already completed");
    }

    #[test]
    fn test_watchdog_unsticks_stalled_block() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder {
            defer_blocks: true,
            ..Default::default()
        };
        let t0 = Instant::now();

        scheduler.enqueue(RevealTask::Block { key: NodeKey(1) });
        scheduler.poll(t0, &mut sink);
        assert_eq!(scheduler.poll(t0 + ms(3999), &mut sink), Some(t0 + ms(4000)));

        assert_eq!(scheduler.poll(t0 + ms(4000), &mut sink), None);
        assert_eq!(sink.events, vec![(NodeKey(1), Reveal::Full)]);
        assert_eq!(sink.drained, 1);
    }

    #[test]
    fn test_pause_and_catch_up() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();
        let t0 = Instant::now();
        let long = "x".repeat(200);

        scheduler.enqueue(text_task(1, &long));
        scheduler.poll(t0, &mut sink);
        scheduler.pause();
        assert_eq!(scheduler.poll(t0 + ms(500), &mut sink), None);
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Partial(6))));

        scheduler.resume();
        let next = scheduler.poll(t0 + ms(500), &mut sink);
        assert_eq!(sink.events.last(), Some(&(NodeKey(1), Reveal::Partial(66))));
        assert_eq!(next, Some(t0 + ms(500) + Duration::from_micros(1200)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();
        let t0 = Instant::now();

        scheduler.enqueue(text_task(1, &"y".repeat(100)));
        scheduler.enqueue(RevealTask::Whole { key: NodeKey(2) });
        scheduler.poll(t0, &mut sink);

        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.is_drained());
        assert_eq!(scheduler.poll(t0 + ms(100), &mut sink), None);
        assert_eq!(sink.drained, 0, "stopping is not draining");
    }

    #[test]
    fn test_text_task_is_extended() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();

        scheduler.enqueue(text_task(1, "short"));
        scheduler.enqueue(text_task(1, "short, now longer"));
        assert_eq!(scheduler.queued(), 1);

        scheduler.poll(Instant::now() + Duration::from_secs(1), &mut sink);
        let partials = sink
            .events
            .iter()
            .filter(|(_, r)| matches!(r, Reveal::Partial(_)))
            .count();
        assert_eq!(partials, 3, "0, 6 and 12 of 17 chars");
    }

    #[test]
    fn test_forget_drops_destroyed_nodes() {
        let mut scheduler = RevealScheduler::new(config());
        let mut sink = Recorder::default();

        scheduler.enqueue(RevealTask::Whole { key: NodeKey(1) });
        scheduler.enqueue(RevealTask::Whole { key: NodeKey(2) });
        scheduler.forget(&[NodeKey(1)]);

        scheduler.poll(Instant::now(), &mut sink);
        assert_eq!(sink.events, vec![(NodeKey(2), Reveal::Full)]);
    }

    #[test]
    fn test_task_kinds() {
        let key = NodeKey(1);
        let image = Element::Image {
            source: "a.png".to_string(),
            alt: String::new(),
        };
        assert_eq!(RevealTask::for_element(key, &image, 0), RevealTask::Block { key });
        assert_eq!(RevealTask::for_element(key, &Element::Rule, 0), RevealTask::Whole { key });

        let code = Element::CodeBlock {
            language: None,
            raw: "let x;\n".to_string(),
        };
        assert!(matches!(
            RevealTask::for_element(key, &code, 3),
            RevealTask::Text(TextReveal { from: 3, total: 7, .. })
        ));
    }
}
