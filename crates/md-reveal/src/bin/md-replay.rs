//! Replays a markdown file as a simulated token stream through a full
//! session and prints what ends up on screen.

use std::cell::Cell;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use md_reveal::{
    render_visible, setup_logging, Error, HostNotifier, RenderConfig, ReplayArgs, Size,
    StreamSession, StreamState, TranscriptView,
};
use md_stream::{MarkdownGrammar, SimulatedStream, SpanPatterns, TocEntry};
use tracing::{debug, error, info, warn};

/// Idle wait while the worker may still be parsing.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// How long to wait for the reveal to finish after the last chunk.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct ReplayHost;

impl HostNotifier for ReplayHost {
    fn size_changed(&mut self, size: Size) {
        debug!("content height {:.0}", size.height);
    }

    fn reveal_drained(&mut self) {
        debug!("reveal caught up");
    }

    fn heading_resolved(&mut self, heading: &TocEntry) {
        info!("heading #{} ready: {}", heading.id, heading.title);
    }
}

type Session = StreamSession<TranscriptView, ReplayHost>;

/// Poll until `deadline`, sleeping until whatever the session asks for.
fn pump(session: &mut Session, deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            session.poll(now);
            return;
        }
        let wake = session
            .poll(now)
            .unwrap_or(now + IDLE_POLL)
            .min(deadline);
        thread::sleep(wake.saturating_duration_since(Instant::now()));
    }
}

/// Pump until the end-of-stream completion has run.
fn drain(session: &mut Session, done: &Cell<bool>, timeout: Duration) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    while !done.get() {
        if session.state() != StreamState::Ending {
            return Err(Error::Incomplete(format!("stream is {:?}", session.state())));
        }
        if Instant::now() >= deadline {
            return Err(Error::Incomplete(format!("still revealing after {timeout:?}")));
        }
        pump(session, Instant::now() + IDLE_POLL);
    }
    Ok(())
}

fn read_input(args: &ReplayArgs) -> Result<String, Error> {
    match &args.input {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn run(args: ReplayArgs) -> Result<(), Error> {
    let mut config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    }
    .with_env_overrides()?;
    if args.modules {
        config.parser.modules = true;
    }

    let text = read_input(&args)?;
    info!(
        "replaying {} bytes in chunks of {} chars",
        text.len(),
        args.chunk
    );

    let mut session = Session::new(
        TranscriptView::new(),
        ReplayHost,
        Arc::new(MarkdownGrammar::new()),
        &config,
    )?;
    session.set_width(640.0)?;

    let started = Instant::now();
    let interval = Duration::from_millis(args.interval_ms);
    for chunk in SimulatedStream::new(text, &SpanPatterns::new(), args.chunk) {
        session.append_chunk(&chunk)?;
        pump(&mut session, Instant::now() + interval);

        if args.frames {
            println!("{}\n----", render_visible(session.tree()));
        }
    }

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    session.end_stream(move || flag.set(true))?;
    drain(&mut session, &done, DRAIN_TIMEOUT)?;

    let view = session.factory();
    info!(
        "done in {:?}: {} builds, {} updates, {} destroyed",
        started.elapsed(),
        view.builds,
        view.updates,
        view.destroyed
    );

    println!("{}", render_visible(session.tree()));
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (args, unrecognized) = ReplayArgs::parse(&args);

    // flushes the log file when dropped
    let guard = setup_logging(args.log_dir.as_deref());

    if !unrecognized.is_empty() {
        warn!("ignoring unrecognized args: {:?}", unrecognized);
    }

    if let Err(err) = run(args) {
        error!("replay failed: {err}");
        drop(guard);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::inline(
            TranscriptView::new(),
            ReplayHost,
            Arc::new(MarkdownGrammar::new()),
            &RenderConfig::default(),
        )
    }

    fn ended(session: &mut Session) -> Rc<Cell<bool>> {
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        session.append_chunk("a paragraph that takes a while to reveal\n\n").unwrap();
        session.end_stream(move || flag.set(true)).unwrap();
        done
    }

    #[test]
    fn test_drain_completes() {
        let mut session = session();
        let done = ended(&mut session);

        drain(&mut session, &done, Duration::from_secs(10)).unwrap();
        assert!(done.get());
        assert_eq!(session.state(), StreamState::Complete);
    }

    #[test]
    fn test_drain_gives_up_when_stopped() {
        let mut session = session();
        let done = ended(&mut session);
        session.stop();

        let err = drain(&mut session, &done, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, Error::Incomplete(_)));
        assert!(!done.get());
    }

    #[test]
    fn test_drain_times_out() {
        let mut session = session();
        let done = ended(&mut session);

        let err = drain(&mut session, &done, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Incomplete(_)));
    }
}
