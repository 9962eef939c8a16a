use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "md_reveal=info,md_stream=info";

/// Where log files go when no directory is given.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|pb| pb.join("md-reveal").join("logs"))
}

/// Install the global subscriber: stdout, plus a daily rolling file when
/// `log_dir` is set. Keep the returned guard alive for the whole program
/// or buffered file output is lost.
pub fn setup_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let Some(log_dir) = log_dir else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    use tracing_appender::{
        non_blocking,
        rolling::{RollingFileAppender, Rotation},
    };

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        format!("md-replay-{}.log", env!("CARGO_PKG_VERSION")),
    );
    let (non_blocking_writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stdout);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Some(guard)
}
