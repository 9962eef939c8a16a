use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::error;

/// Command line of `md-replay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayArgs {
    /// Markdown file to replay; stdin when unset
    pub input: Option<PathBuf>,

    /// Chars per simulated chunk
    pub chunk: usize,

    /// Delay between chunks, in milliseconds
    pub interval_ms: u64,

    pub config: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,

    /// Print the visible text after every chunk
    pub frames: bool,

    /// Group chunks into modules, overriding the config
    pub modules: bool,
}

impl Default for ReplayArgs {
    fn default() -> Self {
        Self {
            input: None,
            chunk: 4,
            interval_ms: 20,
            config: None,
            log_dir: None,
            frames: false,
            modules: false,
        }
    }
}

impl ReplayArgs {
    // parse arguments, return set of unrecognized args
    pub fn parse(args: &[String]) -> (Self, BTreeSet<String>) {
        let mut unrecognized_args = BTreeSet::new();
        let mut res = ReplayArgs::default();

        let mut i = 0;
        let len = args.len();
        while i < len {
            let arg = &args[i];

            if arg == "--chunk" {
                i += 1;
                match args.get(i).map(|s| s.parse::<usize>()) {
                    Some(Ok(n)) if n > 0 => res.chunk = n,
                    _ => error!("--chunk needs a positive number"),
                }
            } else if arg == "--interval-ms" {
                i += 1;
                match args.get(i).map(|s| s.parse::<u64>()) {
                    Some(Ok(ms)) => res.interval_ms = ms,
                    _ => error!("--interval-ms needs a number"),
                }
            } else if arg == "--config" {
                i += 1;
                let Some(path) = args.get(i) else {
                    error!("config argument missing?");
                    continue;
                };
                res.config = Some(PathBuf::from(path));
            } else if arg == "--log-dir" {
                i += 1;
                let Some(path) = args.get(i) else {
                    error!("log-dir argument missing?");
                    continue;
                };
                res.log_dir = Some(PathBuf::from(path));
            } else if arg == "--frames" {
                res.frames = true;
            } else if arg == "--modules" {
                res.modules = true;
            } else if !arg.starts_with("--") && res.input.is_none() {
                res.input = Some(PathBuf::from(arg));
            } else {
                unrecognized_args.insert(arg.clone());
            }

            i += 1;
        }

        (res, unrecognized_args)
    }
}
