/// Errors reported by a [`crate::Grammar`] implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("grammar rejected input: {0}")]
    Rejected(String),
}

/// Parser related errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The grammar failed on the region `[start, end)` of the buffer.
    /// The cursor was not advanced; the region is retried on the next chunk.
    #[error("grammar failed on {start}..{end}: {source}")]
    Grammar {
        start: usize,
        end: usize,
        #[source]
        source: GrammarError,
    },

    #[error("stream already finished")]
    Finished,
}

impl Error {
    pub fn grammar(start: usize, end: usize, source: GrammarError) -> Self {
        Error::Grammar { start, end, source }
    }
}
