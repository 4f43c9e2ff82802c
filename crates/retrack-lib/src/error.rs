use std::fmt;
use thiserror::Error;

/// Why a time policy resolved to zero usable samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyTimeReason {
    NoMatchingTriggers,
    TriggersExcludeEverything,
    IntervalBelowOneSample,
}

impl fmt::Display for EmptyTimeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EmptyTimeReason::NoMatchingTriggers => "no trigger matched the keep list",
            EmptyTimeReason::TriggersExcludeEverything => "excluded triggers cover the whole file",
            EmptyTimeReason::IntervalBelowOneSample => "interval shorter than one sample",
        };
        f.write_str(text)
    }
}

/// Everything that can stop a file from being reprocessed.
///
/// `InvalidParameters` is raised before any I/O; the remaining variants
/// abort the current file only and a batch continues with the next one.
#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("channel selection resolved to no channels")]
    EmptySelection,
    #[error("time range resolved to no samples: {0}")]
    EmptyTimeRange(EmptyTimeReason),
    #[error("{format} output requires a sampling frequency and none could be resolved")]
    MissingSamplingFrequency { format: &'static str },
    #[error("malformed tracks file: {0}")]
    Format(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReprocessError>;
