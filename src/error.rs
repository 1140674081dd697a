//! Error taxonomy for the core (spec §7). All variants are fatal except
//! `Ignorable`, which is never constructed as an `Err` — ignorable
//! conditions are reported through `Diagnostics::ignorable` instead and
//! never abort a run.

use std::fmt;
use std::io;

/// The mark (commit/blob) a fatal error occurred at, when known. Surfaced in
/// the single final diagnostic line spec §7 requires.
pub type Mark = Option<u32>;

#[derive(Debug)]
pub enum CoreError {
    /// Malformed fast-export input.
    StreamParse { mark: Mark, detail: String },
    /// A commit's raw actions could not be canonicalized.
    Validation { mark: Mark, detail: String },
    /// An internal invariant was violated; this indicates a bug in the core.
    InvariantViolation { mark: Mark, detail: String },
    /// Filesystem failure while writing the archive tree or journal.
    Io {
        detail: String,
        source: io::Error,
    },
    /// Missing or invalid configuration at startup.
    Config { detail: String },
}

impl CoreError {
    pub fn stream_parse(mark: Mark, detail: impl Into<String>) -> Self {
        CoreError::StreamParse {
            mark,
            detail: detail.into(),
        }
    }

    pub fn validation(mark: Mark, detail: impl Into<String>) -> Self {
        CoreError::Validation {
            mark,
            detail: detail.into(),
        }
    }

    pub fn invariant(mark: Mark, detail: impl Into<String>) -> Self {
        CoreError::InvariantViolation {
            mark,
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        CoreError::Config {
            detail: detail.into(),
        }
    }

    /// Name of the error kind, for the final diagnostic line
    /// (`commit mark <N>: <kind>: <detail>`).
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::StreamParse { .. } => "StreamParse",
            CoreError::Validation { .. } => "ValidationError",
            CoreError::InvariantViolation { .. } => "InvariantViolation",
            CoreError::Io { .. } => "IOError",
            CoreError::Config { .. } => "ConfigError",
        }
    }

    pub fn mark(&self) -> Mark {
        match self {
            CoreError::StreamParse { mark, .. } => *mark,
            CoreError::Validation { mark, .. } => *mark,
            CoreError::InvariantViolation { mark, .. } => *mark,
            CoreError::Io { .. } | CoreError::Config { .. } => None,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::StreamParse { mark, detail } => {
                write_with_mark(f, "StreamParse", *mark, detail)
            }
            CoreError::Validation { mark, detail } => {
                write_with_mark(f, "ValidationError", *mark, detail)
            }
            CoreError::InvariantViolation { mark, detail } => {
                write_with_mark(f, "InvariantViolation", *mark, detail)
            }
            CoreError::Io { detail, .. } => write!(f, "IOError: {detail}"),
            CoreError::Config { detail } => write!(f, "ConfigError: {detail}"),
        }
    }
}

fn write_with_mark(f: &mut fmt::Formatter<'_>, kind: &str, mark: Mark, detail: &str) -> fmt::Result {
    match mark {
        Some(m) => write!(f, "{kind} at commit mark :{m}: {detail}"),
        None => write!(f, "{kind}: {detail}"),
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        CoreError::Io {
            detail: e.to_string(),
            source: e,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
