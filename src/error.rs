//! Error taxonomy shared across the crate.
//!
//! Every error here is contained by the component that produces it: a bad
//! packet is allowed through, a bad source is skipped, a bad rule entry is
//! rejected on its own.

use std::io;
use std::path::PathBuf;

/// Malformed or truncated packet headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("invalid {0}")]
    Invalid(&'static str),
    #[error("malformed tcp option kind {kind} at offset {offset}")]
    MalformedOption { kind: u8, offset: usize },
}

/// Headers that cannot be emitted in wire format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("options need {0} bytes, more than the header can hold")]
    OptionsTooLong(usize),
}

/// A blocklist source that could not be opened or read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A configuration snapshot that failed to load.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config unavailable: {0}")]
    Unavailable(String),
}

/// A single user-supplied rule entry that was rejected.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The external log sink refused a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("log sink: {0}")]
pub struct SinkError(pub String);
