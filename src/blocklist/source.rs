//! Blocklist sources and how to open them.

use std::fmt;
use std::fs::File;
use std::hash::BuildHasher;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rustc_hash::FxBuildHasher;
use serde::Deserialize;

use crate::error::SourceError;

/// What a source contributes to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Deny,
    Ignore,
    Allow,
}

/// Where a source's lines come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocation {
    /// A file on local storage.
    File(PathBuf),
    /// A remote list, read from the copy a downloader left in the cache directory.
    Remote(String),
    /// A platform content handle; only readable through a platform reader.
    ContentUri(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlocklistSource {
    pub name: String,
    pub location: SourceLocation,
    pub state: SourceState,
}

impl BlocklistSource {
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>, state: SourceState) -> Self {
        Self {
            name: name.into(),
            location: SourceLocation::File(path.into()),
            state,
        }
    }

    pub fn remote(name: impl Into<String>, url: impl Into<String>, state: SourceState) -> Self {
        Self {
            name: name.into(),
            location: SourceLocation::Remote(url.into()),
            state,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::File(p) => write!(f, "{}", p.display()),
            SourceLocation::Remote(url) | SourceLocation::ContentUri(url) => write!(f, "{url}"),
        }
    }
}

/// Opens a line-oriented reader for a source.
pub trait SourceReader: Send + Sync {
    fn open(&self, source: &BlocklistSource) -> Result<Box<dyn BufRead + Send>, SourceError>;
}

/// Reads local files and cached downloads from the filesystem.
#[derive(Debug, Clone)]
pub struct FsSourceReader {
    cache_dir: PathBuf,
}

impl FsSourceReader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Where the downloaded copy of `url` is expected.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let hash = FxBuildHasher.hash_one(url);
        self.cache_dir.join(format!("{hash:016x}.txt"))
    }

    fn open_path(path: &Path) -> Result<Box<dyn BufRead + Send>, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

impl SourceReader for FsSourceReader {
    fn open(&self, source: &BlocklistSource) -> Result<Box<dyn BufRead + Send>, SourceError> {
        match &source.location {
            SourceLocation::File(path) => Self::open_path(path),
            SourceLocation::Remote(url) => Self::open_path(&self.cache_path(url)),
            SourceLocation::ContentUri(uri) => Err(SourceError::Unavailable(format!(
                "content uri {uri} needs a platform reader"
            ))),
        }
    }
}
