//! Hostname blocklists: line parsing, sources and the compiled database.

pub mod database;
pub mod parser;
pub mod source;

pub use database::{HostException, RuleDatabase, host_hash, request_rebuild, spawn_periodic_rebuild};
pub use parser::{BlocklistRule, parse_entry, parse_line};
pub use source::{BlocklistSource, FsSourceReader, SourceLocation, SourceReader, SourceState};
