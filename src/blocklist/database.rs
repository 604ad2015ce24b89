//! Blocked-hostname database.
//!
//! Hostnames are stored as 64-bit hashes, which keeps membership O(1) and
//! memory bounded for lists with millions of entries. A rebuild folds every
//! configured source into a fresh set and swaps it in whole, so readers see
//! either the previous complete set or the next one.

use std::hash::Hasher;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rustc_hash::{FxHashSet, FxHasher};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::parser::{BlocklistRule, parse_line};
use super::source::{BlocklistSource, SourceReader, SourceState};

/// Per-hostname override applied after all sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostException {
    pub hostname: String,
    pub state: SourceState,
}

/// The published, immutable result of one rebuild.
#[derive(Default)]
struct Snapshot {
    blocked: FxHashSet<u64>,
    allowed: FxHashSet<u64>,
    /// Denied by a hostname exception; allow patterns do not apply.
    pinned: FxHashSet<u64>,
    deny_patterns: Vec<BlocklistRule>,
    allow_patterns: Vec<BlocklistRule>,
}

/// Hash a hostname the way the database stores it: ASCII-lowercased, without a trailing dot.
pub fn host_hash(host: &str) -> u64 {
    let host = host.strip_suffix('.').unwrap_or(host);
    let mut hasher = FxHasher::default();
    for b in host.bytes() {
        hasher.write_u8(b.to_ascii_lowercase());
    }
    hasher.finish()
}

/// Receives the effect of each parsed line during a rebuild.
trait Fold {
    fn deny(&mut self, host: &str);
    fn allow(&mut self, host: &str);
    fn pin(&mut self, host: &str);
    fn deny_pattern(&mut self, rule: BlocklistRule);
    fn allow_pattern(&mut self, rule: BlocklistRule);
}

impl Fold for Snapshot {
    fn deny(&mut self, host: &str) {
        let hash = host_hash(host);
        self.allowed.remove(&hash);
        self.blocked.insert(hash);
    }

    fn allow(&mut self, host: &str) {
        let hash = host_hash(host);
        self.blocked.remove(&hash);
        self.pinned.remove(&hash);
        self.allowed.insert(hash);
    }

    fn pin(&mut self, host: &str) {
        self.deny(host);
        self.pinned.insert(host_hash(host));
    }

    fn deny_pattern(&mut self, rule: BlocklistRule) {
        self.deny_patterns.push(rule);
    }

    fn allow_pattern(&mut self, rule: BlocklistRule) {
        self.allow_patterns.push(rule);
    }
}

/// Exact hostnames for a system hosts file. Patterns cannot be expressed there.
#[derive(Default)]
struct HostList {
    names: FxHashSet<String>,
    pinned: FxHashSet<String>,
    allow_patterns: Vec<BlocklistRule>,
}

impl HostList {
    /// Sorted names, minus those an allow pattern covers.
    fn into_sorted(self) -> Vec<String> {
        let Self {
            names,
            pinned,
            allow_patterns,
        } = self;
        let mut names: Vec<String> = names
            .into_iter()
            .filter(|name| pinned.contains(name) || !allow_patterns.iter().any(|rule| rule.matches(name)))
            .collect();
        names.sort_unstable();
        names
    }
}

impl Fold for HostList {
    fn deny(&mut self, host: &str) {
        self.names.insert(host.to_ascii_lowercase());
    }

    fn allow(&mut self, host: &str) {
        let host = host.to_ascii_lowercase();
        self.names.remove(&host);
        self.pinned.remove(&host);
    }

    fn pin(&mut self, host: &str) {
        let host = host.to_ascii_lowercase();
        self.names.insert(host.clone());
        self.pinned.insert(host);
    }

    fn deny_pattern(&mut self, _rule: BlocklistRule) {}

    fn allow_pattern(&mut self, rule: BlocklistRule) {
        self.allow_patterns.push(rule);
    }
}

struct Cancelled;

pub struct RuleDatabase {
    reader: Arc<dyn SourceReader>,
    sources: ArcSwap<Vec<BlocklistSource>>,
    exceptions: ArcSwap<Vec<HostException>>,
    snapshot: ArcSwap<Snapshot>,
    rebuild_lock: Mutex<()>,
    cancelled: AtomicBool,
}

impl RuleDatabase {
    pub fn new(reader: Arc<dyn SourceReader>) -> Self {
        Self {
            reader,
            sources: ArcSwap::from_pointee(Vec::new()),
            exceptions: ArcSwap::from_pointee(Vec::new()),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            rebuild_lock: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Replace the configured sources. Takes effect on the next rebuild.
    pub fn set_sources(&self, sources: Vec<BlocklistSource>) {
        self.sources.store(Arc::new(sources));
    }

    /// Replace the per-hostname exceptions. Takes effect on the next rebuild.
    pub fn set_exceptions(&self, exceptions: Vec<HostException>) {
        self.exceptions.store(Arc::new(exceptions));
    }

    /// Ask a running rebuild to stop. The published set is left untouched.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Number of blocked exact hostnames in the published set.
    pub fn len(&self) -> usize {
        self.snapshot.load().blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check a hostname against the last published set. Never blocks.
    pub fn is_blocked(&self, hostname: &str) -> bool {
        let snapshot = self.snapshot.load();
        let hash = host_hash(hostname);

        if snapshot.pinned.contains(&hash) {
            return true;
        }
        let denied = snapshot.blocked.contains(&hash)
            || (!snapshot.allowed.contains(&hash)
                && snapshot.deny_patterns.iter().any(|rule| rule.matches(hostname)));
        denied && !snapshot.allow_patterns.iter().any(|rule| rule.matches(hostname))
    }

    /// Rebuild from all sources and exceptions.
    ///
    /// In normal mode the new set is published and `None` is returned. In root
    /// mode nothing is published; the denied hostnames are returned sorted,
    /// ready for a system hosts file. Returns `None` without publishing if the
    /// rebuild is cancelled.
    pub fn initialize(&self, root_mode: bool) -> Option<Vec<String>> {
        // The guarded value is unit, so a poisoned lock carries no broken state.
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.cancelled.store(false, Ordering::Relaxed);

        let start = Instant::now();
        if root_mode {
            let mut hosts = HostList::default();
            self.fold(&mut hosts).ok()?;
            let names = hosts.into_sorted();
            info!(hosts = names.len(), elapsed_ms = start.elapsed().as_millis() as u64, "exported hosts");
            return Some(names);
        }

        let mut snapshot = Snapshot::default();
        if self.fold(&mut snapshot).is_err() {
            info!("blocklist rebuild cancelled, keeping previous set");
            return None;
        }
        info!(
            blocked = snapshot.blocked.len(),
            patterns = snapshot.deny_patterns.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "blocklist rebuilt"
        );
        self.snapshot.store(Arc::new(snapshot));
        None
    }

    fn fold(&self, acc: &mut impl Fold) -> Result<(), Cancelled> {
        let mut sources: Vec<BlocklistSource> = self.sources.load().as_ref().clone();
        // Allow sources go last so their exceptions win.
        sources.sort_by_key(|s| s.state);

        for source in sources.iter().filter(|s| s.state != SourceState::Ignore) {
            self.check_cancelled()?;
            let reader = match self.reader.open(source) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(source = %source.name, location = %source.location, error = %e, "skipping blocklist source");
                    continue;
                }
            };
            let lines = self.fold_source(source, reader, acc)?;
            info!(source = %source.name, lines, "read blocklist source");
        }

        for exception in self.exceptions.load().iter() {
            match exception.state {
                SourceState::Deny => acc.pin(&exception.hostname),
                SourceState::Allow => acc.allow(&exception.hostname),
                SourceState::Ignore => {}
            }
        }
        Ok(())
    }

    fn fold_source(
        &self,
        source: &BlocklistSource,
        mut reader: Box<dyn BufRead + Send>,
        acc: &mut impl Fold,
    ) -> Result<usize, Cancelled> {
        let mut line = String::new();
        let mut count = 0;

        loop {
            self.check_cancelled()?;
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(source = %source.name, error = %e, "read error, keeping lines read so far");
                    break;
                }
            }
            count += 1;

            let Some(rule) = parse_line(&line) else {
                continue;
            };
            match (rule, source.state) {
                (BlocklistRule::WhitelistDomain(host), _) => acc.allow(&host),
                (BlocklistRule::PlainDomain(host), SourceState::Deny) => acc.deny(&host),
                (BlocklistRule::PlainDomain(host), SourceState::Allow) => acc.allow(&host),
                (rule, SourceState::Deny) => acc.deny_pattern(rule),
                (rule, SourceState::Allow) => acc.allow_pattern(rule),
                (_, SourceState::Ignore) => {}
            }
        }
        Ok(count)
    }

    fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.cancelled.load(Ordering::Relaxed) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancel any rebuild in progress and run a fresh one in the background.
pub fn request_rebuild(db: &Arc<RuleDatabase>) -> JoinHandle<()> {
    db.cancel();
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        db.initialize(false);
    })
}

/// Rebuild the database now and then every `every`.
pub fn spawn_periodic_rebuild(db: Arc<RuleDatabase>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let db = Arc::clone(&db);
            if let Err(e) = tokio::task::spawn_blocking(move || db.initialize(false)).await {
                error!(error = %e, "blocklist rebuild task failed");
            }
        }
    })
}
