//! Blocklist line parsing.
//!
//! Accepts hosts files, plain domain lists, AdBlock-style `||domain^` rules,
//! DNSmasq `address=/domain/` lines, `/regex/` lines and bare Pi-hole
//! regexes. Each line is classified into a [`BlocklistRule`].

use std::fmt;
use std::net::IpAddr;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::RuleError;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Characters that only show up in a line meant as a regular expression.
const REGEX_METACHARS: &[char] = &['^', '$', '(', ')', '[', ']', '{', '}', '+', '?', '\\', '|'];

/// Addresses hosts files use to sink a name.
const SINK_ADDRESSES: &[&str] = &["127.0.0.1", "0.0.0.0", "::1", "::"];

/// Names a stock hosts file maps to loopback; never treated as blocked.
const LOOPBACK_NAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
];

#[derive(Clone)]
pub enum BlocklistRule {
    PlainDomain(String),
    WildcardDomain { pattern: String, matcher: Regex },
    RegexPattern { pattern: String, matcher: Regex },
    WhitelistDomain(String),
}

impl BlocklistRule {
    /// The domain or pattern text the rule was built from.
    pub fn pattern(&self) -> &str {
        match self {
            BlocklistRule::PlainDomain(domain) | BlocklistRule::WhitelistDomain(domain) => domain,
            BlocklistRule::WildcardDomain { pattern, .. }
            | BlocklistRule::RegexPattern { pattern, .. } => pattern,
        }
    }

    /// Whether `host` is covered by this rule. Case-insensitive.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.strip_suffix('.').unwrap_or(host);
        match self {
            BlocklistRule::PlainDomain(domain) | BlocklistRule::WhitelistDomain(domain) => {
                domain.eq_ignore_ascii_case(host)
            }
            BlocklistRule::WildcardDomain { matcher, .. }
            | BlocklistRule::RegexPattern { matcher, .. } => matcher.is_match(host),
        }
    }
}

impl PartialEq for BlocklistRule {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.pattern() == other.pattern()
    }
}

impl Eq for BlocklistRule {}

impl fmt::Debug for BlocklistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlocklistRule::PlainDomain(d) => f.debug_tuple("PlainDomain").field(d).finish(),
            BlocklistRule::WildcardDomain { pattern, .. } => {
                f.debug_tuple("WildcardDomain").field(pattern).finish()
            }
            BlocklistRule::RegexPattern { pattern, .. } => {
                f.debug_tuple("RegexPattern").field(pattern).finish()
            }
            BlocklistRule::WhitelistDomain(d) => f.debug_tuple("WhitelistDomain").field(d).finish(),
        }
    }
}

/// Parse one line of a blocklist.
///
/// Comments, blank lines and anything that fails validation yield `None`;
/// a bad line never aborts loading the rest of the list.
pub fn parse_line(line: &str) -> Option<BlocklistRule> {
    match classify(line) {
        Ok(rule) => rule,
        Err(e) => {
            debug!(line, error = %e, "skipping blocklist line");
            None
        }
    }
}

/// Parse a single user-supplied entry, reporting why it was rejected.
pub fn parse_entry(line: &str) -> Result<BlocklistRule, RuleError> {
    classify(line)?.ok_or_else(|| RuleError::InvalidDomain(line.trim().to_string()))
}

/// `Ok(None)` for comments and blank lines, `Err` for lines that look like
/// rules but do not validate.
fn classify(line: &str) -> Result<Option<BlocklistRule>, RuleError> {
    let line = line.trim();
    let Some(first) = line.chars().next() else {
        return Ok(None);
    };

    match first {
        '#' | '!' => Ok(None),
        '@' => match line.strip_prefix("@@||") {
            Some(rest) => {
                let domain = adblock_domain(rest);
                if !is_valid_domain(domain) {
                    return Err(RuleError::InvalidDomain(domain.to_string()));
                }
                Ok(Some(BlocklistRule::WhitelistDomain(domain.to_ascii_lowercase())))
            }
            None => Err(RuleError::InvalidDomain(line.to_string())),
        },
        '|' => match line.strip_prefix("||") {
            Some(rest) => domain_or_wildcard(adblock_domain(rest)).map(Some),
            None => Err(RuleError::InvalidDomain(line.to_string())),
        },
        '/' if line.len() > 2 && line.ends_with('/') => {
            compile_regex(&line[1..line.len() - 1]).map(Some)
        }
        'a' if line.starts_with("address=/") => {
            let rest = &line["address=/".len()..];
            let domain = rest.split('/').next().unwrap_or(rest);
            domain_or_wildcard(domain.trim_start_matches('.')).map(Some)
        }
        _ => classify_generic(line).map(Some),
    }
}

fn classify_generic(line: &str) -> Result<BlocklistRule, RuleError> {
    let has_hosts_structure = line.contains(char::is_whitespace);

    if !has_hosts_structure && line.contains(REGEX_METACHARS) {
        // Bare Pi-hole regex; on failure let the other formats have a go.
        if let Ok(rule) = compile_regex(line) {
            return Ok(rule);
        }
    }

    if !has_hosts_structure && line.contains('*') {
        return wildcard(line);
    }

    hosts_line(line)
}

fn hosts_line(line: &str) -> Result<BlocklistRule, RuleError> {
    let content = line.split('#').next().unwrap_or(line);
    let mut tokens = content.split_whitespace();
    let first = tokens.next().unwrap_or_default();

    let host = if SINK_ADDRESSES.contains(&first) {
        tokens.next().unwrap_or_default()
    } else {
        first
    };

    if host.contains('*') {
        return wildcard(host);
    }
    if LOOPBACK_NAMES.contains(&host) || host.parse::<IpAddr>().is_ok() || !is_valid_domain(host) {
        return Err(RuleError::InvalidDomain(host.to_string()));
    }
    Ok(BlocklistRule::PlainDomain(host.to_ascii_lowercase()))
}

/// Domain part of an AdBlock rule body: everything before `^`, `$` or `/`.
fn adblock_domain(rest: &str) -> &str {
    let end = rest.find(['^', '$', '/']).unwrap_or(rest.len());
    &rest[..end]
}

fn domain_or_wildcard(domain: &str) -> Result<BlocklistRule, RuleError> {
    if domain.contains('*') {
        return wildcard(domain);
    }
    if !is_valid_domain(domain) {
        return Err(RuleError::InvalidDomain(domain.to_string()));
    }
    Ok(BlocklistRule::PlainDomain(domain.to_ascii_lowercase()))
}

fn wildcard(pattern: &str) -> Result<BlocklistRule, RuleError> {
    if !is_valid_wildcard(pattern) {
        return Err(RuleError::InvalidDomain(pattern.to_string()));
    }
    let pattern = pattern.to_ascii_lowercase();
    let matcher = RegexBuilder::new(&glob_to_regex(&pattern))
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleError::InvalidRegex {
            pattern: pattern.clone(),
            source,
        })?;
    Ok(BlocklistRule::WildcardDomain { pattern, matcher })
}

fn compile_regex(pattern: &str) -> Result<BlocklistRule, RuleError> {
    let matcher = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
    Ok(BlocklistRule::RegexPattern {
        pattern: pattern.to_string(),
        matcher,
    })
}

/// `*.ads.example` becomes `^.*\.ads\.example$`.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '.' => out.push_str("\\."),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

/// Hostname validity shared by every line format.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }
    if domain == "localhost" {
        return true;
    }
    if !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// A wildcard is valid when it is a valid domain with `*` standing in for a label character.
pub fn is_valid_wildcard(pattern: &str) -> bool {
    pattern.contains('*') && is_valid_domain(&pattern.replace('*', "a"))
}
