use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures::{Stream, StreamExt};
use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blocklist::parser::{glob_to_regex, is_valid_domain, is_valid_wildcard};
use crate::dns::DnsModel;
use crate::error::RuleError;
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

/// A user-managed domain entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomain {
    pub domain: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub is_allowlist: bool,
}

impl CustomDomain {
    /// Validate an entry before it is stored.
    pub fn new(domain: &str, is_regex: bool, is_allowlist: bool) -> Result<Self, RuleError> {
        let domain = domain.trim();
        let entry = Self {
            domain: if is_regex {
                domain.to_string()
            } else {
                domain.to_ascii_lowercase()
            },
            is_regex,
            is_allowlist,
        };
        entry.matcher()?;
        Ok(entry)
    }

    fn matcher(&self) -> Result<Option<Regex>, RuleError> {
        let pattern = if self.is_regex {
            self.domain.clone()
        } else if self.domain.contains('*') {
            if !is_valid_wildcard(&self.domain) {
                return Err(RuleError::InvalidDomain(self.domain.clone()));
            }
            glob_to_regex(&self.domain)
        } else {
            if !is_valid_domain(&self.domain) {
                return Err(RuleError::InvalidDomain(self.domain.clone()));
            }
            return Ok(None);
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map(Some)
            .map_err(|source| RuleError::InvalidRegex {
                pattern: self.domain.clone(),
                source,
            })
    }
}

/// Exact names match themselves and every subdomain.
#[derive(Debug, Default)]
struct DomainSet {
    exact: FxHashSet<String>,
    patterns: Vec<Regex>,
}

impl DomainSet {
    fn build<'a>(entries: impl IntoIterator<Item = &'a CustomDomain>) -> Self {
        let mut set = DomainSet::default();
        for entry in entries {
            match entry.matcher() {
                Ok(Some(regex)) => set.patterns.push(regex),
                Ok(None) => {
                    set.exact.insert(entry.domain.trim_end_matches('.').to_ascii_lowercase());
                }
                Err(e) => warn!(error = %e, "skipping custom domain"),
            }
        }
        set
    }

    fn matches(&self, host: &str) -> bool {
        let mut suffix = host;
        loop {
            if self.exact.contains(suffix) {
                return true;
            }
            match suffix.split_once('.') {
                Some((_, rest)) => suffix = rest,
                None => break,
            }
        }
        self.patterns.iter().any(|re| re.is_match(host))
    }
}

/// User blocklist and allowlist for DNS queries.
///
/// A blocklist hit yields [`Verdict::DnsBlocked`]; an allowlist hit then
/// yields [`Verdict::Accept`], overriding anything before it in the DNS stage.
#[derive(Default)]
pub struct CustomDomainRule {
    blocklist: ArcSwapOption<DomainSet>,
    allowlist: ArcSwapOption<DomainSet>,
}

impl CustomDomainRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both lists from a mixed set of entries.
    pub fn update(&self, entries: &[CustomDomain]) {
        let (allow, block): (Vec<_>, Vec<_>) = entries.iter().partition(|e| e.is_allowlist);
        self.blocklist.store(Some(Arc::new(DomainSet::build(block))));
        self.allowlist.store(Some(Arc::new(DomainSet::build(allow))));
    }

    pub fn set_blocklist(&self, entries: &[CustomDomain]) {
        self.blocklist.store(Some(Arc::new(DomainSet::build(entries))));
    }

    pub fn set_allowlist(&self, entries: &[CustomDomain]) {
        self.allowlist.store(Some(Arc::new(DomainSet::build(entries))));
    }
}

impl FirewallRule for CustomDomainRule {
    fn name(&self) -> &'static str {
        "custom-domain"
    }

    fn stage(&self) -> Stage {
        Stage::Dns
    }

    fn check(&self, _packet: &mut FirewallPacket, dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        let Some(dns) = dns else {
            return verdict;
        };
        let host = dns.domain.as_str();
        let mut next = verdict;

        if let Some(block) = &*self.blocklist.load() {
            if block.matches(host) {
                debug!(domain = host, "custom blocklist hit");
                next = Verdict::DnsBlocked;
            }
        }
        if let Some(allow) = &*self.allowlist.load() {
            if allow.matches(host) {
                debug!(domain = host, "custom allowlist hit");
                next = Verdict::Accept;
            }
        }
        next
    }
}

/// Follow the user's blocklist and allowlist streams until both end.
pub fn watch_custom_domains<B, A>(rule: Arc<CustomDomainRule>, blocklist: B, allowlist: A) -> JoinHandle<()>
where
    B: Stream<Item = Vec<CustomDomain>> + Send + 'static,
    A: Stream<Item = Vec<CustomDomain>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut blocklist = std::pin::pin!(blocklist.fuse());
        let mut allowlist = std::pin::pin!(allowlist.fuse());
        loop {
            tokio::select! {
                Some(entries) = blocklist.next() => rule.set_blocklist(&entries),
                Some(entries) = allowlist.next() => rule.set_allowlist(&entries),
                else => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::rules::testing::{query, tcp_to};
    use std::net::Ipv4Addr;

    fn entry(domain: &str, is_regex: bool, is_allowlist: bool) -> CustomDomain {
        CustomDomain::new(domain, is_regex, is_allowlist).unwrap()
    }

    fn check(rule: &CustomDomainRule, domain: &str, verdict: Verdict) -> Verdict {
        let mut packet = tcp_to(Ipv4Addr::new(1, 1, 1, 1), 53);
        rule.check(&mut packet, Some(&query(domain)), verdict)
    }

    #[test]
    fn blocklist_matches_exact_and_subdomains() {
        let rule = CustomDomainRule::new();
        rule.update(&[entry("tracker.example.com", false, false)]);

        assert_eq!(check(&rule, "tracker.example.com", Verdict::Accept), Verdict::DnsBlocked);
        assert_eq!(check(&rule, "eu.tracker.example.com", Verdict::Accept), Verdict::DnsBlocked);
        assert_eq!(check(&rule, "example.com", Verdict::Accept), Verdict::Accept);
        assert_eq!(check(&rule, "nottracker.example.com", Verdict::Accept), Verdict::Accept);
    }

    #[test]
    fn allowlist_wins_over_blocklist() {
        let rule = CustomDomainRule::new();
        rule.update(&[
            entry("example.com", false, false),
            entry("good.example.com", false, true),
        ]);

        assert_eq!(check(&rule, "ads.example.com", Verdict::Accept), Verdict::DnsBlocked);
        assert_eq!(check(&rule, "good.example.com", Verdict::Accept), Verdict::Accept);
        // Overrides an earlier drop from the blocklist database as well.
        assert_eq!(check(&rule, "good.example.com", Verdict::Drop), Verdict::Accept);
    }

    #[test]
    fn no_match_passes_prior_verdict_through() {
        let rule = CustomDomainRule::new();
        assert_eq!(check(&rule, "ads.example.com", Verdict::Drop), Verdict::Drop);
        rule.update(&[entry("other.example.org", false, false)]);
        assert_eq!(check(&rule, "ads.example.com", Verdict::Drop), Verdict::Drop);

        let mut packet = tcp_to(Ipv4Addr::new(1, 1, 1, 1), 443);
        assert_eq!(rule.check(&mut packet, None, Verdict::Accept), Verdict::Accept);
    }

    #[test]
    fn regex_and_wildcard_entries() {
        let rule = CustomDomainRule::new();
        rule.update(&[
            entry(r"^ad[0-9]+\.", true, false),
            entry("*.metrics.example.net", false, false),
        ]);
        assert_eq!(check(&rule, "ad12.example.com", Verdict::Accept), Verdict::DnsBlocked);
        assert_eq!(check(&rule, "eu.metrics.example.net", Verdict::Accept), Verdict::DnsBlocked);
        assert_eq!(check(&rule, "metrics.example.net", Verdict::Accept), Verdict::Accept);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(matches!(
            CustomDomain::new("not a domain", false, false),
            Err(RuleError::InvalidDomain(_))
        ));
        assert!(matches!(
            CustomDomain::new("(unclosed", true, false),
            Err(RuleError::InvalidRegex { .. })
        ));
        assert!(CustomDomain::new("Example.COM", false, true).is_ok());
    }

    #[tokio::test]
    async fn watch_follows_both_streams() {
        let rule = Arc::new(CustomDomainRule::new());
        let block = futures::stream::iter(vec![vec![entry("ads.example.com", false, false)]]);
        let allow = futures::stream::iter(vec![
            vec![],
            vec![entry("ads.example.com", false, true)],
        ]);
        watch_custom_domains(Arc::clone(&rule), block, allow).await.unwrap();

        assert_eq!(check(&rule, "ads.example.com", Verdict::Accept), Verdict::Accept);
    }
}
