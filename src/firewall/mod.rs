//! The per-packet rule chain.
//!
//! Each rule sees the packet, the DNS query it carries (if any) and the
//! verdict so far, and returns the next verdict. Rules keep their own
//! configuration snapshot and refresh it from background tasks; `check`
//! only ever reads.

pub mod chain;
pub mod collab;
pub mod network;
pub mod owner;
pub mod packet;
pub mod rules;

pub use chain::FirewallChain;
pub use collab::{
    AppInfo, ApplicationRegistry, ConnectionOwnerResolver, HostnameResolver, IpEntry, LogRecord,
    LogSink,
};
pub use network::{NetworkState, NetworkType};
pub use owner::ProcNetOwnerResolver;
pub use packet::FirewallPacket;

use crate::dns::DnsModel;

/// Outcome of evaluating one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accept,
    Drop,
    /// A DNS query for a blocked name. The query is not forwarded.
    DnsBlocked,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        self == Verdict::Accept
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Drop => "DROP",
            Verdict::DnsBlocked => "DNS_BLOCKED",
        }
    }
}

/// Where a rule sits in the chain.
///
/// A drop from an `Enforce` rule cannot be overridden by anything after it;
/// `Dns` rules may override each other; `Observe` rules always run and must
/// not change the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Enforce,
    Dns,
    Observe,
}

pub trait FirewallRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    /// Produce the next verdict. Must not block.
    fn check(&self, packet: &mut FirewallPacket, dns: Option<&DnsModel>, verdict: Verdict) -> Verdict;
}
