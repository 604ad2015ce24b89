//! Tunfence - a packet-level firewall core.
//!
//! Parses captured IPv4 packets, evaluates an ordered rule chain per packet and
//! keeps a hashed hostname blocklist that is rebuilt from configured sources.

pub mod blocklist;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod dns;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod stats;

pub use dispatcher::{Decision, PacketDispatcher};
pub use firewall::{FirewallChain, FirewallPacket, FirewallRule, Verdict};
