//! Interfaces to the collaborators that live outside the firewall core.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SinkError};

use super::Verdict;
use super::packet::FirewallPacket;

/// One installed application and what it may reach.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub uid: u32,
    #[serde(default = "allowed")]
    pub internet_access: bool,
    #[serde(default = "allowed")]
    pub cellular_access: bool,
    #[serde(default)]
    pub system_app: bool,
}

fn allowed() -> bool {
    true
}

/// An address the IP filter lets through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpEntry {
    pub ip: String,
}

/// What the logging rule hands to the sink for each packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub uid: Option<u32>,
    pub protocol: &'static str,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub destination_port: u16,
    pub hostname: Option<String>,
    pub verdict: &'static str,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

pub trait ApplicationRegistry: Send + Sync {
    fn applications(&self) -> Result<Vec<AppInfo>, ConfigError>;
}

/// Attributes a packet to the application that owns its socket.
pub trait ConnectionOwnerResolver: Send + Sync {
    fn owner_uid(&self, packet: &FirewallPacket) -> Option<u32>;
}

impl<F> ConnectionOwnerResolver for F
where
    F: Fn(&FirewallPacket) -> Option<u32> + Send + Sync,
{
    fn owner_uid(&self, packet: &FirewallPacket) -> Option<u32> {
        self(packet)
    }
}

pub trait LogSink: Send + Sync {
    fn add_log(&self, record: LogRecord) -> Result<(), SinkError>;
}

/// Best-effort reverse lookup for log records.
pub trait HostnameResolver: Send + Sync {
    fn hostname(&self, ip: IpAddr) -> Option<String>;
}

impl<F> HostnameResolver for F
where
    F: Fn(IpAddr) -> Option<String> + Send + Sync,
{
    fn hostname(&self, ip: IpAddr) -> Option<String> {
        self(ip)
    }
}

impl LogRecord {
    pub fn new(packet: &FirewallPacket, verdict: Verdict, timestamp: u64) -> Self {
        Self {
            uid: packet.uid(),
            protocol: packet.protocol.as_str(),
            source: packet.source,
            destination: packet.destination,
            destination_port: packet.destination_port,
            hostname: None,
            verdict: verdict.as_str(),
            timestamp,
        }
    }
}
