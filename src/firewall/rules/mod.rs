//! The rule kinds a chain is assembled from.

mod app_access;
mod custom_domain;
mod dns_block;
mod http_port;
mod ip_filter;
mod logging;
mod screen_state;

pub use app_access::{AppAccessRule, watch_applications};
pub use custom_domain::{CustomDomain, CustomDomainRule, watch_custom_domains};
pub use dns_block::DnsBlockRule;
pub use http_port::HttpPortRule;
pub use ip_filter::{IpFilterRule, watch_ip_entries};
pub use logging::{LOG_QUEUE_CAPACITY, LogWorker, LoggingRule, TracingLogSink};
pub use screen_state::ScreenStateRule;
