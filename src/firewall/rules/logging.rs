use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::{Settings, SettingsConsumer};
use crate::dns::DnsModel;
use crate::error::SinkError;
use crate::firewall::collab::{HostnameResolver, LogRecord, LogSink};
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

/// Records queued ahead of a slow sink before new ones are dropped.
pub const LOG_QUEUE_CAPACITY: usize = 4096;

/// Records every packet that reaches it. Never changes the verdict.
///
/// Records are queued to a [`LogWorker`]; the packet path never waits for
/// the hostname lookup or the sink. A full queue drops the record.
pub struct LoggingRule {
    enabled: AtomicBool,
    queue: mpsc::Sender<LogRecord>,
}

/// Drains queued records into the sink. Run it on the runtime; lookups and
/// sink writes happen on the blocking pool.
pub struct LogWorker {
    queue: mpsc::Receiver<LogRecord>,
    sink: Arc<dyn LogSink>,
    hostnames: Arc<dyn HostnameResolver>,
}

impl LoggingRule {
    pub fn new(sink: Arc<dyn LogSink>, hostnames: Arc<dyn HostnameResolver>) -> (Self, LogWorker) {
        Self::with_capacity(sink, hostnames, LOG_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        sink: Arc<dyn LogSink>,
        hostnames: Arc<dyn HostnameResolver>,
        capacity: usize,
    ) -> (Self, LogWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rule = Self {
            enabled: AtomicBool::new(false),
            queue: tx,
        };
        let worker = LogWorker {
            queue: rx,
            sink,
            hostnames,
        };
        (rule, worker)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl SettingsConsumer for LoggingRule {
    fn apply_settings(&self, settings: Option<Arc<Settings>>) {
        self.set_enabled(settings.is_some_and(|s| s.logs_enabled));
    }
}

impl FirewallRule for LoggingRule {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn stage(&self) -> Stage {
        Stage::Observe
    }

    fn check(&self, packet: &mut FirewallPacket, _dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        if packet.should_log && self.enabled.load(Ordering::Relaxed) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            match self.queue.try_send(LogRecord::new(packet, verdict, now)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("log queue full, dropping record"),
                Err(TrySendError::Closed(_)) => debug!("log worker gone, dropping record"),
            }
        }
        verdict
    }
}

impl LogWorker {
    pub async fn run(mut self) {
        while let Some(mut record) = self.queue.recv().await {
            let sink = Arc::clone(&self.sink);
            let hostnames = Arc::clone(&self.hostnames);
            let stored = tokio::task::spawn_blocking(move || {
                record.hostname = hostnames.hostname(record.destination);
                sink.add_log(record)
            })
            .await;
            match stored {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to store log record"),
                Err(e) => warn!(error = %e, "log write task failed"),
            }
        }
    }
}

/// Writes each record as one JSON line on the `tunfence::packets` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn add_log(&self, record: LogRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(&record).map_err(|e| SinkError(e.to_string()))?;
        info!(target: "tunfence::packets", verdict = record.verdict, "{json}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::rules::testing::tcp_to;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogRecord>>);

    impl LogSink for Collect {
        fn add_log(&self, record: LogRecord) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn resolver() -> Arc<dyn HostnameResolver> {
        Arc::new(|ip: IpAddr| (ip == IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))).then(|| "example.com".to_string()))
    }

    #[tokio::test]
    async fn records_are_written_by_the_worker() {
        let sink = Arc::new(Collect::default());
        let (rule, worker) = LoggingRule::new(sink.clone(), resolver());
        let worker = tokio::spawn(worker.run());

        rule.apply_settings(Some(Arc::new(Settings {
            logs_enabled: true,
            ..Settings::default()
        })));
        let mut packet = tcp_to(Ipv4Addr::new(93, 184, 216, 34), 443);
        assert_eq!(rule.check(&mut packet, None, Verdict::Drop), Verdict::Drop);

        let mut known = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443).with_uid(1000);
        assert_eq!(rule.check(&mut known, None, Verdict::Accept), Verdict::Accept);

        drop(rule);
        worker.await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname.as_deref(), Some("example.com"));
        assert_eq!(records[0].verdict, "DROP");
        assert_eq!(records[0].destination_port, 443);
    }

    #[tokio::test]
    async fn disabled_logging_writes_nothing() {
        let sink = Arc::new(Collect::default());
        let (rule, worker) = LoggingRule::new(sink.clone(), resolver());
        let worker = tokio::spawn(worker.run());

        let mut packet = tcp_to(Ipv4Addr::new(93, 184, 216, 34), 443);
        rule.check(&mut packet, None, Verdict::Accept);

        drop(rule);
        worker.await.unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let sink = Arc::new(Collect::default());
        let (rule, worker) = LoggingRule::with_capacity(sink.clone(), resolver(), 2);
        rule.set_enabled(true);

        // Nothing drains the queue yet.
        for port in [1000, 1001, 1002, 1003] {
            let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), port);
            assert_eq!(rule.check(&mut packet, None, Verdict::Accept), Verdict::Accept);
        }

        drop(rule);
        worker.run().await;

        let records = sink.0.lock().unwrap();
        let ports: Vec<u16> = records.iter().map(|r| r.destination_port).collect();
        assert_eq!(ports, vec![1000, 1001]);
    }

    #[test]
    fn tracing_sink_accepts_records() {
        let packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 80);
        let record = LogRecord::new(&packet, Verdict::Accept, 0);
        assert!(TracingLogSink.add_log(record).is_ok());
    }

    #[test]
    fn records_serialize_with_camel_case_fields() {
        let packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 80).with_uid(10_001);
        let mut record = LogRecord::new(&packet, Verdict::Drop, 1_700_000_000_000);
        record.hostname = Some("example.com".into());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["uid"], 10_001);
        assert_eq!(json["destination"], "1.2.3.4");
        assert_eq!(json["destinationPort"], 80);
        assert_eq!(json["hostname"], "example.com");
        assert_eq!(json["verdict"], "DROP");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }
}
