use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tunfence::blocklist::{BlocklistSource, SourceState};
use tunfence::config::FirewallConfig;
use tunfence::engine::{Collaborators, Firewall, Schedule};
use tunfence::firewall::ProcNetOwnerResolver;
use tunfence::firewall::rules::{LogWorker, TracingLogSink};

#[derive(Parser)]
#[command(name = "tunfence")]
#[command(about = "Packet-level firewall core", long_about = None)]
struct Args {
    /// Firewall configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra blocklist file to deny, in any supported format (repeatable)
    #[arg(short, long)]
    source: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run hex-encoded IPv4 packets (one per line) through the firewall
    Replay {
        /// Packet file, or `-` for stdin
        file: PathBuf,

        /// Seconds between statistics reports
        #[arg(long, default_value = "60")]
        stats_interval: u64,
    },
    /// Check hostnames against the blocklist database
    Lookup {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// Print the denied hostnames in hosts-file format
    Hosts,
}

fn load_config(args: &Args) -> anyhow::Result<FirewallConfig> {
    let mut config = match &args.config {
        Some(path) => FirewallConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => FirewallConfig::default(),
    };
    for (i, path) in args.source.iter().enumerate() {
        config
            .sources
            .push(BlocklistSource::file(format!("cli-{i}"), path, SourceState::Deny));
    }
    Ok(config)
}

fn decode_hex(line: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<u8> = line.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks_exact(2)
        .map(|pair| -> anyhow::Result<u8> {
            let text = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(text, 16)?)
        })
        .collect()
}

async fn replay(
    firewall: Firewall,
    worker: LogWorker,
    args: &Args,
    file: &Path,
    stats_interval: u64,
) -> anyhow::Result<()> {
    let db = Arc::clone(&firewall.database);
    tokio::task::spawn_blocking(move || db.initialize(false)).await?;

    let schedule = Schedule {
        stats: Duration::from_secs(stats_interval.max(1)),
        ..Schedule::default()
    };
    let tasks = firewall.spawn_background(worker, args.config.clone(), schedule);

    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = if file.as_os_str() == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(file)
                .await
                .with_context(|| format!("opening {}", file.display()))?,
        )
    };
    let mut lines = BufReader::new(reader).lines();

    let mut number = 0usize;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let packet = match decode_hex(line) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(line = number, error = %e, "skipping malformed line");
                continue;
            }
        };
        let decision = firewall.dispatcher.inspect(&packet);
        let verdict = decision.verdict.map_or("UNPARSED", |v| v.as_str());
        let reply = if decision.reply.is_some() { " reply" } else { "" };
        println!("{number}\t{}\t{verdict}{reply}", if decision.allow { "allow" } else { "deny" });
    }

    let snap = firewall.stats.snapshot_and_reset();
    println!(
        "[stats] packets={} accepted={} dropped={} dns_blocked={} unparsed={} avg_decision={:.2}us",
        snap.packets, snap.accepted, snap.dropped, snap.dns_blocked, snap.unparsed, snap.avg_decision_us
    );
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let collab = Collaborators {
        owner: Arc::new(ProcNetOwnerResolver::new()),
        sink: Arc::new(TracingLogSink),
        hostnames: Arc::new(|_: std::net::IpAddr| None),
    };
    let (firewall, worker) = Firewall::from_config(&config, collab);

    match &args.command {
        Command::Replay { file, stats_interval } => {
            replay(firewall, worker, &args, file, *stats_interval).await?;
        }
        Command::Lookup { hosts } => {
            let db = Arc::clone(&firewall.database);
            tokio::task::spawn_blocking(move || db.initialize(false)).await?;
            for host in hosts {
                let state = if firewall.database.is_blocked(host) { "blocked" } else { "allowed" };
                println!("{host}\t{state}");
            }
        }
        Command::Hosts => {
            let db = Arc::clone(&firewall.database);
            let hosts = tokio::task::spawn_blocking(move || db.initialize(true))
                .await?
                .context("hosts export was cancelled")?;
            for host in hosts {
                println!("0.0.0.0 {host}");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_lines() {
        assert_eq!(decode_hex("45 00 0a").unwrap(), vec![0x45, 0x00, 0x0a]);
        assert_eq!(decode_hex("DEADbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::parse_from(["tunfence", "-s", "a.txt", "-s", "b.txt", "lookup", "x.example.com"]);
        assert_eq!(args.source.len(), 2);
        assert!(matches!(args.command, Command::Lookup { ref hosts } if hosts == &["x.example.com"]));

        let config = load_config(&args).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].state, SourceState::Deny);
    }
}
