//! arfcd: runs the failover controller against a configuration file.

use arfc::config::ArfcConfig;
use arfc::dns::{DnsProvider, InMemoryDnsProvider};
use arfc::probe::{HttpLagSource, LagMetricSource};
use arfc::service::{FailoverService, ServiceDeps};
use arfc::{telemetry, Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Active/passive region failover controller",
    long_about = "Active/passive region failover controller.\n\n\
        No cloud DNS provider is built in yet: arfcd only starts with --dry-run, \
        which applies failover records to an in-memory zone and never changes live DNS."
)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Base URL of the replication-lag metric feed
    #[arg(long)]
    lag_feed_url: String,

    /// Apply DNS changes to an in-memory zone. Required: no live DNS
    /// provider is built in, so arfcd refuses to start without it
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = telemetry::init_tracing(args.json_logs) {
        eprintln!("{}", e);
        std::process::exit(2);
    }
    if let Err(e) = run(args).await {
        error!(error = %e, "arfcd exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Arc::new(ArfcConfig::from_file(&args.config)?);
    info!(config = %args.config.display(), "configuration loaded");

    if !args.dry_run {
        return Err(Error::Config(
            "no live DNS provider is built in; rerun with --dry-run (see --help)".to_string(),
        ));
    }
    warn!("dry run: DNS changes go to an in-memory zone");
    let dns_provider: Arc<dyn DnsProvider> = Arc::new(InMemoryDnsProvider::new());
    let lag_source: Arc<dyn LagMetricSource> = Arc::new(HttpLagSource::new(&args.lag_feed_url)?);

    let deps = ServiceDeps::from_config(&config, lag_source, dns_provider)?;
    let service = FailoverService::start(config, deps)?;

    let mut snapshots = service.subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupt received, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("controller stopped");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                info!(
                    phase = %snapshot.phase,
                    primary = %snapshot.current_primary,
                    in_progress = snapshot.phase.is_in_progress(),
                    "controller state"
                );
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
