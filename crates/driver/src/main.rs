use anyhow::{Context, Result};
use clap::Parser;
use load_core::{Config, Driver, DriverCounters, RunSummary, WsConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "driver")]
#[command(about = "WebSocket load driver - holds N connections open and sends on a fixed cadence")]
#[command(after_help = "Example usage: driver --ip 172.17.0.1 --conn 10")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server IP or host name (overrides config)
    #[arg(long)]
    ip: Option<String>,

    /// Server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Number of WebSocket connections (overrides config)
    #[arg(long)]
    conn: Option<usize>,

    /// Send tick period in milliseconds (overrides config)
    #[arg(long)]
    send_interval_ms: Option<u64>,

    /// Latency report period in milliseconds (overrides config)
    #[arg(long)]
    report_interval_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = Config::load(args.config.as_deref())?.driver;
    if let Some(ip) = args.ip {
        config.host = ip;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(conn) = args.conn {
        config.connections = conn;
    }
    if let Some(ms) = args.send_interval_ms {
        config.send_interval_ms = ms;
    }
    if let Some(ms) = args.report_interval_ms {
        config.report_interval_ms = ms;
    }
    config.validate().context("Invalid driver configuration")?;

    let endpoint = config.endpoint()?;
    let run_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    info!("Starting run {} against {}", run_id, endpoint);
    info!(
        "Connections: {}, send every {}ms, report every {}ms",
        config.connections, config.send_interval_ms, config.report_interval_ms
    );

    let counters = Arc::new(DriverCounters::new());
    let connector = WsConnector::new(endpoint, config.connect_timeout(), counters.clone());
    let driver = Driver::new(config, counters);

    let summary = driver.run(&connector, shutdown_signal()).await;
    print_summary(&run_id, &summary);

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_summary(run_id: &str, summary: &RunSummary) {
    let c = &summary.counters;
    println!("\n=== Driver Run {} Summary ===", run_id);
    println!("Ticks: {}", summary.ticks);
    println!(
        "Connections: {} established of {} attempted, {} dropped",
        c.connections_established, c.connections_attempted, c.connections_dropped
    );
    println!("Messages sent: {}", c.messages_sent);
    println!("Send failures: {}", c.send_failures);
    println!("Probe failures: {}", c.probe_failures);
    println!("Echoes received: {}", c.echoes_received);
    match &summary.latency {
        Some(l) => {
            println!("Latency mean: {:?}", l.mean);
            println!("Latency p50: {:?}", l.p50);
            println!("Latency p90: {:?}", l.p90);
            println!("Latency p99: {:?}", l.p99);
            println!("Latency max: {:?}", l.max);
        }
        None => println!("No latencies recorded."),
    }
    println!();
}
