use anyhow::{Context, Result};
use clap::Parser;
use load_core::{spawn_reporter, Config, EchoResponder, ResponderCounters};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "responder")]
#[command(about = "WebSocket echo responder - echoes every message back and counts traffic")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long)]
    listen: Option<String>,

    /// Counter report period in milliseconds (overrides config)
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

    let mut config = Config::load(args.config.as_deref())?.responder;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(ms) = args.report_interval_ms {
        config.report_interval_ms = ms;
    }
    config
        .validate()
        .context("Invalid responder configuration")?;

    let counters = Arc::new(ResponderCounters::new());
    let responder = EchoResponder::bind(&config.listen, counters.clone()).await?;
    let _reporter = spawn_reporter(counters, config.report_interval());

    responder.serve().await
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
