use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::counters::{DriverCounters, DriverSnapshot};
use crate::pool::ConnectionPool;
use crate::scheduler::SendScheduler;
use crate::stats::{LatencyRecorder, LatencySummary};
use crate::transport::Connector;

/// Final state of a driver run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks: u64,
    pub counters: DriverSnapshot,
    pub latency: Option<LatencySummary>,
}

pub struct Driver {
    config: DriverConfig,
    counters: Arc<DriverCounters>,
    recorder: Arc<LatencyRecorder>,
}

impl Driver {
    pub fn new(config: DriverConfig, counters: Arc<DriverCounters>) -> Self {
        Self {
            config,
            counters,
            recorder: Arc::new(LatencyRecorder::new()),
        }
    }

    pub fn recorder(&self) -> Arc<LatencyRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Establish the pool, then alternate send and report ticks until
    /// `shutdown` resolves. The pool is closed gracefully before returning.
    pub async fn run<F>(&self, connector: &dyn Connector, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let cfg = &self.config;
        let mut pool =
            ConnectionPool::establish(connector, cfg.connections, Arc::clone(&self.counters))
                .await;

        let scheduler = SendScheduler::new(
            Arc::clone(&self.recorder),
            Arc::clone(&self.counters),
            cfg.probe_timeout(),
            cfg.send_timeout(),
        );

        // Both tickers first fire one full period after startup.
        let now = Instant::now();
        let mut send_ticker = interval_at(now + cfg.send_interval(), cfg.send_interval());
        send_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report_ticker = interval_at(now + cfg.report_interval(), cfg.report_interval());
        report_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut ticks = 0u64;
        let mut warned_empty = false;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} ticks", ticks);
                    break;
                }
                _ = send_ticker.tick() => {
                    let report = scheduler.tick(&mut pool).await;
                    ticks += 1;
                    if report.failed > 0 {
                        debug!(
                            tick = ticks,
                            live = report.live,
                            failed = report.failed,
                            dropped = report.dropped,
                            "Tick completed with failures"
                        );
                    }
                    if pool.is_empty() && !warned_empty {
                        warn!("No live connections remain");
                        warned_empty = true;
                    }
                }
                _ = report_ticker.tick() => {
                    report_latency(self.recorder.summarize());
                    report_counters(&self.counters.snapshot(), pool.len());
                }
            }
        }

        pool.shutdown(cfg.close_grace()).await;

        let summary = RunSummary {
            ticks,
            counters: self.counters.snapshot(),
            latency: self.recorder.summarize(),
        };
        report_latency(summary.latency);
        report_counters(&summary.counters, 0);
        summary
    }
}

pub fn report_latency(summary: Option<LatencySummary>) {
    match summary {
        Some(s) => info!("Latency stats - {} ({} samples)", s, s.count),
        None => info!("No latencies recorded."),
    }
}

fn report_counters(snap: &DriverSnapshot, live: usize) {
    info!(
        "Successful connections: {}, Live: {}, Messages sent: {}, Send failures: {}, Probe failures: {}, Echoes received: {}",
        snap.connections_established,
        live,
        snap.messages_sent,
        snap.send_failures,
        snap.probe_failures,
        snap.echoes_received
    );
}
