use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::counters::DriverCounters;
use crate::pool::ConnectionPool;
use crate::stats::LatencyRecorder;
use crate::transport::Link;

/// Outcome of one send tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Links in the pool when the tick started
    pub live: usize,
    /// Payloads sent (one latency sample each)
    pub sent: usize,
    pub failed: usize,
    /// Links removed after a fatal error
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    Failed { fatal: bool },
}

/// Fans one probe + payload send out to every live link per tick and waits
/// for all of them before returning.
pub struct SendScheduler {
    recorder: Arc<LatencyRecorder>,
    counters: Arc<DriverCounters>,
    probe_timeout: Duration,
    send_timeout: Duration,
}

impl SendScheduler {
    pub fn new(
        recorder: Arc<LatencyRecorder>,
        counters: Arc<DriverCounters>,
        probe_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            recorder,
            counters,
            probe_timeout,
            send_timeout,
        }
    }

    pub async fn tick(&self, pool: &mut ConnectionPool) -> TickReport {
        let links = pool.take_links();
        let mut report = TickReport {
            live: links.len(),
            ..TickReport::default()
        };

        let mut tasks = JoinSet::new();
        for mut link in links {
            let recorder = Arc::clone(&self.recorder);
            let counters = Arc::clone(&self.counters);
            let probe_timeout = self.probe_timeout;
            let send_timeout = self.send_timeout;

            tasks.spawn(async move {
                let outcome = send_once(
                    link.as_mut(),
                    probe_timeout,
                    send_timeout,
                    &recorder,
                    &counters,
                )
                .await;
                (link, outcome)
            });
        }

        // Barrier: every send of this tick completes before the next tick.
        let mut survivors = Vec::with_capacity(report.live);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((link, SendOutcome::Sent)) => {
                    report.sent += 1;
                    survivors.push(link);
                }
                Ok((link, SendOutcome::Failed { fatal })) => {
                    report.failed += 1;
                    if fatal {
                        report.dropped += 1;
                        pool.record_dropped(link.index());
                    } else {
                        survivors.push(link);
                    }
                }
                Err(e) => {
                    warn!("Send task aborted: {}", e);
                    report.failed += 1;
                    report.dropped += 1;
                    self.counters.record_dropped();
                }
            }
        }

        pool.restore_links(survivors);
        report
    }
}

async fn send_once(
    link: &mut dyn Link,
    probe_timeout: Duration,
    send_timeout: Duration,
    recorder: &LatencyRecorder,
    counters: &DriverCounters,
) -> SendOutcome {
    let index = link.index();
    let start = Instant::now();

    if let Err(e) = link.ping(probe_timeout).await {
        counters.record_probe_failure();
        warn!("Failed to receive pong on conn {}: {}", index, e);
    }

    match link
        .send_text(format!("Hello from conn {}", index), send_timeout)
        .await
    {
        Ok(()) => {
            counters.record_sent();
            recorder.record(start.elapsed());
            SendOutcome::Sent
        }
        Err(e) => {
            counters.record_send_failure();
            debug!(index, error = %e, "Payload send failed");
            SendOutcome::Failed {
                fatal: e.is_fatal(),
            }
        }
    }
}
