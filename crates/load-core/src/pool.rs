use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::counters::DriverCounters;
use crate::transport::{Connector, Link};

/// Live set of established links.
///
/// A pool may hold fewer links than were requested; failed attempts are
/// logged and skipped.
pub struct ConnectionPool {
    links: Vec<Box<dyn Link>>,
    requested: usize,
    established: usize,
    counters: Arc<DriverCounters>,
}

impl ConnectionPool {
    /// Attempt `count` connections one after another. Each link is indexed
    /// by its position in the pool, not by its attempt number.
    pub async fn establish(
        connector: &dyn Connector,
        count: usize,
        counters: Arc<DriverCounters>,
    ) -> Self {
        let start = Instant::now();
        let mut links: Vec<Box<dyn Link>> = Vec::with_capacity(count);

        for attempt in 0..count {
            counters.record_attempt();
            match connector.connect(links.len()).await {
                Ok(link) => {
                    counters.record_established();
                    links.push(link);
                }
                Err(e) => {
                    warn!("Failed to connect {}: {}", attempt, e);
                }
            }
        }

        let established = links.len();
        info!(
            "Finished initializing {} of {} connections via {} in {}ms",
            established,
            count,
            connector.name(),
            start.elapsed().as_millis()
        );

        Self {
            links,
            requested: count,
            established,
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Number of attempts that succeeded during establishment.
    pub fn established(&self) -> usize {
        self.established
    }

    /// Hand every live link to the caller, leaving the pool empty.
    pub(crate) fn take_links(&mut self) -> Vec<Box<dyn Link>> {
        std::mem::take(&mut self.links)
    }

    /// Return surviving links after a tick. Links are kept ordered by index.
    pub(crate) fn restore_links(&mut self, mut links: Vec<Box<dyn Link>>) {
        links.sort_by_key(|l| l.index());
        self.links = links;
    }

    pub(crate) fn record_dropped(&self, index: usize) {
        self.counters.record_dropped();
        debug!(index, "Connection removed from pool");
    }

    /// Close every live link in parallel, each bounded by `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        let links = self.take_links();
        if links.is_empty() {
            return;
        }

        let count = links.len();
        let start = Instant::now();
        info!("Closing {} connections (grace {}ms)", count, grace.as_millis());

        join_all(links.into_iter().map(|link| link.close(grace))).await;

        info!(
            "Closed {} connections in {}ms",
            count,
            start.elapsed().as_millis()
        );
    }
}
