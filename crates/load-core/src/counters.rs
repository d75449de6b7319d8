//! Process-wide traffic counters.
//!
//! Counters are owned objects handed to each component through an `Arc`;
//! all updates are single atomic operations and reporting reads them
//! without taking any lock.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the driver side.
#[derive(Debug, Default)]
pub struct DriverCounters {
    connections_attempted: AtomicU64,
    connections_established: AtomicU64,
    connections_dropped: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    probe_failures: AtomicU64,
    echoes_received: AtomicU64,
}

impl DriverCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.connections_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.connections_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo(&self) {
        self.echoes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn established(&self) -> u64 {
        self.connections_established.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            connections_attempted: self.connections_attempted.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_dropped: self.connections_dropped.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            echoes_received: self.echoes_received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverSnapshot {
    pub connections_attempted: u64,
    pub connections_established: u64,
    pub connections_dropped: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub probe_failures: u64,
    pub echoes_received: u64,
}

/// Counters maintained by the echo responder.
#[derive(Debug, Default)]
pub struct ResponderCounters {
    active_connections: AtomicU64,
    connections_accepted: AtomicU64,
    messages_received: AtomicU64,
    messages_echoed: AtomicU64,
}

impl ResponderCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echoed(&self) {
        self.messages_echoed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Mark a connection as open; it stays counted until the guard drops.
    pub fn open_connection(&self) -> ActiveGuard<'_> {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { counters: self }
    }

    pub fn snapshot(&self) -> ResponderSnapshot {
        ResponderSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_echoed: self.messages_echoed.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active-connection count on every exit path.
#[must_use = "dropping the guard immediately closes the connection slot"]
pub struct ActiveGuard<'a> {
    counters: &'a ResponderCounters,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counters
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponderSnapshot {
    pub active_connections: u64,
    pub connections_accepted: u64,
    pub messages_received: u64,
    pub messages_echoed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_driver_counters_basic() {
        let counters = DriverCounters::new();
        counters.record_attempt();
        counters.record_attempt();
        counters.record_established();
        counters.record_sent();
        counters.record_sent();
        counters.record_send_failure();

        let snap = counters.snapshot();
        assert_eq!(snap.connections_attempted, 2);
        assert_eq!(snap.connections_established, 1);
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.send_failures, 1);
        assert_eq!(snap.probe_failures, 0);
    }

    #[test]
    fn test_active_guard_restores_baseline() {
        let counters = ResponderCounters::new();
        for _ in 0..5 {
            let a = counters.open_connection();
            let b = counters.open_connection();
            assert_eq!(counters.active(), 2);
            drop(a);
            assert_eq!(counters.active(), 1);
            drop(b);
        }

        let snap = counters.snapshot();
        assert_eq!(snap.active_connections, 0);
        assert_eq!(snap.connections_accepted, 10);
    }

    #[test]
    fn test_active_guard_released_on_panic() {
        let counters = Arc::new(ResponderCounters::new());
        let c = Arc::clone(&counters);
        let result = std::thread::spawn(move || {
            let _guard = c.open_connection();
            panic!("connection task failed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(counters.active(), 0);
    }
}
