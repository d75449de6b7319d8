use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Append-only store of observed send latencies, shared by every send task.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: Mutex<Vec<Duration>>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration) {
        self.samples.lock().push(latency);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Compute statistics over every sample recorded so far.
    ///
    /// Percentiles are nearest-rank with a floored index into the ascending
    /// samples (`p90 = s[floor(n * 0.9)]`), not interpolated, and cover the
    /// whole run rather than the last report interval. Samples are sorted in
    /// place and kept. Returns `None` when nothing has been recorded.
    pub fn summarize(&self) -> Option<LatencySummary> {
        let mut samples = self.samples.lock();
        samples.sort_unstable();

        let n = samples.len();
        if n == 0 {
            return None;
        }

        let total_nanos: u128 = samples.iter().map(|d| d.as_nanos()).sum();
        let mean = Duration::from_nanos((total_nanos / n as u128) as u64);

        Some(LatencySummary {
            count: n,
            mean,
            p50: samples[n / 2],
            p90: samples[n * 90 / 100],
            p99: samples[n * 99 / 100],
            max: samples[n - 1],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mean: {:?}, 50th Percentile: {:?}, 90th Percentile: {:?}, 99th Percentile: {:?}, Max: {:?}",
            self.mean, self.p50, self.p90, self.p99, self.max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_reports_no_data() {
        let recorder = LatencyRecorder::new();
        assert!(recorder.is_empty());
        assert_eq!(recorder.summarize(), None);
    }

    #[test]
    fn test_single_sample() {
        let recorder = LatencyRecorder::new();
        recorder.record(ms(50));

        let summary = recorder.summarize().unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.mean, ms(50));
        assert_eq!(summary.p50, ms(50));
        assert_eq!(summary.p90, ms(50));
        assert_eq!(summary.p99, ms(50));
        assert_eq!(summary.max, ms(50));
    }

    #[test]
    fn test_floor_indexed_percentiles() {
        let recorder = LatencyRecorder::new();
        // Insert 1..=10ms out of order
        for v in [7, 3, 10, 1, 9, 2, 8, 4, 6, 5] {
            recorder.record(ms(v));
        }

        let summary = recorder.summarize().unwrap();
        assert_eq!(summary.count, 10);
        assert_eq!(summary.mean, Duration::from_micros(5_500));
        // s[5], s[9], s[9] of the sorted samples
        assert_eq!(summary.p50, ms(6));
        assert_eq!(summary.p90, ms(10));
        assert_eq!(summary.p99, ms(10));
        assert_eq!(summary.max, ms(10));
    }

    #[test]
    fn test_percentiles_on_hundred_samples() {
        let recorder = LatencyRecorder::new();
        for v in (1..=100).rev() {
            recorder.record(ms(v));
        }

        let summary = recorder.summarize().unwrap();
        assert_eq!(summary.p50, ms(51));
        assert_eq!(summary.p90, ms(91));
        assert_eq!(summary.p99, ms(100));
        assert_eq!(summary.max, ms(100));
        assert_eq!(summary.mean, Duration::from_micros(50_500));
    }

    #[test]
    fn test_summarize_is_cumulative() {
        let recorder = LatencyRecorder::new();
        recorder.record(ms(10));
        recorder.record(ms(30));
        assert_eq!(recorder.summarize().unwrap().count, 2);

        recorder.record(ms(20));
        let summary = recorder.summarize().unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, ms(20));
        assert_eq!(summary.p50, ms(20));
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn test_concurrent_record() {
        let recorder = Arc::new(LatencyRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        recorder.record(ms(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(recorder.len(), 2000);
        assert_eq!(recorder.summarize().unwrap().max, ms(7249));
    }
}
