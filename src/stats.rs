//! Transport statistics and the traffic sampler.
//!
//! [`TransportCounters`] are updated by the server for every response.
//! A [`StatsCollector`] periodically takes the bytes sent since the last sample and pushes the byte rate into a fixed-capacity [`TrafficRing`].

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// The default sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// The shortest sampling interval.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// The default number of retained samples (one hour at the default interval).
pub const DEFAULT_RING_CAPACITY: usize = 720;

/// A fixed-capacity ring of traffic samples in bytes per second. The oldest sample is overwritten when full.
#[derive(Clone, Debug)]
pub struct TrafficRing {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl TrafficRing {
    /// Create an empty ring holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample, dropping the oldest if the ring is full.
    pub fn push(&mut self, sample: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Return the `n` most recent samples, oldest first.
    ///
    /// If fewer than `n` samples exist the result is padded with zeros at the front.
    #[must_use]
    pub fn values(&self, n: usize) -> Vec<u64> {
        let available = self.samples.len().min(n);
        let mut values = vec![0; n - available];
        values.extend(self.samples.iter().skip(self.samples.len() - available));
        values
    }

    /// The maximum number of samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the ring holds no sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Byte and request counters of the transport.
#[derive(Debug, Default)]
pub struct TransportCounters {
    bytes_since_sample: AtomicU64,
    bytes_total: AtomicU64,
    responses_since_sample: AtomicU64,
    responses_total: AtomicU64,
    open_requests: AtomicU64,
    max_open_requests: AtomicU64,
}

impl TransportCounters {
    /// Record a response of `bytes` body bytes.
    pub fn record_response(&self, bytes: u64) {
        self.bytes_since_sample.fetch_add(bytes, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes, Ordering::Relaxed);
        self.responses_since_sample.fetch_add(1, Ordering::Relaxed);
        self.responses_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a request as open until the returned guard is dropped.
    #[must_use]
    pub fn open_request(&self) -> OpenRequestGuard<'_> {
        let open = self.open_requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_open_requests.fetch_max(open, Ordering::Relaxed);
        OpenRequestGuard { counters: self }
    }

    /// The total number of body bytes sent. Never reset.
    #[must_use]
    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    /// The total number of responses. Never reset.
    #[must_use]
    pub fn responses_total(&self) -> u64 {
        self.responses_total.load(Ordering::Relaxed)
    }

    /// The number of requests in progress.
    #[must_use]
    pub fn open_requests(&self) -> u64 {
        self.open_requests.load(Ordering::Relaxed)
    }

    /// The maximum number of requests that were in progress at once.
    #[must_use]
    pub fn max_open_requests(&self) -> u64 {
        self.max_open_requests.load(Ordering::Relaxed)
    }

    fn take_bytes(&self) -> u64 {
        self.bytes_since_sample.swap(0, Ordering::Relaxed)
    }

    fn take_responses(&self) -> u64 {
        self.responses_since_sample.swap(0, Ordering::Relaxed)
    }
}

/// Keeps a request counted as open. See [`TransportCounters::open_request`].
#[derive(Debug)]
pub struct OpenRequestGuard<'a> {
    counters: &'a TransportCounters,
}

impl Drop for OpenRequestGuard<'_> {
    fn drop(&mut self) {
        self.counters.open_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Samples the traffic of the transport.
#[derive(Debug)]
pub struct StatsCollector {
    counters: TransportCounters,
    ring: Mutex<TrafficRing>,
    interval: Duration,
    messages_per_second: AtomicU64,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL, DEFAULT_RING_CAPACITY)
    }
}

impl StatsCollector {
    /// Create a collector sampling every `interval` and retaining `capacity` samples.
    ///
    /// An `interval` shorter than [`MIN_SAMPLE_INTERVAL`] is raised to it.
    #[must_use]
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            counters: TransportCounters::default(),
            ring: Mutex::new(TrafficRing::new(capacity)),
            interval: interval.max(MIN_SAMPLE_INTERVAL),
            messages_per_second: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// The transport counters.
    #[must_use]
    pub fn counters(&self) -> &TransportCounters {
        &self.counters
    }

    /// The sampling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The number of retained samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Take one sample: the bytes sent since the previous sample divided by the interval.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tick(&self) {
        let seconds = self.interval.as_secs_f64();
        let bytes = self.counters.take_bytes();
        let responses = self.counters.take_responses();
        let bytes_per_second = (bytes as f64 / seconds) as u64;
        let messages_per_second = responses as f64 / seconds;
        self.messages_per_second
            .store(messages_per_second.to_bits(), Ordering::Relaxed);
        self.ring.lock().push(bytes_per_second);
    }

    /// The `n` most recent samples in bytes per second, most recent last.
    ///
    /// Padded with zeros at the front if fewer than `n` samples have been taken.
    #[must_use]
    pub fn traffic(&self, n: usize) -> Vec<u64> {
        self.ring.lock().values(n)
    }

    /// The total number of body bytes sent.
    #[must_use]
    pub fn total_bytes_sent(&self) -> u64 {
        self.counters.bytes_total()
    }

    /// The response rate over the last sampling interval.
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        f64::from_bits(self.messages_per_second.load(Ordering::Relaxed))
    }

    /// Spawn the sampling task on the current tokio runtime.
    ///
    /// The task runs until it is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_ring_values() {
        let mut ring = TrafficRing::new(3);
        assert_eq!(ring.values(5), vec![0, 0, 0, 0, 0]);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.values(5), vec![0, 0, 0, 1, 2]);
        assert_eq!(ring.values(1), vec![2]);
        ring.push(3);
        ring.push(4);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.values(3), vec![2, 3, 4]);
        assert_eq!(ring.values(0), Vec::<u64>::new());
    }

    #[test]
    fn stats_collector_traffic() {
        let stats = StatsCollector::new(Duration::from_secs(5), 720);
        assert_eq!(stats.traffic(5), vec![0, 0, 0, 0, 0]);

        for bytes in [500, 1000, 1500] {
            stats.counters().record_response(bytes);
            stats.tick();
        }
        assert_eq!(stats.traffic(5), vec![0, 0, 100, 200, 300]);
        assert_eq!(stats.total_bytes_sent(), 3000);

        // the accumulator is reset by each sample, the total is not
        stats.tick();
        assert_eq!(stats.traffic(2), vec![300, 0]);
        assert_eq!(stats.total_bytes_sent(), 3000);
    }

    #[test]
    fn stats_collector_ring_overflow() {
        let stats = StatsCollector::new(Duration::from_secs(1), 4);
        for bytes in 1..=6 {
            stats.counters().record_response(bytes);
            stats.tick();
        }
        assert_eq!(stats.traffic(4), vec![3, 4, 5, 6]);
        assert_eq!(stats.traffic(6), vec![0, 0, 3, 4, 5, 6]);
        assert_eq!(stats.capacity(), 4);
    }

    #[test]
    fn stats_collector_messages_per_second() {
        let stats = StatsCollector::new(Duration::from_secs(2), 8);
        for _ in 0..10 {
            stats.counters().record_response(0);
        }
        stats.tick();
        assert!((stats.messages_per_second() - 5.0).abs() < f64::EPSILON);
        assert_eq!(stats.counters().responses_total(), 10);
    }

    #[test]
    fn transport_counters_open_requests() {
        let counters = TransportCounters::default();
        {
            let _a = counters.open_request();
            let _b = counters.open_request();
            assert_eq!(counters.open_requests(), 2);
        }
        let _c = counters.open_request();
        assert_eq!(counters.open_requests(), 1);
        assert_eq!(counters.max_open_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_collector_spawn() {
        let stats = Arc::new(StatsCollector::new(Duration::from_secs(5), 16));
        let task = stats.clone().spawn();
        stats.counters().record_response(50);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(stats.traffic(2), vec![0, 10]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stats_collector_zero_interval() {
        let stats = Arc::new(StatsCollector::new(Duration::ZERO, 64));
        assert_eq!(stats.interval(), MIN_SAMPLE_INTERVAL);
        let task = stats.clone().spawn();
        stats.counters().record_response(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());
        assert!(stats.traffic(64).iter().any(|&sample| sample > 0));
        task.abort();
    }
}
