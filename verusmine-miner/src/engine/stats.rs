//! Mining statistics: monotonic counters with lock-free reads, plus a
//! delta-sampled hashrate estimate.
//!
//! Workers bump their own hash counter; share outcomes are counted by
//! the event pump as pool responses arrive. The stats task calls
//! [`Stats::sample`] on its reporting interval, which turns counter
//! deltas into per-thread rates readable by the API without locking.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Aggregate miner statistics, shared by workers, the event pump, the
/// stats task and the API server.
pub struct Stats {
    started: Instant,

    /// Hashes tried, one counter per worker thread.
    thread_hashes: Vec<AtomicU64>,

    /// Last sampled per-thread hashrate in H/s.
    thread_rates: Vec<AtomicU64>,

    /// Last sampled total hashrate in H/s.
    total_rate: AtomicU64,

    pub shares_submitted: AtomicU64,
    pub shares_accepted: AtomicU64,
    pub shares_rejected: AtomicU64,
    pub shares_stale: AtomicU64,

    sampler: Mutex<Sampler>,
}

struct Sampler {
    last_at: Instant,
    last_counts: Vec<u64>,
}

impl Stats {
    pub fn new(threads: usize) -> Self {
        let now = Instant::now();
        Stats {
            started: now,
            thread_hashes: (0..threads).map(|_| AtomicU64::new(0)).collect(),
            thread_rates: (0..threads).map(|_| AtomicU64::new(0)).collect(),
            total_rate: AtomicU64::new(0),
            shares_submitted: AtomicU64::new(0),
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
            shares_stale: AtomicU64::new(0),
            sampler: Mutex::new(Sampler {
                last_at: now,
                last_counts: vec![0; threads],
            }),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_hashes.len()
    }

    #[inline]
    pub fn count_hashes(&self, thread: usize, n: u64) {
        self.thread_hashes[thread].fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_hashes(&self) -> u64 {
        self.thread_hashes
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Recompute per-thread and total hashrates from the counter deltas
    /// since the previous sample. Returns the new total in H/s.
    pub fn sample(&self) -> u64 {
        let mut s = self.sampler.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let dt = now.duration_since(s.last_at).as_secs_f64();
        if dt <= 0.0 {
            return self.total_rate.load(Ordering::Relaxed);
        }

        let mut total = 0u64;
        for (i, counter) in self.thread_hashes.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            let rate = ((count - s.last_counts[i]) as f64 / dt) as u64;
            self.thread_rates[i].store(rate, Ordering::Relaxed);
            s.last_counts[i] = count;
            total += rate;
        }
        s.last_at = now;

        self.total_rate.store(total, Ordering::Relaxed);
        total
    }

    /// Per-thread hashrates from the last sample, in H/s.
    pub fn thread_rates(&self) -> Vec<u64> {
        self.thread_rates
            .iter()
            .map(|r| r.load(Ordering::Relaxed))
            .collect()
    }

    /// Total hashrate from the last sample, in H/s.
    pub fn total_rate(&self) -> u64 {
        self.total_rate.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counters_accumulate_per_thread() {
        let stats = Stats::new(3);
        stats.count_hashes(0, 10);
        stats.count_hashes(2, 5);
        stats.count_hashes(0, 1);

        assert_eq!(stats.total_hashes(), 16);
        assert_eq!(stats.thread_count(), 3);
    }

    #[test]
    fn share_counters_are_independent() {
        let stats = Stats::new(1);
        stats.shares_submitted.fetch_add(3, Ordering::Relaxed);
        stats.shares_accepted.fetch_add(2, Ordering::Relaxed);
        stats.shares_rejected.fetch_add(1, Ordering::Relaxed);

        assert_eq!(stats.shares_submitted.load(Ordering::Relaxed), 3);
        assert_eq!(stats.shares_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.shares_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.shares_stale.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sample_turns_deltas_into_rates() {
        let stats = Stats::new(2);
        stats.count_hashes(0, 1000);
        stats.count_hashes(1, 500);

        std::thread::sleep(Duration::from_millis(50));
        let total = stats.sample();

        assert!(total > 0);
        let rates = stats.thread_rates();
        assert_eq!(rates.len(), 2);
        assert!(rates[0] > rates[1]);
        assert_eq!(stats.total_rate(), total);

        // No further work: next sample reports ~zero.
        std::thread::sleep(Duration::from_millis(20));
        let total = stats.sample();
        assert_eq!(total, 0);
    }
}
