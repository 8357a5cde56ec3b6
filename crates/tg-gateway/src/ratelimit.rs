//! Per-address brute-force tracking for the enrollment listener.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct AttemptRecord {
    failures: u32,
    last_failure: DateTime<Utc>,
}

/// Counts failed enrollment attempts per source address. An address with
/// `threshold` or more recorded failures is refused before any credential
/// is examined. Counters only reset through [`RateLimiter::clear`], which
/// runs on successful enrollment.
pub struct RateLimiter {
    threshold: u32,
    records: DashMap<IpAddr, AttemptRecord>,
}

impl RateLimiter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            records: DashMap::new(),
        }
    }

    /// Record one failed attempt from `ip`. The entry API keeps the
    /// read-modify-write atomic per address.
    pub fn record_failed_attempt(&self, ip: IpAddr) {
        let mut entry = self.records.entry(ip).or_insert(AttemptRecord {
            failures: 0,
            last_failure: Utc::now(),
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure = Utc::now();

        if entry.failures >= self.threshold {
            tracing::warn!(%ip, failures = entry.failures, "address rate limited");
        }
    }

    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        self.records
            .get(&ip)
            .map(|r| r.failures >= self.threshold)
            .unwrap_or(false)
    }

    /// Forget all failures for `ip`.
    pub fn clear(&self, ip: IpAddr) {
        self.records.remove(&ip);
    }

    /// Number of addresses currently carrying failure records.
    pub fn tracked_addresses(&self) -> usize {
        self.records.len()
    }
}
