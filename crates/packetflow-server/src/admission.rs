//! Admission control: per-IP connection caps and per-connection×command
//! rate limiting.
//!
//! Both guards are lock-striped by a hash of their key so contention under
//! load is bounded by the shard count rather than a single global mutex —
//! the same approach the core crates take for the buffer pool's bucket
//! free-lists.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{AdmissionConfig, RateClass};

const SHARD_COUNT: usize = 16;

fn shard_for<T: std::hash::Hash>(value: &T) -> usize {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
    value.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Per-source-IP bookkeeping held by [`ConnectionLimitGuard`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimitInfo {
    /// Connections currently open from this IP.
    pub current_connections: u32,
    /// Connections accepted from this IP since the last UTC-midnight
    /// reset.
    pub total_today: u64,
    /// Last time a connection was accepted from this IP.
    pub last_conn_at: Instant,
    /// Last time the janitor inspected this entry.
    pub last_cleanup_at: Instant,
}

impl ConnectionLimitInfo {
    fn new(now: Instant) -> Self {
        Self { current_connections: 0, total_today: 0, last_conn_at: now, last_cleanup_at: now }
    }
}

/// Outcome of [`ConnectionLimitGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The connection may proceed.
    Accept,
    /// The connection must be rejected; the per-IP cap is already at
    /// capacity.
    Reject,
}

/// Enforces a per-source-IP concurrent connection cap.
pub struct ConnectionLimitGuard {
    shards: Vec<Mutex<HashMap<IpAddr, ConnectionLimitInfo>>>,
    max_per_ip: u32,
    idle_ttl: Duration,
    reject_count: std::sync::atomic::AtomicU64,
}

impl ConnectionLimitGuard {
    /// Build a guard from `config`.
    #[must_use]
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            max_per_ip: config.max_connections_per_ip,
            idle_ttl: config.idle_ttl(),
            reject_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn shard(&self, ip: &IpAddr) -> &Mutex<HashMap<IpAddr, ConnectionLimitInfo>> {
        &self.shards[shard_for(ip)]
    }

    /// Check whether a new connection from `ip` may be admitted, recording
    /// it if so.
    #[must_use]
    pub fn check(&self, ip: IpAddr, now: Instant) -> AdmissionDecision {
        let mut shard = self.shard(&ip).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = shard.entry(ip).or_insert_with(|| ConnectionLimitInfo::new(now));

        if entry.current_connections >= self.max_per_ip {
            self.reject_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return AdmissionDecision::Reject;
        }

        entry.current_connections += 1;
        entry.total_today += 1;
        entry.last_conn_at = now;
        AdmissionDecision::Accept
    }

    /// Release a connection slot for `ip`, permitting the next admission
    /// check to succeed.
    pub fn release(&self, ip: IpAddr) {
        let mut shard = self.shard(&ip).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = shard.get_mut(&ip) {
            entry.current_connections = entry.current_connections.saturating_sub(1);
        }
    }

    /// Total rejections observed since construction, for metrics.
    #[must_use]
    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Evict entries idle longer than `idle_ttl` with no open connections.
    /// Intended to run periodically from a janitor task.
    pub fn sweep(&self, now: Instant) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            shard.retain(|_, info| {
                info.current_connections > 0 || now.saturating_duration_since(info.last_conn_at) < self.idle_ttl
            });
        }
    }
}

/// Outcome of [`RateLimitGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request is within the window's budget.
    Allow,
    /// The request exceeded the window's budget.
    Reject {
        /// Strikes accumulated within the current strike window.
        strikes: u32,
    },
}

struct RateEntry {
    timestamps: VecDeque<Instant>,
    strikes: VecDeque<Instant>,
}

impl RateEntry {
    fn new() -> Self {
        Self { timestamps: VecDeque::new(), strikes: VecDeque::new() }
    }
}

/// Sliding-window rate limiter keyed by `(connection_id, command)`.
pub struct RateLimitGuard {
    shards: Vec<Mutex<HashMap<(u64, u16), RateEntry>>>,
    strike_window: Duration,
}

impl RateLimitGuard {
    /// Build a guard from `config`.
    #[must_use]
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            strike_window: config.strike_window(),
        }
    }

    fn shard(&self, key: &(u64, u16)) -> &Mutex<HashMap<(u64, u16), RateEntry>> {
        &self.shards[shard_for(key)]
    }

    /// Check whether a request for `command` on `connection_id` is within
    /// `rate_class`'s budget at `now`.
    #[must_use]
    pub fn check(&self, connection_id: u64, command: u16, rate_class: RateClass, now: Instant) -> RateDecision {
        let Some((max_requests, window)) = rate_class.window() else {
            return RateDecision::Allow;
        };

        let key = (connection_id, command);
        let mut shard = self.shard(&key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = shard.entry(key).or_insert_with(RateEntry::new);

        while entry.timestamps.front().is_some_and(|&t| now.saturating_duration_since(t) > window) {
            entry.timestamps.pop_front();
        }

        if entry.timestamps.len() as u32 >= max_requests {
            while entry.strikes.front().is_some_and(|&t| now.saturating_duration_since(t) > self.strike_window) {
                entry.strikes.pop_front();
            }
            entry.strikes.push_back(now);
            return RateDecision::Reject { strikes: entry.strikes.len() as u32 };
        }

        entry.timestamps.push_back(now);
        RateDecision::Allow
    }
}

/// Three strikes within the strike window recommend disconnecting a
/// connection with reason `abuse`.
pub const ABUSE_STRIKE_THRESHOLD: u32 = 3;
