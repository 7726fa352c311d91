//! Per-connection outgoing dedup cache and incoming replay-detection FIFO.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

/// Default bound for both the outgoing and incoming caches.
pub const DEFAULT_CAPACITY: usize = 256;

/// 8-byte fingerprint used to key the outgoing cache: the first 4 bytes
/// concatenated with the last 4 bytes of the serialized packet.
pub type Fingerprint = [u8; 8];

/// Compute the fingerprint of a serialized packet.
///
/// Buffers shorter than 8 bytes are padded with zeros on the short side so
/// the function stays total; in practice every serialized packet is at
/// least header-sized (22 bytes).
#[must_use]
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let mut fp = [0u8; 8];
    let first4 = &data[..data.len().min(4)];
    fp[..first4.len()].copy_from_slice(first4);
    if data.len() >= 4 {
        let last4 = &data[data.len() - 4..];
        fp[4..].copy_from_slice(last4);
    }
    fp
}

/// Bounded cache of recently sent packets, keyed by fingerprint, used to
/// short-circuit retransmit requests without re-running the send pipeline.
pub struct OutgoingCache {
    capacity: usize,
    entries: HashMap<Fingerprint, Bytes>,
    order: VecDeque<Fingerprint>,
}

impl OutgoingCache {
    /// Build a cache bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    /// Record `data` as the most recently sent bytes for its fingerprint,
    /// evicting the oldest entry if the cache is full.
    pub fn push(&mut self, data: Bytes) {
        let fp = fingerprint(&data);
        if !self.entries.contains_key(&fp) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(fp);
        }
        self.entries.insert(fp, data);
    }

    /// Look up previously sent bytes by fingerprint.
    #[must_use]
    pub fn get(&self, fp: &Fingerprint) -> Option<&Bytes> {
        self.entries.get(fp)
    }
}

impl Default for OutgoingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Bounded FIFO of recently received payloads, used by application code to
/// detect replays and by tests to observe traffic.
pub struct IncomingFifo {
    capacity: usize,
    entries: VecDeque<Bytes>,
}

impl IncomingFifo {
    /// Build a FIFO bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::new() }
    }

    /// Append `data`, evicting the oldest entry if full. Returns `true` if
    /// an entry was evicted to make room (the caller fires `PacketCached`
    /// either way; eviction is informational).
    pub fn push(&mut self, data: Bytes) -> bool {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            true
        } else {
            false
        };
        self.entries.push_back(data);
        evicted
    }

    /// Most recent entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the FIFO holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IncomingFifo {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
