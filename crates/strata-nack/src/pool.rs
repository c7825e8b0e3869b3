//! # Packet Pool
//!
//! Recycles [`RetainablePacket`] storage so the per-packet write path does
//! not allocate once the pool is warm.
//!
//! Fully released storage is pushed onto a bounded free list. Storage is only
//! reused when the pool holds the sole pointer to it, so a stale handle can
//! never observe a rewrite of a recycled packet.

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{NackError, Result};
use crate::packet::{PacketStorage, Recycle, RetainablePacket};
use crate::rtp::RtpHeader;

/// Allocation strategy for send-buffer packets.
///
/// The returned packet must carry exactly one reference. Build it with
/// [`RetainablePacket::pooled`] to get the storage back through
/// [`Recycle`] once the send buffer and every retransmit reader are done
/// with it, or with [`RetainablePacket::unpooled`] to let it be freed.
pub trait PacketFactory: Send + Sync {
    fn new_packet(&self, header: &RtpHeader, payload: &[u8]) -> Result<RetainablePacket>;
}

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Free-list slots kept for recycled storage.
    pub free_list_capacity: usize,
    /// Upper bound on packets alive at once. `None` means unbounded.
    pub max_outstanding: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            free_list_capacity: 4096,
            max_outstanding: None,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Fresh storage allocations.
    pub allocated: u64,
    /// Allocations served from the free list.
    pub reused: u64,
    /// Storage handed back to the pool at reference count zero.
    pub recycled: u64,
    /// Packets currently alive.
    pub outstanding: usize,
    /// Entries waiting on the free list.
    pub free: usize,
}

struct PoolShared {
    free_tx: Sender<Arc<PacketStorage>>,
    free_rx: Receiver<Arc<PacketStorage>>,
    max_outstanding: Option<usize>,
    outstanding: AtomicUsize,
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

impl Recycle for PoolShared {
    fn recycle(&self, storage: Arc<PacketStorage>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.recycled.fetch_add(1, Ordering::Relaxed);
        // Full free list: let the storage be freed.
        let _ = self.free_tx.try_send(storage);
    }
}

// ─── PacketPool ──────────────────────────────────────────────────────────────

/// Default [`PacketFactory`]: a bounded free list of packet storage.
///
/// Cloning is cheap and clones share the same free list.
#[derive(Clone)]
pub struct PacketPool {
    shared: Arc<PoolShared>,
}

impl PacketPool {
    /// Pool with the default free-list size and no outstanding limit.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Pool sized by `config`. A zero free-list capacity is raised to one.
    pub fn with_config(config: PoolConfig) -> Self {
        let (free_tx, free_rx) = bounded(config.free_list_capacity.max(1));
        PacketPool {
            shared: Arc::new(PoolShared {
                free_tx,
                free_rx,
                max_outstanding: config.max_outstanding,
                outstanding: AtomicUsize::new(0),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
            }),
        }
    }

    /// Copy `header` and `payload` into pooled storage with one reference.
    pub fn allocate(&self, header: &RtpHeader, payload: &[u8]) -> Result<RetainablePacket> {
        let shared = &self.shared;
        match shared.max_outstanding {
            Some(limit) => {
                shared
                    .outstanding
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then_some(n + 1)
                    })
                    .map_err(|_| NackError::PoolExhausted { limit })?;
            }
            None => {
                shared.outstanding.fetch_add(1, Ordering::AcqRel);
            }
        }

        if let Ok(storage) = shared.free_rx.try_recv() {
            // `None` means a stale handle still points at it; it is dropped.
            if let Some(pkt) = RetainablePacket::reuse(storage, header, payload) {
                shared.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(pkt);
            }
        }

        shared.allocated.fetch_add(1, Ordering::Relaxed);
        let home: Weak<PoolShared> = Arc::downgrade(&self.shared);
        Ok(RetainablePacket::pooled(header, payload, home))
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            recycled: self.shared.recycled.load(Ordering::Relaxed),
            outstanding: self.shared.outstanding.load(Ordering::Acquire),
            free: self.shared.free_rx.len(),
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFactory for PacketPool {
    fn new_packet(&self, header: &RtpHeader, payload: &[u8]) -> Result<RetainablePacket> {
        self.allocate(header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(seq: u16) -> RtpHeader {
        RtpHeader::new(0xABCD, seq, 90_000)
    }

    #[test]
    fn allocate_copies_header_and_payload() {
        let pool = PacketPool::new();
        let p = pool.allocate(&header(42), b"hello").unwrap();
        assert_eq!(p.sequence_number(), 42);
        assert_eq!(p.header().ssrc, 0xABCD);
        assert_eq!(p.payload(), b"hello");
        assert_eq!(p.ref_count(), 1);
        assert_eq!(pool.stats().outstanding, 1);
    }

    #[test]
    fn released_storage_is_reused() {
        let pool = PacketPool::new();
        let p = pool.allocate(&header(1), b"first payload").unwrap();
        assert!(!p.release());
        assert_eq!(pool.stats().free, 1);

        let q = pool.allocate(&header(2), b"second").unwrap();
        assert_eq!(q.sequence_number(), 2);
        assert_eq!(q.payload(), b"second");
        assert_eq!(q.ref_count(), 1);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.recycled, 1);
        assert_eq!(stats.outstanding, 1);
    }

    #[test]
    fn still_referenced_storage_is_not_recycled() {
        let pool = PacketPool::new();
        let p = pool.allocate(&header(1), b"x").unwrap();
        let reader = p.retain().unwrap();
        assert!(p.release());
        assert_eq!(pool.stats().free, 0);
        assert_eq!(reader.payload(), b"x");
        assert!(!reader.release());
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn outstanding_limit_is_enforced() {
        let pool = PacketPool::with_config(PoolConfig {
            free_list_capacity: 4,
            max_outstanding: Some(2),
        });
        let a = pool.allocate(&header(1), b"").unwrap();
        let _b = pool.allocate(&header(2), b"").unwrap();
        assert!(matches!(
            pool.allocate(&header(3), b""),
            Err(NackError::PoolExhausted { limit: 2 })
        ));

        a.release();
        assert!(pool.allocate(&header(3), b"").is_ok());
    }

    #[test]
    fn packet_outlives_dropped_pool() {
        let pool = PacketPool::new();
        let p = pool.allocate(&header(5), b"orphan").unwrap();
        drop(pool);
        assert_eq!(p.payload(), b"orphan");
        assert!(!p.release());
    }
}
