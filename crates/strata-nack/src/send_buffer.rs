//! # Send Buffer
//!
//! Per-stream history of recently sent RTP packets, indexed by sequence
//! number in a power-of-two ring. Each slot `i` holds at most one packet whose
//! sequence number is congruent to `i` modulo the capacity.
//!
//! ## Key design decisions
//!
//! - **Half-range ordering**: a sequence number is "newer" when its wrapping
//!   distance from `last_added` is in `1..32768`; no epoch counter needed.
//! - **Gap clearing**: skipping ahead clears every slot in between, so a
//!   lookup can never return a packet left over from a previous lap.
//! - **Aliasing guard**: `get` compares the stored sequence number, not just
//!   the slot index.
//! - **Retain under lock**: `get` retains while holding the read lock, so a
//!   concurrent eviction or teardown cannot free the packet first.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::error::{NackError, Result};
use crate::packet::RetainablePacket;
use crate::seq;

/// Largest accepted capacity (2^15).
pub const MAX_CAPACITY: u16 = 1 << 15;

/// Default capacity for a freshly bound stream.
pub const DEFAULT_CAPACITY: u16 = 1024;

/// Every capacity [`SendBuffer::new`] accepts: powers of two up to 2^15.
pub fn allowed_capacities() -> Vec<u16> {
    (0..16).map(|i| 1u16 << i).collect()
}

/// Check a requested capacity against the allowed sizes.
pub fn validate_capacity(size: usize) -> Result<u16> {
    if size.is_power_of_two() && size <= MAX_CAPACITY as usize {
        Ok(size as u16)
    } else {
        Err(NackError::InvalidCapacity {
            size,
            allowed: allowed_capacities(),
        })
    }
}

struct Ring {
    slots: Vec<Option<RetainablePacket>>,
    last_added: u16,
    started: bool,
    finished: bool,
}

impl Ring {
    /// Empty slot `idx`. True if its old occupant is still referenced
    /// elsewhere.
    fn evict(&mut self, idx: usize) -> bool {
        self.slots[idx].take().is_some_and(RetainablePacket::release)
    }
}

// ─── SendBuffer ─────────────────────────────────────────────────────────────

/// Fixed-capacity history of one stream's sent packets.
///
/// Shared between the stream's writer, which adds, and the report workers,
/// which look packets up. Teardown with [`release`](Self::release) is final.
pub struct SendBuffer {
    ring: RwLock<Ring>,
    capacity: u16,
}

impl SendBuffer {
    /// Create an empty buffer. `capacity` must be a power of two in
    /// `1..=32768`.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = validate_capacity(capacity)?;
        Ok(SendBuffer {
            ring: RwLock::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                last_added: 0,
                started: false,
                finished: false,
            }),
            capacity,
        })
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    #[inline]
    fn index(&self, seq: u16) -> usize {
        (seq % self.capacity) as usize
    }

    fn read(&self) -> RwLockReadGuard<'_, Ring> {
        self.ring.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ring> {
        self.ring.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `packet`, taking over its reference.
    ///
    /// Returns `true` if any packet evicted by this insert was still
    /// referenced elsewhere after the buffer let go of it. That is a
    /// diagnostic for the caller to log, not a failure.
    pub fn add(&self, packet: RetainablePacket) -> bool {
        let seq = packet.sequence_number();
        let mut ring = self.write();

        if ring.finished {
            debug!(seq, "send buffer add after release");
            packet.release();
            return false;
        }

        if !ring.started {
            let idx = self.index(seq);
            ring.slots[idx] = Some(packet);
            ring.last_added = seq;
            ring.started = true;
            return false;
        }

        let diff = seq::distance(ring.last_added, seq);
        if diff == 0 {
            trace!(seq, "duplicate add ignored");
            packet.release();
            return false;
        }

        let mut remain = false;
        let forward = diff < seq::HALF;
        if forward && diff > 1 {
            // Past one full lap every slot gets cleared anyway.
            for s in seq::between(ring.last_added, seq).take(self.capacity as usize) {
                let idx = self.index(s);
                remain |= ring.evict(idx);
            }
        }

        let idx = self.index(seq);
        remain |= ring.evict(idx);
        ring.slots[idx] = Some(packet);
        if forward {
            ring.last_added = seq;
        }
        remain
    }

    /// Look up `seq` and return a new reference to it.
    ///
    /// `None` when `seq` has not been sent yet, has aged out of the window,
    /// was skipped, or its slot now belongs to a different sequence number.
    pub fn get(&self, seq: u16) -> Option<RetainablePacket> {
        let ring = self.read();

        if ring.finished {
            debug!(seq, "send buffer get after release");
            return None;
        }
        if !ring.started {
            return None;
        }

        let age = seq::age(ring.last_added, seq)?;
        if age >= self.capacity {
            return None;
        }

        let pkt = ring.slots[self.index(seq)].as_ref()?;
        if pkt.sequence_number() != seq {
            return None;
        }
        pkt.retain().ok()
    }

    /// Release every stored packet and mark the buffer finished.
    ///
    /// Returns `true` if any packet was still referenced elsewhere.
    pub fn release(&self) -> bool {
        let mut ring = self.write();
        let mut remain = false;
        for slot in ring.slots.iter_mut() {
            if let Some(pkt) = slot.take() {
                remain |= pkt.release();
            }
        }
        ring.finished = true;
        remain
    }

    /// Last sequence number accepted, or `None` before the first insert.
    pub fn last_added(&self) -> Option<u16> {
        let ring = self.read();
        ring.started.then_some(ring.last_added)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.read().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.read().finished
    }
}

impl std::fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendBuffer")
            .field("capacity", &self.capacity)
            .field("last_added", &self.last_added())
            .finish()
    }
}
