//! # Retainable Packet
//!
//! A reference-counted copy of one outgoing RTP packet. The send buffer owns
//! the first reference; retransmit readers take transient extra references
//! with [`RetainablePacket::retain`] and give them back with
//! [`RetainablePacket::release`].
//!
//! Each `RetainablePacket` value *is* one counted reference. Dropping a
//! handle without calling `release` still gives its reference back. Once the
//! count reaches zero the storage goes back to its pool and any further
//! `retain` through a stale handle fails with [`NackError::AlreadyReleased`].

use bytes::BytesMut;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::error::{NackError, Result};
use crate::rtp::RtpHeader;

/// Where fully released storage goes.
///
/// A custom [`PacketFactory`](crate::PacketFactory) implements this to get
/// its storage back: packets built with [`RetainablePacket::pooled`] call
/// `recycle` once their reference count reaches zero. The storage can then be
/// refilled with [`RetainablePacket::reuse`].
pub trait Recycle: Send + Sync {
    fn recycle(&self, storage: Arc<PacketStorage>);
}

/// Backing storage shared by every handle of one packet.
pub struct PacketStorage {
    pub(crate) header: RtpHeader,
    pub(crate) payload: BytesMut,
    pub(crate) refs: AtomicUsize,
    pub(crate) home: Option<Weak<dyn Recycle>>,
}

impl PacketStorage {
    pub(crate) fn new(
        header: &RtpHeader,
        payload: &[u8],
        home: Option<Weak<dyn Recycle>>,
    ) -> Self {
        PacketStorage {
            header: header.clone(),
            payload: BytesMut::from(payload),
            refs: AtomicUsize::new(1),
            home,
        }
    }

    /// Refill recycled storage. Requires exclusive access, so no handle can
    /// observe the rewrite.
    pub(crate) fn reset(&mut self, header: &RtpHeader, payload: &[u8]) {
        self.header.clone_from(header);
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        *self.refs.get_mut() = 1;
    }

    /// Header of the last packet held in this storage.
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Bytes reserved for payloads, kept across reuse.
    pub fn payload_capacity(&self) -> usize {
        self.payload.capacity()
    }
}

impl fmt::Debug for PacketStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketStorage")
            .field("seq", &self.header.sequence_number)
            .field("refs", &self.refs.load(Ordering::Acquire))
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

// ─── RetainablePacket ───────────────────────────────────────────────────────

/// One counted reference to a buffered RTP packet.
///
/// Built by a [`PacketFactory`](crate::PacketFactory), stored in a
/// [`SendBuffer`](crate::SendBuffer), and handed out again (retained) for
/// each retransmission.
pub struct RetainablePacket {
    storage: Arc<PacketStorage>,
    /// False once this handle's reference was given back.
    live: bool,
}

impl RetainablePacket {
    /// Packet that is freed rather than recycled when its count hits zero.
    pub fn unpooled(header: &RtpHeader, payload: &[u8]) -> Self {
        Self::from_storage(Arc::new(PacketStorage::new(header, payload, None)))
    }

    /// Packet whose storage is handed to `home` when its count hits zero.
    ///
    /// If `home` is gone by then, the storage is freed instead.
    pub fn pooled(header: &RtpHeader, payload: &[u8], home: Weak<dyn Recycle>) -> Self {
        Self::from_storage(Arc::new(PacketStorage::new(header, payload, Some(home))))
    }

    /// Refill storage returned through [`Recycle::recycle`].
    ///
    /// Returns `None` (and drops the storage) if a stale handle still points
    /// at it. The packet keeps the storage's original home.
    pub fn reuse(
        mut storage: Arc<PacketStorage>,
        header: &RtpHeader,
        payload: &[u8],
    ) -> Option<Self> {
        Arc::get_mut(&mut storage)?.reset(header, payload);
        Some(Self::from_storage(storage))
    }

    /// Wrap storage whose count was set to 1 by the caller.
    pub(crate) fn from_storage(storage: Arc<PacketStorage>) -> Self {
        RetainablePacket {
            storage,
            live: true,
        }
    }

    pub fn header(&self) -> &RtpHeader {
        &self.storage.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.storage.payload
    }

    pub fn sequence_number(&self) -> u16 {
        self.storage.header.sequence_number
    }

    /// Current reference count across all handles.
    pub fn ref_count(&self) -> usize {
        self.storage.refs.load(Ordering::Acquire)
    }

    /// Take another reference.
    ///
    /// Fails once the count has reached zero: a fully released packet is
    /// never revived.
    pub fn retain(&self) -> Result<RetainablePacket> {
        self.storage
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .map_err(|_| NackError::AlreadyReleased)?;
        Ok(RetainablePacket {
            storage: Arc::clone(&self.storage),
            live: true,
        })
    }

    /// Give this handle's reference back.
    ///
    /// Returns `true` if other references remain, `false` if this was the
    /// last one and the storage went back to its pool.
    pub fn release(mut self) -> bool {
        self.live = false;
        self.drop_ref()
    }

    fn drop_ref(&self) -> bool {
        match self
            .storage
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                if let Some(home) = self.storage.home.as_ref().and_then(Weak::upgrade) {
                    home.recycle(Arc::clone(&self.storage));
                }
                false
            }
            Ok(_) => true,
            Err(_) => {
                warn!(
                    seq = self.storage.header.sequence_number,
                    "release on packet with no references left"
                );
                false
            }
        }
    }
}

impl Drop for RetainablePacket {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            self.drop_ref();
        }
    }
}

impl fmt::Debug for RetainablePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainablePacket")
            .field("ssrc", &self.storage.header.ssrc)
            .field("seq", &self.storage.header.sequence_number)
            .field("payload_len", &self.storage.payload.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(seq: u16) -> RetainablePacket {
        RetainablePacket::unpooled(&RtpHeader::new(1, seq, 0), b"payload")
    }

    #[test]
    fn starts_with_one_reference() {
        let p = pkt(7);
        assert_eq!(p.ref_count(), 1);
        assert_eq!(p.sequence_number(), 7);
        assert_eq!(p.payload(), b"payload");
    }

    #[test]
    fn retain_and_release_track_count() {
        let p = pkt(1);
        let q = p.retain().unwrap();
        assert_eq!(p.ref_count(), 2);

        assert!(q.release(), "owner still holds a reference");
        assert_eq!(p.ref_count(), 1);
        assert!(!p.release(), "last reference");
    }

    #[test]
    fn retain_after_last_release_fails() {
        let p = pkt(1);
        let extra = p.retain().unwrap();
        let stale = p.retain().unwrap();
        p.release();
        extra.release();

        // Only `stale` holds a reference now; drop it through a clone of the
        // storage so we can keep a handle to poke at.
        let observer = RetainablePacket {
            storage: Arc::clone(&stale.storage),
            live: false,
        };
        assert!(!stale.release());
        assert_eq!(observer.ref_count(), 0);
        assert!(matches!(observer.retain(), Err(NackError::AlreadyReleased)));
    }

    #[test]
    fn drop_gives_reference_back() {
        let p = pkt(3);
        {
            let _q = p.retain().unwrap();
            assert_eq!(p.ref_count(), 2);
        }
        assert_eq!(p.ref_count(), 1);
    }

    #[derive(Default)]
    struct Bin {
        returned: std::sync::Mutex<Vec<Arc<PacketStorage>>>,
    }

    impl Recycle for Bin {
        fn recycle(&self, storage: Arc<PacketStorage>) {
            self.returned.lock().unwrap().push(storage);
        }
    }

    #[test]
    fn pooled_storage_goes_home_and_is_reused() {
        let bin = Arc::new(Bin::default());
        let home: Weak<Bin> = Arc::downgrade(&bin);
        let p = RetainablePacket::pooled(&RtpHeader::new(1, 10, 0), b"first", home);
        let reader = p.retain().unwrap();
        assert!(p.release());
        assert!(bin.returned.lock().unwrap().is_empty());
        drop(reader);

        let storage = bin.returned.lock().unwrap().pop().unwrap();
        assert_eq!(storage.header().sequence_number, 10);
        let q = RetainablePacket::reuse(storage, &RtpHeader::new(1, 11, 0), b"second").unwrap();
        assert_eq!(q.sequence_number(), 11);
        assert_eq!(q.payload(), b"second");
        assert_eq!(q.ref_count(), 1);

        assert!(!q.release());
        assert_eq!(bin.returned.lock().unwrap().len(), 1);
    }

    #[test]
    fn reuse_refuses_shared_storage() {
        let bin = Arc::new(Bin::default());
        let home: Weak<Bin> = Arc::downgrade(&bin);
        let p = RetainablePacket::pooled(&RtpHeader::new(1, 1, 0), b"x", home);
        let stale = Arc::clone(&p.storage);
        p.release();

        let storage = bin.returned.lock().unwrap().pop().unwrap();
        assert!(RetainablePacket::reuse(storage, &RtpHeader::new(1, 2, 0), b"y").is_none());
        assert_eq!(stale.header().sequence_number, 1);
    }

    #[test]
    fn retain_is_atomic_across_threads() {
        let p = pkt(9);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let q = p.retain().unwrap();
                        q.release();
                    }
                });
            }
        });
        assert_eq!(p.ref_count(), 1);
    }
}
