//! # NACK Responder
//!
//! Keeps a [`SendBuffer`] per bound outgoing stream and answers loss reports
//! by writing the requested packets again.
//!
//! ## Paths
//!
//! - **Write path**: the writer returned by [`Responder::bind_local_stream`]
//!   copies each packet into the stream's send buffer, then forwards it.
//! - **Report path**: [`Responder::on_loss_report`] only queues the report;
//!   a bounded worker pool does the lookups and resends so the RTCP reader
//!   never waits on retransmission I/O.
//!
//! The stream table is a sharded map. Entries are cloned out of it and used
//! without holding a shard lock.

use crossbeam_channel::TrySendError;
use dashmap::DashMap;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::ResponderConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::pool::{PacketFactory, PacketPool};
use crate::rtp::{stream_supports_nack, RtcpPacket, RtpHeader, StreamInfo, TransportLayerNack};
use crate::send_buffer::{validate_capacity, SendBuffer};
use crate::stats::{ResponderStats, ResponderStatsSnapshot};

/// Sink for outgoing RTP packets.
pub trait RtpWriter: Send + Sync {
    /// Write one packet. Returns the number of bytes written.
    fn write(&self, header: &RtpHeader, payload: &[u8]) -> io::Result<usize>;
}

impl<F> RtpWriter for F
where
    F: Fn(&RtpHeader, &[u8]) -> io::Result<usize> + Send + Sync,
{
    fn write(&self, header: &RtpHeader, payload: &[u8]) -> io::Result<usize> {
        self(header, payload)
    }
}

#[derive(Clone)]
struct LocalStream {
    send_buffer: Arc<SendBuffer>,
    writer: Arc<dyn RtpWriter>,
}

struct Shared {
    buffer_size: u16,
    factory: Arc<dyn PacketFactory>,
    streams: DashMap<u32, LocalStream>,
    stats: ResponderStats,
}

impl Shared {
    fn stream(&self, ssrc: u32) -> Option<LocalStream> {
        self.streams.get(&ssrc).map(|entry| entry.value().clone())
    }

    fn resend_packets(&self, nack: &TransportLayerNack) {
        self.stats.on_nack();
        let ssrc = nack.media_ssrc;
        let Some(stream) = self.stream(ssrc) else {
            debug!(ssrc, "loss report for unbound stream ignored");
            self.stats.on_unknown_stream();
            return;
        };

        for seq in nack.missing() {
            self.stats.on_requested();
            let Some(pkt) = stream.send_buffer.get(seq) else {
                trace!(ssrc, seq, "nacked packet not in send history");
                self.stats.on_missed();
                continue;
            };

            match stream.writer.write(pkt.header(), pkt.payload()) {
                Ok(_) => {
                    trace!(ssrc, seq, "retransmitted");
                    self.stats.on_retransmit();
                }
                Err(e) => {
                    warn!(ssrc, seq, error = %e, "failed resending nacked packet");
                    self.stats.on_retransmit_failure();
                }
            }
            pkt.release();
        }
    }
}

// ─── NackWriter ─────────────────────────────────────────────────────────────

/// Writer handed back by [`Responder::bind_local_stream`].
struct NackWriter {
    ssrc: u32,
    send_buffer: Arc<SendBuffer>,
    inner: Arc<dyn RtpWriter>,
    shared: Arc<Shared>,
}

impl RtpWriter for NackWriter {
    fn write(&self, header: &RtpHeader, payload: &[u8]) -> io::Result<usize> {
        // Stale writer after unbind or rebind: forward only.
        if self.send_buffer.is_finished() {
            trace!(
                ssrc = self.ssrc,
                seq = header.sequence_number,
                "stream unbound, not buffering"
            );
            return self.inner.write(header, payload);
        }

        let pkt = self
            .shared
            .factory
            .new_packet(header, payload)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;

        if self.send_buffer.add(pkt) {
            warn!(
                ssrc = self.ssrc,
                seq = header.sequence_number,
                "evicted packet still referenced after send buffer add"
            );
            self.shared.stats.on_anomaly();
        }
        self.shared.stats.on_buffered();

        self.inner.write(header, payload)
    }
}

// ─── Responder ──────────────────────────────────────────────────────────────

/// Answers NACK feedback for bound local streams.
///
/// Dropping the responder stops its report workers after they finish the
/// reports already queued.
pub struct Responder {
    shared: Arc<Shared>,
    dispatcher: Dispatcher<TransportLayerNack>,
}

impl Responder {
    /// Responder with default settings and an internal packet pool.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Responder built from resolved settings, with an internal packet pool.
    pub fn with_config(config: ResponderConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Start from defaults and override individual options.
    pub fn builder() -> ResponderBuilder {
        ResponderBuilder::default()
    }

    /// Start buffering packets written to `writer`.
    ///
    /// Streams that did not negotiate generic NACK get `writer` back
    /// unchanged. Binding an SSRC that is already bound replaces (and
    /// releases) the previous history.
    pub fn bind_local_stream(
        &self,
        info: &StreamInfo,
        writer: Arc<dyn RtpWriter>,
    ) -> Arc<dyn RtpWriter> {
        if !stream_supports_nack(info) {
            return writer;
        }

        let send_buffer = match SendBuffer::new(self.shared.buffer_size as usize) {
            Ok(buf) => Arc::new(buf),
            Err(e) => {
                warn!(
                    ssrc = info.ssrc,
                    error = %e,
                    "cannot create send buffer, NACK disabled for stream"
                );
                return writer;
            }
        };

        let stream = LocalStream {
            send_buffer: Arc::clone(&send_buffer),
            writer: Arc::clone(&writer),
        };
        if let Some(previous) = self.shared.streams.insert(info.ssrc, stream) {
            warn!(ssrc = info.ssrc, "stream bound twice, dropping previous send history");
            previous.send_buffer.release();
        }
        debug!(ssrc = info.ssrc, capacity = self.shared.buffer_size, "local stream bound");

        Arc::new(NackWriter {
            ssrc: info.ssrc,
            send_buffer,
            inner: writer,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Forget a stream and release its send history.
    pub fn unbind_local_stream(&self, info: &StreamInfo) {
        let Some((ssrc, stream)) = self.shared.streams.remove(&info.ssrc) else {
            return;
        };
        info!(ssrc, "unbinding local stream");
        if stream.send_buffer.release() {
            warn!(ssrc, "packets still referenced after send buffer release");
            self.shared.stats.on_anomaly();
        }
    }

    /// Queue a loss report for the worker pool. Never blocks.
    ///
    /// Returns `false` if the report was dropped because the queue is full.
    pub fn on_loss_report(&self, nack: TransportLayerNack) -> bool {
        match self.dispatcher.submit(nack) {
            Ok(()) => true,
            Err(TrySendError::Full(nack)) => {
                warn!(ssrc = nack.media_ssrc, "report queue full, dropping loss report");
                self.shared.stats.on_report_dropped();
                false
            }
            Err(TrySendError::Disconnected(nack)) => {
                warn!(ssrc = nack.media_ssrc, "report workers stopped, dropping loss report");
                self.shared.stats.on_report_dropped();
                false
            }
        }
    }

    /// Queue every transport-layer NACK found in a decoded RTCP batch.
    ///
    /// Returns how many reports were queued.
    pub fn on_rtcp_batch(&self, packets: &[RtcpPacket]) -> usize {
        packets
            .iter()
            .filter_map(|p| match p {
                RtcpPacket::TransportLayerNack(nack) => Some(nack),
                _ => None,
            })
            .filter(|nack| self.on_loss_report((*nack).clone()))
            .count()
    }

    /// Handle a loss report on the calling thread.
    pub fn resend_packets(&self, nack: &TransportLayerNack) {
        self.shared.resend_packets(nack);
    }

    /// Send history of a bound stream.
    pub fn send_buffer(&self, ssrc: u32) -> Option<Arc<SendBuffer>> {
        self.shared.stream(ssrc).map(|s| s.send_buffer)
    }

    pub fn bound_streams(&self) -> usize {
        self.shared.streams.len()
    }

    pub fn buffer_size(&self) -> u16 {
        self.shared.buffer_size
    }

    /// Reports waiting for a worker.
    pub fn queued_reports(&self) -> usize {
        self.dispatcher.queued()
    }

    pub fn stats(&self) -> ResponderStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop the workers once the queued reports are done.
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

/// Options for a [`Responder`]. Unset options come from
/// [`ResponderConfig::default`].
#[derive(Default)]
pub struct ResponderBuilder {
    config: ResponderConfig,
    buffer_size: Option<usize>,
    factory: Option<Arc<dyn PacketFactory>>,
}

impl ResponderBuilder {
    /// Replace every setting with `config`. Call before the individual
    /// setters, which override it.
    pub fn config(mut self, config: ResponderConfig) -> Self {
        self.config = config;
        self
    }

    /// Send buffer capacity per stream. Checked in [`build`](Self::build).
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Allocate send-buffer packets from `factory` instead of the internal
    /// pool.
    pub fn packet_factory(mut self, factory: Arc<dyn PacketFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Report worker threads. Zero is raised to one.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Loss reports that may wait for a worker before new ones are dropped.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Validate the buffer size and start the report workers.
    ///
    /// Fails with [`NackError::InvalidCapacity`](crate::NackError::InvalidCapacity)
    /// or if a worker thread cannot be spawned.
    pub fn build(self) -> Result<Responder> {
        let buffer_size = validate_capacity(
            self.buffer_size
                .unwrap_or(self.config.buffer_size as usize),
        )?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(PacketPool::with_config(self.config.pool.clone())));

        let shared = Arc::new(Shared {
            buffer_size,
            factory,
            streams: DashMap::new(),
            stats: ResponderStats::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let dispatcher = Dispatcher::spawn(
            "nack-responder",
            self.config.workers.max(1),
            self.config.queue_capacity.max(1),
            move |nack: TransportLayerNack| worker_shared.resend_packets(&nack),
        )?;

        Ok(Responder { shared, dispatcher })
    }
}
