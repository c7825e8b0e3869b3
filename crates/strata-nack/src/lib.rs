//! # strata-nack
//!
//! Send-side NACK handling for Strata RTP streams.
//!
//! Every packet written to a bound stream is copied into a fixed-size,
//! sequence-indexed history. When the receiver reports losses with an RTCP
//! Generic NACK, the named packets are looked up and written again. There is
//! no pacing or congestion control here: retransmission is find-and-resend.
//!
//! ## Crate structure
//!
//! - [`seq`] — 16-bit wrapping sequence arithmetic
//! - [`rtp`] — Decoded RTP header, stream info, NACK report types
//! - [`packet`] — Reference-counted packet copies
//! - [`pool`] — Packet storage recycling and the `PacketFactory` seam
//! - [`send_buffer`] — Per-stream ring of sent packets
//! - [`responder`] — Stream table, write-path wrapper, report handling
//! - [`config`] — Responder settings and TOML loading
//! - [`stats`] — Responder counters
//! - [`error`] — Error type

pub mod config;
mod dispatch;
pub mod error;
pub mod packet;
pub mod pool;
pub mod responder;
pub mod rtp;
pub mod send_buffer;
pub mod seq;
pub mod stats;

pub use config::ResponderConfig;
pub use error::{NackError, Result};
pub use packet::{PacketStorage, Recycle, RetainablePacket};
pub use pool::{PacketFactory, PacketPool};
pub use responder::{Responder, ResponderBuilder, RtpWriter};
pub use rtp::{NackPair, RtcpFeedback, RtpHeader, StreamInfo, TransportLayerNack};
pub use send_buffer::SendBuffer;
