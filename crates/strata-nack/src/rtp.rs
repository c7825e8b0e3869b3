//! # RTP / RTCP Types
//!
//! The subset of RTP and RTCP the responder consumes from its host. Wire
//! parsing is the host's job; these are already-decoded values.

/// Decoded RTP fixed header (RFC 3550 §5.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    /// Minimal version-2 header for a given stream position.
    pub fn new(ssrc: u32, sequence_number: u16, timestamp: u32) -> Self {
        RtpHeader {
            version: 2,
            sequence_number,
            timestamp,
            ssrc,
            ..Default::default()
        }
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_marker(mut self) -> Self {
        self.marker = true;
        self
    }
}

// ─── Stream Negotiation ─────────────────────────────────────────────────────

/// One negotiated `a=rtcp-fb` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpFeedback {
    /// Feedback type, e.g. `nack`, `ccm`, `goog-remb`.
    pub typ: String,
    /// Feedback parameter, e.g. `pli` for `nack pli`. Empty for generic NACK.
    pub parameter: String,
}

impl RtcpFeedback {
    pub fn new(typ: impl Into<String>, parameter: impl Into<String>) -> Self {
        RtcpFeedback {
            typ: typ.into(),
            parameter: parameter.into(),
        }
    }

    /// Generic NACK (`a=rtcp-fb:* nack`).
    pub fn nack() -> Self {
        Self::new("nack", "")
    }
}

/// What the host knows about a local (outgoing) stream when binding it.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub id: String,
    pub ssrc: u32,
    pub payload_type: u8,
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl StreamInfo {
    pub fn new(ssrc: u32) -> Self {
        StreamInfo {
            ssrc,
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, fb: RtcpFeedback) -> Self {
        self.rtcp_feedback.push(fb);
        self
    }
}

/// Whether generic NACK was negotiated for this stream.
///
/// `nack pli` is a picture-loss request, not a retransmission capability.
pub fn stream_supports_nack(info: &StreamInfo) -> bool {
    info.rtcp_feedback
        .iter()
        .any(|fb| fb.typ == "nack" && fb.parameter.is_empty())
}

// ─── Transport Layer NACK ───────────────────────────────────────────────────

/// One FCI entry of a Generic NACK (RFC 4585 §6.2.1).
///
/// `packet_id` is lost; bit `i` of `lost_packets` marks `packet_id + i + 1`
/// as lost too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    pub fn new(packet_id: u16, lost_packets: u16) -> Self {
        NackPair {
            packet_id,
            lost_packets,
        }
    }

    /// Iterate the missing sequence numbers, `packet_id` first.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        let base = self.packet_id;
        std::iter::once(base).chain((0..16u16).filter_map(move |i| {
            if self.lost_packets & (1 << i) != 0 {
                Some(base.wrapping_add(i + 1))
            } else {
                None
            }
        }))
    }

    pub fn packet_list(&self) -> Vec<u16> {
        self.iter().collect()
    }
}

/// Build the smallest set of NACK pairs covering `seqs`, given in send order.
pub fn nack_pairs_from_sequences(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = Vec::new();
    for &seq in seqs {
        if let Some(last) = pairs.last_mut() {
            let d = seq.wrapping_sub(last.packet_id);
            if (1..=16).contains(&d) {
                last.lost_packets |= 1 << (d - 1);
                continue;
            }
        }
        pairs.push(NackPair::new(seq, 0));
    }
    pairs
}

/// Decoded RTCP Transport Layer NACK (PT=205, FMT=1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    /// SSRC of the media stream the losses refer to.
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl TransportLayerNack {
    pub fn new(sender_ssrc: u32, media_ssrc: u32, nacks: Vec<NackPair>) -> Self {
        TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        }
    }

    /// Every missing sequence number named by the report, in report order.
    pub fn missing(&self) -> impl Iterator<Item = u16> + '_ {
        self.nacks.iter().flat_map(|pair| pair.iter())
    }
}

/// A decoded RTCP packet as delivered by the host's RTCP reader.
///
/// Only transport-layer NACKs matter to the responder; the rest of a
/// compound packet is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    TransportLayerNack(TransportLayerNack),
    Other { packet_type: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nack_pair_expands_bitmask() {
        let pair = NackPair::new(100, 0b1000_0000_0000_0101);
        assert_eq!(pair.packet_list(), vec![100, 101, 103, 116]);
    }

    #[test]
    fn nack_pair_wraps() {
        let pair = NackPair::new(65535, 0b11);
        assert_eq!(pair.packet_list(), vec![65535, 0, 1]);
    }

    #[test]
    fn pairs_from_sequences_coalesce() {
        let pairs = nack_pairs_from_sequences(&[10, 11, 12, 40, 56, 57]);
        assert_eq!(
            pairs,
            vec![
                NackPair::new(10, 0b11),
                NackPair::new(40, 1 << 15),
                NackPair::new(57, 0),
            ]
        );
        let seqs: Vec<u16> = pairs.iter().flat_map(|p| p.iter()).collect();
        assert_eq!(seqs, vec![10, 11, 12, 40, 56, 57]);
    }

    #[test]
    fn report_missing_in_order() {
        let report = TransportLayerNack::new(
            1,
            2,
            vec![NackPair::new(5, 0b1), NackPair::new(30, 0)],
        );
        assert_eq!(report.missing().collect::<Vec<_>>(), vec![5, 6, 30]);
    }

    #[test]
    fn capability_requires_generic_nack() {
        let plain = StreamInfo::new(1);
        assert!(!stream_supports_nack(&plain));

        let pli_only = StreamInfo::new(1).with_feedback(RtcpFeedback::new("nack", "pli"));
        assert!(!stream_supports_nack(&pli_only));

        let nack = StreamInfo::new(1)
            .with_feedback(RtcpFeedback::new("goog-remb", ""))
            .with_feedback(RtcpFeedback::nack());
        assert!(stream_supports_nack(&nack));
    }
}
