//! # Responder Statistics
//!
//! Lock-free counters updated from the write path and the report workers,
//! plus a serializable snapshot for export.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the responder and its workers.
#[derive(Debug, Default)]
pub struct ResponderStats {
    packets_buffered: AtomicU64,
    nacks_received: AtomicU64,
    sequences_requested: AtomicU64,
    retransmissions: AtomicU64,
    retransmit_failures: AtomicU64,
    packets_missed: AtomicU64,
    reports_dropped: AtomicU64,
    unknown_stream_reports: AtomicU64,
    anomalies: AtomicU64,
}

/// Point-in-time copy of [`ResponderStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponderStatsSnapshot {
    /// Outgoing packets stored in a send buffer.
    pub packets_buffered: u64,
    /// Loss reports handled by a worker or `resend_packets`.
    pub nacks_received: u64,
    /// Sequence numbers named across all processed reports.
    pub sequences_requested: u64,
    /// Packets written again in response to a report.
    pub retransmissions: u64,
    /// Retransmissions the sink refused.
    pub retransmit_failures: u64,
    /// Requested sequences no longer (or never) in the send history.
    pub packets_missed: u64,
    /// Reports discarded because the worker queue was full.
    pub reports_dropped: u64,
    /// Reports naming a stream that is not bound.
    pub unknown_stream_reports: u64,
    /// Evictions or teardowns that found a packet still referenced.
    pub anomalies: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ResponderStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        on_buffered => packets_buffered,
        on_nack => nacks_received,
        on_requested => sequences_requested,
        on_retransmit => retransmissions,
        on_retransmit_failure => retransmit_failures,
        on_missed => packets_missed,
        on_report_dropped => reports_dropped,
        on_unknown_stream => unknown_stream_reports,
        on_anomaly => anomalies,
    }

    pub fn snapshot(&self) -> ResponderStatsSnapshot {
        ResponderStatsSnapshot {
            packets_buffered: self.packets_buffered.load(Ordering::Relaxed),
            nacks_received: self.nacks_received.load(Ordering::Relaxed),
            sequences_requested: self.sequences_requested.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            retransmit_failures: self.retransmit_failures.load(Ordering::Relaxed),
            packets_missed: self.packets_missed.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            unknown_stream_reports: self.unknown_stream_reports.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

impl ResponderStatsSnapshot {
    /// Share of requested sequences that were actually resent.
    pub fn hit_ratio(&self) -> f64 {
        if self.sequences_requested == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.sequences_requested as f64
        }
    }

    /// Retransmissions relative to packets originally buffered.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.packets_buffered == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.packets_buffered as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = ResponderStats::new();
        stats.on_buffered();
        stats.on_buffered();
        stats.on_requested();
        stats.on_requested();
        stats.on_retransmit();
        stats.on_missed();

        let snap = stats.snapshot();
        assert_eq!(snap.packets_buffered, 2);
        assert_eq!(snap.sequences_requested, 2);
        assert_eq!(snap.retransmissions, 1);
        assert_eq!(snap.packets_missed, 1);
        assert!((snap.hit_ratio() - 0.5).abs() < 1e-9);
        assert!((snap.retransmit_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ratios_zero_when_idle() {
        let snap = ResponderStatsSnapshot::default();
        assert_eq!(snap.hit_ratio(), 0.0);
        assert_eq!(snap.retransmit_ratio(), 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = ResponderStats::new();
        stats.on_nack();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["nacks_received"], 1);
        assert_eq!(json["reports_dropped"], 0);
    }
}
