//! # NACK responder demo
//!
//! Sends a synthetic RTP stream through a bound responder into a lossy sink,
//! then plays the receiver's part: it NACKs what the sink dropped and counts
//! how much of it comes back.
//!
//! ## Usage
//!
//! ```bash
//! nack-demo                           # defaults
//! nack-demo --config responder.toml   # buffer_size, workers, queue_capacity, [pool]
//! nack-demo --packets 5000 --loss-every 7
//! RUST_LOG=strata_nack=trace nack-demo
//! ```

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use strata_nack::rtp::nack_pairs_from_sequences;
use strata_nack::{
    Responder, ResponderConfig, RtcpFeedback, RtpHeader, RtpWriter, StreamInfo, TransportLayerNack,
};

const SSRC: u32 = 0x5354_5241;

struct Args {
    config: Option<String>,
    packets: u32,
    loss_every: u32,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: None,
        packets: 2000,
        loss_every: 10,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = || it.next().ok_or_else(|| anyhow::anyhow!("{flag} needs a value"));
        match flag.as_str() {
            "--config" => args.config = Some(value()?),
            "--packets" => args.packets = value()?.parse()?,
            "--loss-every" => args.loss_every = value()?.parse::<u32>()?.max(2),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Drops every `loss_every`-th first transmission; retransmissions always
/// get through.
struct LossySink {
    loss_every: u32,
    seen: Mutex<BTreeSet<u16>>,
    lost: Mutex<Vec<u16>>,
    recovered: Mutex<BTreeSet<u16>>,
    counter: Mutex<u32>,
}

impl RtpWriter for LossySink {
    fn write(&self, header: &RtpHeader, payload: &[u8]) -> io::Result<usize> {
        let seq = header.sequence_number;
        let first = self.seen.lock().unwrap_or_else(|e| e.into_inner()).insert(seq);
        if !first {
            self.recovered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(seq);
            return Ok(payload.len());
        }

        let mut n = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *n += 1;
        if *n % self.loss_every == 0 {
            self.lost.lock().unwrap_or_else(|e| e.into_inner()).push(seq);
        }
        Ok(payload.len())
    }
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => ResponderConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => ResponderConfig::default(),
    };

    tracing::info!(
        buffer_size = config.buffer_size,
        workers = config.workers,
        packets = args.packets,
        loss_every = args.loss_every,
        "nack-demo starting"
    );

    // ── Responder ───────────────────────────────────────────────
    let mut responder = Responder::with_config(config)?;
    let sink = Arc::new(LossySink {
        loss_every: args.loss_every,
        seen: Mutex::new(BTreeSet::new()),
        lost: Mutex::new(Vec::new()),
        recovered: Mutex::new(BTreeSet::new()),
        counter: Mutex::new(0),
    });
    let info = StreamInfo::new(SSRC).with_feedback(RtcpFeedback::nack());
    let writer = responder.bind_local_stream(&info, sink.clone());

    // ── Send, NACK every 100 packets ────────────────────────────
    let payload = [0x47u8; 188 * 7];
    for i in 0..args.packets {
        let seq = i as u16;
        let header = RtpHeader::new(SSRC, seq, i.wrapping_mul(3000)).with_payload_type(33);
        writer.write(&header, &payload)?;

        if i % 100 == 99 {
            let lost = std::mem::take(&mut *sink.lost.lock().unwrap_or_else(|e| e.into_inner()));
            if !lost.is_empty() {
                let nack = TransportLayerNack::new(1, SSRC, nack_pairs_from_sequences(&lost));
                responder.on_loss_report(nack);
            }
        }
    }

    responder.shutdown();
    responder.unbind_local_stream(&info);

    let stats = responder.stats();
    let recovered = sink.recovered.lock().unwrap_or_else(|e| e.into_inner()).len();
    tracing::info!(
        recovered,
        retransmissions = stats.retransmissions,
        missed = stats.packets_missed,
        dropped_reports = stats.reports_dropped,
        hit_ratio = stats.hit_ratio(),
        "nack-demo done"
    );
    println!("{}", toml::to_string_pretty(&stats)?);
    Ok(())
}
