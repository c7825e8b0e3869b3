//! Hot-path benchmarks for the NACK send history.
//!
//! - Pool allocation (fresh vs. recycled storage)
//! - SendBuffer add (steady state, ring full)
//! - SendBuffer get (hit, miss)
//! - Full write path through a bound responder
//!
//! Run with: cargo bench --package strata-nack

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::io;
use std::sync::Arc;

use strata_nack::{
    PacketPool, Responder, RtcpFeedback, RtpHeader, RtpWriter, SendBuffer, StreamInfo,
};

const PAYLOAD: [u8; 1200] = [0xAB; 1200];

// ─── Pool ────────────────────────────────────────────────────────────────

fn bench_pool_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_allocate");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));

    group.bench_function("recycled_1200B", |b| {
        let pool = PacketPool::new();
        let header = RtpHeader::new(1, 0, 0);
        b.iter(|| {
            let pkt = pool.allocate(black_box(&header), black_box(&PAYLOAD)).unwrap();
            black_box(pkt.release());
        });
    });

    group.finish();
}

// ─── SendBuffer ──────────────────────────────────────────────────────────

fn bench_send_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_buffer");

    group.bench_function("add_steady_state_1024", |b| {
        let pool = PacketPool::new();
        let buf = SendBuffer::new(1024).unwrap();
        let mut seq = 0u16;
        b.iter(|| {
            let pkt = pool.allocate(&RtpHeader::new(1, seq, 0), &PAYLOAD).unwrap();
            black_box(buf.add(pkt));
            seq = seq.wrapping_add(1);
        });
    });

    let pool = PacketPool::new();
    let buf = SendBuffer::new(1024).unwrap();
    for seq in 0..2048u16 {
        buf.add(pool.allocate(&RtpHeader::new(1, seq, 0), &PAYLOAD).unwrap());
    }

    group.bench_function("get_hit", |b| {
        let mut back = 0u16;
        b.iter(|| {
            let seq = 2047u16.wrapping_sub(back % 1024);
            if let Some(pkt) = buf.get(black_box(seq)) {
                black_box(pkt.release());
            }
            back = back.wrapping_add(1);
        });
    });

    group.bench_function("get_miss_aged_out", |b| {
        b.iter(|| black_box(buf.get(black_box(10))));
    });

    group.finish();
}

// ─── Responder ───────────────────────────────────────────────────────────

struct NullSink;

impl RtpWriter for NullSink {
    fn write(&self, _header: &RtpHeader, payload: &[u8]) -> io::Result<usize> {
        Ok(payload.len())
    }
}

fn bench_bound_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("responder");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));

    group.bench_function("bound_write_1200B", |b| {
        let responder = Responder::new().unwrap();
        let info = StreamInfo::new(1).with_feedback(RtcpFeedback::nack());
        let writer = responder.bind_local_stream(&info, Arc::new(NullSink));
        let mut seq = 0u16;
        b.iter(|| {
            let header = RtpHeader::new(1, seq, 0);
            black_box(writer.write(&header, &PAYLOAD).unwrap());
            seq = seq.wrapping_add(1);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool_allocate, bench_send_buffer, bench_bound_write);
criterion_main!(benches);
