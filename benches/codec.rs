//! Benchmarks for the frame codec and ring buffer
//!
//! Run with: cargo bench

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use tickws::RingBuffer;
use tickws::frame::{Decoded, encode_frame, push_frame, try_read};
use tickws::handshake;
use tickws::mask::apply_mask;

const SIZES: [usize; 5] = [16, 125, 1024, 4096, 8192];

/// Client-to-server text frame with a fixed mask
fn masked_frame(payload: &[u8]) -> Vec<u8> {
    let mask = [0x37, 0xfa, 0x21, 0x3d];
    let mut out = vec![0x81];
    match payload.len() {
        n if n <= 125 => out.push(0x80 | n as u8),
        n => {
            out.push(0x80 | 126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
    }
    out.extend_from_slice(&mask);
    let mut body = payload.to_vec();
    apply_mask(&mut body, mask);
    out.extend(body);
    out
}

fn bench_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");

    for size in [64, 256, 1024, 4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("apply_mask", size), &size, |b, &size| {
            let mut data = vec![0x42u8; size];
            let mask = [0x37, 0xfa, 0x21, 0x3d];

            b.iter(|| {
                apply_mask(black_box(&mut data), black_box(mask));
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in SIZES {
        let payload = vec![b'a'; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("bytes_mut", size), &payload, |b, payload| {
            let mut buf = BytesMut::with_capacity(size + 16);
            b.iter(|| {
                buf.clear();
                encode_frame(&mut buf, black_box(payload));
            });
        });

        group.bench_with_input(BenchmarkId::new("ring", size), &payload, |b, payload| {
            let mut ring = RingBuffer::new(64 << 10);
            b.iter(|| {
                assert!(push_frame(&mut ring, black_box(payload)));
                let len = ring.get_space();
                ring.advance_get(len);
            });
        });
    }

    group.finish();
}

/// Push a masked frame, decode it, copy it out, release it
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in SIZES {
        let frame = masked_frame(&vec![b'z'; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("masked", size), &frame, |b, frame| {
            let mut ring = RingBuffer::new(64 << 10);
            let mut out = vec![0u8; size];
            b.iter(|| {
                assert!(ring.push(frame));
                match try_read(&mut ring) {
                    Decoded::Message { offset, len } => {
                        ring.copy_out(offset, &mut out[..len]);
                        ring.advance_get(offset + len);
                    }
                    other => panic!("unexpected {:?}", other),
                }
                black_box(&out);
            });
        });
    }

    group.finish();
}

fn bench_handshake(c: &mut Criterion) {
    let request = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    c.bench_function("handshake/process", |b| {
        b.iter(|| handshake::process(black_box(request)));
    });
}

criterion_group!(benches, bench_mask, bench_encode, bench_decode, bench_handshake);
criterion_main!(benches);
