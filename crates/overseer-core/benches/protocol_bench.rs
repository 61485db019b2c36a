//! Criterion benchmarks for line framing and beacon parsing.
//!
//! Run with:
//! ```bash
//! cargo bench --bench protocol_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use overseer_core::{protocol::beacon::is_beacon, BeaconMessage, LineBuffer, Secret, Session};

fn bench_line_buffer(c: &mut Criterion) {
    let chunk: Vec<u8> = (0..64).flat_map(|i| format!("line number {i}\n").into_bytes()).collect();

    c.bench_function("line_buffer_split_64_lines", |b| {
        b.iter(|| {
            let mut buf = LineBuffer::new();
            buf.push(black_box(&chunk)).expect("within limit");
            let mut count = 0;
            while buf.next_line().is_some() {
                count += 1;
            }
            count
        })
    });
}

fn bench_session(c: &mut Criterion) {
    let secret = Secret::new("admin123");

    c.bench_function("session_login_and_echo", |b| {
        b.iter(|| {
            let mut session = Session::new();
            session.handle_line(black_box("wrong"), &secret);
            session.handle_line(black_box("admin123"), &secret);
            session.handle_line(black_box("ping"), &secret)
        })
    });
}

fn bench_beacon(c: &mut Criterion) {
    let payload = BeaconMessage::online("192.168.0.42").encode();
    let noise = vec![0xA5u8; 512];

    c.bench_function("beacon_parse", |b| {
        b.iter(|| BeaconMessage::parse(black_box(&payload)))
    });
    c.bench_function("beacon_filter_noise", |b| b.iter(|| is_beacon(black_box(&noise))));
}

criterion_group!(benches, bench_line_buffer, bench_session, bench_beacon);
criterion_main!(benches);
