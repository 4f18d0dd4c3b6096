//! Message codec throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use netmon_helper::executor::{ConnectionCounters, CounterEntry};
use netmon_helper::ipc::{
    AuthenticateRequest, Message, MessageCodec, RequestId, SharedSecret, StatsResponse,
};

fn counters_payload(interfaces: usize) -> Vec<u8> {
    let counters = ConnectionCounters {
        captured_at: 1_700_000_000,
        entries: (0..interfaces)
            .map(|i| CounterEntry {
                name: format!("eth{}", i),
                rx_bytes: 1_000_000 * i as u64,
                tx_bytes: 500_000 * i as u64,
            })
            .collect(),
    };
    counters.encode().unwrap()
}

fn stats_response(interfaces: usize) -> Message {
    Message::ConnectionStatsResponse(StatsResponse {
        request_id: RequestId(42),
        payload: counters_payload(interfaces),
    })
}

fn bench_encode(c: &mut Criterion) {
    let codec = MessageCodec::default();
    let mut group = c.benchmark_group("encode_stats_response");

    for (name, interfaces) in [("small", 4), ("medium", 64), ("large", 1024)] {
        let message = stats_response(interfaces);
        group.throughput(Throughput::Elements(interfaces as u64));
        group.bench_with_input(BenchmarkId::new("interfaces", name), &message, |b, msg| {
            b.iter(|| codec.encode(black_box(msg)))
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = MessageCodec::default();
    let mut group = c.benchmark_group("decode_stats_response");

    for (name, interfaces) in [("small", 4), ("medium", 64), ("large", 1024)] {
        let body = codec.encode(&stats_response(interfaces)).unwrap();
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("interfaces", name), &body, |b, bytes| {
            b.iter(|| codec.decode(black_box(bytes)))
        });
    }

    group.finish();
}

fn bench_authenticate(c: &mut Criterion) {
    let codec = MessageCodec::default();
    let secret = SharedSecret::generate().unwrap();

    c.bench_function("sign_and_encode_authenticate", |b| {
        b.iter(|| {
            let timestamp = black_box(1_700_000_000);
            let message = Message::Authenticate(AuthenticateRequest {
                identity: "netmon-ui".into(),
                timestamp,
                proof: secret.sign("netmon-ui", timestamp),
            });
            codec.encode(&message).unwrap()
        })
    });

    c.bench_function("heartbeat_roundtrip", |b| {
        b.iter(|| {
            let encoded = codec.encode(black_box(&Message::Heartbeat)).unwrap();
            codec.decode(black_box(&encoded))
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_authenticate);
criterion_main!(benches);
