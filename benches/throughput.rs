//! Throughput Benchmark for ferrokv
//!
//! Measures the hot paths of a request: decoding, the hash table, sorted
//! set updates and full command execution.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ferrokv::protocol::RequestDecoder;
use ferrokv::server::Engine;
use ferrokv::storage::{Dict, SortedSet};

fn bench_dict(c: &mut Criterion) {
    let mut group = c.benchmark_group("dict");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut dict: Dict<u64> = Dict::new();
        let mut i = 0u64;
        b.iter(|| {
            dict.set(Bytes::from(format!("key:{}", i)), i);
            i += 1;
        });
    });

    group.bench_function("get_hit", |b| {
        let mut dict: Dict<u64> = Dict::new();
        for i in 0..100_000u64 {
            dict.set(Bytes::from(format!("key:{}", i)), i);
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(dict.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

fn bench_sorted_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("zset");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert", |b| {
        let mut zset = SortedSet::new();
        let mut i = 0u64;
        b.iter(|| {
            zset.insert(Bytes::from(format!("m{}", i)), (i % 1000) as f64);
            i += 1;
        });
    });

    group.bench_function("rank", |b| {
        let mut zset = SortedSet::new();
        for i in 0..10_000u64 {
            zset.insert(Bytes::from(format!("m{}", i)), i as f64);
        }
        let mut i = 0u64;
        b.iter(|| {
            let member = format!("m{}", i % 10_000);
            black_box(zset.rank(member.as_bytes(), false));
            i += 1;
        });
    });

    group.finish();
}

fn bench_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder");

    let mut pipeline = Vec::new();
    for i in 0..100 {
        let key = format!("key:{}", i);
        pipeline.extend_from_slice(
            format!("*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n$5\r\nvalue\r\n", key.len(), key).as_bytes(),
        );
    }
    group.throughput(Throughput::Bytes(pipeline.len() as u64));

    group.bench_function("pipeline_100_set", |b| {
        b.iter(|| {
            let mut decoder = RequestDecoder::new();
            let mut buf = BytesMut::from(&pipeline[..]);
            let mut count = 0;
            while let Ok(Some(args)) = decoder.decode(&mut buf) {
                black_box(args);
                count += 1;
            }
            assert_eq!(count, 100);
        });
    });

    group.bench_function("inline_ping", |b| {
        b.iter(|| {
            let mut decoder = RequestDecoder::new();
            let mut buf = BytesMut::from(&b"PING\r\n"[..]);
            black_box(decoder.decode(&mut buf).ok());
        });
    });

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_get", |b| {
        let mut engine = Engine::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i % 10_000));
            engine.execute(&[Bytes::from_static(b"SET"), key.clone(), Bytes::from_static(b"v")]);
            black_box(engine.execute(&[Bytes::from_static(b"GET"), key]));
            i += 1;
        });
    });

    group.bench_function("zadd", |b| {
        let mut engine = Engine::new();
        let mut i = 0u64;
        b.iter(|| {
            let score = Bytes::from((i % 1000).to_string());
            let member = Bytes::from(format!("m{}", i % 10_000));
            black_box(engine.execute(&[Bytes::from_static(b"ZADD"), Bytes::from_static(b"z"), score, member]));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_dict, bench_sorted_set, bench_decoder, bench_execute);
criterion_main!(benches);
