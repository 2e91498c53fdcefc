//! Throughput Benchmark for TinyKV
//!
//! Measures the storage engine, the RESP codec and command execution.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tinykv::commands::CommandHandler;
use tinykv::protocol::{decode_command, Reply};
use tinykv::storage::{unix_now, ExpiryManager, StorageEngine};

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, Bytes::from_static(b"small_value"));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        engine.set(key, value);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark INCR operations
fn bench_incr(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_counter", |b| {
        b.iter(|| {
            black_box(engine.incr_by(b"counter", 1).unwrap());
        });
    });

    group.finish();
}

/// Benchmark one active expiry cycle over a store where every key is stale
fn bench_expiry_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");

    group.bench_function("cycle_all_expired_10k", |b| {
        b.iter_batched(
            || {
                let storage = Arc::new(StorageEngine::new());
                let past = unix_now() - 1;
                for i in 0..10_000 {
                    let key = Bytes::from(format!("key:{}", i));
                    storage.set(key.clone(), Bytes::from_static(b"v"));
                    storage.set_expiry(&key, past);
                }
                ExpiryManager::new(storage)
            },
            |expiry| black_box(expiry.run_cycle()),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark the RESP codec
fn bench_codec(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let set_command: &[u8] = b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n";

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("decode_set", |b| {
        b.iter(|| {
            let mut input = set_command;
            black_box(runtime.block_on(decode_command(&mut input)).unwrap());
        });
    });

    group.bench_function("encode_bulk", |b| {
        let reply = Reply::bulk(Bytes::from("x".repeat(1024)));
        let mut out = Vec::with_capacity(2048);
        b.iter(|| {
            out.clear();
            reply.encode_into(&mut out);
            black_box(out.len());
        });
    });

    group.finish();
}

/// Benchmark command execution without the network
fn bench_execute(c: &mut Criterion) {
    let storage = Arc::new(StorageEngine::new());
    let expiry = Arc::new(ExpiryManager::new(Arc::clone(&storage)));
    let handler = CommandHandler::new(storage, expiry);

    let set = vec![
        Bytes::from_static(b"SET"),
        Bytes::from_static(b"name"),
        Bytes::from_static(b"Ariz"),
    ];
    let get = vec![Bytes::from_static(b"GET"), Bytes::from_static(b"name")];

    let mut group = c.benchmark_group("execute");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        b.iter(|| black_box(handler.execute(set.clone()).unwrap()));
    });

    group.bench_function("get", |b| {
        b.iter(|| black_box(handler.execute(get.clone()).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_incr,
    bench_expiry_cycle,
    bench_codec,
    bench_execute,
);

criterion_main!(benches);
