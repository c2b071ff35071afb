use core::{hint::black_box, num::NonZeroUsize, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::join_all;
use hpdummy::{
    BufferPool, ByteSink, DEFAULT_CHUNK_SIZE, StreamDescriptor, StreamEmitter, emit_chunked,
    emit_known_length,
};
use http_body_util::BodyExt;
use std::{io, time::Instant};
use tokio::runtime::Builder;

const BUFFER_SIZE: usize = 256 * 1024;

/// Counts bytes and discards them, so the benchmark measures the emitter.
#[derive(Default)]
struct CountingSink {
    bytes: u64,
    flushes: u64,
}

impl ByteSink for CountingSink {
    async fn write(&mut self, bytes: bytes::Bytes) -> io::Result<()> {
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

fn bench_emitter(c: &mut Criterion) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let pool = BufferPool::new(BUFFER_SIZE);
    pool.prewarm(4);

    let mut group = c.benchmark_group("emitter");
    for total in [1u64 << 20, 64 << 20, 1 << 30] {
        group.throughput(Throughput::Bytes(total));
        group.bench_function(format!("bulk/{}MiB", total >> 20), |b| {
            b.to_async(&rt).iter(|| async {
                let mut sink = CountingSink::default();
                let descriptor = StreamDescriptor::known_length(total, DEFAULT_CHUNK_SIZE);
                let written = StreamEmitter::new(descriptor, pool.acquire())
                    .emit(&mut sink)
                    .await
                    .unwrap();
                black_box(written)
            });
        });
    }

    // one flush per 1 KiB chunk and no delay: the per-chunk overhead
    let total = 8u64 << 20;
    group.throughput(Throughput::Bytes(total));
    group.bench_function("paced/8MiB/1KiB", |b| {
        b.to_async(&rt).iter(|| async {
            let mut sink = CountingSink::default();
            let descriptor =
                StreamDescriptor::chunked(total, DEFAULT_CHUNK_SIZE, Duration::ZERO, true);
            StreamEmitter::new(descriptor, pool.acquire())
                .emit(&mut sink)
                .await
                .unwrap();
            black_box(sink.flushes)
        });
    });
    group.finish();
}

fn bench_bodies(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let pool = BufferPool::new(BUFFER_SIZE);
    let total = 64u64 << 20;

    let mut group = c.benchmark_group("body");
    group.throughput(Throughput::Bytes(total));

    group.bench_function("known_length/64MiB", |b| {
        b.to_async(&rt).iter(|| async {
            let mut body = emit_known_length(&pool, total, DEFAULT_CHUNK_SIZE);
            let mut seen = 0u64;
            while let Some(frame) = body.frame().await {
                seen += frame.unwrap().into_data().map_or(0, |d| d.len() as u64);
            }
            black_box(seen)
        });
    });

    let chunk = NonZeroUsize::new(BUFFER_SIZE).unwrap();
    group.bench_function("chunked/64MiB", |b| {
        b.to_async(&rt).iter(|| async {
            let descriptor = StreamDescriptor::chunked(total, chunk, Duration::ZERO, false);
            let mut body = emit_chunked(&pool, descriptor, "BENCH");
            let mut seen = 0u64;
            while let Some(frame) = body.frame().await {
                seen += frame.unwrap().into_data().map_or(0, |d| d.len() as u64);
            }
            black_box(seen)
        });
    });
    group.finish();
}

/// Checkout and return under contention from many tasks.
fn bench_pool(c: &mut Criterion) {
    const TASKS: usize = 64;
    const ROUNDS: usize = 256;

    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let pool = BufferPool::new(64 * 1024);
    pool.prewarm(TASKS);

    let mut group = c.benchmark_group("pool");
    group.throughput(Throughput::Elements((TASKS * ROUNDS) as u64));
    group.bench_function(format!("acquire_release/{TASKS}x{ROUNDS}"), |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let pool = pool.clone();
            async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let tasks = (0..TASKS).map(|_| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            for _ in 0..ROUNDS {
                                black_box(pool.acquire());
                            }
                        })
                    });
                    join_all(tasks).await;
                }
                start.elapsed()
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_emitter, bench_bodies, bench_pool);
criterion_main!(benches);
