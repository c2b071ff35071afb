//! End-to-end gRPC echo throughput against a locally started server.

use core::{fmt, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::FuturesUnordered;
use hpdummy_tonic_core::proto::{EchoRequest, echo_service_client::EchoServiceClient};
use std::{
    net::TcpStream,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tokio::runtime::Builder;
use tokio_stream::StreamExt;
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Uri},
};

const GRPC_ADDR: &str = "127.0.0.1:50151";
const HTTP_ADDR: &str = "127.0.0.1:18180";
const MESSAGES_PER_STREAM: usize = 100;

#[derive(Clone, Copy, Debug)]
enum Compression {
    None,
    Gzip,
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        })
    }
}

impl From<Compression> for Option<CompressionEncoding> {
    fn from(value: Compression) -> Self {
        match value {
            Compression::None => None,
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct EchoParams {
    message_bytes: usize,
    concurrency: usize,
    compression: Compression,
}

/// Kills the server when the benchmark ends, including on panic.
struct ServerProcess(Child);

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if self.0.kill().is_err() {
            eprintln!("failed to kill server");
        }
        let _ = self.0.wait();
    }
}

fn start_server() -> ServerProcess {
    // May need a full release build first, hence the generous port wait.
    let child = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "hpdummy-server",
            "--release",
            "--",
            "--addr",
            HTTP_ADDR,
            "--grpc-addr",
            GRPC_ADDR,
            "--pidfile",
            "",
            "--stats-interval-secs",
            "0",
        ])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to start hpdummy-server");
    let server = ServerProcess(child);
    wait_for_port(GRPC_ADDR, 300);
    server
}

fn grpc_bench(c: &mut Criterion) {
    let _server = start_server();
    let uri = Uri::try_from(format!("http://{GRPC_ADDR}")).expect("Invalid URI");
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    let mut cases = Vec::new();
    for message_bytes in [64, 4 * 1024, 64 * 1024] {
        for concurrency in [1, 8, 32] {
            for compression in [Compression::None, Compression::Zstd, Compression::Gzip] {
                cases.push(EchoParams {
                    message_bytes,
                    concurrency,
                    compression,
                });
            }
        }
    }

    for params in cases {
        let mut group = c.benchmark_group("grpc/stream_echo");
        group.throughput(Throughput::Bytes(
            (params.message_bytes * MESSAGES_PER_STREAM * params.concurrency) as u64,
        ));
        group.bench_function(
            format!(
                "bytes/{}/conc/{}/comp/{}",
                params.message_bytes, params.concurrency, params.compression
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let uri = uri.clone();
                    async move {
                        let channel = Channel::builder(uri)
                            .connect()
                            .await
                            .expect("Failed to connect to server");

                        let start = Instant::now();
                        for _ in 0..iters {
                            run_stream_echo(&channel, params).await;
                        }
                        start.elapsed()
                    }
                });
            },
        );
        group.finish();
    }

    let mut group = c.benchmark_group("grpc/echo");
    group.throughput(Throughput::Elements(1));
    group.bench_function("unary/64", |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let uri = uri.clone();
            async move {
                let channel = Channel::builder(uri).connect().await.unwrap();
                let mut client = EchoServiceClient::new(channel);
                let start = Instant::now();
                for _ in 0..iters {
                    let response = client
                        .echo(EchoRequest {
                            message: "x".repeat(64),
                            timestamp: 0,
                        })
                        .await
                        .expect("echo failed");
                    black_box(response);
                }
                start.elapsed()
            }
        });
    });
    group.finish();
}

async fn run_stream_echo(channel: &Channel, params: EchoParams) {
    let mut tasks = FuturesUnordered::new();

    for _ in 0..params.concurrency {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = EchoServiceClient::new(channel);
            if let Some(encoding) = params.compression.into() {
                client = client.accept_compressed(encoding).send_compressed(encoding);
            }

            let message = "a".repeat(params.message_bytes);
            let outbound = tokio_stream::iter((0..MESSAGES_PER_STREAM).map(move |i| EchoRequest {
                message: message.clone(),
                timestamp: i as i64,
            }));

            let mut inbound = client
                .stream_echo(outbound)
                .await
                .expect("stream call failed")
                .into_inner();

            let mut received = 0;
            while let Some(response) = inbound.next().await {
                let response = response.expect("response");
                assert_eq!(response.message.len(), params.message_bytes);
                black_box(response);
                received += 1;
            }
            assert_eq!(received, MESSAGES_PER_STREAM);
        }));
    }

    while let Some(res) = tasks.next().await {
        res.unwrap();
    }
}

fn wait_for_port(addr: &str, timeout_secs: u64) {
    let start = Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Server did not start listening on {addr}");
}

criterion_group!(benches, grpc_bench);
criterion_main!(benches);
