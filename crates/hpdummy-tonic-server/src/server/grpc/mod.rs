//! gRPC front end.
//!
//! - [`service`]: `echo.EchoService` (`Echo`, `StreamEcho`).
//!
//! The transport also carries `grpc.health.v1`, server reflection, and the
//! gRPC-Web and CORS layers. Calls arriving after draining has begun are
//! refused with `UNAVAILABLE` by [`DrainInterceptor`] before they reach the
//! service.

pub mod service;

use hpdummy::Drain;
use hpdummy_tonic_core::{
    Error,
    proto::{FILE_DESCRIPTOR_SET, echo_service_server::EchoServiceServer},
};
use service::EchoService;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    Request, Status,
    codec::CompressionEncoding,
    service::{Interceptor, interceptor::InterceptedService},
    transport::Server,
};
use tonic_health::{
    ServingStatus,
    pb::health_server::{Health, HealthServer},
    server::HealthReporter,
};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub type EchoServer = InterceptedService<EchoServiceServer<EchoService>, DrainInterceptor>;

/// Refuses new calls once the process is draining.
#[derive(Clone, Debug)]
pub struct DrainInterceptor {
    drain: Drain,
}

impl DrainInterceptor {
    pub fn new(drain: Drain) -> Self {
        Self { drain }
    }
}

impl Interceptor for DrainInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        if self.drain.is_draining() {
            return Err(Error::ServiceShutdown.into());
        }
        Ok(request)
    }
}

pub fn build_echo_service(service: EchoService, drain: Drain, max_message_bytes: usize) -> EchoServer {
    let server = EchoServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes);
    InterceptedService::new(server, DrainInterceptor::new(drain))
}

/// Publishes `SERVING` now and `NOT_SERVING` once draining begins, for both
/// the echo service and the overall (`""`) server status.
pub async fn report_health(reporter: HealthReporter, drain: Drain) {
    reporter
        .set_serving::<EchoServiceServer<EchoService>>()
        .await;
    reporter
        .set_service_status("", ServingStatus::Serving)
        .await;

    drain.draining().await;

    reporter
        .set_not_serving::<EchoServiceServer<EchoService>>()
        .await;
    reporter
        .set_service_status("", ServingStatus::NotServing)
        .await;
    tracing::debug!(kind = "gRPC", "health set to NOT_SERVING");
}

/// Serves gRPC on `listener` until `stop` fires, then lets open calls
/// finish.
pub async fn serve<H: Health>(
    listener: TcpListener,
    echo: EchoServer,
    health: HealthServer<H>,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health)
        .add_service(reflection)
        .add_service(echo)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), stop.cancelled_owned())
        .await?;

    tracing::info!("gRPC server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn interceptor_follows_drain_state() {
        let drain = Drain::new();
        let mut interceptor = DrainInterceptor::new(drain.clone());
        assert!(interceptor.call(Request::new(())).is_ok());

        drain.begin_drain();
        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "server is shutting down");
    }

    #[tokio::test]
    async fn serve_stops_on_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let drain = Drain::new();
        let echo = build_echo_service(
            EchoService::new("h".into(), drain.clone()),
            drain,
            1024 * 1024,
        );
        let (_reporter, health) = tonic_health::server::health_reporter();
        let stop = CancellationToken::new();

        let server = tokio::spawn(serve(listener, echo, health, stop.clone()));
        tokio::task::yield_now().await;
        stop.cancel();

        let result = tokio::time::timeout(core::time::Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
