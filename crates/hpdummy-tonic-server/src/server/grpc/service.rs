//! `echo.EchoService` implementation.
//!
//! Unary `Echo` answers straight away. `StreamEcho` runs one task per call
//! that answers each inbound message in order and ends the stream with
//! `UNAVAILABLE` as soon as the process starts draining, without waiting for
//! the next client message.

use crate::server::telemetry::{
    decrement_streams_inflight, increment_requests, increment_stream_errors,
    increment_streams_inflight, record_stream_duration,
};
use hpdummy::Drain;
use hpdummy_tonic_core::{
    Error,
    proto::{EchoRequest, EchoResponse, echo_service_server},
};
use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};

/// Responses buffered per stream before the loop waits for the client.
pub const STREAM_BUFFER: usize = 16;

#[derive(Clone, Debug)]
pub struct EchoService {
    hostname: Arc<str>,
    drain: Drain,
}

impl EchoService {
    pub fn new(hostname: Arc<str>, drain: Drain) -> Self {
        Self { hostname, drain }
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

pub fn respond(request: EchoRequest, hostname: &str) -> EchoResponse {
    EchoResponse {
        message: request.message,
        request_timestamp: request.timestamp,
        response_timestamp: now_nanos(),
        server_hostname: hostname.to_owned(),
    }
}

/// Answers `inbound` on `tx` until the client finishes, the client goes
/// away, or draining begins.
///
/// Returns the number of messages echoed, or the status the stream must end
/// with.
pub async fn echo_loop<S>(
    mut inbound: S,
    tx: &mpsc::Sender<Result<EchoResponse, Status>>,
    drain: &Drain,
    hostname: &str,
) -> Result<u64, Status>
where
    S: Stream<Item = Result<EchoRequest, Status>> + Unpin,
{
    let mut echoed = 0;
    loop {
        let next = tokio::select! {
            biased;
            () = drain.draining() => return Err(Error::ServiceShutdown.into()),
            () = tx.closed() => return Ok(echoed),
            next = inbound.next() => next,
        };

        let request = match next {
            Some(Ok(request)) => request,
            Some(Err(status)) => return Err(status),
            None => return Ok(echoed),
        };

        if tx.send(Ok(respond(request, hostname))).await.is_err() {
            // receiver dropped: the client cancelled the call
            return Ok(echoed);
        }
        echoed += 1;
    }
}

#[tonic::async_trait]
impl echo_service_server::EchoService for EchoService {
    type StreamEchoStream = ReceiverStream<Result<EchoResponse, Status>>;

    async fn echo(&self, req: Request<EchoRequest>) -> Result<Response<EchoResponse>, Status> {
        increment_requests();
        let response = respond(req.into_inner(), &self.hostname);
        tracing::debug!(
            kind = "gRPC",
            method = "/echo.EchoService/Echo",
            bytes = response.message.len(),
            "OK"
        );
        Ok(Response::new(response))
    }

    async fn stream_echo(
        &self,
        req: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::StreamEchoStream>, Status> {
        increment_requests();
        increment_streams_inflight();
        tracing::debug!(kind = "gRPC", method = "/echo.EchoService/StreamEcho", "stream started");

        let inbound = req.into_inner();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let drain = self.drain.clone();
        let hostname = Arc::clone(&self.hostname);

        tokio::spawn(async move {
            let _guard = drain.track();
            let start = Instant::now();

            match echo_loop(inbound, &tx, &drain, &hostname).await {
                Ok(echoed) => {
                    tracing::debug!(kind = "gRPC", echoed, "stream ended");
                }
                Err(status) => {
                    increment_stream_errors();
                    tracing::debug!(kind = "gRPC", code = ?status.code(), message = status.message(), "stream error");
                    let _ = tx.send(Err(status)).await;
                }
            }

            decrement_streams_inflight();
            record_stream_duration(start.elapsed().as_secs_f64() * 1_000.0);
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpdummy_tonic_core::proto::echo_service_server::EchoService as _;
    use tonic::Code;

    fn request(message: &str, timestamp: i64) -> EchoRequest {
        EchoRequest {
            message: message.to_owned(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn unary_echo() {
        let service = EchoService::new(Arc::from("grpc-host"), Drain::new());
        let before = now_nanos();
        let response = service
            .echo(Request::new(request("hi", 42)))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.message, "hi");
        assert_eq!(response.request_timestamp, 42);
        assert_eq!(response.server_hostname, "grpc-host");
        assert!(response.response_timestamp >= before);
    }

    #[tokio::test]
    async fn stream_answers_each_message_in_order() {
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let inbound = tokio_stream::iter((0..5).map(|i| Ok(request(&format!("m{i}"), i))));

        let echoed = echo_loop(inbound, &tx, &Drain::new(), "h").await.unwrap();
        assert_eq!(echoed, 5);

        drop(tx);
        let mut seen = Vec::new();
        while let Some(response) = rx.recv().await {
            let response = response.unwrap();
            assert_eq!(response.message, format!("m{}", response.request_timestamp));
            seen.push(response.request_timestamp);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn draining_ends_stream_without_waiting_for_input() {
        let drain = Drain::new();
        let (tx, _rx) = mpsc::channel(STREAM_BUFFER);
        let inbound = tokio_stream::pending::<Result<EchoRequest, Status>>();

        let task = {
            let drain = drain.clone();
            tokio::spawn(async move { echo_loop(inbound, &tx, &drain, "h").await })
        };
        tokio::task::yield_now().await;
        drain.begin_drain();

        let status = task.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "server is shutting down");
    }

    #[tokio::test]
    async fn inbound_error_is_forwarded() {
        let (tx, _rx) = mpsc::channel(STREAM_BUFFER);
        let inbound = tokio_stream::iter(vec![
            Ok(request("a", 1)),
            Err(Status::data_loss("broken frame")),
        ]);

        let status = echo_loop(inbound, &tx, &Drain::new(), "h")
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DataLoss);
    }

    #[tokio::test]
    async fn departed_client_ends_quietly() {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        drop(rx);
        let inbound = tokio_stream::pending::<Result<EchoRequest, Status>>();

        assert_eq!(echo_loop(inbound, &tx, &Drain::new(), "h").await.unwrap(), 0);
    }
}
