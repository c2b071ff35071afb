//! WebSocket endpoints.
//!
//! `/ws` echoes every text and binary message until the peer leaves or the
//! process starts draining, at which point it sends `1001 Server shutting
//! down`. `/ws/close` answers one message and closes from the server side.

use super::AppState;
use axum::{
    extract::{
        ConnectInfo, Path, State,
        ws::{
            CloseFrame, Message, Utf8Bytes, WebSocketUpgrade, close_code,
            rejection::WebSocketUpgradeRejection,
        },
    },
    http::{Extensions, StatusCode},
    response::{IntoResponse, Response},
};
use core::fmt;
use futures::{Sink, SinkExt, Stream, StreamExt};
use hpdummy::Drain;
use std::net::SocketAddr;

/// Largest message accepted from a client.
pub const MAX_MESSAGE_SIZE: usize = 16 << 20;

const NOT_A_HANDSHAKE: &str = "Not a websocket handshake\n";

fn peer(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

fn reject(rejection: &WebSocketUpgradeRejection) -> Response {
    tracing::debug!(kind = "WS", error = %rejection, "upgrade error");
    (StatusCode::BAD_REQUEST, NOT_A_HANDSHAKE).into_response()
}

pub async fn echo(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    extensions: Extensions,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return reject(&rejection),
    };
    let peer = peer(&extensions);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| echo_loop(socket, state.drain, peer))
}

/// `/ws/close` gets the server-close handler; any other subpath echoes.
pub async fn route(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Path(rest): Path<String>,
    extensions: Extensions,
) -> Response {
    if rest != "close" {
        return echo(ws, State(state), extensions).await;
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return reject(&rejection),
    };
    let peer = peer(&extensions);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| close_loop(socket, peer))
}

/// Echoes data messages back with their original type.
pub async fn echo_loop<S, E>(mut socket: S, drain: Drain, peer: String)
where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: fmt::Display,
    E: fmt::Display,
{
    tracing::debug!(kind = "WS", peer = %peer, "connected");

    loop {
        let next = tokio::select! {
            biased;
            () = drain.draining() => {
                tracing::debug!(kind = "WS", peer = %peer, "draining");
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("Server shutting down"),
                };
                if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                    tracing::debug!(kind = "WS", peer = %peer, error = %e, "close error");
                }
                break;
            }
            next = socket.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(kind = "WS", peer = %peer, error = %e, "read error");
                break;
            }
            None => break,
        };

        match message {
            Message::Text(_) | Message::Binary(_) => {
                tracing::debug!(kind = "WS", peer = %peer, bytes = payload_len(&message), "recv");
                if let Err(e) = socket.send(message).await {
                    tracing::debug!(kind = "WS", peer = %peer, error = %e, "write error");
                    break;
                }
            }
            Message::Close(_) => break,
            // pings are answered by the protocol layer
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    tracing::debug!(kind = "WS", peer = %peer, "disconnected");
}

/// Replies `Server received: <message>` to the first data message, then
/// closes with `1000 server done`.
pub async fn close_loop<S, E>(mut socket: S, peer: String)
where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: fmt::Display,
    E: fmt::Display,
{
    tracing::debug!(kind = "WS", peer = %peer, "connected (server-close mode)");

    let reply = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                break Message::Text(format!("Server received: {}", text.as_str()).into());
            }
            Some(Ok(Message::Binary(data))) => {
                let mut out = b"Server received: ".to_vec();
                out.extend_from_slice(&data);
                break Message::Binary(out.into());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                tracing::debug!(kind = "WS", peer = %peer, error = %e, "read error");
                return;
            }
        }
    };

    let sent = payload_len(&reply);
    if let Err(e) = socket.send(reply).await {
        tracing::debug!(kind = "WS", peer = %peer, error = %e, "write error");
        return;
    }
    tracing::debug!(kind = "WS", peer = %peer, bytes = sent, "sent");

    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static("server done"),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(kind = "WS", peer = %peer, error = %e, "close error");
    }
    tracing::debug!(kind = "WS", peer = %peer, "server-initiated close");
}

fn payload_len(message: &Message) -> usize {
    match message {
        Message::Text(t) => t.as_str().len(),
        Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b.len(),
        Message::Close(_) => 0,
    }
}
