//! WebSocket connection (§4.5): handshake, read loop, serialized writes.
//!
//! Built on `tokio-tungstenite`'s `WebSocketStream` plus a manual SHA-1/
//! base64 `Sec-WebSocket-Accept` computation, structurally following
//! `axum::extract::ws`: a single task owns the socket for writing and
//! drains an `mpsc` channel, while callbacks hold only a cloned sender.

use crate::error::SessionError;
use base64::engine::{general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sha1::{Digest, Sha1};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`
/// (RFC 6455 §1.3).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Invoked once per connection after the handshake completes.
pub type WsOpenHandler = Arc<dyn Fn(WsHandle) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Invoked once per inbound frame. The payload borrow is valid only for
/// the duration of the call (§4.5 "the payload view is valid only for the
/// duration of the handler").
pub type WsMessageHandler =
    Arc<dyn for<'a> Fn(WsHandle, &'a [u8], bool) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> + Send + Sync>;

/// Invoked exactly once, on transport error or peer close.
pub type WsCloseHandler = Arc<dyn Fn(WsHandle) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum Outbound {
    Text(String),
    Binary(Bytes),
    Close,
}

/// A cheaply-cloneable handle onto the per-connection write serializer
/// (§4.5 "safe to call from any task"). Dropping every handle closes the
/// writer task once its queue drains.
#[derive(Clone)]
pub struct WsHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsHandle {
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.tx
            .send(Outbound::Text(text.into()))
            .map_err(|_| SessionError::BadField("websocket connection already closed".into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        self.tx
            .send(Outbound::Binary(data.into()))
            .map_err(|_| SessionError::BadField("websocket connection already closed".into()))
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// The three callbacks bound to a registered WebSocket route (§4.3
/// "a websocket handler triple ... lives in a parallel slot").
pub struct WsHandlers {
    pub open: WsOpenHandler,
    pub message: WsMessageHandler,
    pub close: WsCloseHandler,
}

/// Wraps an already-upgraded stream, runs the handshake callbacks, and
/// drives the frame loop to completion. Returns once the connection is
/// fully closed (both the read loop and the writer task have exited).
pub async fn run<S>(stream: S, handlers: WsHandlers)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = WsHandle { tx };

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                Outbound::Text(s) => WsMessage::Text(s.into()),
                Outbound::Binary(b) => WsMessage::Binary(b),
                Outbound::Close => WsMessage::Close(None),
            };
            let is_close = frame.is_close();
            if sink.send(frame).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        let _ = sink.close().await;
    });

    (handlers.open)(handle.clone()).await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                (handlers.message)(handle.clone(), text.as_bytes(), true).await;
            }
            Ok(WsMessage::Binary(data)) => {
                (handlers.message)(handle.clone(), &data, false).await;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                // tungstenite answers pings automatically; nothing to relay.
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Frame(_)) => {}
            Err(_) => break,
        }
    }

    // Invoked exactly once regardless of whether the loop ended on a peer
    // close frame, a transport error, or the stream simply running dry.
    (handlers.close)(handle.clone()).await;
    handle.close();
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
