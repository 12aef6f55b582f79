//! The per-connection session state machine (§4.1): `DetectTls →
//! HandshakeTls → Http → {Proxy | WebSocket}`, with `Http → Http`
//! keep-alive looping. Grounded on axum's `serve/mod.rs` accept-loop/
//! graceful-shutdown shape, generalized from "one `hyper::Service` per
//! listener" to "one hand-rolled protocol-detecting state machine per
//! connection" per SPEC_FULL §4.1.

pub mod parse;
pub mod proxy;
pub mod transport;

use crate::body::file::MimeResolver;
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::request::Request;
use crate::response::{default_error_response, Response};
use crate::server::RouterHandle;
use crate::util::url::MultiMap;
use bytes::BytesMut;
use futures::FutureExt;
use http::header::{CONNECTION, TRANSFER_ENCODING, UPGRADE};
use http::{Method, StatusCode, Version};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use transport::Transport;

#[cfg(feature = "tls")]
use transport::TlsSetup;

use parse::MessageHead;

/// What the next iteration of the `Http` keep-alive loop should do.
enum ProcessOutcome {
    KeepAlive(Transport, BytesMut),
    Done,
}

/// Owns everything a connection needs that outlives any single request:
/// shared server config, the router, the MIME resolver, the optional TLS
/// acceptor, and the watch channel `abort()` signals through.
pub struct Session {
    config: Arc<ServerConfig>,
    router: RouterHandle,
    resolver: Arc<dyn MimeResolver>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<TlsSetup>>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    abort_rx: watch::Receiver<bool>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        router: RouterHandle,
        resolver: Arc<dyn MimeResolver>,
        #[cfg(feature = "tls")] tls: Option<Arc<TlsSetup>>,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        abort_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            router,
            resolver,
            #[cfg(feature = "tls")]
            tls,
            local_addr,
            remote_addr,
            abort_rx,
        }
    }

    /// Drives the connection to completion. Transport errors never
    /// propagate past this boundary (§7 "logged at trace and end the
    /// session"); the only outcome visible to the accept loop is that the
    /// spawned task finishes.
    pub async fn run(self, tcp: TcpStream) {
        let _ = tcp.set_nodelay(true);
        if let Err(err) = self.run_inner(tcp).await {
            tracing::trace!(error = %err, "session ended");
        }
    }

    async fn run_inner(mut self, tcp: TcpStream) -> Result<(), SessionError> {
        let transport = self.detect_tls(tcp).await?;
        self.run_http(transport).await
    }

    #[cfg(feature = "tls")]
    async fn detect_tls(&self, tcp: TcpStream) -> Result<Transport, SessionError> {
        if let Some(tls) = &self.tls {
            if Transport::peek_is_tls(&tcp).await.unwrap_or(false) {
                let stream = tls
                    .acceptor
                    .accept(tcp)
                    .await
                    .map_err(|e| SessionError::TlsHandshakeFailed(e.to_string()))?;
                return Ok(Transport::Tls(Box::new(stream)));
            }
        }
        Ok(Transport::Plain(tcp))
    }

    #[cfg(not(feature = "tls"))]
    async fn detect_tls(&self, tcp: TcpStream) -> Result<Transport, SessionError> {
        Ok(Transport::Plain(tcp))
    }

    /// The `Http` stage's keep-alive loop (§4.1 step 3). Each iteration
    /// races against `abort()` so a `stop()` call while idle between
    /// keep-alive requests closes the socket promptly rather than waiting
    /// out the read timeout (§5 "`abort()` must close the underlying
    /// socket so any outstanding I/O completes promptly with an error").
    async fn run_http(&mut self, mut transport: Transport) -> Result<(), SessionError> {
        let mut seed = BytesMut::new();
        loop {
            let mut abort_rx = self.abort_rx.clone();
            let outcome = tokio::select! {
                _ = abort_rx.changed() => return Ok(()),
                result = self.process_one(transport, seed) => result?,
            };
            match outcome {
                ProcessOutcome::KeepAlive(next_transport, next_seed) => {
                    transport = next_transport;
                    seed = next_seed;
                }
                ProcessOutcome::Done => return Ok(()),
            }
        }
    }

    /// Reads one request head and dispatches it to whichever stage it
    /// belongs in: `CONNECT` → `Proxy`, `Upgrade: websocket` → `WebSocket`,
    /// else ordinary request/response handling that may loop back for
    /// another keep-alive request.
    async fn process_one(&self, mut transport: Transport, seed: BytesMut) -> Result<ProcessOutcome, SessionError> {
        let Some((head, mut leftover)) = parse::read_message_head(&mut transport, &self.config, seed).await? else {
            return Ok(ProcessOutcome::Done);
        };

        if head.method == Method::CONNECT {
            self.run_proxy(transport, &head).await?;
            return Ok(ProcessOutcome::Done);
        }

        let (decoded_path, query_params) = parse::split_target(&head.target);

        let is_upgrade = head
            .headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        if is_upgrade {
            self.run_websocket(transport, &head, &decoded_path).await?;
            return Ok(ProcessOutcome::Done);
        }

        if parse::wants_100_continue(&head.headers) {
            parse::write_100_continue(&mut transport, &self.config).await?;
        }

        let body = parse::read_body(&mut transport, &head.headers, &mut leftover, &self.config).await?;

        let mut request = Request {
            method: head.method.clone(),
            target: head.target.clone(),
            decoded_path,
            query_params,
            path_params: MultiMap::new(),
            headers: head.headers.clone(),
            body,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
            client_ip: self.remote_addr.ip().to_string(),
            custom_data: None,
        };

        let mut response = self.dispatch(&mut request).await;
        response.keep_alive = determine_keep_alive(&head, &response);
        let keep_alive = response.keep_alive;

        self.write_response(&mut transport, &head, &mut response).await?;

        if keep_alive {
            Ok(ProcessOutcome::KeepAlive(transport, leftover))
        } else {
            Ok(ProcessOutcome::Done)
        }
    }

    /// Invokes the router, catching a handler panic at this one boundary
    /// and converting it to a `500` (§7 `handler_exception`). A caught
    /// panic forces `keep_alive = false`.
    async fn dispatch(&self, request: &mut Request) -> Response {
        let router = self.router.read().await;
        let result = std::panic::AssertUnwindSafe(router.dispatch(request, self.resolver.as_ref(), &self.config.server_header))
            .catch_unwind()
            .await;
        drop(router);

        match result {
            Ok(resp) => resp,
            Err(payload) => {
                let message = panic_message(payload);
                let mut resp = default_error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.config.server_header);
                resp.set_string_content(message, "text/plain; charset=utf-8", StatusCode::INTERNAL_SERVER_ERROR);
                resp.keep_alive = false;
                resp
            }
        }
    }

    /// Finalizes and writes a response (§4.4, §6 "Response framing").
    /// `HEAD` responses and bodiless statuses (`204`/`304`) carry headers
    /// but no body; everything else streams `BodyWriter::get()` chunks
    /// either raw (`Content-Length` framing) or chunk-encoded.
    async fn write_response(&self, transport: &mut Transport, head: &MessageHead, response: &mut Response) -> Result<(), SessionError> {
        let mut writer = response.finalize(&self.config, &head.headers).await.map_err(SessionError::Body)?;

        let status_line = format!(
            "{} {} {}\r\n",
            version_token(response.version),
            response.status.as_u16(),
            response.status.canonical_reason().unwrap_or("")
        );
        write_all_timeout(transport, status_line.as_bytes(), &self.config).await?;
        for (name, value) in response.headers.iter() {
            write_all_timeout(transport, name.as_str().as_bytes(), &self.config).await?;
            write_all_timeout(transport, b": ", &self.config).await?;
            write_all_timeout(transport, value.as_bytes(), &self.config).await?;
            write_all_timeout(transport, b"\r\n", &self.config).await?;
        }
        write_all_timeout(transport, b"\r\n", &self.config).await?;

        let skip_body = head.method == Method::HEAD || matches!(response.status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED);
        if skip_body {
            return Ok(());
        }

        let chunked = response
            .headers
            .get(TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        loop {
            match writer.get().await.map_err(SessionError::Body)? {
                Some((chunk, _more)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if chunked {
                        let framed = format!("{:x}\r\n", chunk.len());
                        write_all_timeout(transport, framed.as_bytes(), &self.config).await?;
                        write_all_timeout(transport, &chunk, &self.config).await?;
                        write_all_timeout(transport, b"\r\n", &self.config).await?;
                    } else {
                        write_all_timeout(transport, &chunk, &self.config).await?;
                    }
                }
                None => break,
            }
        }
        if chunked {
            write_all_timeout(transport, b"0\r\n\r\n", &self.config).await?;
        }
        Ok(())
    }

    /// `Proxy` stage (§4.1 step 4, §4.6): dial the upstream, reply `200
    /// Connection Established`, then pump bytes full-duplex until either
    /// side closes.
    async fn run_proxy(&self, mut transport: Transport, head: &MessageHead) -> Result<(), SessionError> {
        let (host, port) = proxy::parse_connect_target(&head.target)?;
        let mut upstream = proxy::dial_upstream(host, port).await?;
        write_all_timeout(&mut transport, b"HTTP/1.1 200 Connection Established\r\n\r\n", &self.config).await?;
        let (sent, received) = proxy::pump(&mut transport, &mut upstream).await?;
        tracing::debug!(target = %head.target, sent, received, "proxy tunnel closed");
        Ok(())
    }

    /// `WebSocket` stage (§4.1 step 3b, §4.5): complete the handshake,
    /// look up the route's handler triple, then hand the connection to
    /// `ws::run` for the remainder of its life.
    async fn run_websocket(&self, mut transport: Transport, head: &MessageHead, decoded_path: &str) -> Result<(), SessionError> {
        let key = head
            .headers
            .get(http::header::SEC_WEBSOCKET_KEY)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SessionError::BadField("missing Sec-WebSocket-Key".into()))?;

        let router = self.router.read().await;
        let handlers = router.ws_handlers_for(decoded_path).map(|(h, _params)| h);
        drop(router);

        let Some(handlers) = handlers else {
            let body = crate::response::error_page(StatusCode::NOT_FOUND, &self.config.server_header);
            let response = format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            write_all_timeout(&mut transport, response.as_bytes(), &self.config).await?;
            return Ok(());
        };

        let accept = crate::ws::accept_key(key);
        let upgrade_response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        write_all_timeout(&mut transport, upgrade_response.as_bytes(), &self.config).await?;

        crate::ws::run(transport, handlers).await;
        Ok(())
    }
}

fn version_token(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

/// Resolves keep-alive from the request's `Connection` header and HTTP
/// version (§6), unless the handler or error path already forced it off.
fn determine_keep_alive(head: &MessageHead, response: &Response) -> bool {
    if !response.keep_alive {
        return false;
    }
    let tokens: Vec<String> = head
        .headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|t| t.trim().to_ascii_lowercase()).collect())
        .unwrap_or_default();
    if tokens.iter().any(|t| t == "close") {
        return false;
    }
    match head.version {
        Version::HTTP_11 => true,
        Version::HTTP_10 => tokens.iter().any(|t| t == "keep-alive"),
        _ => false,
    }
}

/// Extracts the panic payload as a string, falling back to `"unknown
/// exception"` (§4.1 "Failure semantics", §7 `handler_exception`).
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown exception".to_string()
    }
}

async fn write_all_timeout<S>(stream: &mut S, data: &[u8], config: &ServerConfig) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
{
    timeout(config.write_timeout, stream.write_all(data)).await.map_err(|_| SessionError::Timeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use http::HeaderMap;

    fn head(version: Version, connection: Option<&str>) -> MessageHead {
        let mut headers = HeaderMap::new();
        if let Some(c) = connection {
            headers.insert(CONNECTION, http::HeaderValue::from_str(c).unwrap());
        }
        MessageHead { method: Method::GET, target: "/".into(), version, headers }
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        let h = head(Version::HTTP_11, None);
        let resp = Response::new();
        assert!(determine_keep_alive(&h, &resp));
    }

    #[test]
    fn http11_connection_close_overrides() {
        let h = head(Version::HTTP_11, Some("close"));
        let resp = Response::new();
        assert!(!determine_keep_alive(&h, &resp));
    }

    #[test]
    fn http10_defaults_to_close() {
        let h = head(Version::HTTP_10, None);
        let resp = Response::new();
        assert!(!determine_keep_alive(&h, &resp));
    }

    #[test]
    fn http10_keep_alive_token_opts_in() {
        let h = head(Version::HTTP_10, Some("keep-alive"));
        let resp = Response::new();
        assert!(determine_keep_alive(&h, &resp));
    }

    #[test]
    fn handler_forced_close_always_wins() {
        let h = head(Version::HTTP_11, None);
        let mut resp = Response::new();
        resp.keep_alive = false;
        assert!(!determine_keep_alive(&h, &resp));
    }

    #[test]
    fn panic_payload_extracts_str_and_string() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("boom2"))), "boom2");
        assert_eq!(panic_message(Box::new(42i32)), "unknown exception");
    }

    #[tokio::test]
    async fn write_response_frames_fixed_length_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut buf = Vec::new();
            use tokio::io::AsyncReadExt;
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let (server_side, _) = listener.accept().await.unwrap();
        let session = test_session(ServerConfig::default());
        let mut transport = Transport::Plain(server_side);
        let mut resp = Response::new();
        resp.set_string_content("hi", "text/plain", StatusCode::OK);
        let head = head(Version::HTTP_11, Some("close"));

        session.write_response(&mut transport, &head, &mut resp).await.unwrap();
        drop(transport);

        let bytes = client.await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n") || text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn chunk_framing_matches_hex_length_prefix() {
        let chunk = bytes::Bytes::from_static(b"hello");
        let framed = format!("{:x}\r\n", chunk.len());
        assert_eq!(framed, "5\r\n");
    }

    fn test_session(config: ServerConfig) -> Session {
        let (_tx, rx) = watch::channel(false);
        Session {
            config: Arc::new(config),
            router: Arc::new(tokio::sync::RwLock::new(crate::router::Router::new())),
            resolver: Arc::new(crate::body::file::DefaultMimeResolver),
            #[cfg(feature = "tls")]
            tls: None,
            local_addr: "127.0.0.1:8080".parse().unwrap(),
            remote_addr: "127.0.0.1:9000".parse().unwrap(),
            abort_rx: rx,
        }
    }
}
