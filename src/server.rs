//! The public embedding surface (§6): `Server` builds and runs the accept
//! loop, `RouterHandle` is the cloneable, lock-guarded router every
//! connection dispatches through, and `ServerHandle` lets a caller on
//! another task stop a running server.
//!
//! Grounded on axum's `serve()` (`examples/tokio-rs-axum/.../serve/mod.rs`):
//! a loop around `listener.accept()` that spawns one task per connection
//! and races the loop itself against a shutdown signal. Generalized here so
//! each spawned task drives this crate's own `Session` state machine
//! instead of a `tower::Service`, and so graceful shutdown also reaches
//! into already-accepted connections via a per-session `abort()` signal
//! (axum's graceful shutdown only stops accepting; it does not reach into
//! in-flight connections, which `hyper`'s graceful-shutdown future handles
//! for it).

use crate::body::file::{DefaultMimeResolver, MimeResolver};
use crate::config::ServerConfig;
use crate::router::Router;
use crate::session::Session;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[cfg(feature = "tls")]
use crate::error::TlsConfigError;
#[cfg(feature = "tls")]
use crate::session::transport::TlsSetup;

/// The router every connection dispatches through, shared and mutable for
/// the server's lifetime (§6 "cloneable, `Arc<RwLock<Router>>`"). Routes
/// can be registered, mounted, or unmounted while the server is running;
/// each request takes a read lock just long enough to match and clone the
/// handler it needs (§9 "Global state").
pub type RouterHandle = Arc<tokio::sync::RwLock<Router>>;

/// Per-session abort signal, kept alive by the spawned connection task and
/// referenced weakly by the server's registry (§5 "a weak registry of live
/// sessions solely to abort them on shutdown; ownership remains with the
/// accept loop's spawned task").
struct SessionHandle(watch::Sender<bool>);

impl SessionHandle {
    fn abort(&self) {
        let _ = self.0.send(true);
    }
}

/// A handle to a running `Server`, obtained via `Server::handle` before
/// `run()` is called. `stop()` is safe to call from any thread and is
/// idempotent (§5).
#[derive(Clone)]
pub struct ServerHandle {
    stop_tx: watch::Sender<bool>,
    registry: Arc<Mutex<Vec<Weak<SessionHandle>>>>,
}

impl ServerHandle {
    /// Stops the accept loop and aborts every live session. Returns as
    /// soon as the signals are sent; it does not wait for sessions to
    /// actually finish closing.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut registry = self.registry.lock();
        registry.retain(|weak| match weak.upgrade() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        });
    }
}

/// Builder and accept loop for an embedded HTTP/1.1 server (§6).
pub struct Server {
    host: String,
    port: u16,
    backlog: u32,
    config: ServerConfig,
    router: RouterHandle,
    resolver: Arc<dyn MimeResolver>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<TlsSetup>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    registry: Arc<Mutex<Vec<Weak<SessionHandle>>>>,
}

impl Server {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            backlog: 1024,
            config: ServerConfig::default(),
            router: Arc::new(tokio::sync::RwLock::new(Router::new())),
            resolver: Arc::new(DefaultMimeResolver),
            #[cfg(feature = "tls")]
            tls: None,
            stop_tx,
            stop_rx,
            registry: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the address `run()` binds to (§6 `listen(host, port, backlog)`).
    pub fn listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the TCP listen backlog, applied via `socket2` when `run()`
    /// builds the listener (the stdlib `TcpListener::bind` has no backlog
    /// knob).
    pub fn backlog(mut self, n: u32) -> Self {
        self.backlog = n;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.config = self.config.read_timeout(d);
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.config = self.config.write_timeout(d);
        self
    }

    pub fn max_header_bytes(mut self, n: Option<u64>) -> Self {
        self.config = self.config.max_header_bytes(n);
        self
    }

    pub fn max_body_bytes(mut self, n: u64) -> Self {
        self.config = self.config.max_body_bytes(n);
        self
    }

    pub fn supported_encodings(mut self, encodings: Vec<crate::config::Encoding>) -> Self {
        self.config = self.config.supported_encodings(encodings);
        self
    }

    /// Overrides the default extension-based MIME table (§4.4 "MIME type
    /// resolution... a small built-in extension table, replaceable").
    pub fn mime_resolver(mut self, resolver: Arc<dyn MimeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Loads a TLS server identity from in-memory PEM/DER bytes (§6
    /// `use_tls`). Presence of this config is what makes `DetectTls` peek
    /// for a ClientHello on each accepted connection instead of assuming
    /// plaintext.
    #[cfg(feature = "tls")]
    pub fn use_tls(mut self, cert: &[u8], key: &[u8], passphrase: Option<&str>) -> Result<Self, TlsConfigError> {
        self.tls = Some(Arc::new(TlsSetup::from_pem(cert, key, passphrase)?));
        Ok(self)
    }

    /// Returns the shared, lock-guarded router (§6 "cloneable"). Clones
    /// can register routes concurrently with a running server.
    pub fn router(&self) -> RouterHandle {
        self.router.clone()
    }

    /// Returns a handle that can stop this server from another task once
    /// `run()` is underway.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { stop_tx: self.stop_tx.clone(), registry: self.registry.clone() }
    }

    /// Runs the accept loop until `ServerHandle::stop()` is called or the
    /// listener errors. Each accepted connection is spawned as its own
    /// task driving a `Session` (§4.1, §9 "one task per accepted
    /// connection").
    pub async fn run(self) -> std::io::Result<()> {
        let listener = bind_listener(&self.host, self.port, self.backlog)?;
        let mut stop_rx = self.stop_rx.clone();
        let config = Arc::new(self.config);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    tracing::debug!("accept loop stopping");
                    break;
                }
                accepted = listener.accept() => {
                    let (tcp, remote_addr) = accepted?;
                    let local_addr = tcp.local_addr().unwrap_or(remote_addr);

                    let (abort_tx, abort_rx) = watch::channel(false);
                    let handle = Arc::new(SessionHandle(abort_tx));
                    self.registry.lock().push(Arc::downgrade(&handle));

                    let session = Session::new(
                        config.clone(),
                        self.router.clone(),
                        self.resolver.clone(),
                        #[cfg(feature = "tls")]
                        self.tls.clone(),
                        local_addr,
                        remote_addr,
                        abort_rx,
                    );

                    tokio::spawn(async move {
                        let _keep_alive = handle;
                        session.run(tcp).await;
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds and listens with an explicit backlog via `socket2`, since
/// `tokio::net::TcpListener::bind` always uses the platform default
/// backlog (§6 `backlog(n)`).
fn bind_listener(host: &str, port: u16, backlog: u32) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let ip: std::net::IpAddr = host
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid listen host {host:?}: {e}")))?;
    let addr = SocketAddr::new(ip, port);
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };

    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_before_run_is_a_harmless_noop() {
        let server = Server::new().listen("127.0.0.1", 0);
        let handle = server.handle();
        handle.stop();
        handle.stop();
    }

    #[tokio::test]
    async fn router_handle_is_shared_and_cloneable() {
        let server = Server::new();
        let router_a = server.router();
        let router_b = server.router();
        router_a
            .write()
            .await
            .on(
                http::Method::GET,
                "/ping",
                Arc::new(|_req: &mut crate::request::Request| {
                    Box::pin(async move {
                        let mut resp = crate::response::Response::new();
                        resp.set_string_content("pong", "text/plain", http::StatusCode::OK);
                        resp
                    })
                }),
            )
            .unwrap();
        assert!(router_b.read().await.ws_handlers_for("/nonexistent").is_none());
    }

    #[tokio::test]
    async fn run_accepts_and_stops() {
        let server = Server::new().listen("127.0.0.1", 0);
        let handle = server.handle();
        let task = tokio::spawn(server.run());
        handle.stop();
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    }
}
