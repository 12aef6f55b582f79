//! An embeddable HTTP/1.1 server library: TLS via in-memory PEM bytes,
//! WebSocket upgrade, HTTP `CONNECT` tunnelling, static file serving with
//! byte-range and conditional-request support, content-encoding
//! negotiation, and a trie-based router.
//!
//! Grounded on [`examples/tokio-rs-axum`]'s shape (a `Router` callers build
//! up, handed to a `serve()`-style accept loop) but without axum's
//! `tower::Service`/extractor machinery: handlers here are plain async
//! closures over a concrete [`Request`]/[`Response`] pair, closer to the
//! original C++ `httplib::Server` this crate's design was distilled from.
//!
//! ```no_run
//! use embedhttp::{Server, Response};
//! use http::{Method, StatusCode};
//!
//! # async fn run() -> std::io::Result<()> {
//! let server = Server::new().listen("127.0.0.1", 8080);
//! server.router().write().await.on(Method::GET, "/", std::sync::Arc::new(|_req: &mut embedhttp::Request| {
//!     Box::pin(async move {
//!         let mut resp = Response::new();
//!         resp.set_string_content("hello", "text/plain", StatusCode::OK);
//!         resp
//!     })
//! })).unwrap();
//! server.run().await
//! # }
//! ```

pub mod body;
pub mod config;
pub mod error;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod util;
pub mod ws;

pub use config::{Encoding, ServerConfig};
pub use error::{BodyError, RouteError, SessionError};
pub use request::{BodyKind, Request};
pub use response::Response;
pub use router::{Handler, HandlerFuture, Router};
pub use server::{RouterHandle, Server, ServerHandle};
pub use ws::{WsCloseHandler, WsHandle, WsMessageHandler, WsOpenHandler};

#[cfg(feature = "tls")]
pub use error::TlsConfigError;
