//! The request data model (§3, §6 "request (read-only from handler)").

use crate::body::Body;
use crate::util::url::MultiMap;
use http::{HeaderMap, Method};
use std::any::Any;
use std::net::SocketAddr;

/// Which of the six body kinds a request carries. Always derived from the
/// `Body` it was parsed into — kept as its own type (rather than just
/// matching on `Body`) so handlers can check the kind without owning a
/// borrow of the body itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    String,
    Json,
    FormData,
    UrlEncoded,
    File,
}

impl From<&Body> for BodyKind {
    fn from(body: &Body) -> Self {
        match body {
            Body::Empty => BodyKind::Empty,
            Body::String(_) => BodyKind::String,
            Body::Json(_) => BodyKind::Json,
            Body::FormData(_) => BodyKind::FormData,
            Body::UrlEncoded(_) => BodyKind::UrlEncoded,
            Body::File(_) => BodyKind::File,
        }
    }
}

/// A parsed HTTP/1.1 request, handed to route handlers read-only (§3, §6).
pub struct Request {
    pub method: Method,
    /// The raw request-target exactly as it appeared on the wire.
    pub target: String,
    /// Percent-decoded path; never contains `%XX` escapes (§3 invariant).
    pub decoded_path: String,
    pub query_params: MultiMap,
    /// Populated by the router during dispatch; includes every named
    /// segment captured, plus `*` for a wildcard tail.
    pub path_params: MultiMap,
    pub headers: HeaderMap,
    pub body: Body,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub client_ip: String,
    /// Opaque per-request value attached by the caller; lifetime equals the
    /// request's (§6 "custom_data carries an opaque per-request value").
    pub custom_data: Option<Box<dyn Any + Send + Sync>>,
}

impl Request {
    pub fn body_kind(&self) -> BodyKind {
        BodyKind::from(&self.body)
    }

    /// Looks up a single path parameter captured by the router.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// Typed access to `custom_data`, the common idiom for an opaque
    /// per-request extension slot (mirrors `http::Extensions::get`).
    pub fn custom_data<T: 'static>(&self) -> Option<&T> {
        self.custom_data.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn set_custom_data<T: Send + Sync + 'static>(&mut self, value: T) {
        self.custom_data = Some(Box::new(value));
    }
}
