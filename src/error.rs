//! Error kinds surfaced by the core (§7 of the design spec).
//!
//! Every variant here corresponds to exactly one row of the error-kind table:
//! transport/parse errors end the session, `handler_exception` is converted
//! to a `500`. `range_not_satisfiable` (416) and a short read against a
//! declared file range are handled inline where they're detected
//! (`Response::set_file_content`, `body::file::FileWriter::get`) rather than
//! surfaced as a `SessionError`, since both already have a response or a
//! `BodyError` to carry instead.

/// Errors that can terminate a session stage (read/parse/write/handshake).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed HTTP message: {0}")]
    Parse(String),

    #[error("I/O deadline expired")]
    Timeout,

    #[error("malformed or missing field: {0}")]
    BadField(String),

    #[error("body exceeds configured size cap ({limit} bytes)")]
    BufferOverflow { limit: u64 },

    #[error("handler panicked: {0}")]
    HandlerException(String),

    #[error("could not connect to upstream {0}")]
    UpstreamConnectFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Body(#[from] BodyError),
}

/// Errors from the body codec layer (§4.2).
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("need more data before this chunk can be consumed")]
    NeedMoreData,

    #[error("unexpected body structure: {0}")]
    UnexpectedBody(String),

    #[error("missing or invalid multipart boundary")]
    MissingBoundary,

    #[error("content-length and transfer-encoding: chunked both present")]
    ConflictingFraming,

    #[error("body exceeds configured size cap ({limit} bytes)")]
    TooLarge { limit: u64 },

    #[error("compression codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised at route-registration time (§4.3 "repeated registration ...
/// is an error reported to the caller").
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("a handler for {method} {path} is already registered")]
    DuplicateHandler { method: http::Method, path: String },

    #[error("invalid route pattern {0:?}: {1}")]
    InvalidPattern(String, String),

    #[error("invalid regex segment {0:?}: {1}")]
    InvalidRegex(String, regex::Error),

    #[error("mount point prefix must start with '/': {0:?}")]
    InvalidMountPrefix(String),

    #[error("a websocket handler is already registered for {0:?}")]
    DuplicateWsHandler(String),
}

/// Errors constructing a TLS server configuration from in-memory cert/key
/// bytes (`Server::use_tls`). Reading certs/keys off disk or out of a
/// keystore is the out-of-scope "SSL certificate loading" collaborator;
/// this type only covers what this crate still has to do with bytes it is
/// handed.
#[cfg(feature = "tls")]
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("no certificates found in the supplied PEM/DER bytes")]
    NoCertificates,

    #[error("no private key found in the supplied PEM/DER bytes")]
    NoPrivateKey,

    #[error("passphrase-encrypted private keys are not supported")]
    EncryptedKeyUnsupported,

    #[error("invalid certificate or key material: {0}")]
    InvalidMaterial(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
