//! Server-wide configuration knobs (§5, §6).
//!
//! File/config-format loading is explicitly unspecified; this is only the
//! in-process struct the rest of the design already requires (timeouts,
//! size caps, the supported-encoding set).

use std::time::Duration;

/// Content-encodings the core can negotiate via `Accept-Encoding` (§4.2,
/// §9 "Global state"). Static after server construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Deflate,
    Zstd,
}

impl Encoding {
    pub fn token(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Zstd => "zstd",
        }
    }

    /// Parse one `Accept-Encoding` token, ignoring any `;q=` parameter.
    pub fn from_token(tok: &str) -> Option<Self> {
        let tok = tok.split(';').next().unwrap_or("").trim();
        match tok {
            "gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "zstd" => Some(Encoding::Zstd),
            _ => None,
        }
    }
}

/// Resource bounds and timeouts (§5 "Resource bounds").
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    /// `None` means "unbounded by size, bounded by timeout" (the default).
    pub(crate) max_header_bytes: Option<u64>,
    /// Defaults to `u64::MAX` ("the platform's largest unsigned integer").
    pub(crate) max_body_bytes: u64,
    pub(crate) supported_encodings: Vec<Encoding>,
    pub(crate) server_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_header_bytes: None,
            max_body_bytes: u64::MAX,
            supported_encodings: vec![Encoding::Gzip, Encoding::Deflate, Encoding::Zstd],
            server_header: concat!("embedhttp/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    pub fn max_header_bytes(mut self, n: Option<u64>) -> Self {
        self.max_header_bytes = n;
        self
    }

    pub fn max_body_bytes(mut self, n: u64) -> Self {
        self.max_body_bytes = n;
        self
    }

    pub fn supported_encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.supported_encodings = encodings;
        self
    }

    /// Pick the first `Accept-Encoding` token this server supports, in the
    /// order the client sent them (§4.2 "the first such token is selected").
    pub fn negotiate(&self, accept_encoding: &str) -> Option<Encoding> {
        accept_encoding
            .split(',')
            .filter_map(Encoding::from_token)
            .find(|e| self.supported_encodings.contains(e))
    }
}
