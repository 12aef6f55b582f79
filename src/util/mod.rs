//! Small standalone utilities shared across the session, body and router
//! layers: URL decode/encode, HTTP-date formatting, `Range` parsing,
//! multipart boundary generation, and a buffer pool for hot-path scratch
//! space (§9 "object pool").

pub mod boundary;
pub mod date;
pub mod pool;
pub mod range;
pub mod url;
