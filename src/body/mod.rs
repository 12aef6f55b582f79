//! The polymorphic body abstraction (§4.2, §9 "Polymorphic bodies").
//!
//! A tagged enum `Body` plus two capability traits, `BodyReader` and
//! `BodyWriter`, with one implementor per tag — mirroring
//! `original_source/include/httplib/body/any_body.hpp`'s visitor-dispatched
//! design, translated into Rust's trait-object idiom the way axum-core's own
//! `Body` wraps `http_body::Body` per variant.

pub mod compressor;
pub mod empty;
pub mod file;
pub mod form_data;
pub mod json;
pub mod string;
pub mod url_encoded;

use crate::error::BodyError;
use crate::response::ResponseHead;
use async_trait::async_trait;
use bytes::Bytes;

pub use file::FileBody;
pub use form_data::{FormDataBody, FormField};

use crate::util::url::MultiMap;

/// The six body kinds carried by a request or a response (§3).
pub enum Body {
    Empty,
    String(Bytes),
    Json(serde_json::Value),
    FormData(FormDataBody),
    UrlEncoded(MultiMap),
    File(FileBody),
}

impl Body {
    pub fn is_empty_kind(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::String(b) => write!(f, "Body::String({} bytes)", b.len()),
            Body::Json(_) => write!(f, "Body::Json"),
            Body::FormData(fd) => write!(f, "Body::FormData({} fields)", fd.fields.len()),
            Body::UrlEncoded(m) => write!(f, "Body::UrlEncoded({} pairs)", m.len()),
            Body::File(file) => write!(f, "Body::File({:?})", file.mime),
        }
    }
}

/// Produces the next outbound chunk of a response body (§4.2 "Writer
/// contract"). `get` must not block; it returns `Ok(None)` exactly once, to
/// signal end, and may emit a zero-length chunk only in that final call.
#[async_trait]
pub trait BodyWriter: Send {
    /// Prepare headers (`Content-Type`, `Content-Range`,
    /// `Content-Disposition`) against the outgoing message.
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError>;

    /// `Some((chunk, more))` for the next chunk (`more` is true iff another
    /// chunk will follow), or `None` once exhausted.
    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError>;
}

/// Ingests an incoming request body incrementally (§4.2 "Reader contract").
#[async_trait]
pub trait BodyReader: Send {
    fn init(&mut self, content_length: Option<u64>) -> Result<(), BodyError>;

    /// Consume as much of `buf` as can be parsed right now; returns the
    /// number of bytes actually consumed. Consuming fewer bytes than were
    /// given is the "need more data" signal — callers retry with more bytes
    /// appended, they do not treat it as an error.
    fn put(&mut self, buf: &[u8]) -> Result<usize, BodyError>;

    /// Finalize and produce the completed `Body`. An incomplete or
    /// ill-formed body is reported here as an error.
    fn finish(self: Box<Self>) -> Result<Body, BodyError>;
}

/// `Content-Type` prefix → reader dispatch table (§4.2).
pub fn reader_for(content_type: Option<&str>) -> Box<dyn BodyReader> {
    let content_type = content_type.unwrap_or("");
    let lower = content_type.to_ascii_lowercase();
    if lower.starts_with("multipart/form-data") {
        // Boundaries are case-sensitive; extract from the original-case
        // value, only the dispatch prefix check is lowercased.
        match crate::util::boundary::extract_boundary(content_type) {
            Some(boundary) => return Box::new(form_data::FormDataReader::new(boundary)),
            None => return Box::new(string::StringReader::new()),
        }
    }
    if lower.starts_with("application/json") {
        return Box::new(json::JsonReader::new());
    }
    if lower.starts_with("application/x-www-form-urlencoded") {
        return Box::new(url_encoded::UrlEncodedReader::new());
    }
    Box::new(string::StringReader::new())
}

/// Body tag → writer dispatch (§4.2, §9 "a thin facade picks the implementor
/// by inspecting ... the current tag (for writers)").
pub fn writer_for(body: Body) -> Box<dyn BodyWriter> {
    match body {
        Body::Empty => Box::new(empty::EmptyWriter),
        Body::String(b) => Box::new(string::StringWriter::new(b)),
        Body::Json(v) => Box::new(json::JsonWriter::new(v)),
        Body::FormData(fd) => Box::new(form_data::FormDataWriter::new(fd)),
        Body::UrlEncoded(m) => Box::new(url_encoded::UrlEncodedWriter::new(m)),
        Body::File(f) => Box::new(file::FileWriter::new(f)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish_with(content_type: Option<&str>, payload: &[u8]) -> Body {
        let mut reader = reader_for(content_type);
        reader.init(Some(payload.len() as u64)).unwrap();
        let mut offset = 0;
        while offset < payload.len() {
            let n = reader.put(&payload[offset..]).unwrap();
            assert!(n > 0, "reader stalled dispatching {content_type:?}");
            offset += n;
        }
        reader.finish().unwrap()
    }

    #[test]
    fn dispatches_json_by_content_type_prefix() {
        assert!(matches!(finish_with(Some("application/json"), br#"{"a":1}"#), Body::Json(_)));
        assert!(matches!(
            finish_with(Some("application/json; charset=utf-8"), br#"{"a":1}"#),
            Body::Json(_)
        ));
    }

    #[test]
    fn dispatches_url_encoded_by_content_type_prefix() {
        assert!(matches!(
            finish_with(Some("application/x-www-form-urlencoded"), b"a=1"),
            Body::UrlEncoded(_)
        ));
    }

    #[test]
    fn dispatches_form_data_when_boundary_present() {
        let body = finish_with(Some("multipart/form-data; boundary=X"), b"--X--\r\n");
        assert!(matches!(body, Body::FormData(_)));
    }

    #[test]
    fn boundary_extraction_preserves_original_case() {
        let content_type = "multipart/form-data; boundary=----WebKitFormBoundaryAbC123";
        let payload = b"------WebKitFormBoundaryAbC123--\r\n";
        match finish_with(Some(content_type), payload) {
            Body::FormData(fd) => assert_eq!(fd.boundary, "----WebKitFormBoundaryAbC123"),
            other => panic!("expected FormData, got {other:?}"),
        }
    }

    #[test]
    fn multipart_without_boundary_falls_back_to_string() {
        assert!(matches!(finish_with(Some("multipart/form-data"), b"anything"), Body::String(_)));
    }

    #[test]
    fn unknown_or_absent_content_type_falls_back_to_string() {
        assert!(matches!(finish_with(Some("text/plain"), b"hi"), Body::String(_)));
        assert!(matches!(finish_with(None, b"hi"), Body::String(_)));
    }

    #[test]
    fn is_empty_kind_matches_only_empty_variant() {
        assert!(Body::Empty.is_empty_kind());
        assert!(!Body::String(Bytes::new()).is_empty_kind());
    }
}
