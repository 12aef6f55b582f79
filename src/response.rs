//! Response composition (§4.4): ergonomic setters plus the finalization
//! step the session applies once a handler returns.

use crate::body::compressor::CompressingWriter;
use crate::body::file::{FileBody, MimeResolver};
use crate::body::{writer_for, Body, BodyWriter, FormField};
use crate::config::ServerConfig;
use crate::error::{BodyError, SessionError};
use crate::util::date::{format_http_date, if_none_match_satisfied, now_http_date, parse_http_date, weak_etag};
use crate::util::range::parse_range;
use crate::util::url::MultiMap;
use http::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, LOCATION, SERVER, TRANSFER_ENCODING,
};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// What a `BodyWriter::init` call mutates against the outgoing message
/// (§4.2 writer contract). Finalization computes `Content-Length` or
/// `Transfer-Encoding: chunked` from this after the writer runs.
pub struct ResponseHead {
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

/// The two shapes a response body can take (§3 "either (i) a buffered body
/// or (ii) a streaming producer"). The buffered variant is one of the six
/// tagged `Body` kinds dispatched through `writer_for`; the streaming
/// variant is a caller-supplied `BodyWriter` attached via
/// `set_stream_content`, already framed as chunked.
pub enum ResponsePayload {
    Buffered(Body),
    Stream(Box<dyn BodyWriter>),
}

/// A response under construction by a route handler (§3, §6 "response
/// (mutable from handler)").
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub keep_alive: bool,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            keep_alive: true,
            payload: ResponsePayload::Buffered(Body::Empty),
        }
    }

    pub fn set_empty_content(&mut self, status: StatusCode) {
        self.status = status;
        self.payload = ResponsePayload::Buffered(Body::Empty);
    }

    pub fn set_string_content(&mut self, data: impl Into<bytes::Bytes>, content_type: &str, status: StatusCode) {
        self.status = status;
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
        );
        self.payload = ResponsePayload::Buffered(Body::String(data.into()));
    }

    pub fn set_json_content(&mut self, value: serde_json::Value, status: StatusCode) {
        self.status = status;
        self.payload = ResponsePayload::Buffered(Body::Json(value));
    }

    pub fn set_form_data_content(&mut self, fields: Vec<FormField>) {
        self.status = StatusCode::OK;
        let boundary = crate::util::boundary::generate_boundary();
        self.payload = ResponsePayload::Buffered(Body::FormData(crate::body::FormDataBody { boundary, fields }));
    }

    pub fn set_redirect(&mut self, url: &str, status: StatusCode) {
        if let Ok(value) = HeaderValue::from_str(url) {
            self.headers.insert(LOCATION, value);
        }
        self.set_empty_content(status);
    }

    /// Attaches a caller-supplied streaming producer; framing becomes
    /// chunked regardless of the encoding negotiation outcome (§4.4,
    /// §5 "the chunk-producer callback for streamed responses").
    pub fn set_stream_content(&mut self, producer: Box<dyn BodyWriter>, content_type: &str, status: StatusCode) {
        self.status = status;
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
        );
        self.payload = ResponsePayload::Stream(producer);
    }

    /// Computes an ETag/Last-Modified, honors `If-None-Match` /
    /// `If-Modified-Since`, parses `Range`, and attaches a `File` body with
    /// the resolved ranges (§4.4 `set_file_content`).
    pub async fn set_file_content(
        &mut self,
        path: impl AsRef<Path>,
        request_headers: &HeaderMap,
        resolver: &dyn MimeResolver,
    ) -> Result<(), SessionError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();
        let modified = metadata.modified()?;
        let mtime_unix = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let etag = weak_etag(size, mtime_unix);
        let last_modified = format_http_date(modified);

        if let Some(inm) = request_headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
            if if_none_match_satisfied(inm, &etag) {
                return Ok(self.not_modified(&etag, &last_modified));
            }
        } else if let Some(ims) = request_headers.get(IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()) {
            if let Some(since) = parse_http_date(ims) {
                if since >= modified {
                    return Ok(self.not_modified(&etag, &last_modified));
                }
            }
        }

        let range_header = request_headers.get(http::header::RANGE).and_then(|v| v.to_str().ok());
        let ranges = match parse_range(range_header, size) {
            Ok(r) => r,
            Err(_) => {
                self.status = StatusCode::RANGE_NOT_SATISFIABLE;
                self.headers.insert(
                    http::header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes */{size}")).expect("digits are valid header bytes"),
                );
                self.payload = ResponsePayload::Buffered(Body::Empty);
                return Ok(());
            }
        };

        self.status = if ranges.is_empty() { StatusCode::OK } else { StatusCode::PARTIAL_CONTENT };
        self.headers.insert(ETAG, HeaderValue::from_str(&etag).expect("etag is valid header bytes"));
        self.headers
            .insert(LAST_MODIFIED, HeaderValue::from_str(&last_modified).expect("http-date is valid header bytes"));

        let mime = resolver.resolve(path).to_string();
        let mut body = FileBody::whole(path.to_path_buf(), mime, size, modified);
        body.ranges = ranges;
        self.payload = ResponsePayload::Buffered(Body::File(body));
        Ok(())
    }

    fn not_modified(&mut self, etag: &str, last_modified: &str) {
        self.status = StatusCode::NOT_MODIFIED;
        self.headers.insert(ETAG, HeaderValue::from_str(etag).expect("etag is valid header bytes"));
        self.headers
            .insert(LAST_MODIFIED, HeaderValue::from_str(last_modified).expect("http-date is valid header bytes"));
        self.payload = ResponsePayload::Buffered(Body::Empty);
    }

    /// Applies §4.4's post-handler finalization: `Server`/`Date`/
    /// `Connection` if absent, `Content-Length` or chunked framing, and
    /// `Content-Encoding` negotiation against the request's
    /// `Accept-Encoding` — skipped when the handler already attached a
    /// streaming producer, per §4.4 "did not already set streaming".
    pub async fn finalize(
        &mut self,
        config: &ServerConfig,
        request_headers: &HeaderMap,
    ) -> Result<Box<dyn BodyWriter>, BodyError> {
        let is_stream = matches!(self.payload, ResponsePayload::Stream(_));
        let encoding = if is_stream {
            None
        } else {
            request_headers
                .get(ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| config.negotiate(v))
        };

        let inner: Box<dyn BodyWriter> = match std::mem::replace(&mut self.payload, ResponsePayload::Buffered(Body::Empty)) {
            ResponsePayload::Buffered(body) => writer_for(body),
            ResponsePayload::Stream(writer) => writer,
        };
        let mut writer: Box<dyn BodyWriter> = match encoding {
            Some(enc) => Box::new(CompressingWriter::new(inner, enc)),
            None => inner,
        };

        let mut head = ResponseHead {
            headers: std::mem::take(&mut self.headers),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head)?;

        let no_body_status = matches!(self.status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED);
        if no_body_status {
            head.headers.remove(CONTENT_LENGTH);
            head.headers.remove(TRANSFER_ENCODING);
        } else if head.chunked {
            head.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        } else if let Some(len) = head.content_length {
            head.headers.insert(
                CONTENT_LENGTH,
                HeaderValue::from_str(&len.to_string()).expect("digits are valid header bytes"),
            );
        }

        head.headers
            .entry(SERVER)
            .or_insert_with(|| HeaderValue::from_str(&config.server_header).unwrap_or_else(|_| HeaderValue::from_static("embedhttp")));
        head.headers.entry(DATE).or_insert_with(|| HeaderValue::from_str(&now_http_date()).expect("http-date is valid header bytes"));
        head.headers.entry(CONNECTION).or_insert_with(|| {
            HeaderValue::from_static(if self.keep_alive { "keep-alive" } else { "close" })
        });

        self.headers = head.headers;
        Ok(writer)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal HTML error page carrying the status code, reason phrase, and
/// `Server` value (§7 "User-visible failure behavior").
pub fn error_page(status: StatusCode, server_header: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("");
    format!(
        "<!DOCTYPE html><html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1><p>{server}</p></body></html>",
        code = status.as_u16(),
        reason = reason,
        server = server_header,
    )
}

/// Decoded query/path parameter pair used when building redirect targets
/// or echoing parameters back into an error page; a thin re-export so
/// callers don't need to reach into `crate::util::url` directly.
pub type ParamMap = MultiMap;

/// Builds a `Response` carrying the 4xx/5xx default body described in §7.
pub fn default_error_response(status: StatusCode, server_header: &str) -> Response {
    let mut resp = Response::new();
    resp.set_string_content(error_page(status, server_header), "text/html; charset=utf-8", status);
    resp.keep_alive = false;
    resp
}

/// Same body as [`default_error_response`] without forcing the connection
/// closed; used for ordinary 404/405 responses, which don't warrant
/// dropping keep-alive the way a caught handler panic does.
pub fn error_response(status: StatusCode, server_header: &str) -> Response {
    let mut resp = Response::new();
    resp.set_string_content(error_page(status, server_header), "text/html; charset=utf-8", status);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finalize_sets_content_length_for_string_body() {
        let config = ServerConfig::default();
        let mut resp = Response::new();
        resp.set_string_content("hi\n", "text/plain", StatusCode::OK);
        let writer = resp.finalize(&config, &HeaderMap::new()).await.unwrap();
        drop(writer);
        assert_eq!(resp.headers.get(CONTENT_LENGTH).unwrap(), "3");
        assert_eq!(resp.headers.get(CONNECTION).unwrap(), "keep-alive");
    }

    #[tokio::test]
    async fn not_modified_has_no_content_length() {
        let config = ServerConfig::default();
        let mut resp = Response::new();
        resp.status = StatusCode::NOT_MODIFIED;
        resp.payload = ResponsePayload::Buffered(Body::Empty);
        resp.finalize(&config, &HeaderMap::new()).await.unwrap();
        assert!(resp.headers.get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn error_page_contains_status_and_server() {
        let page = error_page(StatusCode::NOT_FOUND, "embedhttp/0.1.0");
        assert!(page.contains("404"));
        assert!(page.contains("embedhttp/0.1.0"));
    }
}
