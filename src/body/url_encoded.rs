use super::{Body, BodyReader, BodyWriter};
use crate::error::BodyError;
use crate::response::ResponseHead;
use crate::util::url::{encode_query, parse_query, MultiMap};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;

/// Reader for `application/x-www-form-urlencoded` bodies (§4.2 dispatch table).
pub struct UrlEncodedReader {
    buf: BytesMut,
}

impl UrlEncodedReader {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }
}

impl Default for UrlEncodedReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BodyReader for UrlEncodedReader {
    fn init(&mut self, content_length: Option<u64>) -> Result<(), BodyError> {
        if let Some(len) = content_length {
            self.buf.reserve(len.min(1 << 20) as usize);
        }
        Ok(())
    }

    fn put(&mut self, buf: &[u8]) -> Result<usize, BodyError> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn finish(self: Box<Self>) -> Result<Body, BodyError> {
        let raw = std::str::from_utf8(&self.buf)
            .map_err(|e| BodyError::UnexpectedBody(format!("non-UTF-8 url-encoded body: {e}")))?;
        Ok(Body::UrlEncoded(parse_query(raw)))
    }
}

/// Writer for `Body::UrlEncoded`.
pub struct UrlEncodedWriter {
    data: Option<Bytes>,
    map: MultiMap,
}

impl UrlEncodedWriter {
    pub fn new(map: MultiMap) -> Self {
        Self { data: None, map }
    }
}

#[async_trait]
impl BodyWriter for UrlEncodedWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        let encoded = encode_query(&self.map);
        head.content_length = Some(encoded.len() as u64);
        head.headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.data = Some(Bytes::from(encoded.into_bytes()));
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        Ok(self.data.take().map(|b| (b, false)))
    }
}
