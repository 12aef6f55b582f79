use super::{Body, BodyReader, BodyWriter};
use crate::error::BodyError;
use crate::response::ResponseHead;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

/// Reader for any request whose `Content-Type` didn't match a more specific
/// kind (§4.2 dispatch table, "other / absent").
pub struct StringReader {
    buf: BytesMut,
    limit: Option<u64>,
}

impl StringReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            limit: None,
        }
    }
}

impl Default for StringReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BodyReader for StringReader {
    fn init(&mut self, content_length: Option<u64>) -> Result<(), BodyError> {
        self.limit = content_length;
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
        Ok(Body::String(self.buf.freeze()))
    }
}

/// Writer for a buffered byte string (§4.4 `set_string_content`).
pub struct StringWriter {
    data: Option<Bytes>,
}

impl StringWriter {
    pub fn new(data: Bytes) -> Self {
        Self { data: Some(data) }
    }
}

#[async_trait]
impl BodyWriter for StringWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        let len = self.data.as_ref().map(|b| b.len()).unwrap_or(0) as u64;
        head.content_length = Some(len);
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        Ok(self.data.take().map(|b| (b, false)))
    }
}
