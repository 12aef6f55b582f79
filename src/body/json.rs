use super::{Body, BodyReader, BodyWriter};
use crate::error::BodyError;
use crate::response::ResponseHead;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};

/// Reader for `application/json` request bodies (§4.2 dispatch table).
pub struct JsonReader {
    buf: BytesMut,
}

impl JsonReader {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }
}

impl Default for JsonReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BodyReader for JsonReader {
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
        let value: serde_json::Value = serde_json::from_slice(&self.buf)
            .map_err(|e| BodyError::UnexpectedBody(format!("invalid JSON body: {e}")))?;
        Ok(Body::Json(value))
    }
}

/// Writer for `Body::Json` (§4.4 `set_json_content`): sets
/// `Content-Type: application/json; charset=utf-8` and `Cache-Control: no-store`.
pub struct JsonWriter {
    data: Option<Bytes>,
    value: serde_json::Value,
}

impl JsonWriter {
    pub fn new(value: serde_json::Value) -> Self {
        Self { data: None, value }
    }
}

#[async_trait]
impl BodyWriter for JsonWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        let encoded = serde_json::to_vec(&self.value)
            .map_err(|e| BodyError::UnexpectedBody(format!("could not serialize JSON body: {e}")))?;
        head.content_length = Some(encoded.len() as u64);
        head.headers
            .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json; charset=utf-8"));
        head.headers
            .insert(CACHE_CONTROL, http::HeaderValue::from_static("no-store"));
        self.data = Some(Bytes::from(encoded));
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        Ok(self.data.take().map(|b| (b, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseHead;
    use http::HeaderMap;

    #[test]
    fn reader_parses_valid_json() {
        let mut reader = JsonReader::new();
        reader.init(None).unwrap();
        reader.put(br#"{"a":1}"#).unwrap();
        let body = Box::new(reader).finish().unwrap();
        match body {
            Body::Json(v) => assert_eq!(v["a"], 1),
            _ => panic!("expected Body::Json"),
        }
    }

    #[test]
    fn reader_rejects_invalid_json() {
        let mut reader = JsonReader::new();
        reader.init(None).unwrap();
        reader.put(b"{not json").unwrap();
        assert!(Box::new(reader).finish().is_err());
    }

    #[tokio::test]
    async fn writer_sets_content_type_and_cache_control() {
        let mut writer = JsonWriter::new(serde_json::json!({"ok": true}));
        let mut head = ResponseHead {
            headers: HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "application/json; charset=utf-8");
        assert_eq!(head.headers.get(CACHE_CONTROL).unwrap(), "no-store");
        let (chunk, more) = writer.get().await.unwrap().unwrap();
        assert_eq!(&chunk[..], br#"{"ok":true}"#);
        assert!(!more);
    }
}
