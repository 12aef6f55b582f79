use super::BodyWriter;
use crate::error::BodyError;
use crate::response::ResponseHead;
use async_trait::async_trait;
use bytes::Bytes;

/// Writer for `Body::Empty` — sets `Content-Length: 0` and emits nothing
/// (§4.4 `set_empty_content`).
pub struct EmptyWriter;

#[async_trait]
impl BodyWriter for EmptyWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        head.content_length = Some(0);
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[tokio::test]
    async fn sets_zero_length_and_emits_nothing() {
        let mut writer = EmptyWriter;
        let mut head = ResponseHead {
            headers: HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.content_length, Some(0));
        assert!(writer.get().await.unwrap().is_none());
    }
}
