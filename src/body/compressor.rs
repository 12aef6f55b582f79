//! Streaming compressor/decompressor decorators (§4.2 "Compression").
//!
//! Wraps a `BodyWriter` (compressing responses) or a `BodyReader`
//! (decompressing requests) around `flate2` (gzip/deflate) and `zstd`
//! (zstd) — the same codec crates `tower-http`'s compression layer uses via
//! `async-compression`, driven here through their synchronous
//! `write::*Encoder`/`*Decoder` buffer-sink API since our own contract is
//! buffer-driven rather than `AsyncWrite`-driven.

use super::{Body, BodyReader, BodyWriter};
use crate::config::Encoding;
use crate::error::BodyError;
use crate::response::ResponseHead;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use http::header::CONTENT_ENCODING;
use std::io::Write;

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl Encoder {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), flate2::Compression::default())),
            Encoding::Deflate => {
                Encoder::Deflate(DeflateEncoder::new(Vec::new(), flate2::Compression::default()))
            }
            Encoding::Zstd => {
                Encoder::Zstd(zstd::stream::write::Encoder::new(Vec::new(), 0).expect("zstd encoder init"))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.write_all(data),
            Encoder::Deflate(e) => e.write_all(data),
            Encoder::Zstd(e) => e.write_all(data),
        }
    }

    fn drain(&mut self) -> Vec<u8> {
        match self {
            Encoder::Gzip(e) => std::mem::take(e.get_mut()),
            Encoder::Deflate(e) => std::mem::take(e.get_mut()),
            Encoder::Zstd(e) => std::mem::take(e.get_mut()),
        }
    }

    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Encoder::Gzip(e) => e.finish(),
            Encoder::Deflate(e) => e.finish(),
            Encoder::Zstd(e) => e.finish(),
        }
    }
}

/// Wraps a response `BodyWriter`, compressing its output with the
/// negotiated encoding and marking the response chunked (§4.2).
pub struct CompressingWriter {
    inner: Box<dyn BodyWriter>,
    encoding: Encoding,
    encoder: Option<Encoder>,
    inner_done: bool,
    trailer_emitted: bool,
}

impl CompressingWriter {
    pub fn new(inner: Box<dyn BodyWriter>, encoding: Encoding) -> Self {
        Self {
            inner,
            encoding,
            encoder: Some(Encoder::new(encoding)),
            inner_done: false,
            trailer_emitted: false,
        }
    }
}

#[async_trait]
impl BodyWriter for CompressingWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        // Let the inner writer set Content-Type etc., then strip the
        // length it computed: compression makes the final length unknown
        // ahead of time, so framing becomes chunked (§6 "Response framing").
        self.inner.init(head)?;
        head.content_length = None;
        head.chunked = true;
        head.headers
            .insert(CONTENT_ENCODING, http::HeaderValue::from_static(self.encoding.token()));
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        if self.trailer_emitted {
            return Ok(None);
        }
        loop {
            if !self.inner_done {
                match self.inner.get().await? {
                    Some((chunk, more)) => {
                        let encoder = self.encoder.as_mut().expect("encoder present while streaming");
                        encoder
                            .write(&chunk)
                            .map_err(|e| BodyError::Codec(e.to_string()))?;
                        if !more {
                            self.inner_done = true;
                        }
                    }
                    None => self.inner_done = true,
                }
            }

            if self.inner_done {
                let encoder = self.encoder.take().expect("encoder present while finishing");
                let mut produced = encoder.drain();
                let tail = encoder.finish().map_err(|e| BodyError::Codec(e.to_string()))?;
                produced.extend_from_slice(&tail);
                self.trailer_emitted = true;
                return Ok(Some((Bytes::from(produced), false)));
            }

            let produced = self.encoder.as_mut().unwrap().drain();
            if !produced.is_empty() {
                return Ok(Some((Bytes::from(produced), true)));
            }
            // Nothing to emit yet; keep pulling from the inner writer.
        }
    }
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(DeflateDecoder<Vec<u8>>),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
}

impl Decoder {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            Encoding::Deflate => Decoder::Deflate(DeflateDecoder::new(Vec::new())),
            Encoding::Zstd => {
                Decoder::Zstd(zstd::stream::write::Decoder::new(Vec::new()).expect("zstd decoder init"))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Decoder::Gzip(d) => d.write_all(data),
            Decoder::Deflate(d) => d.write_all(data),
            Decoder::Zstd(d) => d.write_all(data),
        }
    }

    fn drain(&mut self) -> Vec<u8> {
        match self {
            Decoder::Gzip(d) => std::mem::take(d.get_mut()),
            Decoder::Deflate(d) => std::mem::take(d.get_mut()),
            Decoder::Zstd(d) => std::mem::take(d.get_mut()),
        }
    }
}

/// Wraps a request `BodyReader`, decompressing incoming bytes carrying
/// `Content-Encoding` before handing them to the inner reader (§4.2
/// "Decoders apply symmetrically on the read side").
pub struct DecompressingReader {
    inner: Box<dyn BodyReader>,
    decoder: Decoder,
}

impl DecompressingReader {
    pub fn new(inner: Box<dyn BodyReader>, encoding: Encoding) -> Self {
        Self {
            inner,
            decoder: Decoder::new(encoding),
        }
    }
}

#[async_trait]
impl BodyReader for DecompressingReader {
    fn init(&mut self, _content_length: Option<u64>) -> Result<(), BodyError> {
        // The encoded length on the wire doesn't bound the decoded length;
        // let the inner reader size itself lazily.
        self.inner.init(None)
    }

    fn put(&mut self, buf: &[u8]) -> Result<usize, BodyError> {
        self.decoder
            .write(buf)
            .map_err(|e| BodyError::Codec(e.to_string()))?;
        let produced = self.decoder.drain();
        if !produced.is_empty() {
            let mut offset = 0;
            while offset < produced.len() {
                let n = self.inner.put(&produced[offset..])?;
                if n == 0 {
                    break;
                }
                offset += n;
            }
        }
        Ok(buf.len())
    }

    fn finish(self: Box<Self>) -> Result<Body, BodyError> {
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::string::{StringReader, StringWriter};
    use crate::response::ResponseHead;

    async fn drain(writer: &mut dyn BodyWriter) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some((chunk, more)) = writer.get().await.unwrap() {
            out.extend_from_slice(&chunk);
            if !more {
                break;
            }
        }
        out
    }

    async fn roundtrip(encoding: Encoding) {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let inner = Box::new(StringWriter::new(Bytes::from(original.clone())));
        let mut writer = CompressingWriter::new(inner, encoding);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert!(head.chunked);
        assert!(head.content_length.is_none());
        assert_eq!(head.headers.get(CONTENT_ENCODING).unwrap(), encoding.token());

        let compressed = drain(&mut writer).await;
        assert_ne!(compressed, original, "compressed output shouldn't equal the input verbatim for this size");

        let mut reader = DecompressingReader::new(Box::new(StringReader::new()), encoding);
        reader.init(None).unwrap();
        let mut offset = 0;
        while offset < compressed.len() {
            let n = reader.put(&compressed[offset..]).unwrap();
            assert!(n > 0);
            offset += n;
        }
        let body = Box::new(reader).finish().unwrap();
        match body {
            Body::String(b) => assert_eq!(&b[..], &original[..]),
            _ => panic!("expected Body::String"),
        }
    }

    #[tokio::test]
    async fn gzip_roundtrips() {
        roundtrip(Encoding::Gzip).await;
    }

    #[tokio::test]
    async fn deflate_roundtrips() {
        roundtrip(Encoding::Deflate).await;
    }

    #[tokio::test]
    async fn zstd_roundtrips() {
        roundtrip(Encoding::Zstd).await;
    }
}
