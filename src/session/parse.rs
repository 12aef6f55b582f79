//! Incremental HTTP/1.1 message-head parsing and the body read/write
//! drivers (§4.1 step 3a/3d, §6 "Request parsing", §4.2).

use crate::body::{reader_for, Body, BodyReader};
use crate::config::{Encoding, ServerConfig};
use crate::error::{BodyError, SessionError};
use crate::util::url::{decode_path, parse_query, MultiMap};
use bytes::BytesMut;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, EXPECT, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// The parsed request-line plus headers, before the body is read.
pub struct MessageHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Reads bytes off `stream` until a blank line terminates the header block,
/// parses the request-line and headers, and returns the head plus any body
/// bytes that were already read past the header terminator (so a single
/// `read()` covering both head and the start of the body isn't wasted).
///
/// Returns `Ok(None)` if the peer closed the connection before sending any
/// bytes at all (the ordinary way a keep-alive connection ends).
///
/// `seed` carries forward any bytes already read past the end of the
/// previous message on this connection (a pipelined next request read
/// alongside the prior one's body) so a keep-alive loop never drops them.
pub async fn read_message_head<S>(
    stream: &mut S,
    config: &ServerConfig,
    seed: BytesMut,
) -> Result<Option<(MessageHead, BytesMut)>, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = seed;
    let mut scratch = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_terminator(&buf) {
            break pos;
        }
        if let Some(limit) = config.max_header_bytes {
            if buf.len() as u64 > limit {
                return Err(SessionError::BufferOverflow { limit });
            }
        }
        let n = timeout(config.read_timeout, stream.read(&mut scratch))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(SessionError::Parse("connection closed mid-header".into()));
        }
        buf.extend_from_slice(&scratch[..n]);
    };

    let head_bytes = buf.split_to(header_end + 4);
    let head = parse_head(&head_bytes[..head_bytes.len() - 4])?;
    Ok(Some((head, buf)))
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(raw: &[u8]) -> Result<MessageHead, SessionError> {
    let text = std::str::from_utf8(raw).map_err(|_| SessionError::Parse("non-UTF-8 header block".into()))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| SessionError::Parse("empty request".into()))?;

    let mut parts = request_line.split(' ');
    let method_str = parts.next().ok_or_else(|| SessionError::Parse("missing method".into()))?;
    let target = parts.next().ok_or_else(|| SessionError::Parse("missing target".into()))?.to_string();
    let version_str = parts.next().ok_or_else(|| SessionError::Parse("missing version".into()))?;
    if parts.next().is_some() {
        return Err(SessionError::Parse("malformed request-line".into()));
    }

    let method = method_str.parse::<Method>().map_err(|_| SessionError::Parse(format!("unknown method {method_str:?}")))?;
    let version = match version_str {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => return Err(SessionError::Parse(format!("unsupported version {other:?}"))),
    };

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SessionError::Parse(format!("malformed header line {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| SessionError::Parse(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| SessionError::Parse(format!("invalid header value: {e}")))?;
        headers.append(name, value);
    }

    if !headers.contains_key(HOST) {
        return Err(SessionError::BadField("Host header is required".into()));
    }

    Ok(MessageHead { method, target, version, headers })
}

/// Splits a decoded request-target into its path and query components
/// (§3 "target (raw), decoded path, decoded query parameters").
pub fn split_target(target: &str) -> (String, MultiMap) {
    match target.split_once('?') {
        Some((path, query)) => (decode_path(path), parse_query(query)),
        None => (decode_path(target), MultiMap::new()),
    }
}

/// Reads and fully assembles a request body per the dispatch rules in §4.2,
/// honoring `Content-Length`/`Transfer-Encoding: chunked` framing (§6) and
/// applying decompression if `Content-Encoding` is present on the request.
///
/// `leftover` is body bytes already read alongside the header block; it is
/// consumed first before any further reads from `stream`.
pub async fn read_body<S>(
    stream: &mut S,
    headers: &HeaderMap,
    leftover: &mut BytesMut,
    config: &ServerConfig,
) -> Result<Body, SessionError>
where
    S: AsyncRead + Unpin,
{
    let content_length = headers
        .get(CONTENT_LENGTH)
        .map(|v| v.to_str().map_err(|_| SessionError::BadField("non-ASCII Content-Length".into())))
        .transpose()?
        .map(|s| s.trim().parse::<u64>().map_err(|_| SessionError::BadField("malformed Content-Length".into())))
        .transpose()?;

    let chunked = headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);

    if chunked && content_length.is_some() {
        return Err(SessionError::BadField("Content-Length and Transfer-Encoding: chunked both present".into()));
    }

    if let Some(len) = content_length {
        if len > config.max_body_bytes {
            return Err(SessionError::BufferOverflow { limit: config.max_body_bytes });
        }
    }

    let content_type = headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let mut reader = reader_for(content_type);
    if let Some(encoding) = headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()).and_then(Encoding::from_token) {
        reader = Box::new(crate::body::compressor::DecompressingReader::new(reader, encoding));
    }
    reader.init(content_length).map_err(SessionError::Body)?;

    if chunked {
        read_chunked_body(stream, reader, leftover, config).await
    } else if let Some(len) = content_length {
        read_fixed_body(stream, reader, leftover, len, config).await
    } else {
        reader.finish().map_err(SessionError::Body)
    }
}

async fn feed_reader(reader: &mut Box<dyn BodyReader>, mut data: &[u8]) -> Result<(), SessionError> {
    while !data.is_empty() {
        let n = reader.put(data).map_err(SessionError::Body)?;
        if n == 0 {
            return Err(SessionError::Body(BodyError::UnexpectedBody("reader stalled without consuming input".into())));
        }
        data = &data[n..];
    }
    Ok(())
}

async fn read_fixed_body<S>(
    stream: &mut S,
    mut reader: Box<dyn BodyReader>,
    leftover: &mut BytesMut,
    len: u64,
    config: &ServerConfig,
) -> Result<Body, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut remaining = len;
    if !leftover.is_empty() {
        let take = (leftover.len() as u64).min(remaining) as usize;
        let chunk = leftover.split_to(take);
        feed_reader(&mut reader, &chunk).await?;
        remaining -= take as u64;
    }

    let mut scratch = vec![0u8; 8192];
    while remaining > 0 {
        let want = scratch.len().min(remaining as usize);
        let n = timeout(config.read_timeout, stream.read(&mut scratch[..want]))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if n == 0 {
            return Err(SessionError::Body(BodyError::UnexpectedBody("connection closed before body completed".into())));
        }
        feed_reader(&mut reader, &scratch[..n]).await?;
        remaining -= n as u64;
    }
    reader.finish().map_err(SessionError::Body)
}

/// Dechunks `Transfer-Encoding: chunked` framing (RFC 7230 §4.1) while
/// feeding decoded payload bytes to the body reader, enforcing the body
/// size cap against the *decoded* total.
async fn read_chunked_body<S>(
    stream: &mut S,
    mut reader: Box<dyn BodyReader>,
    leftover: &mut BytesMut,
    config: &ServerConfig,
) -> Result<Body, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = std::mem::take(leftover);
    let mut total: u64 = 0;
    let mut scratch = [0u8; 8192];

    loop {
        let size_line_end = loop {
            if let Some(pos) = find_crlf(&buf) {
                break pos;
            }
            let n = timeout(config.read_timeout, stream.read(&mut scratch))
                .await
                .map_err(|_| SessionError::Timeout)??;
            if n == 0 {
                return Err(SessionError::Parse("connection closed mid-chunk-size".into()));
            }
            buf.extend_from_slice(&scratch[..n]);
        };
        let size_line = buf.split_to(size_line_end + 2);
        let size_text = std::str::from_utf8(&size_line[..size_line.len() - 2])
            .map_err(|_| SessionError::Parse("non-UTF-8 chunk size".into()))?;
        let size_text = size_text.split(';').next().unwrap_or("").trim();
        let chunk_size = u64::from_str_radix(size_text, 16)
            .map_err(|_| SessionError::Parse(format!("malformed chunk size {size_text:?}")))?;

        if chunk_size == 0 {
            // Consume the trailer section (possibly empty) up to the final CRLF.
            loop {
                if let Some(pos) = find_header_terminator_or_bare_crlf(&buf) {
                    buf.split_to(pos);
                    break;
                }
                let n = timeout(config.read_timeout, stream.read(&mut scratch))
                    .await
                    .map_err(|_| SessionError::Timeout)??;
                if n == 0 {
                    return Err(SessionError::Parse("connection closed mid-trailer".into()));
                }
                buf.extend_from_slice(&scratch[..n]);
            }
            *leftover = buf;
            return reader.finish().map_err(SessionError::Body);
        }

        total += chunk_size;
        if total > config.max_body_bytes {
            return Err(SessionError::BufferOverflow { limit: config.max_body_bytes });
        }

        let needed = chunk_size as usize + 2; // payload + trailing CRLF
        while buf.len() < needed {
            let n = timeout(config.read_timeout, stream.read(&mut scratch))
                .await
                .map_err(|_| SessionError::Timeout)??;
            if n == 0 {
                return Err(SessionError::Parse("connection closed mid-chunk".into()));
            }
            buf.extend_from_slice(&scratch[..n]);
        }
        let mut chunk = buf.split_to(needed);
        chunk.truncate(chunk_size as usize);
        feed_reader(&mut reader, &chunk).await?;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// The trailer section ends at the first bare `\r\n` (no trailers) or at
/// `\r\n\r\n` (trailers present); either way the byte offset returned is
/// where the *next* message begins.
fn find_header_terminator_or_bare_crlf(buf: &[u8]) -> Option<usize> {
    if buf.starts_with(b"\r\n") {
        return Some(2);
    }
    find_header_terminator(buf).map(|pos| pos + 4)
}

/// Writes a `100 Continue` interim response (§6 "`Expect: 100-continue`
/// triggers an interim `100 Continue` response before body read").
pub fn wants_100_continue(headers: &HeaderMap) -> bool {
    headers
        .get(EXPECT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false)
}

pub async fn write_100_continue<S>(stream: &mut S, config: &ServerConfig) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
{
    timeout(config.write_timeout, stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n"))
        .await
        .map_err(|_| SessionError::Timeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_request_line_and_headers() {
        let raw = b"GET /a?b=c HTTP/1.1\r\nHost: x\r\nX-Foo: bar\r\n\r\n".to_vec();
        let mut stream = std::io::Cursor::new(raw);
        let config = ServerConfig::default();
        let (head, leftover) = read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap().unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/a?b=c");
        assert_eq!(head.headers.get("x-foo").unwrap(), "bar");
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn missing_host_header_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\n\r\n".to_vec();
        let mut stream = std::io::Cursor::new(raw);
        let config = ServerConfig::default();
        let err = read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::BadField(_)));
    }

    #[tokio::test]
    async fn empty_connection_returns_none() {
        let mut stream = std::io::Cursor::new(Vec::<u8>::new());
        let config = ServerConfig::default();
        assert!(read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_fixed_length_body_split_across_leftover_and_stream() {
        let head_and_partial = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhel";
        let rest = b"lo";
        let mut combined = head_and_partial.to_vec();
        combined.extend_from_slice(rest);
        let mut stream = std::io::Cursor::new(combined);
        let config = ServerConfig::default();
        let (head, mut leftover) = read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap().unwrap();
        let body = read_body(&mut stream, &head.headers, &mut leftover, &config).await.unwrap();
        match body {
            Body::String(b) => assert_eq!(&b[..], b"hello"),
            other => panic!("expected string body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dechunks_body() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut stream = std::io::Cursor::new(raw);
        let config = ServerConfig::default();
        let (head, mut leftover) = read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap().unwrap();
        let body = read_body(&mut stream, &head.headers, &mut leftover, &config).await.unwrap();
        match body {
            Body::String(b) => assert_eq!(&b[..], b"Wikipedia"),
            other => panic!("expected string body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conflicting_framing_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\nx".to_vec();
        let mut stream = std::io::Cursor::new(raw);
        let config = ServerConfig::default();
        let (head, mut leftover) = read_message_head(&mut stream, &config, BytesMut::new()).await.unwrap().unwrap();
        let err = read_body(&mut stream, &head.headers, &mut leftover, &config).await.unwrap_err();
        assert!(matches!(err, SessionError::BadField(_)));
    }
}
