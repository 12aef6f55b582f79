//! File body kind: whole-file streaming, single-range `206`, and
//! multi-range `multipart/byteranges` (§4.2 "file writer").
//!
//! MIME-type lookup is the out-of-scope "MIME-type lookup" collaborator
//! (SPEC_FULL §9 Open Questions); `MimeResolver` is the small seam callers
//! substitute a richer resolver (e.g. `mime_guess`) through.

use super::BodyWriter;
use crate::error::BodyError;
use crate::response::ResponseHead;
use crate::util::pool::{BufferPool, DEFAULT_SCRATCH_CAPACITY};
use crate::util::range::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A file-backed response body, already resolved to the byte range(s) to
/// serve (§4.4 `set_file_content` decides ranges/status before handing this
/// to the writer; the writer only streams what it's given).
pub struct FileBody {
    pub path: PathBuf,
    pub mime: String,
    pub size: u64,
    pub modified: SystemTime,
    /// Empty means "serve the whole file"; one entry is a single `206`;
    /// more than one is `multipart/byteranges`.
    pub ranges: Vec<ByteRange>,
    /// Set when `ranges.len() > 1`.
    pub boundary: Option<String>,
}

impl FileBody {
    pub fn whole(path: impl Into<PathBuf>, mime: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            mime: mime.into(),
            size,
            modified,
            ranges: Vec::new(),
            boundary: None,
        }
    }
}

/// Resolves a filesystem path to a MIME type. Reader/writer code only
/// depends on this trait, never on a concrete lookup table, so callers can
/// swap in their own (e.g. backed by the `mime_guess` crate).
pub trait MimeResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> &str;
}

/// Small built-in table covering the extensions static-file serving most
/// commonly hits; anything else falls back to `application/octet-stream`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMimeResolver;

impl MimeResolver for DefaultMimeResolver {
    fn resolve(&self, path: &Path) -> &str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => "text/html; charset=utf-8",
            "css" => "text/css; charset=utf-8",
            "js" | "mjs" => "text/javascript; charset=utf-8",
            "json" => "application/json",
            "txt" => "text/plain; charset=utf-8",
            "xml" => "application/xml",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "svg" => "image/svg+xml",
            "webp" => "image/webp",
            "ico" => "image/x-icon",
            "pdf" => "application/pdf",
            "wasm" => "application/wasm",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "mp4" => "video/mp4",
            "mp3" => "audio/mpeg",
            _ => "application/octet-stream",
        }
    }
}

enum Plan {
    Whole,
    Single(ByteRange),
    Multi(Vec<ByteRange>),
}

enum Stage {
    /// Index into the current range (or 0 for `Whole`), bytes already
    /// emitted for that range.
    PartHeader(usize),
    Body(usize, u64),
    PartTrailer(usize),
    Terminator,
    Done,
}

pub struct FileWriter {
    file: Option<File>,
    body: FileBody,
    plan: Plan,
    stage: Stage,
    pool: BufferPool,
}

impl FileWriter {
    pub fn new(body: FileBody) -> Self {
        let plan = match body.ranges.len() {
            0 => Plan::Whole,
            1 => Plan::Single(body.ranges[0]),
            _ => Plan::Multi(body.ranges.clone()),
        };
        Self {
            file: None,
            body,
            plan,
            stage: Stage::PartHeader(0),
            pool: BufferPool::new(DEFAULT_SCRATCH_CAPACITY),
        }
    }

    fn range_at(&self, idx: usize) -> ByteRange {
        match &self.plan {
            Plan::Whole => ByteRange { start: 0, end: self.body.size.saturating_sub(1) },
            Plan::Single(r) => *r,
            Plan::Multi(ranges) => ranges[idx],
        }
    }

    /// Bytes to stream for the range at `idx`. Distinct from `ByteRange::len`
    /// because an empty whole-file response (`size == 0`) has no bytes to
    /// read even though its synthesized range is the degenerate `0-0`.
    fn remaining_at(&self, idx: usize) -> u64 {
        if matches!(self.plan, Plan::Whole) {
            self.body.size
        } else {
            self.range_at(idx).len()
        }
    }

    fn range_count(&self) -> usize {
        match &self.plan {
            Plan::Whole | Plan::Single(_) => 1,
            Plan::Multi(ranges) => ranges.len(),
        }
    }

    async fn ensure_open(&mut self) -> Result<&mut File, BodyError> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.body.path).await?);
        }
        Ok(self.file.as_mut().expect("just opened"))
    }
}

#[async_trait]
impl BodyWriter for FileWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        head.headers.insert(ACCEPT_RANGES, http::HeaderValue::from_static("bytes"));
        match &self.plan {
            Plan::Whole => {
                head.content_length = Some(self.body.size);
                head.headers.insert(
                    CONTENT_TYPE,
                    http::HeaderValue::from_str(&self.body.mime)
                        .map_err(|e| BodyError::UnexpectedBody(e.to_string()))?,
                );
            }
            Plan::Single(r) => {
                head.content_length = Some(r.len());
                head.headers.insert(
                    CONTENT_TYPE,
                    http::HeaderValue::from_str(&self.body.mime)
                        .map_err(|e| BodyError::UnexpectedBody(e.to_string()))?,
                );
                head.headers.insert(
                    CONTENT_RANGE,
                    http::HeaderValue::from_str(&format!("bytes {}-{}/{}", r.start, r.end, self.body.size))
                        .map_err(|e| BodyError::UnexpectedBody(e.to_string()))?,
                );
            }
            Plan::Multi(ranges) => {
                let boundary = self.body.boundary.clone().unwrap_or_else(crate::util::boundary::generate_boundary);
                let mut total = 0u64;
                for r in ranges {
                    total += part_header(&boundary, &self.body.mime, r, self.body.size).len() as u64;
                    total += r.len();
                    total += 2; // trailing CRLF after each part's content
                }
                total += format!("--{boundary}--\r\n").len() as u64;
                head.headers.insert(
                    CONTENT_TYPE,
                    http::HeaderValue::from_str(&format!("multipart/byteranges; boundary={boundary}"))
                        .map_err(|e| BodyError::UnexpectedBody(e.to_string()))?,
                );
                head.content_length = Some(total);
                self.body.boundary = Some(boundary);
            }
        }
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        let multi = matches!(self.plan, Plan::Multi(_));
        loop {
            match self.stage {
                Stage::PartHeader(idx) => {
                    if !multi {
                        let range = self.range_at(idx);
                        let file = self.ensure_open().await?;
                        file.seek(std::io::SeekFrom::Start(range.start)).await?;
                        self.stage = Stage::Body(idx, self.remaining_at(idx));
                        continue;
                    }
                    let range = self.range_at(idx);
                    let boundary = self.body.boundary.as_deref().unwrap_or_default();
                    let header = part_header(boundary, &self.body.mime, &range, self.body.size);
                    let file = self.ensure_open().await?;
                    file.seek(std::io::SeekFrom::Start(range.start)).await?;
                    self.stage = Stage::Body(idx, self.remaining_at(idx));
                    return Ok(Some((Bytes::from(header), true)));
                }
                Stage::Body(idx, remaining) => {
                    if remaining == 0 {
                        self.stage = if multi { Stage::PartTrailer(idx) } else { Stage::Terminator };
                        continue;
                    }
                    let mut scratch = self.pool.acquire();
                    let cap = (DEFAULT_SCRATCH_CAPACITY as u64).min(remaining) as usize;
                    scratch.resize(cap, 0);
                    let file = self.ensure_open().await?;
                    let n = file.read(&mut scratch[..cap]).await?;
                    if n == 0 {
                        self.pool.release(scratch);
                        return Err(BodyError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "file shorter than declared range",
                        )));
                    }
                    scratch.truncate(n);
                    let chunk = scratch.split().freeze();
                    self.pool.release(scratch);
                    let left = remaining - n as u64;
                    self.stage = Stage::Body(idx, left);
                    let more = left > 0 || multi || idx + 1 < self.range_count();
                    return Ok(Some((chunk, more)));
                }
                Stage::PartTrailer(idx) => {
                    self.stage = if idx + 1 < self.range_count() {
                        Stage::PartHeader(idx + 1)
                    } else {
                        Stage::Terminator
                    };
                    return Ok(Some((Bytes::from_static(b"\r\n"), true)));
                }
                Stage::Terminator => {
                    self.stage = Stage::Done;
                    if multi {
                        let boundary = self.body.boundary.as_deref().unwrap_or_default();
                        return Ok(Some((Bytes::from(format!("--{boundary}--\r\n")), false)));
                    }
                    return Ok(None);
                }
                Stage::Done => return Ok(None),
            }
        }
    }
}

fn part_header(boundary: &str, mime: &str, range: &ByteRange, size: u64) -> String {
    format!(
        "--{boundary}\r\nContent-Type: {mime}\r\nContent-Range: bytes {}-{}/{size}\r\n\r\n",
        range.start, range.end
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseHead;
    use std::io::Write;

    async fn drain(writer: &mut FileWriter) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some((chunk, more)) = writer.get().await.unwrap() {
            out.extend_from_slice(&chunk);
            if !more {
                break;
            }
        }
        out
    }

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn whole_file_streams_all_bytes() {
        let file = write_temp(b"hi\n");
        let body = FileBody::whole(file.path(), "text/plain", 3, SystemTime::now());
        let mut writer = FileWriter::new(body);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.content_length, Some(3));
        assert_eq!(head.headers.get(ACCEPT_RANGES).unwrap(), "bytes");
        let out = drain(&mut writer).await;
        assert_eq!(out, b"hi\n");
    }

    #[tokio::test]
    async fn empty_file_streams_zero_bytes() {
        let file = write_temp(b"");
        let body = FileBody::whole(file.path(), "text/plain", 0, SystemTime::now());
        let mut writer = FileWriter::new(body);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.content_length, Some(0));
        let out = drain(&mut writer).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn single_range_emits_content_range_and_slice() {
        let file = write_temp(b"0123456789");
        let mut body = FileBody::whole(file.path(), "text/plain", 10, SystemTime::now());
        body.ranges = vec![ByteRange { start: 2, end: 4 }];
        let mut writer = FileWriter::new(body);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.content_length, Some(3));
        assert_eq!(head.headers.get(CONTENT_RANGE).unwrap(), "bytes 2-4/10");
        let out = drain(&mut writer).await;
        assert_eq!(out, b"234");
    }

    #[tokio::test]
    async fn multi_range_interleaves_boundary_parts() {
        let file = write_temp(b"abcdefghij");
        let mut body = FileBody::whole(file.path(), "text/plain", 10, SystemTime::now());
        body.ranges = vec![ByteRange { start: 0, end: 1 }, ByteRange { start: 5, end: 6 }];
        body.boundary = Some("B".to_string());
        let mut writer = FileWriter::new(body);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "multipart/byteranges; boundary=B");
        let out = drain(&mut writer).await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("--B\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-1/10\r\n\r\nab\r\n"));
        assert!(text.contains("--B\r\nContent-Type: text/plain\r\nContent-Range: bytes 5-6/10\r\n\r\nfg\r\n"));
        assert!(text.ends_with("--B--\r\n"));
    }
}
