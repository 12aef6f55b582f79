//! `multipart/form-data` reader/writer (§4.2 "form_data reader").
//!
//! The reader is grounded directly on
//! `original_source/lib/body/form_data_body.cpp`'s `reader::put` state
//! machine (`boundary_line → boundary_header → boundary_content →
//! finished|eof`), reimplemented against `&[u8]` slices instead of Beast
//! buffer sequences.

use super::{Body, BodyReader, BodyWriter};
use crate::error::BodyError;
use crate::response::ResponseHead;
use crate::util::pool::{BufferPool, DEFAULT_SCRATCH_CAPACITY};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;

/// One field of a decoded multipart body.
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct FormDataBody {
    pub boundary: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    BoundaryLine,
    BoundaryHeader,
    BoundaryContent,
    Finished,
    Eof,
}

struct PartialField {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    content: BytesMut,
}

pub struct FormDataReader {
    boundary: String,
    step: Step,
    current: Option<PartialField>,
    body: FormDataBody,
}

impl FormDataReader {
    pub fn new(content_type_or_boundary: String) -> Self {
        // Accept either a bare boundary or a full Content-Type value.
        let boundary = crate::util::boundary::extract_boundary(&content_type_or_boundary)
            .unwrap_or(content_type_or_boundary);
        Self {
            boundary: boundary.clone(),
            step: Step::BoundaryLine,
            current: None,
            body: FormDataBody {
                boundary,
                fields: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl BodyReader for FormDataReader {
    fn init(&mut self, _content_length: Option<u64>) -> Result<(), BodyError> {
        if self.boundary.is_empty() {
            return Err(BodyError::MissingBoundary);
        }
        Ok(())
    }

    fn put(&mut self, buf: &[u8]) -> Result<usize, BodyError> {
        match self.step {
            Step::BoundaryLine => {
                let line = format!("--{}\r\n", self.boundary);
                let last = format!("--{}--", self.boundary);
                let need = line.len().max(last.len());
                if buf.len() < need {
                    return Ok(0);
                }
                if buf.starts_with(line.as_bytes()) {
                    self.step = Step::BoundaryHeader;
                    self.current = Some(PartialField {
                        name: String::new(),
                        filename: None,
                        content_type: None,
                        content: BytesMut::new(),
                    });
                    Ok(line.len())
                } else if buf.starts_with(last.as_bytes()) {
                    self.step = Step::Finished;
                    Ok(last.len())
                } else {
                    Err(BodyError::UnexpectedBody("expected multipart boundary line".into()))
                }
            }
            Step::BoundaryHeader => {
                let text = match std::str::from_utf8(buf) {
                    Ok(t) => t,
                    Err(_) => return Err(BodyError::UnexpectedBody("non-UTF-8 part headers".into())),
                };
                let Some(pos) = text.find("\r\n\r\n") else {
                    return Ok(0);
                };
                let header_block = &text[..pos + 4];
                let field = self.current.as_mut().expect("field started in BoundaryLine");
                for line in header_block.split("\r\n").filter(|l| !l.is_empty()) {
                    let Some((name, value)) = line.split_once(':') else {
                        return Err(BodyError::UnexpectedBody(format!("malformed part header: {line:?}")));
                    };
                    let name = name.trim();
                    let value = value.trim();
                    if name.eq_ignore_ascii_case("content-disposition") {
                        let Some((disposition, rest)) = value.split_once(';') else {
                            return Err(BodyError::UnexpectedBody(
                                "Content-Disposition missing parameters".into(),
                            ));
                        };
                        if disposition.trim() != "form-data" {
                            return Err(BodyError::UnexpectedBody(
                                "Content-Disposition must begin with form-data;".into(),
                            ));
                        }
                        for (key, val) in parse_disposition_params(rest) {
                            match key.as_str() {
                                "name" => field.name = val,
                                "filename" => field.filename = Some(val),
                                _ => {}
                            }
                        }
                    } else if name.eq_ignore_ascii_case("content-type") {
                        field.content_type = Some(value.to_string());
                    }
                }
                self.step = Step::BoundaryContent;
                Ok(header_block.len())
            }
            Step::BoundaryContent => {
                let field = self.current.as_mut().expect("field started in BoundaryHeader");
                if buf.first() == Some(&b'\r') {
                    let eof_marker = format!("\r\n--{}", self.boundary);
                    if buf.len() < eof_marker.len() {
                        return Ok(0);
                    }
                    if buf.starts_with(eof_marker.as_bytes()) {
                        self.step = Step::BoundaryLine;
                        let field = self.current.take().unwrap();
                        self.body.fields.push(FormField {
                            name: field.name,
                            filename: field.filename,
                            content_type: field.content_type,
                            content: field.content.freeze(),
                        });
                        return Ok(2);
                    }
                    // A lone '\r' not followed by the boundary is literal
                    // content (§8 boundary case).
                    field.content.extend_from_slice(&buf[..1]);
                    return Ok(1);
                }
                match buf.iter().position(|&b| b == b'\r') {
                    Some(pos) => {
                        field.content.extend_from_slice(&buf[..pos]);
                        Ok(pos)
                    }
                    None => {
                        field.content.extend_from_slice(buf);
                        Ok(buf.len())
                    }
                }
            }
            Step::Finished => {
                if buf.len() < 2 {
                    return Ok(0);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(BodyError::UnexpectedBody("missing trailing CRLF after terminator".into()));
                }
                self.step = Step::Eof;
                Ok(2)
            }
            Step::Eof => Ok(0),
        }
    }

    fn finish(self: Box<Self>) -> Result<Body, BodyError> {
        if self.step != Step::Eof {
            return Err(BodyError::UnexpectedBody("multipart body ended before terminator".into()));
        }
        Ok(Body::FormData(self.body))
    }
}

/// Parse `Content-Disposition` parameters after the `form-data;` prefix
/// (`name="x"; filename="y"`), grounded on
/// `detail::parse_content_disposition` in the original source.
fn parse_disposition_params(rest: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for part in rest.split(';') {
        let part = part.trim();
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"').to_string();
        out.push((key, value));
    }
    out
}

/// Writer for `Body::FormData` (§4.4 `set_form_data_content`, §4.2 "file
/// writer" boundary framing applied generically to any field).
pub struct FormDataWriter {
    boundary: String,
    fields: std::vec::IntoIter<FormField>,
    pending: Option<Bytes>,
    pool: BufferPool,
    done: bool,
}

impl FormDataWriter {
    pub fn new(body: FormDataBody) -> Self {
        Self {
            boundary: body.boundary,
            fields: body.fields.into_iter(),
            pending: None,
            pool: BufferPool::new(DEFAULT_SCRATCH_CAPACITY),
            done: false,
        }
    }
}

#[async_trait]
impl BodyWriter for FormDataWriter {
    fn init(&mut self, head: &mut ResponseHead) -> Result<(), BodyError> {
        head.headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_str(&format!("multipart/form-data; boundary={}", self.boundary))
                .map_err(|e| BodyError::UnexpectedBody(e.to_string()))?,
        );
        Ok(())
    }

    async fn get(&mut self) -> Result<Option<(Bytes, bool)>, BodyError> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some((chunk, true)));
        }
        if self.done {
            return Ok(None);
        }
        match self.fields.next() {
            Some(field) => {
                let mut scratch = self.pool.acquire();
                scratch.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
                scratch.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"", field.name).as_bytes(),
                );
                if let Some(filename) = &field.filename {
                    scratch.extend_from_slice(format!("; filename=\"{filename}\"").as_bytes());
                }
                scratch.extend_from_slice(b"\r\n");
                if let Some(ct) = &field.content_type {
                    scratch.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
                }
                scratch.extend_from_slice(b"\r\n");
                let header = scratch.split().freeze();
                self.pool.release(scratch);
                self.pending = Some(Bytes::from([field.content.as_ref(), b"\r\n"].concat()));
                Ok(Some((header, true)))
            }
            None => {
                self.done = true;
                Ok(Some((Bytes::from(format!("--{}--\r\n", self.boundary)), false)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(reader: &mut FormDataReader, mut data: &[u8]) {
        while !data.is_empty() {
            let n = reader.put(data).unwrap();
            assert!(n > 0, "reader stalled on {data:?}");
            data = &data[n..];
        }
    }

    #[test]
    fn parses_two_fields_one_with_filename() {
        let boundary = "X";
        let mut reader = FormDataReader::new(boundary.to_string());
        reader.init(None).unwrap();
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\nvalue1\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file1\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n\
             --{b}--\r\n",
            b = boundary
        );
        feed(&mut reader, body.as_bytes());
        let parsed = Box::new(reader).finish().unwrap();
        let fields = match parsed {
            Body::FormData(fd) => fd.fields,
            _ => panic!("expected Body::FormData"),
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "field1");
        assert_eq!(&fields[0].content[..], b"value1");
        assert!(fields[0].filename.is_none());
        assert_eq!(fields[1].name, "file1");
        assert_eq!(fields[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(fields[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(&fields[1].content[..], b"hello");
    }

    #[test]
    fn lone_cr_not_followed_by_boundary_is_kept_literally() {
        let boundary = "X";
        let mut reader = FormDataReader::new(boundary.to_string());
        reader.init(None).unwrap();
        // "a\rb" contains a '\r' that is not the start of the boundary marker.
        let body = format!("--{b}\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\na\rb\r\n--{b}--\r\n", b = boundary);
        feed(&mut reader, body.as_bytes());
        let parsed = Box::new(reader).finish().unwrap();
        let fields = match parsed {
            Body::FormData(fd) => fd.fields,
            _ => panic!("expected Body::FormData"),
        };
        assert_eq!(&fields[0].content[..], b"a\rb");
    }

    #[test]
    fn missing_boundary_is_rejected_at_init() {
        let mut reader = FormDataReader::new(String::new());
        assert!(reader.init(None).is_err());
    }

    #[test]
    fn malformed_boundary_line_is_rejected() {
        let mut reader = FormDataReader::new("X".to_string());
        reader.init(None).unwrap();
        assert!(reader.put(b"not a boundary at all, long enough to pass length check").is_err());
    }

    #[tokio::test]
    async fn writer_round_trips_through_reader() {
        let fields = vec![
            FormField {
                name: "a".to_string(),
                filename: None,
                content_type: None,
                content: Bytes::from_static(b"1"),
            },
            FormField {
                name: "b".to_string(),
                filename: Some("b.bin".to_string()),
                content_type: Some("application/octet-stream".to_string()),
                content: Bytes::from_static(b"\x00\x01\x02"),
            },
        ];
        let body = FormDataBody {
            boundary: "BOUND".to_string(),
            fields,
        };
        let mut writer = FormDataWriter::new(body);
        let mut head = ResponseHead {
            headers: http::HeaderMap::new(),
            content_length: None,
            chunked: false,
        };
        writer.init(&mut head).unwrap();
        assert!(head
            .headers
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("boundary=BOUND"));

        let mut out = BytesMut::new();
        while let Some((chunk, more)) = writer.get().await.unwrap() {
            out.extend_from_slice(&chunk);
            if !more {
                break;
            }
        }

        let mut reader = FormDataReader::new("BOUND".to_string());
        reader.init(None).unwrap();
        feed(&mut reader, &out);
        let parsed = Box::new(reader).finish().unwrap();
        let fields = match parsed {
            Body::FormData(fd) => fd.fields,
            _ => panic!("expected Body::FormData"),
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "a");
        assert_eq!(&fields[0].content[..], b"1");
        assert_eq!(fields[1].filename.as_deref(), Some("b.bin"));
        assert_eq!(&fields[1].content[..], b"\x00\x01\x02");
    }

    #[test]
    fn disposition_params_parse_quoted_values() {
        let parsed = parse_disposition_params(r#" name="a b"; filename="c.txt""#);
        assert_eq!(
            parsed,
            vec![("name".to_string(), "a b".to_string()), ("filename".to_string(), "c.txt".to_string())]
        );
    }
}
