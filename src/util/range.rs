//! `Range` header parsing (§4.2 "Range parser").
//!
//! Grounded on `original_source/lib/html/http_ranges.cpp`
//! (`http_ranges::parse`): same edge-case rules, reimplemented idiomatically
//! rather than translated line-by-line.

/// An inclusive byte range, already clamped to a known file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeNotSatisfiable;

/// Parse a `Range: bytes=...` header value against a known file size.
///
/// Returns `Ok(vec![])` for an absent/empty range (serve the whole file),
/// `Ok(ranges)` for one or more valid ranges, `Err(RangeNotSatisfiable)` for
/// anything malformed or out of bounds.
pub fn parse_range(header: Option<&str>, file_size: u64) -> Result<Vec<ByteRange>, RangeNotSatisfiable> {
    let header = match header {
        Some(h) => h.trim(),
        None => return Ok(Vec::new()),
    };
    if header.is_empty() {
        return Ok(Vec::new());
    }
    let Some(spec) = header.strip_prefix("bytes=") else {
        return Err(RangeNotSatisfiable);
    };
    if spec.contains("--") {
        return Err(RangeNotSatisfiable);
    }
    if spec == "-" {
        if file_size == 0 {
            return Err(RangeNotSatisfiable);
        }
        return Ok(vec![ByteRange { start: 0, end: file_size - 1 }]);
    }

    let mut ranges = Vec::new();
    for piece in spec.split(',') {
        ranges.push(parse_one(piece.trim(), file_size)?);
    }
    Ok(ranges)
}

fn parse_one(piece: &str, file_size: u64) -> Result<ByteRange, RangeNotSatisfiable> {
    let (first, second) = piece.split_once('-').ok_or(RangeNotSatisfiable)?;
    let first = first.trim();
    let second = second.trim();

    if first.is_empty() {
        // Suffix form `-n`: last n bytes.
        let n: u64 = second.parse().map_err(|_| RangeNotSatisfiable)?;
        if n == 0 || file_size == 0 {
            return Err(RangeNotSatisfiable);
        }
        let start = file_size.saturating_sub(n);
        return Ok(ByteRange { start, end: file_size - 1 });
    }

    let start: u64 = first.parse().map_err(|_| RangeNotSatisfiable)?;
    let mut end: u64 = if second.is_empty() {
        file_size.saturating_sub(1)
    } else {
        second.parse().map_err(|_| RangeNotSatisfiable)?
    };

    // The `start == end` check only fires for `start > 0`: `bytes=0-0` is a
    // valid single-byte range (§8 boundary case), matching the original
    // source's `start > 0 && (start >= file_size || start == end)` guard.
    if start >= file_size || (start > 0 && start == end) || end < start {
        return Err(RangeNotSatisfiable);
    }
    if end >= file_size {
        end = file_size - 1;
    }
    Ok(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_file() {
        assert_eq!(parse_range(None, 100).unwrap(), vec![]);
        assert_eq!(parse_range(Some(""), 100).unwrap(), vec![]);
        assert_eq!(parse_range(Some("bytes=-"), 3).unwrap(), vec![ByteRange { start: 0, end: 2 }]);
    }

    #[test]
    fn single_byte() {
        assert_eq!(parse_range(Some("bytes=0-0"), 3).unwrap(), vec![ByteRange { start: 0, end: 0 }]);
    }

    #[test]
    fn clamped_end() {
        assert_eq!(
            parse_range(Some("bytes=0-1000"), 3).unwrap(),
            vec![ByteRange { start: 0, end: 2 }]
        );
    }

    #[test]
    fn suffix_form() {
        assert_eq!(parse_range(Some("bytes=-2"), 10).unwrap(), vec![ByteRange { start: 8, end: 9 }]);
    }

    #[test]
    fn multiple_ranges() {
        assert_eq!(
            parse_range(Some("bytes=0-1,3-4"), 10).unwrap(),
            vec![ByteRange { start: 0, end: 1 }, ByteRange { start: 3, end: 4 }]
        );
    }

    #[test]
    fn double_hyphen_invalid() {
        assert!(parse_range(Some("bytes=0--1"), 10).is_err());
    }

    #[test]
    fn start_past_eof_invalid() {
        assert!(parse_range(Some("bytes=10-20"), 10).is_err());
    }

    #[test]
    fn start_equals_end_invalid() {
        // start == end only invalid per source when start > 0; start=end=0 is a single byte.
        assert!(parse_one("5-5", 10).is_err());
        assert!(parse_one("0-0", 10).is_ok());
    }

    #[test]
    fn missing_bytes_prefix_invalid() {
        assert!(parse_range(Some("0-1"), 10).is_err());
    }

    #[test]
    fn reversed_range_invalid() {
        assert!(parse_range(Some("bytes=5-3"), 10).is_err());
    }
}
