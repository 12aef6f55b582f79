//! HTTP-date (RFC 7231 IMF-fixdate) formatting/parsing and weak ETags
//! (§6 "Date & ETag format").

use std::time::SystemTime;

/// Format a `SystemTime` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

pub fn now_http_date() -> String {
    format_http_date(SystemTime::now())
}

/// Parse an HTTP-date into a `SystemTime`. Used to compare `If-Modified-Since`
/// by instant rather than by literal string (SPEC_FULL §9 deviation note).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

/// Weak entity tag for a file: `W/<size>-<unix_mtime>` (§4.4, §6).
pub fn weak_etag(size: u64, mtime_unix: u64) -> String {
    format!("W/{}-{}", size, mtime_unix)
}

/// `If-None-Match` matches if any comparand equals the tag or is `*`, per
/// RFC 7232 weak comparison (suffices here since all our tags are weak).
pub fn if_none_match_satisfied(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|c| c == "*" || c == etag)
}
