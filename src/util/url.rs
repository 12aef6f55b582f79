//! Percent decode/encode and query-string parsing (§3 "decoded_path never
//! contains `%XX` escapes", §8 property 8: `decode(encode(x)) == x`).

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// The original source treats `/` as a path separator and leaves it
/// unescaped in `decoded_path` (it only removes percent-escapes), and
/// reserves everything outside unreserved ASCII for form/query values.
const PATH_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'#')
    .add(b'%');

const FORM_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=')
    .add(b'?')
    .add(b'`')
    .add(b'/');

/// Decode a path segment or whole path, turning `%XX` escapes into raw
/// bytes and then lossily into UTF-8 (invalid sequences are replaced, never
/// rejected — the wire target is attacker-controlled but must still route).
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

pub fn encode_path(decoded: &str) -> String {
    utf8_percent_encode(decoded, PATH_UNSAFE).to_string()
}

/// Decode a `application/x-www-form-urlencoded` component: `+` means space,
/// then `%XX` escapes.
pub fn decode_form_component(raw: &str) -> String {
    let replaced = raw.replace('+', " ");
    percent_decode_str(&replaced).decode_utf8_lossy().into_owned()
}

pub fn encode_form_component(decoded: &str) -> String {
    utf8_percent_encode(decoded, FORM_UNSAFE)
        .to_string()
        .replace(' ', "+")
}

/// An insertion-order-preserving string multimap, used for both query
/// parameters and path parameters (§3: "multimap of string→string" /
/// "path parameters ... may include `*` for wildcard tails").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap(Vec<(String, String)>);

impl MultiMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Parse a raw query string (no leading `?`) into a decoded multimap.
/// Pairs without `=` get an empty value; repeated keys are all kept.
pub fn parse_query(raw: &str) -> MultiMap {
    let mut map = MultiMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        map.insert(decode_form_component(k), decode_form_component(v));
    }
    map
}

pub fn encode_query(map: &MultiMap) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", encode_form_component(k), encode_form_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split a path into `/`-delimited segments the way the router and the
/// static-mount safety check both need. A trailing `/` yields a trailing
/// empty-string segment (§4.3 "implemented by pushing an empty-string final
/// segment on split"), mirroring `util::split` in the original source.
pub fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return vec![];
    }
    trimmed.split('/').collect()
}
