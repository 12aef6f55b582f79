//! Path segment classification (§4.3 "Registration").

use crate::error::RouteError;
use regex::Regex;

/// One registered path segment, classified at registration time. Only the
/// entire segment recognizes `:name`, `{name:re}`, `*` — a partial match
/// like `foo:bar` is a literal static segment (§3 invariant).
pub enum Segment {
    Static(String),
    Param(String),
    Regex { name: String, regex: Regex },
    Wildcard,
}

pub fn classify(raw: &str) -> Result<Segment, RouteError> {
    if raw == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(name) = raw.strip_prefix(':') {
        if name.is_empty() {
            return Err(RouteError::InvalidPattern(raw.to_string(), "empty parameter name".into()));
        }
        return Ok(Segment::Param(name.to_string()));
    }
    if raw.starts_with('{') && raw.ends_with('}') && raw.len() >= 2 {
        let inside = &raw[1..raw.len() - 1];
        let (name, pattern) = inside
            .split_once(':')
            .ok_or_else(|| RouteError::InvalidPattern(raw.to_string(), "regex segment missing ':pattern'".into()))?;
        if name.is_empty() {
            return Err(RouteError::InvalidPattern(raw.to_string(), "empty parameter name".into()));
        }
        // Anchored so the pattern matches the whole segment, matching
        // `std::regex_match` semantics (a bare `is_match` would accept
        // `12abc` for `[0-9]+`, a partial match).
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|e| RouteError::InvalidRegex(raw.to_string(), e))?;
        return Ok(Segment::Regex { name: name.to_string(), regex });
    }
    Ok(Segment::Static(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_kind() {
        assert!(matches!(classify("users").unwrap(), Segment::Static(s) if s == "users"));
        assert!(matches!(classify(":id").unwrap(), Segment::Param(s) if s == "id"));
        assert!(matches!(classify("*").unwrap(), Segment::Wildcard));
        match classify("{id:[0-9]+}").unwrap() {
            Segment::Regex { name, regex } => {
                assert_eq!(name, "id");
                assert!(regex.is_match("42"));
                assert!(!regex.is_match("x"));
                assert!(!regex.is_match("12abc"));
                assert!(!regex.is_match("abc12"));
            }
            _ => panic!("expected regex segment"),
        }
    }

    #[test]
    fn rejects_malformed_regex_segment() {
        assert!(classify("{id}").is_err());
        assert!(classify("{:abc}").is_err());
    }
}
