//! Multipart boundary generation (§4.4, §6): `"----------------<ms><rand6>"`.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a fresh multipart boundary the way `set_form_data_content` does.
pub fn generate_boundary() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("----------------{millis}{suffix:06}")
}

/// Extract the `boundary=` parameter from a `Content-Type: multipart/form-data; boundary=...`
/// value. Accepts a quoted or bare token.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("boundary=") {
            let rest = rest.trim();
            let unquoted = rest.trim_matches('"');
            if !unquoted.is_empty() {
                return Some(unquoted.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_has_expected_shape() {
        let b = generate_boundary();
        assert!(b.starts_with("----------------"));
        assert!(b.len() > 16 + 6);
    }

    #[test]
    fn extract_quoted_and_bare() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_boundary(r#"multipart/form-data; boundary="abc 123""#),
            Some("abc 123".to_string())
        );
        assert_eq!(extract_boundary("multipart/form-data"), None);
    }
}
