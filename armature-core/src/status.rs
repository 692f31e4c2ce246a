// HTTP Status Codes

/// Canonical reason phrase for a numeric status, empty when the code has
/// none.
///
/// ```rust
/// use armature_core::reason_phrase;
///
/// assert_eq!(reason_phrase(410), "Gone");
/// assert_eq!(reason_phrase(299), "");
/// ```
pub fn reason_phrase(code: u16) -> &'static str {
    http::StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("")
}

/// `true` for the 3xx range.
#[inline]
pub fn is_redirect_code(code: u16) -> bool {
    (300..400).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(302), "Found");
        assert_eq!(reason_phrase(405), "Method Not Allowed");
        assert_eq!(reason_phrase(299), "");
        assert_eq!(reason_phrase(1000), "");
    }

    #[test]
    fn test_reason_phrase_less_common_codes() {
        assert_eq!(reason_phrase(206), "Partial Content");
        assert_eq!(reason_phrase(406), "Not Acceptable");
        assert_eq!(reason_phrase(410), "Gone");
        assert_eq!(reason_phrase(412), "Precondition Failed");
        assert_eq!(reason_phrase(415), "Unsupported Media Type");
        assert_eq!(reason_phrase(418), "I'm a teapot");
        assert_eq!(reason_phrase(451), "Unavailable For Legal Reasons");
    }

    #[test]
    fn test_redirect_range() {
        assert!(is_redirect_code(300));
        assert!(is_redirect_code(399));
        assert!(!is_redirect_code(299));
        assert!(!is_redirect_code(400));
    }
}
