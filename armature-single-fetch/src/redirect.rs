//! Redirect results.
//!
//! A background data request must never see a real 3xx: the client would
//! follow it transparently. Redirects are instead reported in-band as a
//! [`RedirectResult`] with the transport status set to
//! [`SINGLE_FETCH_REDIRECT_STATUS`].

use armature_core::HeaderMap;
use serde::{Deserialize, Serialize};

/// Transport status whenever the logical result is a redirect.
pub const SINGLE_FETCH_REDIRECT_STATUS: u16 = 202;

/// Asks the client to revalidate route data after following the redirect.
pub const REVALIDATE_HEADER: &str = "X-Remix-Revalidate";

/// Asks the client to perform a full document navigation.
pub const RELOAD_DOCUMENT_HEADER: &str = "X-Remix-Reload-Document";

/// Out-of-band redirect description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectResult {
    pub redirect: String,
    pub status: u16,
    pub revalidate: bool,
    pub reload: bool,
}

impl RedirectResult {
    pub fn new(location: impl Into<String>, status: u16) -> Self {
        Self {
            redirect: location.into(),
            status,
            revalidate: false,
            reload: false,
        }
    }

    /// Build from a redirect status and the final response headers.
    ///
    /// Returns `None` when there is no `Location`.
    pub fn from_headers(status: u16, headers: &HeaderMap) -> Option<Self> {
        let location = headers.location()?;
        Some(Self::new(location, status).with_hints(headers))
    }

    /// Derive `revalidate` and `reload` from the final response headers.
    pub fn with_hints(mut self, headers: &HeaderMap) -> Self {
        self.revalidate =
            headers.contains(REVALIDATE_HEADER) || headers.contains(armature_core::SET_COOKIE);
        self.reload = headers.contains(RELOAD_DOCUMENT_HEADER);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, *value).unwrap();
        }
        map
    }

    #[test]
    fn test_plain_redirect() {
        let result = RedirectResult::from_headers(302, &headers(&[("Location", "/login")])).unwrap();
        assert_eq!(result, RedirectResult::new("/login", 302));
    }

    #[test]
    fn test_revalidate_on_cookie() {
        let result = RedirectResult::from_headers(
            303,
            &headers(&[("Location", "/"), ("Set-Cookie", "session=abc")]),
        )
        .unwrap();
        assert!(result.revalidate);
        assert!(!result.reload);
    }

    #[test]
    fn test_revalidate_and_reload_headers() {
        let result = RedirectResult::from_headers(
            302,
            &headers(&[
                ("Location", "/"),
                ("X-Remix-Revalidate", "yes"),
                ("X-Remix-Reload-Document", "yes"),
            ]),
        )
        .unwrap();
        assert!(result.revalidate);
        assert!(result.reload);
    }

    #[test]
    fn test_missing_location() {
        assert!(RedirectResult::from_headers(302, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_serializes_flat() {
        let json = serde_json::to_value(RedirectResult::new("/a", 307)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"redirect": "/a", "status": 307, "revalidate": false, "reload": false})
        );
    }
}
