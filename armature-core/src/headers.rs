//! SmallVec-Based HTTP Header Storage
//!
//! A small, ordered header collection with the mutation semantics of the
//! WHATWG `Headers` interface:
//!
//! - `set` replaces the first header with the same name and drops the rest
//! - `append` always adds a new entry (used for `Set-Cookie`)
//! - `delete` removes every entry with the name
//!
//! Names compare case-insensitively. Most responses carry fewer than a dozen
//! headers, so entries are stored inline and lookups are a linear scan.
//!
//! Names and values passed to [`HeaderMap::set`] and [`HeaderMap::append`] are
//! validated with the rules of the `http` crate, so a collection built through
//! them can always be written to the wire.

use crate::Error;
use smallvec::SmallVec;
use std::fmt;

/// Number of headers to store inline (on stack).
pub const INLINE_HEADERS: usize = 12;

/// Name of the cookie-setting response header.
pub const SET_COOKIE: &str = "Set-Cookie";

/// A header name-value pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name (case-insensitive for lookup)
    pub name: String,
    /// Header value
    pub value: String,
}

impl Header {
    /// Create a new header
    #[inline]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Check if name matches (case-insensitive)
    #[inline]
    pub fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Check that a name/value pair is valid on the wire.
pub fn validate_header(name: &str, value: &str) -> Result<(), Error> {
    http::HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::InvalidHeader(format!("invalid header name {:?}", name)))?;
    http::HeaderValue::from_str(value).map_err(|_| {
        Error::InvalidHeader(format!("invalid value for header {:?}", name))
    })?;
    Ok(())
}

/// An ordered header collection with `Headers`-style mutation semantics.
///
/// # Example
///
/// ```rust
/// use armature_core::headers::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.set("Cache-Control", "max-age=60").unwrap();
/// headers.append("Set-Cookie", "a=1").unwrap();
/// headers.append("Set-Cookie", "b=2").unwrap();
///
/// assert_eq!(headers.get("cache-control"), Some("max-age=60"));
/// assert_eq!(headers.get_set_cookie(), vec!["a=1", "b=2"]);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    inner: SmallVec<[Header; INLINE_HEADERS]>,
}

impl HeaderMap {
    /// Create a new empty header map.
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: SmallVec::new_const(),
        }
    }

    /// Create with pre-allocated capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: SmallVec::with_capacity(capacity),
        }
    }

    /// Check if storage is inline (no heap allocation).
    #[inline]
    pub fn is_inline(&self) -> bool {
        !self.inner.spilled()
    }

    /// Get the number of entries (duplicates counted separately).
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// First value for a name (case-insensitive).
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|h| h.name_eq(name))
            .map(|h| h.value.as_str())
    }

    /// All values for a name, in insertion order.
    #[inline]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.inner
            .iter()
            .filter(|h| h.name_eq(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Every `Set-Cookie` value, never combined.
    #[inline]
    pub fn get_set_cookie(&self) -> Vec<&str> {
        self.get_all(SET_COOKIE)
    }

    /// Check if header exists (case-insensitive).
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|h| h.name_eq(name))
    }

    /// Set a header.
    ///
    /// The first entry with the same name takes the new value and any later
    /// duplicates are removed; if there is none the header is appended.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.set_unchecked(name, value);
        Ok(())
    }

    /// Append a header, keeping existing entries with the same name.
    pub fn append(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), Error> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.inner.push(Header { name, value });
        Ok(())
    }

    /// Remove every entry with the name. Returns the number removed.
    #[inline]
    pub fn delete(&mut self, name: &str) -> usize {
        let before = self.inner.len();
        self.inner.retain(|h| !h.name_eq(name));
        before - self.inner.len()
    }

    pub(crate) fn set_unchecked(&mut self, name: String, value: String) {
        match self.inner.iter().position(|h| h.name_eq(&name)) {
            Some(first) => {
                self.inner[first].value = value;
                let mut index = 0;
                self.inner.retain(|h| {
                    let keep = index <= first || !h.name_eq(&name);
                    index += 1;
                    keep
                });
            }
            None => self.inner.push(Header { name, value }),
        }
    }

    /// Iterate over all entries in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }

    /// Clear all headers.
    #[inline]
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Get Content-Type header.
    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    /// Get Location header.
    #[inline]
    pub fn location(&self) -> Option<&str> {
        self.get("Location")
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.iter()).finish()
    }
}

/// Builds a map with `set` semantics for each pair.
///
/// Pairs are not validated; use [`HeaderMap::set`] for untrusted input.
impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let (min, max) = iter.size_hint();
        let mut map = HeaderMap::with_capacity(max.unwrap_or(min));
        for (k, v) in iter {
            map.set_unchecked(k.into(), v.into());
        }
        map
    }
}

impl IntoIterator for HeaderMap {
    type Item = (String, String);
    type IntoIter = std::iter::Map<
        smallvec::IntoIter<[Header; INLINE_HEADERS]>,
        fn(Header) -> (String, String),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter().map(|h| (h.name, h.value))
    }
}
