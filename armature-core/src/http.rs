// HTTP request and response types

use crate::headers::HeaderMap;
use crate::status::{is_redirect_code, reason_phrase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub query_params: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            query_params: HashMap::new(),
        }
    }

    /// Build a request from a path that may carry a query string.
    ///
    /// Query values are percent-decoded; a later duplicate key wins.
    pub fn from_uri(method: impl Into<String>, uri: &str) -> Result<Self, crate::Error> {
        let (path, query) = uri
            .split_once('?')
            .map(|(p, q)| (p, Some(q)))
            .unwrap_or((uri, None));

        if !path.starts_with('/') {
            return Err(crate::Error::InvalidUri(format!(
                "request path must be absolute: {}",
                uri
            )));
        }

        let mut request = Self::new(method, path);
        if let Some(query) = query {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
                .map_err(|e| crate::Error::InvalidUri(e.to_string()))?;
            request.query_params = pairs.into_iter().collect();
        }
        Ok(request)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set_unchecked(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// `GET` and `HEAD` only read state.
    pub fn is_read(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Any method that may change server state.
    pub fn is_mutation(&self) -> bool {
        !self.is_read()
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// A `302 Found` pointing at `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::redirect_with_status(location, 302)
    }

    pub fn redirect_with_status(location: impl Into<String>, status: u16) -> Self {
        Self::new(status).with_header("Location", location)
    }

    /// A 200 response with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, crate::Error> {
        Self::ok().with_json(value)
    }

    /// A 200 response with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.headers
            .set_unchecked("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Set a header, replacing any previous value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set_unchecked(key.into(), value.into());
        self
    }

    /// Add a `Set-Cookie` directive.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        // Appending never fails for a name we control; a bad value is dropped.
        let _ = self.headers.append(crate::headers::SET_COOKIE, cookie.into());
        self
    }

    /// Standard reason phrase for the status, empty when unknown.
    pub fn status_text(&self) -> &'static str {
        reason_phrase(self.status)
    }

    /// `true` when the body should be decoded as JSON.
    pub fn is_json(&self) -> bool {
        self.headers
            .content_type()
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }

    /// A 3xx status carrying a `Location`.
    pub fn is_redirect(&self) -> bool {
        is_redirect_code(self.status) && self.headers.location().is_some()
    }
}
