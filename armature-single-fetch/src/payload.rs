//! Values exchanged between route handlers, the pipeline and the encoder.
//!
//! Handlers return `Result<Payload, Payload>`; the `Err` side is a thrown
//! value (an error, a raw response, or the handler's own response stub).

use crate::redirect::RedirectResult;
use crate::stub::ResponseStub;
use armature_core::{HeaderMap, HttpResponse};
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a handler (or a deferred value) settles to.
pub type HandlerResult = std::result::Result<Payload, Payload>;

/// A boxed future settling a deferred value.
pub type SettleFuture = BoxFuture<'static, HandlerResult>;

/// Every value shape that can flow through the data layer.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Plain structured data
    Json(serde_json::Value),
    /// An object whose members may be special values
    Map(BTreeMap<String, Payload>),
    /// An array whose items may be special values
    List(Vec<Payload>),
    /// A value that settles later
    Pending(PendingValue),
    /// Data with pending members plus optional response metadata
    Deferred(DeferredData),
    /// A raw response produced by a handler
    Response(HttpResponse),
    /// A thrown error
    Error(ThrownError),
    /// A structured route error response
    ErrorResponse(RouteErrorResponse),
    /// The out-of-band redirect marker
    Redirect(RedirectResult),
    /// A response stub thrown to signal a status-only failure
    Stub(ResponseStub),
}

impl Payload {
    pub fn null() -> Self {
        Payload::Json(serde_json::Value::Null)
    }

    /// Serialize any value into a plain JSON payload.
    pub fn json<T: Serialize>(value: &T) -> crate::Result<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| armature_core::Error::Serialization(e.to_string()).into())
    }

    /// Build an object payload from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Payload>,
    {
        Payload::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A deferred value from any future.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Payload::Pending(PendingValue::new(future))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Json(serde_json::Value::Null))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Json(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Json(serde_json::Value::String(value))
    }
}

impl From<HttpResponse> for Payload {
    fn from(response: HttpResponse) -> Self {
        Payload::Response(response)
    }
}

impl From<ThrownError> for Payload {
    fn from(error: ThrownError) -> Self {
        Payload::Error(error)
    }
}

impl From<RouteErrorResponse> for Payload {
    fn from(error: RouteErrorResponse) -> Self {
        Payload::ErrorResponse(error)
    }
}

impl From<DeferredData> for Payload {
    fn from(data: DeferredData) -> Self {
        Payload::Deferred(data)
    }
}

impl From<PendingValue> for Payload {
    fn from(value: PendingValue) -> Self {
        Payload::Pending(value)
    }
}

impl From<ResponseStub> for Payload {
    fn from(stub: ResponseStub) -> Self {
        Payload::Stub(stub)
    }
}

impl From<RedirectResult> for Payload {
    fn from(redirect: RedirectResult) -> Self {
        Payload::Redirect(redirect)
    }
}

impl From<armature_core::Error> for Payload {
    fn from(error: armature_core::Error) -> Self {
        Payload::Error(ThrownError::from_error(&error))
    }
}

/// An error value as it travels over the wire: name, message, stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrownError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ThrownError {
    /// A generic `Error` with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture a Rust error; its source chain becomes the stack.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut thrown = Self::new(error.to_string());
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("    caused by: {}", cause));
            source = cause.source();
        }
        if !chain.is_empty() {
            thrown.stack = Some(format!("Error: {}\n{}", thrown.message, chain.join("\n")));
        }
        thrown
    }

    /// The rejection applied to values still pending when the stream times out.
    pub fn timeout() -> Self {
        Self::named("TimeoutError", "Server Timeout")
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ThrownError {}

/// A structured error response thrown by (or synthesized for) a route.
#[derive(Debug, Clone)]
pub struct RouteErrorResponse {
    pub status: u16,
    pub status_text: String,
    pub data: Box<Payload>,
    /// Produced by the framework rather than by route code
    pub internal: bool,
    /// The raw error this response wraps, if any
    pub error: Option<ThrownError>,
}

impl RouteErrorResponse {
    pub fn new(status: u16, status_text: impl Into<String>, data: impl Into<Payload>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            data: Box::new(data.into()),
            internal: false,
            error: None,
        }
    }

    /// A framework-generated response wrapping the error that caused it.
    pub fn internal(status: u16, error: ThrownError) -> Self {
        Self {
            status,
            status_text: armature_core::reason_phrase(status).to_string(),
            data: Box::new(Payload::from(error.to_string())),
            internal: true,
            error: Some(error),
        }
    }
}

/// Status and headers attached to deferred data.
#[derive(Debug, Clone, Default)]
pub struct ResponseInit {
    pub status: Option<u16>,
    pub headers: HeaderMap,
}

impl ResponseInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Route data whose members may settle after the response starts.
///
/// ```rust
/// use armature_single_fetch::payload::{DeferredData, Payload, ResponseInit};
///
/// let deferred = DeferredData::new()
///     .value("user", serde_json::json!({"id": 7}))
///     .pending("feed", async { Ok(Payload::from("later")) })
///     .with_init(ResponseInit::new().status(203));
///
/// assert_eq!(deferred.data.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeferredData {
    pub data: BTreeMap<String, Payload>,
    pub init: Option<ResponseInit>,
}

impl DeferredData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn pending<F>(mut self, key: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.data.insert(key.into(), Payload::pending(future));
        self
    }

    pub fn with_init(mut self, init: ResponseInit) -> Self {
        self.init = Some(init);
        self
    }
}

/// A value that settles later; the encoder consumes it exactly once.
#[derive(Clone)]
pub struct PendingValue {
    slot: Arc<Mutex<Option<SettleFuture>>>,
}

impl PendingValue {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(future.boxed()))),
        }
    }

    pub fn resolved(value: impl Into<Payload>) -> Self {
        Self::new(future::ready(Ok(value.into())))
    }

    pub fn rejected(value: impl Into<Payload>) -> Self {
        Self::new(future::ready(Err(value.into())))
    }

    /// Take the future out; later calls return `None`.
    pub fn take(&self) -> Option<SettleFuture> {
        self.slot.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for PendingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingValue")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("query failed")]
    struct QueryError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_thrown_error_from_error_chain() {
        let err = QueryError {
            source: std::io::Error::other("connection reset"),
        };
        let thrown = ThrownError::from_error(&err);

        assert_eq!(thrown.name, "Error");
        assert_eq!(thrown.message, "query failed");
        assert!(thrown.stack.unwrap().contains("caused by: connection reset"));
    }

    #[test]
    fn test_internal_error_response() {
        let response = RouteErrorResponse::internal(405, ThrownError::new("no action"));
        assert!(response.internal);
        assert_eq!(response.status_text, "Method Not Allowed");
        assert_eq!(
            response.data.as_json(),
            Some(&serde_json::json!("Error: no action"))
        );
    }

    #[tokio::test]
    async fn test_pending_value_is_taken_once() {
        let pending = PendingValue::resolved(serde_json::json!(1));
        let clone = pending.clone();

        let settled = pending.take().unwrap().await.unwrap();
        assert_eq!(settled.as_json(), Some(&serde_json::json!(1)));
        assert!(clone.is_consumed());
        assert!(clone.take().is_none());
    }

    #[test]
    fn test_map_builder() {
        let payload = Payload::map([("a", Payload::null()), ("b", Payload::from("x"))]);
        match payload {
            Payload::Map(map) => {
                assert!(map["a"].is_null());
                assert_eq!(map["b"].as_json(), Some(&serde_json::json!("x")));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}
