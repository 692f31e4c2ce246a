//! Response stubs: the per-request registry of status and header intents.
//!
//! Every handler receives a [`ResponseStub`] it can use to declare a status
//! and mutate headers without seeing any other handler's output. Each header
//! mutation is applied to the stub's own [`HeaderMap`] and also recorded in
//! an ordered operation log, so the merge step can replay all stubs into a
//! single set of headers later.
//!
//! ```rust
//! use armature_single_fetch::stub::{ResponseStubs, StubKey};
//!
//! let stubs = ResponseStubs::new();
//! let stub = stubs.get(&StubKey::route("root"));
//!
//! stub.set_status(201);
//! stub.headers().append("Set-Cookie", "a=1").unwrap();
//!
//! let again = stubs.get(&StubKey::route("root"));
//! assert!(again.ptr_eq(&stub));
//! assert_eq!(again.status(), Some(201));
//! assert_eq!(again.operations().len(), 1);
//! ```

use armature_core::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies the stub of one handler slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StubKey {
    /// The single mutation handler of a request
    Action,
    /// The read handler of a matched route
    Route(String),
}

impl StubKey {
    pub fn route(id: impl Into<String>) -> Self {
        StubKey::Route(id.into())
    }
}

/// Kind of a recorded header mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOperationKind {
    Set,
    Append,
    Delete,
}

/// One recorded header mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderOperation {
    pub kind: HeaderOperationKind,
    pub name: String,
    /// Absent for deletes
    pub value: Option<String>,
}

impl HeaderOperation {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: HeaderOperationKind::Set,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn append(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: HeaderOperationKind::Append,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            kind: HeaderOperationKind::Delete,
            name: name.into(),
            value: None,
        }
    }

    /// Replay this operation onto `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), armature_core::Error> {
        let value = || self.value.clone().unwrap_or_default();
        match self.kind {
            HeaderOperationKind::Set => headers.set(self.name.as_str(), value()),
            HeaderOperationKind::Append => headers.append(self.name.as_str(), value()),
            HeaderOperationKind::Delete => {
                headers.delete(&self.name);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct StubState {
    status: Option<u16>,
    headers: HeaderMap,
    operations: Vec<HeaderOperation>,
}

/// A shared handle to one handler's declared status and headers.
///
/// Clones point at the same stub.
#[derive(Clone, Default)]
pub struct ResponseStub {
    state: Arc<Mutex<StubState>>,
}

impl ResponseStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// The declared status, if any.
    pub fn status(&self) -> Option<u16> {
        self.state.lock().status
    }

    pub fn set_status(&self, status: u16) {
        self.state.lock().status = Some(status);
    }

    pub fn clear_status(&self) {
        self.state.lock().status = None;
    }

    /// Recording view over this stub's headers.
    pub fn headers(&self) -> StubHeaders {
        StubHeaders {
            state: Arc::clone(&self.state),
        }
    }

    /// The operation log, oldest first.
    pub fn operations(&self) -> Vec<HeaderOperation> {
        self.state.lock().operations.clone()
    }

    /// `true` when both handles refer to the same stub.
    pub fn ptr_eq(&self, other: &ResponseStub) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ResponseStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResponseStub")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .finish()
    }
}

/// Header access for a stub; every successful mutation is logged.
#[derive(Clone)]
pub struct StubHeaders {
    state: Arc<Mutex<StubState>>,
}

impl StubHeaders {
    pub fn set(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), armature_core::Error> {
        self.record(HeaderOperation::set(name, value))
    }

    pub fn append(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), armature_core::Error> {
        self.record(HeaderOperation::append(name, value))
    }

    pub fn delete(&self, name: impl Into<String>) {
        // Deletes cannot fail.
        let _ = self.record(HeaderOperation::delete(name));
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.state.lock().headers.get(name).map(str::to_string)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().headers.contains(name)
    }

    /// A copy of the stub's current headers.
    pub fn snapshot(&self) -> HeaderMap {
        self.state.lock().headers.clone()
    }

    fn record(&self, operation: HeaderOperation) -> Result<(), armature_core::Error> {
        let mut state = self.state.lock();
        operation.apply(&mut state.headers)?;
        state.operations.push(operation);
        Ok(())
    }
}

/// Lazily populated stubs for one request.
///
/// Build one per request and pass it by reference; it is never global.
#[derive(Debug, Default)]
pub struct ResponseStubs {
    stubs: Mutex<HashMap<StubKey, ResponseStub>>,
}

impl ResponseStubs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the stub for `key`, creating an empty one on first use.
    pub fn get(&self, key: &StubKey) -> ResponseStub {
        self.stubs.lock().entry(key.clone()).or_default().clone()
    }

    /// Get an existing stub without creating it.
    pub fn peek(&self, key: &StubKey) -> Option<ResponseStub> {
        self.stubs.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.stubs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_registry_is_idempotent() {
        let stubs = ResponseStubs::new();
        let a = stubs.get(&StubKey::Action);
        let b = stubs.get(&StubKey::Action);
        assert!(a.ptr_eq(&b));
        assert_eq!(stubs.len(), 1);

        b.set_status(418);
        assert_eq!(a.status(), Some(418));

        let route = stubs.get(&StubKey::route("root"));
        assert!(!route.ptr_eq(&a));
        assert_eq!(route.status(), None);
    }

    #[test]
    fn test_peek_does_not_create() {
        let stubs = ResponseStubs::new();
        assert!(stubs.peek(&StubKey::route("x")).is_none());
        assert!(stubs.is_empty());
    }

    #[test]
    fn test_invalid_header_not_recorded() {
        let stub = ResponseStub::new();
        assert!(stub.headers().set("Bad Name", "x").is_err());
        assert!(stub.headers().append("X-Ok", "line\nbreak").is_err());
        assert!(stub.operations().is_empty());
        assert!(stub.headers().snapshot().is_empty());
    }

    #[test]
    fn test_operations_are_logged_in_order() {
        let stub = ResponseStub::new();
        let headers = stub.headers();
        headers.set("Cache-Control", "max-age=1").unwrap();
        headers.append("Set-Cookie", "a=1").unwrap();
        headers.delete("Cache-Control");

        assert_eq!(
            stub.operations(),
            vec![
                HeaderOperation::set("Cache-Control", "max-age=1"),
                HeaderOperation::append("Set-Cookie", "a=1"),
                HeaderOperation::delete("Cache-Control"),
            ]
        );
        assert_eq!(headers.get("cache-control"), None);
        assert!(headers.contains("set-cookie"));
    }

    fn operation() -> impl Strategy<Value = HeaderOperation> {
        let name = prop::sample::select(vec!["X-A", "x-a", "X-B", "Set-Cookie"]);
        let value = "[a-z0-9=]{0,6}";
        prop_oneof![
            (name.clone(), value).prop_map(|(n, v)| HeaderOperation::set(n, v)),
            (name.clone(), value).prop_map(|(n, v)| HeaderOperation::append(n, v)),
            name.prop_map(HeaderOperation::delete),
        ]
    }

    proptest! {
        #[test]
        fn replaying_the_log_reproduces_headers(ops in prop::collection::vec(operation(), 0..24)) {
            let stub = ResponseStub::new();
            let headers = stub.headers();
            for op in &ops {
                match op.kind {
                    HeaderOperationKind::Set => headers.set(op.name.as_str(), op.value.clone().unwrap()).unwrap(),
                    HeaderOperationKind::Append => headers.append(op.name.as_str(), op.value.clone().unwrap()).unwrap(),
                    HeaderOperationKind::Delete => headers.delete(op.name.as_str()),
                }
            }

            let mut replayed = HeaderMap::new();
            for op in stub.operations() {
                op.apply(&mut replayed).unwrap();
            }
            prop_assert_eq!(replayed, headers.snapshot());
        }
    }
}
