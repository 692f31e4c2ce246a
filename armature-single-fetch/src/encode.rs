//! Streaming result encoder.
//!
//! Results are written as newline-delimited JSON. The first line is the root
//! value; every deferred value inside it is replaced by a promise reference
//! and settles on a later line:
//!
//! ```text
//! {"root":{"data":{"user":{"$type":"Promise","id":1}}}}
//! {"$settled":1,"status":"fulfilled","value":{"name":"ada"}}
//! ```
//!
//! Values that are not plain JSON are written as `{"$type": tag, "value": v}`
//! by the first [`TypePlugin`] whose predicate matches. Object keys that start
//! with `$` are escaped by doubling the `$`.
//!
//! Deferred values get a bounded amount of time to settle. When it runs out
//! every value still outstanding is rejected with a `TimeoutError`. If the
//! client goes away the encoder stops without writing anything further.

use crate::classify::{is_redirect_result, is_response_stub, is_route_error_response};
use crate::config::{ServerMode, SingleFetchConfig};
use crate::payload::{HandlerResult, Payload, PendingValue, SettleFuture, ThrownError};
use crate::sanitize::{materialize_stub_error, sanitize_error, sanitize_thrown};
use armature_core::{ByteStream, ByteStreamSender};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const TAG_KEY: &str = "$type";
pub const SETTLED_KEY: &str = "$settled";

pub const ERROR_TAG: &str = "Error";
pub const ERROR_RESPONSE_TAG: &str = "ErrorResponse";
pub const REDIRECT_TAG: &str = "SingleFetchRedirect";
pub const PROMISE_TAG: &str = "Promise";
pub const FALLBACK_TAG: &str = "Fallback";

type Predicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;
type Encode = Arc<dyn Fn(&Payload) -> Payload + Send + Sync>;

/// A custom value encoding: values matching `predicate` are written as
/// `{"$type": tag, "value": encode(value)}`.
///
/// The encoded value is itself encoded again, so it may contain deferred
/// values, but it must not match the same predicate.
#[derive(Clone)]
pub struct TypePlugin {
    pub tag: String,
    predicate: Predicate,
    encode: Encode,
}

impl TypePlugin {
    pub fn new<P, E>(tag: impl Into<String>, predicate: P, encode: E) -> Self
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
        E: Fn(&Payload) -> Payload + Send + Sync + 'static,
    {
        Self {
            tag: tag.into(),
            predicate: Arc::new(predicate),
            encode: Arc::new(encode),
        }
    }

    pub fn matches(&self, value: &Payload) -> bool {
        (self.predicate)(value)
    }
}

impl fmt::Debug for TypePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePlugin").field("tag", &self.tag).finish()
    }
}

fn builtin_plugins(mode: ServerMode) -> Vec<TypePlugin> {
    vec![
        TypePlugin::new(ERROR_TAG, |v| matches!(v, Payload::Error(_)), move |v| match v {
            Payload::Error(error) if !mode.is_development() => error_fields(&sanitize_thrown(error)),
            Payload::Error(error) => error_fields(error),
            _ => Payload::null(),
        }),
        TypePlugin::new(
            ERROR_RESPONSE_TAG,
            |v| is_route_error_response(v) || is_response_stub(v),
            move |v| match sanitize_error(&materialize_stub_error(v.clone()), mode) {
                Payload::ErrorResponse(response) => Payload::List(vec![
                    (*response.data).clone(),
                    Payload::Json(response.status.into()),
                    Payload::from(response.status_text),
                ]),
                _ => Payload::null(),
            },
        ),
        TypePlugin::new(REDIRECT_TAG, is_redirect_result, |v| match v {
            Payload::Redirect(redirect) => {
                Payload::Json(serde_json::to_value(redirect).unwrap_or(Value::Null))
            }
            _ => Payload::null(),
        }),
    ]
}

fn error_fields(error: &ThrownError) -> Payload {
    Payload::Json(json!([error.name, error.message, error.stack]))
}

/// Tagged form of a value.
pub fn tagged(tag: &str, value: Value) -> Value {
    json!({ TAG_KEY: tag, "value": value })
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${}", key)
    } else {
        key.to_string()
    }
}

fn escape_json(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(k, v)| (escape_key(k), escape_json(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(escape_json).collect()),
        other => other.clone(),
    }
}

/// Promise ids handed out while encoding one stream.
#[derive(Default)]
struct EncodeState {
    next_id: u64,
    discovered: Vec<(u64, SettleFuture)>,
}

impl EncodeState {
    fn register(&mut self, pending: &PendingValue) -> Option<u64> {
        let future = pending.take()?;
        self.next_id += 1;
        self.discovered.push((self.next_id, future));
        Some(self.next_id)
    }
}

/// Writes payloads onto an NDJSON [`ByteStream`].
#[derive(Clone)]
pub struct StreamEncoder {
    plugins: Vec<TypePlugin>,
    builtins: Vec<TypePlugin>,
    timeout: Duration,
    buffer_size: usize,
}

impl StreamEncoder {
    pub fn new(config: &SingleFetchConfig) -> Self {
        Self {
            plugins: Vec::new(),
            builtins: builtin_plugins(config.server_mode),
            timeout: config.stream_timeout,
            buffer_size: config.buffer_size,
        }
    }

    /// Add a plugin; custom plugins are tried in insertion order, before the
    /// built-in ones.
    pub fn with_plugin(mut self, plugin: TypePlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start encoding `root` on a background task and return the body.
    ///
    /// Must be called from within a tokio runtime.
    pub fn encode(&self, root: Payload, signal: CancellationToken) -> ByteStream {
        let (stream, sender) = ByteStream::with_buffer_size(self.buffer_size);
        let encoder = self.clone();
        tokio::spawn(async move {
            encoder.drive(root, sender, signal).await;
        });
        stream
    }

    /// Encode a value without any deferred parts.
    ///
    /// Deferred values are consumed and written as promise references that
    /// will never settle; use [`encode`](Self::encode) for those.
    pub fn encode_value(&self, value: &Payload) -> Value {
        self.encode_inner(value, &mut EncodeState::default())
    }

    async fn drive(self, root: Payload, sender: ByteStreamSender, signal: CancellationToken) {
        let deadline = Instant::now() + self.timeout;
        let mut state = EncodeState::default();

        let shell = self.encode_inner(&root, &mut state);
        if write(&sender, &shell).await.is_err() {
            return;
        }

        let mut inflight: FuturesUnordered<BoxFuture<'static, (u64, HandlerResult)>> =
            FuturesUnordered::new();
        let mut outstanding = BTreeSet::new();
        schedule(&mut state, &mut inflight, &mut outstanding);

        let timer = sleep_until(deadline);
        tokio::pin!(timer);

        while !outstanding.is_empty() {
            tokio::select! {
                biased;

                _ = signal.cancelled() => {
                    debug!(outstanding = outstanding.len(), "client aborted, stopping stream");
                    return;
                }
                Some((id, result)) = inflight.next() => {
                    outstanding.remove(&id);
                    let line = self.settled(id, result, &mut state);
                    if write(&sender, &line).await.is_err() {
                        return;
                    }
                    schedule(&mut state, &mut inflight, &mut outstanding);
                }
                _ = &mut timer => {
                    warn!(
                        outstanding = outstanding.len(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "stream timed out, rejecting pending values"
                    );
                    let reason = tagged(ERROR_TAG, error_value(&ThrownError::timeout()));
                    for id in std::mem::take(&mut outstanding) {
                        let line = settled_line(id, "rejected", reason.clone());
                        if write(&sender, &line).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        sender.close().await;
    }

    fn settled(&self, id: u64, result: HandlerResult, state: &mut EncodeState) -> Value {
        match result {
            Ok(value) => settled_line(id, "fulfilled", self.encode_inner(&value, state)),
            Err(error) => settled_line(id, "rejected", self.encode_inner(&error, state)),
        }
    }

    fn encode_inner(&self, value: &Payload, state: &mut EncodeState) -> Value {
        if let Some(plugin) = self
            .plugins
            .iter()
            .chain(self.builtins.iter())
            .find(|p| p.matches(value))
        {
            let inner = (plugin.encode)(value);
            return tagged(&plugin.tag, self.encode_inner(&inner, state));
        }

        match value {
            Payload::Json(json) => escape_json(json),
            Payload::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (escape_key(k), self.encode_inner(v, state)))
                    .collect::<Map<String, Value>>(),
            ),
            Payload::List(items) => {
                Value::Array(items.iter().map(|v| self.encode_inner(v, state)).collect())
            }
            Payload::Deferred(deferred) => Value::Object(
                deferred
                    .data
                    .iter()
                    .map(|(k, v)| (escape_key(k), self.encode_inner(v, state)))
                    .collect(),
            ),
            Payload::Pending(pending) => match state.register(pending) {
                Some(id) => json!({ TAG_KEY: PROMISE_TAG, "id": id }),
                None => fallback(),
            },
            _ => fallback(),
        }
    }
}

impl fmt::Debug for StreamEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEncoder")
            .field("plugins", &self.plugins)
            .field("timeout", &self.timeout)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

fn schedule(
    state: &mut EncodeState,
    inflight: &mut FuturesUnordered<BoxFuture<'static, (u64, HandlerResult)>>,
    outstanding: &mut BTreeSet<u64>,
) {
    for (id, future) in state.discovered.drain(..) {
        outstanding.insert(id);
        inflight.push(
            AssertUnwindSafe(future)
                .catch_unwind()
                .map(move |result| {
                    let result = result.unwrap_or_else(|_| {
                        Err(ThrownError::named("Panic", "deferred value panicked").into())
                    });
                    (id, result)
                })
                .boxed(),
        );
    }
}

fn error_value(error: &ThrownError) -> Value {
    json!([error.name, error.message, error.stack])
}

fn fallback() -> Value {
    json!({ TAG_KEY: FALLBACK_TAG })
}

fn settled_line(id: u64, status: &str, value: Value) -> Value {
    json!({ SETTLED_KEY: id, "status": status, "value": value })
}

async fn write(sender: &ByteStreamSender, line: &Value) -> Result<(), armature_core::Error> {
    sender.send_line(&line.to_string()).await.map_err(|e| {
        debug!(error = %e, "stream receiver dropped");
        e
    })
}
