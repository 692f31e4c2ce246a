//! Error redaction and reporting policy.
//!
//! Outside development, messages and stacks of thrown errors never reach
//! the wire. Which errors get reported to the process error sink is decided
//! here as well.

use crate::config::ServerMode;
use crate::payload::{Payload, RouteErrorResponse, ThrownError};
use std::sync::Arc;

/// Message that replaces every thrown error message in production.
pub const SANITIZED_MESSAGE: &str = "Unexpected Server Error";

/// Receives every reportable error once.
pub type ErrorReporter = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Reporter that logs through `tracing`.
pub fn default_reporter() -> ErrorReporter {
    Arc::new(|error: &Payload| match error {
        Payload::Error(thrown) => tracing::error!(
            error_name = %thrown.name,
            error_message = %thrown.message,
            stack = thrown.stack.as_deref().unwrap_or(""),
            "route error"
        ),
        Payload::ErrorResponse(response) => tracing::error!(
            status = response.status,
            error = ?response.error,
            "route error response"
        ),
        other => tracing::error!(value = ?other, "route threw a value"),
    })
}

/// Whether a thrown value should be reported.
///
/// Stubs are deliberate status-only signals. Error responses are expected
/// control flow unless they wrap an underlying error.
pub fn should_report(error: &Payload) -> bool {
    match error {
        Payload::Stub(_) => false,
        Payload::ErrorResponse(response) => response.error.is_some(),
        _ => true,
    }
}

/// Turn a thrown stub into an error response with its status (or 500).
///
/// Other values are returned unchanged.
pub fn materialize_stub_error(error: Payload) -> Payload {
    match error {
        Payload::Stub(stub) => {
            RouteErrorResponse::new(stub.status().unwrap_or(500), "", Payload::null()).into()
        }
        other => other,
    }
}

/// Redact a thrown error for the given mode.
pub fn sanitize_error(error: &Payload, mode: ServerMode) -> Payload {
    if mode.is_development() {
        return error.clone();
    }
    match error {
        Payload::Error(thrown) => Payload::Error(sanitize_thrown(thrown)),
        Payload::ErrorResponse(response) => {
            let mut response = response.clone();
            if response.internal && response.error.is_some() {
                response.data = Box::new(Payload::from(SANITIZED_MESSAGE));
            }
            response.error = response.error.as_ref().map(sanitize_thrown);
            Payload::ErrorResponse(response)
        }
        other => other.clone(),
    }
}

/// Keep the name, drop the message and stack.
pub fn sanitize_thrown(error: &ThrownError) -> ThrownError {
    ThrownError::named(error.name.clone(), SANITIZED_MESSAGE)
}
