// Shape predicates over handler results

use crate::payload::Payload;
use armature_core::HttpResponse;

/// A raw response value.
pub fn is_response(value: &Payload) -> bool {
    matches!(value, Payload::Response(_))
}

/// Deferred data (with or without response metadata).
pub fn is_deferred_data(value: &Payload) -> bool {
    matches!(value, Payload::Deferred(_))
}

/// A thrown or returned response stub.
pub fn is_response_stub(value: &Payload) -> bool {
    matches!(value, Payload::Stub(_))
}

pub fn is_route_error_response(value: &Payload) -> bool {
    matches!(value, Payload::ErrorResponse(_))
}

/// The synthesized redirect marker.
pub fn is_redirect_result(value: &Payload) -> bool {
    matches!(value, Payload::Redirect(_))
}

/// Any 3xx status.
#[inline]
pub fn is_redirect_status_code(status: u16) -> bool {
    armature_core::is_redirect_code(status)
}

/// A redirect status carrying a `Location` header.
pub fn is_redirect_response(response: &HttpResponse) -> bool {
    is_redirect_status_code(response.status) && response.headers.location().is_some()
}

/// [`is_redirect_response`] for an arbitrary payload.
pub fn is_redirect_payload(value: &Payload) -> bool {
    match value {
        Payload::Response(response) => is_redirect_response(response),
        _ => false,
    }
}
