// Core library for the Armature HTTP framework
// This module contains the HTTP primitives shared by the data layer: headers,
// request/response wrappers, status codes, and streaming bodies.

pub mod error;
pub mod headers;
pub mod http;
pub mod status;
pub mod streaming;

// Re-export commonly used types
pub use error::*;
pub use headers::{HeaderMap, SET_COOKIE};
pub use http::*;
pub use status::*;
pub use streaming::{ByteStream, ByteStreamSender, StreamingResponse, NDJSON_CONTENT_TYPE};
