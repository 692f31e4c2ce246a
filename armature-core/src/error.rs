// Error types for the Armature HTTP primitives

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid request URI: {0}")]
    InvalidUri(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),
}
