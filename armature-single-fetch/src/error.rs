// Error types for the single-fetch data layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SingleFetchError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to merge response stubs: {0}")]
    Merge(String),

    #[error(transparent)]
    Core(#[from] armature_core::Error),
}

pub type Result<T> = std::result::Result<T, SingleFetchError>;
