//! Single-fetch configuration.
//!
//! ```rust
//! use armature_single_fetch::config::{ServerMode, SingleFetchConfig};
//! use std::time::Duration;
//!
//! let config = SingleFetchConfig::new()
//!     .server_mode(ServerMode::Development)
//!     .stream_timeout_ms(2_000)
//!     .routes_param("_routes");
//!
//! assert_eq!(config.stream_timeout, Duration::from_secs(2));
//! assert!(config.server_mode.is_development());
//! ```
//!
//! ## Environment
//!
//! - `ARMATURE_SERVER_MODE=development|production|test`
//! - `ARMATURE_STREAM_TIMEOUT_MS=<milliseconds>`

use crate::error::{Result, SingleFetchError};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How long the encoder waits for deferred values before rejecting them.
///
/// Slightly under five seconds so rejections can still be flushed before a
/// typical five second render abort.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_millis(4950);

/// Query parameter naming the routes a partial request wants loaded.
pub const DEFAULT_ROUTES_PARAM: &str = "_routes";

const SERVER_MODE_VAR: &str = "ARMATURE_SERVER_MODE";
const STREAM_TIMEOUT_VAR: &str = "ARMATURE_STREAM_TIMEOUT_MS";

/// Deployment mode; everything except `Development` redacts error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Development,
    #[default]
    Production,
    Test,
}

impl ServerMode {
    /// Parse a mode name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(ServerMode::Development),
            "production" | "prod" => Some(ServerMode::Production),
            "test" => Some(ServerMode::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Development => "development",
            ServerMode::Production => "production",
            ServerMode::Test => "test",
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, ServerMode::Development)
    }
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the single-fetch pipeline and encoder.
#[derive(Debug, Clone)]
pub struct SingleFetchConfig {
    /// Controls error redaction
    pub server_mode: ServerMode,
    /// Bounded wait for deferred values
    pub stream_timeout: Duration,
    /// Partial-load query parameter
    pub routes_param: String,
    /// Capacity of the channel between the encoder task and the body
    pub buffer_size: usize,
}

impl Default for SingleFetchConfig {
    fn default() -> Self {
        Self {
            server_mode: ServerMode::default(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            routes_param: DEFAULT_ROUTES_PARAM.to_string(),
            buffer_size: 64,
        }
    }
}

impl SingleFetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ARMATURE_SERVER_MODE` and
    /// `ARMATURE_STREAM_TIMEOUT_MS` when they are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup(SERVER_MODE_VAR) {
            config.server_mode = ServerMode::parse(&mode).ok_or_else(|| {
                SingleFetchError::Config(format!("{} has unknown mode {:?}", SERVER_MODE_VAR, mode))
            })?;
        }

        if let Some(ms) = lookup(STREAM_TIMEOUT_VAR) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                SingleFetchError::Config(format!("{} must be milliseconds, got {:?}", STREAM_TIMEOUT_VAR, ms))
            })?;
            config.stream_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn server_mode(mut self, mode: ServerMode) -> Self {
        self.server_mode = mode;
        self
    }

    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn stream_timeout_ms(mut self, ms: u64) -> Self {
        self.stream_timeout = Duration::from_millis(ms);
        self
    }

    pub fn routes_param(mut self, name: impl Into<String>) -> Self {
        self.routes_param = name.into();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = SingleFetchConfig::default();
        assert_eq!(config.server_mode, ServerMode::Production);
        assert_eq!(config.stream_timeout, Duration::from_millis(4950));
        assert_eq!(config.routes_param, "_routes");
    }

    #[test]
    fn test_from_lookup() {
        let env = vars(&[
            ("ARMATURE_SERVER_MODE", "Development"),
            ("ARMATURE_STREAM_TIMEOUT_MS", "250"),
        ]);
        let config = SingleFetchConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.server_mode, ServerMode::Development);
        assert_eq!(config.stream_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let env = vars(&[("ARMATURE_SERVER_MODE", "staging")]);
        assert!(matches!(
            SingleFetchConfig::from_lookup(|k| env.get(k).cloned()),
            Err(SingleFetchError::Config(_))
        ));

        let env = vars(&[("ARMATURE_STREAM_TIMEOUT_MS", "soon")]);
        assert!(SingleFetchConfig::from_lookup(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn test_server_mode_serde() {
        let mode: ServerMode = serde_json::from_str("\"test\"").unwrap();
        assert_eq!(mode, ServerMode::Test);
        assert_eq!(serde_json::to_string(&ServerMode::Development).unwrap(), "\"development\"");
    }
}
