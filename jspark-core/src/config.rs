// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Runtime-tunable knobs. Plain, `serde`-deserializable, with a
//! `Default` impl matching the documented defaults, so an embedding application can load it
//! from whatever configuration file it already uses without this crate knowing the format.

use serde::{Deserialize, Serialize};

use crate::error::RpcResult;

/// Number of dispatcher workers used when the configured value is zero or negative.
pub const DEFAULT_DISPATCHER_THREADS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcEnvironmentConfig {
    /// Dispatcher worker-pool size. Defaults to [`DEFAULT_DISPATCHER_THREADS`] when `<= 0`.
    pub dispatcher_threads: i64,

    /// Outbox connect-task pool size.
    pub rpc_connect_threads: i64,

    /// Pool size used to isolate local `ask` completion from caller threads.
    pub deliver_threads: i64,

    /// Whether the transport server performs auth bootstrap on start.
    pub authentication_enabled: bool,
}

impl Default for RpcEnvironmentConfig {
    fn default() -> Self {
        Self {
            dispatcher_threads: DEFAULT_DISPATCHER_THREADS as i64,
            rpc_connect_threads: 2,
            deliver_threads: 2,
            authentication_enabled: false,
        }
    }
}

impl RpcEnvironmentConfig {
    /// Loads a config from a JSON document, falling back to [`Default::default`] for any
    /// field the document omits (`#[serde(default)]` above).
    ///
    /// # Errors
    ///
    /// Returns an error if `json` isn't valid JSON or doesn't deserialize into this shape.
    pub fn from_json(json: &str) -> RpcResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::RpcError::InvalidConfig(e.to_string()))
    }

    /// Resolved worker-pool size: the configured value, or [`DEFAULT_DISPATCHER_THREADS`]
    /// when the configured value is `<= 0`.
    #[must_use]
    pub fn dispatcher_thread_count(&self) -> usize {
        resolve_positive(self.dispatcher_threads, DEFAULT_DISPATCHER_THREADS)
    }

    #[must_use]
    pub fn connect_thread_count(&self) -> usize {
        resolve_positive(self.rpc_connect_threads, 2)
    }

    #[must_use]
    pub fn deliver_thread_count(&self) -> usize {
        resolve_positive(self.deliver_threads, 2)
    }
}

fn resolve_positive(configured: i64, default: usize) -> usize {
    if configured <= 0 {
        default
    } else {
        configured as usize
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_matches_the_documented_values() {
        let config = RpcEnvironmentConfig::default();
        assert_eq!(config.dispatcher_thread_count(), 5);
        assert!(!config.authentication_enabled);
    }

    #[test]
    fn non_positive_dispatcher_threads_falls_back_to_default() {
        let config = RpcEnvironmentConfig {
            dispatcher_threads: 0,
            ..RpcEnvironmentConfig::default()
        };
        assert_eq!(config.dispatcher_thread_count(), DEFAULT_DISPATCHER_THREADS);

        let config = RpcEnvironmentConfig {
            dispatcher_threads: -3,
            ..RpcEnvironmentConfig::default()
        };
        assert_eq!(config.dispatcher_thread_count(), DEFAULT_DISPATCHER_THREADS);
    }

    #[test]
    fn loads_partial_json_with_defaults_for_the_rest() {
        let config = RpcEnvironmentConfig::from_json(r#"{"authentication_enabled": true}"#).unwrap();
        assert!(config.authentication_enabled);
        assert_eq!(config.dispatcher_thread_count(), DEFAULT_DISPATCHER_THREADS);
    }
}
