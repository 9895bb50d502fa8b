// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The error model for the whole crate.
//!
//! Every fallible public entry point returns [`RpcResult<T>`]. There is no panicking API
//! surface outside of programmer-error assertions reachable only in debug builds.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type RpcResult<T> = Result<T, RpcError>;

/// The one error type this crate's public surface ever returns.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum RpcError {
    /// A second `register()` call used a name that is already taken.
    #[error("endpoint name {0:?} is already registered")]
    NameAlreadyRegistered(String),

    /// An operation was attempted after the owning `RpcEnvironment` was shut down.
    #[error("rpc environment has been stopped")]
    EnvironmentStopped,

    /// `post_message` (or a wrapper) targeted a name with no registered entry.
    #[error("no such endpoint: {0:?}")]
    NoSuchEndpoint(String),

    /// An item was posted to an inbox after its `OnStop` had already run.
    #[error("endpoint {0:?} has already stopped")]
    EndpointStopped(String),

    /// Connecting to, or writing to, a remote peer failed.
    #[error("transport failure talking to {address}: {source}")]
    TransportFailure {
        address: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `RpcAddress::parse_url` was given a string that isn't `jspark://host:port`.
    #[error("invalid rpc url: {0:?}")]
    InvalidAddress(String),

    /// `RpcEnvironmentConfig::from_json` was given a document that isn't valid JSON, or
    /// doesn't deserialize into the config shape.
    #[error("invalid rpc environment config: {0}")]
    InvalidConfig(String),

    /// An `ask_with_timeout` future elapsed before a reply arrived.
    #[error("rpc call timed out")]
    Timeout,

    /// An endpoint's `receive`/`receive_and_reply` callback panicked. The inbox survives;
    /// this is surfaced to the endpoint's own `on_error` hook and, for RPC items, to the
    /// caller's reply context.
    #[error("endpoint callback panicked: {0}")]
    EndpointPanicked(String),

    /// A [`crate::message::ReplyContext`] was dropped without either `reply` or `fail` ever
    /// being called on it. Distinct from [`RpcError::EndpointPanicked`]: this is the
    /// well-behaved-but-forgetful case (a callback that returns normally having never
    /// answered), not a panic unwinding through the callback.
    #[error("reply context dropped without a reply: {0}")]
    ReplyNotFulfilled(String),
}

impl RpcError {
    pub(crate) fn transport(address: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RpcError::TransportFailure {
            address: address.into(),
            source: Box::new(source),
        }
    }
}
