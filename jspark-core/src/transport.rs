// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The byte-level transport contracts this crate consumes but does not implement.
//! Connection establishment, frame encoding and network I/O are all
//! out of scope here; these traits are the seam a host application wires a real transport
//! (TCP, QUIC, an in-process loopback for tests, ...) into.

use std::sync::Arc;

use crate::error::{RpcError, RpcResult};

/// A live connection to one remote peer. Owned by at most one [`crate::outbox::Outbox`] (or
/// one bound [`crate::reference::EndpointReference`]) at a time -- no two entities write
/// concurrently to the same client.
pub trait Client: Send + Sync {
    /// Sends `frame` and arranges for `callback` to run with the response bytes, or a
    /// [`RpcError::TransportFailure`], once it arrives (or the attempt definitively fails).
    /// Implementations must invoke `callback` exactly once.
    fn send_rpc(&self, frame: Vec<u8>, callback: Box<dyn FnOnce(Result<Vec<u8>, RpcError>) + Send>);

    /// Sends `frame` with no reply expected.
    fn send_oneway(&self, frame: Vec<u8>) -> RpcResult<()>;
}

/// Creates [`Client`]s for `(host, port)` pairs. Outbox connect tasks call this on the
/// connect pool; construction itself is allowed to be slow (it's the thing being pooled).
pub trait ClientFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RpcError::TransportFailure`] if the connection cannot be established.
    fn create_client(&self, host: &str, port: u16) -> RpcResult<Arc<dyn Client>>;
}

/// A bound listening socket. Constructed by the host application over whatever transport
/// context it uses (optionally wrapping an auth bootstrap step gated by
/// [`crate::config::RpcEnvironmentConfig::authentication_enabled`]); this crate only needs
/// to know its port and how to close it.
pub trait Server: Send + Sync {
    /// The bound port. Only meaningful once the server has finished binding.
    fn port(&self) -> u16;

    /// Stops accepting new connections and releases any OS resources.
    fn close(&self);
}

/// Binds [`Server`]s on behalf of [`crate::environment::RpcEnvironment::start`]. Mirrors
/// [`ClientFactory`] on the listening side: this crate decides *when* to bind (at
/// environment start-up) and *whether* to gate it behind auth bootstrap
/// (`authentication_enabled`), but not *how* -- that's the host transport's job.
pub trait ServerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RpcError::TransportFailure`] if binding fails.
    fn bind(&self, host: &str, authentication_enabled: bool) -> RpcResult<Arc<dyn Server>>;
}

// NOTE on the transport-handler contract:
//
// The network-side ingress that decodes incoming frames into `RequestMessage`s is not
// modeled as a trait here, because this crate doesn't call it -- the *transport*
// integration calls *into* this crate. The sole entry points for remote traffic are
// `Dispatcher::post_remote` (for requests expecting a reply, wiring the wire-level
// response callback into a `ReplyContext::Remote`) and `Dispatcher::post_one_way` (for
// fire-and-forget frames). A host transport's ingress loop is expected to decode a frame,
// build a `RequestMessage`, and call one of those two methods; see their doc comments for
// the exact shape expected.
