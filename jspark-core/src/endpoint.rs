// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The `Endpoint` actor contract. Endpoints are single-threaded from
//! their own point of view: the inbox guarantees no two callbacks of the same endpoint run
//! concurrently, so implementations may freely use `&mut self` state with no locking of
//! their own.

use crate::{address::RpcAddress, error::RpcError, message::ReplyContext};

/// A long-lived, named actor. All methods have empty default bodies except the two message
/// handlers, so a minimal endpoint only needs to implement `receive` and/or
/// `receive_and_reply`.
pub trait Endpoint: Send + 'static {
    /// Runs once, after registration, before any other message is delivered.
    fn on_start(&mut self) {}

    /// Runs once, as the last callback this endpoint will ever receive.
    fn on_stop(&mut self) {}

    /// A remote peer's transport connection came up.
    fn on_connected(&mut self, _addr: &RpcAddress) {}

    /// A remote peer's transport connection went down.
    fn on_disconnected(&mut self, _addr: &RpcAddress) {}

    /// A remote peer's transport connection failed.
    fn on_network_error(&mut self, _addr: &RpcAddress, _err: &RpcError) {}

    /// A one-way message; no reply is expected or possible.
    fn receive(&mut self, sender_addr: &RpcAddress, payload: Vec<u8>);

    /// A request expecting exactly one reply through `reply_ctx`.
    ///
    /// The endpoint exists and received the request; it just doesn't implement
    /// request/response handling. The default implementation reflects that: it fails
    /// `reply_ctx` with [`RpcError::ReplyNotFulfilled`] rather than leaving the caller
    /// waiting, so a one-way-only endpoint doesn't need to override this method at all.
    fn receive_and_reply(
        &mut self,
        sender_addr: &RpcAddress,
        payload: Vec<u8>,
        reply_ctx: ReplyContext,
    ) {
        let _ = sender_addr;
        let _ = payload;
        reply_ctx.fail(RpcError::ReplyNotFulfilled(
            "endpoint does not handle request/response messages".to_string(),
        ));
    }

    /// Catch-all invoked by the inbox when a callback above panics, in lieu of crashing the
    /// worker thread or leaving the endpoint wedged.
    fn on_error(&mut self, _err: &RpcError) {}
}
