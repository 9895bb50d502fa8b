// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Location-transparent endpoint handles and the future type `ask`
//! returns.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::oneshot;

use crate::{
    address::RpcAddress,
    environment::EnvironmentInner,
    error::{RpcError, RpcResult},
    message::RequestMessage,
    outbox::OutboxItem,
    transport::Client,
};

/// A future resolving to the bytes an `ask()` call's peer replied with. Backed by the same
/// `oneshot` channel shape whether the call ended up local or remote -- callers can't tell
/// the difference from this type alone, which is the point.
pub struct AskFuture {
    rx: oneshot::Receiver<Result<Vec<u8>, RpcError>>,
}

impl AskFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Vec<u8>, RpcError>>) -> Self {
        Self { rx }
    }
}

impl Future for AskFuture {
    type Output = RpcResult<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::EndpointPanicked(
                "reply sender dropped without completing".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A handle to a named endpoint, somewhere. The endpoint may live in this process or on a
/// remote node; `send`/`ask` route to the right place without the caller needing to know
/// which.
#[derive(Clone)]
pub struct EndpointReference {
    name: String,
    node_addr: RpcAddress,
    env: Weak<EnvironmentInner>,
    /// Bypasses address-keyed outbox lookup entirely: an ephemeral client-side reference
    /// handed a transport client directly (e.g. a one-off connection to a fixed server the
    /// embedding application already dialed) writes straight to it instead.
    bound_client: Option<Arc<dyn Client>>,
}

impl fmt::Debug for EndpointReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointReference")
            .field("name", &self.name)
            .field("node_addr", &self.node_addr)
            .field("bound", &self.bound_client.is_some())
            .finish()
    }
}

impl EndpointReference {
    pub(crate) fn new(name: impl Into<String>, node_addr: RpcAddress, env: Weak<EnvironmentInner>) -> Self {
        Self {
            name: name.into(),
            node_addr,
            env,
            bound_client: None,
        }
    }

    pub(crate) fn bound(
        name: impl Into<String>,
        node_addr: RpcAddress,
        env: Weak<EnvironmentInner>,
        client: Arc<dyn Client>,
    ) -> Self {
        Self {
            name: name.into(),
            node_addr,
            env,
            bound_client: Some(client),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn address(&self) -> &RpcAddress {
        &self.node_addr
    }

    /// `true` if this reference targets an endpoint registered in the calling process's own
    /// environment, rather than a peer reached through an outbox.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.bound_client.is_none()
            && self
                .env
                .upgrade()
                .is_some_and(|env| env.own_address() == &self.node_addr)
    }

    /// Sends a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::EnvironmentStopped`] if the owning environment has been dropped
    /// or shut down, or [`RpcError::NoSuchEndpoint`] for a local reference whose target
    /// isn't (or is no longer) registered.
    pub fn send(&self, payload: Vec<u8>) -> RpcResult<()> {
        let env = self.env.upgrade().ok_or(RpcError::EnvironmentStopped)?;
        let request = RequestMessage {
            sender_addr: env.own_address().clone(),
            receiver: self.clone(),
            payload,
        };

        if let Some(client) = &self.bound_client {
            return client.send_oneway(request.payload);
        }

        if self.is_local() {
            env.dispatcher()
                .post_one_way(&request.receiver.name, request.sender_addr, request.payload)
        } else {
            let outbox = env.outbox_for(&request.receiver.node_addr);
            outbox.send(OutboxItem::OneWay {
                frame: encode_frame(&request.receiver.name, &request.payload),
            });
            Ok(())
        }
    }

    /// Sends a request, returning a future that resolves once a reply arrives.
    #[must_use]
    pub fn ask(&self, payload: Vec<u8>) -> AskFuture {
        let Some(env) = self.env.upgrade() else {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Err(RpcError::EnvironmentStopped));
            return AskFuture::new(rx);
        };
        let request = RequestMessage {
            sender_addr: env.own_address().clone(),
            receiver: self.clone(),
            payload,
        };

        if let Some(client) = &self.bound_client {
            let (tx, rx) = oneshot::channel();
            client.send_rpc(
                request.payload,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            );
            return AskFuture::new(rx);
        }

        if self.is_local() {
            env.dispatcher()
                .post_local(&request.receiver.name, request.sender_addr, request.payload)
        } else {
            let (tx, rx) = oneshot::channel();
            let outbox = env.outbox_for(&request.receiver.node_addr);
            outbox.send(OutboxItem::Rpc {
                frame: encode_frame(&request.receiver.name, &request.payload),
                reply_callback: Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            });
            AskFuture::new(rx)
        }
    }

    /// As [`EndpointReference::ask`], but fails with [`RpcError::Timeout`] if no reply
    /// arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] on elapsed, or whatever [`EndpointReference::ask`]
    /// itself would return.
    pub async fn ask_with_timeout(&self, payload: Vec<u8>, timeout: Duration) -> RpcResult<Vec<u8>> {
        match tokio::time::timeout(timeout, self.ask(payload)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout),
        }
    }
}

/// The wire encoding of "which endpoint this frame is for" is a transport concern this
/// crate doesn't otherwise own; this minimal length-prefixed form is what [`crate::outbox`]
/// hands to a [`Client`], and what a host transport's ingress loop is expected to mirror
/// when decoding inbound frames back into a `(name, payload)` pair before calling
/// `Dispatcher::post_remote`/`post_one_way`.
pub(crate) fn encode_frame(name: &str, payload: &[u8]) -> Vec<u8> {
    let name_bytes = name.as_bytes();
    let mut frame = Vec::with_capacity(2 + name_bytes.len() + payload.len());
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    frame.extend_from_slice(name_bytes);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn encode_frame_round_trips_by_hand() {
        let frame = encode_frame("svc", b"hello");
        let name_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(&frame[2..2 + name_len], b"svc");
        assert_eq!(&frame[2 + name_len..], b"hello");
    }
}
