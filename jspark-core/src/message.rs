// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The mailbox/outbox item variants and the reply-context capability that ties an RPC
//! request to exactly one reply.

use std::fmt;

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{address::RpcAddress, error::RpcError, reference::EndpointReference, thread_pool::ThreadPool};

/// What a caller hands the environment before it's turned into a [`MailboxItem`] or
/// [`crate::outbox::OutboxItem`] by the routing layer.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub sender_addr: RpcAddress,
    pub receiver: EndpointReference,
    pub payload: Vec<u8>,
}

/// A single-shot capability completing an RPC reply, either in-process (a future) or over
/// the wire (a transport-layer callback). Exactly one of [`reply`](ReplyContext::reply) /
/// [`fail`](ReplyContext::fail) is ever delivered: both consume `self`, and a reply context
/// dropped without being used (an endpoint callback that panics or simply forgets to
/// answer) auto-fails itself on [`Drop`] so no caller is left waiting forever.
pub struct ReplyContext {
    inner: Option<ReplyContextInner>,
}

enum ReplyContextInner {
    Local(oneshot::Sender<Result<Vec<u8>, RpcError>>),
    Remote(Box<dyn FnOnce(Result<Vec<u8>, RpcError>) + Send>),
}

impl ReplyContext {
    pub(crate) fn local(tx: oneshot::Sender<Result<Vec<u8>, RpcError>>) -> Self {
        Self {
            inner: Some(ReplyContextInner::Local(tx)),
        }
    }

    /// Like [`ReplyContext::local`], but the actual channel send is submitted to
    /// `pool` rather than run in-line on whichever thread completes this context. This is
    /// the "third pool" the dispatcher keeps around for local `ask` delivery: it keeps
    /// a reply's continuation from ever running on the very
    /// endpoint worker thread that produced it, which would otherwise risk a re-entrant
    /// deadlock if that continuation turned around and asked the same endpoint again.
    pub(crate) fn local_via_pool(tx: oneshot::Sender<Result<Vec<u8>, RpcError>>, pool: Arc<ThreadPool>) -> Self {
        Self::remote(move |result| {
            pool.execute(move || {
                let _ = tx.send(result);
            });
        })
    }

    pub(crate) fn remote(
        callback: impl FnOnce(Result<Vec<u8>, RpcError>) + Send + 'static,
    ) -> Self {
        Self {
            inner: Some(ReplyContextInner::Remote(Box::new(callback))),
        }
    }

    /// Fulfills the reply with a successful payload.
    pub fn reply(mut self, payload: Vec<u8>) {
        self.complete(Ok(payload));
    }

    /// Fulfills the reply with a failure.
    pub fn fail(mut self, err: RpcError) {
        self.complete(Err(err));
    }

    fn complete(&mut self, result: Result<Vec<u8>, RpcError>) {
        match self.inner.take() {
            Some(ReplyContextInner::Local(tx)) => {
                // The receiver (the `ask` future) may already have been dropped by a
                // cancelled caller; that's not this context's problem to report.
                let _ = tx.send(result);
            }
            Some(ReplyContextInner::Remote(callback)) => callback(result),
            None => {}
        }
    }
}

impl Drop for ReplyContext {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // `std::thread::panicking()` is true only while the current thread is
            // unwinding, which is exactly the case where this context was carried off by a
            // panicking `receive_and_reply` rather than simply returned from one that forgot
            // to answer -- the two are surfaced through distinct `RpcError` variants so a
            // caller matching on `EndpointPanicked` doesn't get false positives from the
            // well-behaved-but-forgetful case.
            let err = if std::thread::panicking() {
                RpcError::EndpointPanicked("endpoint callback panicked before replying".to_string())
            } else {
                RpcError::ReplyNotFulfilled("endpoint returned without calling reply() or fail()".to_string())
            };
            self.complete(Err(err));
        }
    }
}

impl fmt::Debug for ReplyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &self.inner {
            Some(ReplyContextInner::Local(_)) => "Local(pending)",
            Some(ReplyContextInner::Remote(_)) => "Remote(pending)",
            None => "completed",
        };
        f.debug_tuple("ReplyContext").field(&shape).finish()
    }
}

/// Items an [`crate::inbox::Inbox`] holds, in the exact order `post` returned.
#[derive(Debug)]
pub enum MailboxItem {
    OnStart,
    OnStop,
    OneWay {
        sender: RpcAddress,
        payload: Vec<u8>,
    },
    Rpc {
        sender: RpcAddress,
        payload: Vec<u8>,
        reply_ctx: ReplyContext,
    },
    RemoteConnected(RpcAddress),
    RemoteDisconnected(RpcAddress),
    RemoteFailure(RpcAddress, RpcError),
}

impl MailboxItem {
    /// `true` for the two lifecycle markers, which are never subject to normal queueing
    /// rules (they bookend the inbox's life).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, MailboxItem::OnStart | MailboxItem::OnStop)
    }
}
