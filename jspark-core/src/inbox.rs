// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The per-endpoint FIFO mailbox and lifecycle state machine.
//!
//! Two locks are in play, each with a distinct job:
//! - `queue`: protects the FIFO itself and the `stopped` flag. Only ever held for a quick
//!   push/pop, so `post()` is never blocked by a slow endpoint.
//! - `endpoint`: the "processing lock" from the data model's invariant 2. `process()` takes
//!   it *before* popping the queue and holds it across both the pop and the callback, so the
//!   pop-then-dispatch sequence is a single atomic step from another worker's point of view.
//!   That matters because the dispatcher re-announces an inbox into the ready-queue on every
//!   `post`, so two workers can legitimately both be inside `process()` for the same inbox at
//!   once (duplicate scheduling is allowed); if popping happened under `queue` alone and were
//!   released before acquiring `endpoint`, the loser of the `endpoint` race could still win
//!   the race to pop the *next* item and deliver it out of order. Holding `endpoint` across
//!   the pop closes that gap: whichever worker acquires `endpoint` first is also the one that
//!   pops next, so delivery order always matches queue order.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::{endpoint::Endpoint, error::RpcError, message::MailboxItem};

/// What a worker should do after one `process()` call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The queue was empty; nothing happened. Spurious wakes land here as no-ops.
    Idle,
    /// One item was processed and more are queued; re-enqueue this inbox.
    MoreWork,
    /// `OnStop` was just processed and the inbox drained; the dispatcher should remove
    /// this endpoint's entry from its registry.
    Stopped,
}

struct QueueState {
    queue: VecDeque<MailboxItem>,
    stopped: bool,
}

pub struct Inbox {
    name: String,
    queue: Mutex<QueueState>,
    endpoint: Mutex<Box<dyn Endpoint>>,
    /// Tracks concurrent `process()` invocations purely for introspection/tests; the
    /// `endpoint` lock above is what actually serializes callback execution.
    active_processors: AtomicUsize,
}

impl Inbox {
    /// Creates a new inbox, pre-seeded with `OnStart` per the registration semantics in
    /// §4.1: the endpoint only begins receiving normal traffic once `OnStart` has run, and
    /// anything posted before that stays queued and is delivered afterward in order.
    pub fn new(name: impl Into<String>, endpoint: Box<dyn Endpoint>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(QueueState {
                queue: VecDeque::from([MailboxItem::OnStart]),
                stopped: false,
            }),
            endpoint: Mutex::new(endpoint),
            active_processors: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `item` unless the inbox is stopped. A stopped inbox fails the item's reply
    /// context (if any) with [`RpcError::EndpointStopped`] and silently drops one-way or
    /// lifecycle items.
    pub fn post(&self, item: MailboxItem) {
        let mut state = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if state.stopped {
            drop(state);
            fail_if_reply(item, RpcError::EndpointStopped(self.name.clone()));
            return;
        }
        state.queue.push_back(item);
    }

    /// Marks the inbox stopped and appends `OnStop`. Idempotent: a second call is a no-op.
    /// Returns `true` the first time (the caller uses this to decide whether to schedule
    /// the inbox once more).
    pub fn stop(&self) -> bool {
        let mut state = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if state.stopped {
            return false;
        }
        state.stopped = true;
        state.queue.push_back(MailboxItem::OnStop);
        true
    }

    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .queue
            .is_empty()
    }

    #[cfg(test)]
    pub(crate) fn active_processor_count(&self) -> usize {
        self.active_processors.load(Ordering::SeqCst)
    }

    /// Pops and handles exactly one item, if any. Called by a dispatcher worker after
    /// pulling this inbox off the ready-queue.
    ///
    /// Takes the `endpoint` lock before popping from `queue`, not after, so that two workers
    /// racing on the same inbox can never pop items N and N+1 and dispatch them out of order:
    /// whichever worker wins `endpoint` pops and delivers the current front before the other
    /// worker's `process()` call can pop anything.
    pub fn process(&self) -> ProcessOutcome {
        let mut endpoint = self.endpoint.lock().unwrap_or_else(|p| p.into_inner());

        let item = {
            let mut state = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            match state.queue.pop_front() {
                Some(item) => item,
                None => return ProcessOutcome::Idle,
            }
        };

        let is_stop = matches!(item, MailboxItem::OnStop);

        self.active_processors.fetch_add(1, Ordering::SeqCst);
        dispatch_one(endpoint.as_mut(), item);
        self.active_processors.fetch_sub(1, Ordering::SeqCst);
        drop(endpoint);

        if is_stop {
            self.drain_after_stop();
            return ProcessOutcome::Stopped;
        }

        if self.has_pending_work() {
            ProcessOutcome::MoreWork
        } else {
            ProcessOutcome::Idle
        }
    }

    /// Invariant 3: after `OnStop`, no further items are delivered to the endpoint; any
    /// still-queued items with reply contexts are failed.
    fn drain_after_stop(&self) {
        let drained = {
            let mut state = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut state.queue)
        };
        for item in drained {
            fail_if_reply(item, RpcError::EndpointStopped(self.name.clone()));
        }
    }
}

fn fail_if_reply(item: MailboxItem, err: RpcError) {
    if let MailboxItem::Rpc { reply_ctx, .. } = item {
        reply_ctx.fail(err);
    }
    // OneWay / lifecycle / remote-event items carry no reply context: logged by the
    // dispatcher before the item ever reached here, nothing further to do.
}

fn dispatch_one(endpoint: &mut dyn Endpoint, item: MailboxItem) {
    match item {
        MailboxItem::OnStart => guarded(endpoint, |e| e.on_start()),
        MailboxItem::OnStop => guarded(endpoint, |e| e.on_stop()),
        MailboxItem::OneWay { sender, payload } => {
            guarded(endpoint, |e| e.receive(&sender, payload));
        }
        MailboxItem::Rpc {
            sender,
            payload,
            reply_ctx,
        } => {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                endpoint.receive_and_reply(&sender, payload, reply_ctx);
            }));
            if let Err(panic) = result {
                endpoint.on_error(&RpcError::EndpointPanicked(panic_message(&panic)));
                // `reply_ctx` was moved into the panicking call; its `Drop` impl already
                // failed the caller's reply as the stack unwound past it.
            }
        }
        MailboxItem::RemoteConnected(addr) => guarded(endpoint, |e| e.on_connected(&addr)),
        MailboxItem::RemoteDisconnected(addr) => guarded(endpoint, |e| e.on_disconnected(&addr)),
        MailboxItem::RemoteFailure(addr, err) => {
            guarded(endpoint, |e| e.on_network_error(&addr, &err));
        }
    }
}

fn guarded(endpoint: &mut dyn Endpoint, call: impl FnOnce(&mut dyn Endpoint)) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| call(endpoint)));
    if let Err(panic) = result {
        endpoint.on_error(&RpcError::EndpointPanicked(panic_message(&panic)));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "endpoint callback panicked".to_string()
    }
}
