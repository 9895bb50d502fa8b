// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The endpoint registry and worker-pool scheduler.
//!
//! Workers pull ready inboxes off a shared, blocking ready-queue and call
//! [`Inbox::process`] once per pull. Duplicate scheduling of the same inbox is allowed and
//! expected -- see the note on `Inbox`'s own locking -- so every posting path here simply
//! posts the item and unconditionally re-announces the inbox as ready, rather than trying
//! to track whether it's "already scheduled".

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use tokio::sync::oneshot;

use crate::{
    address::RpcAddress,
    endpoint::Endpoint,
    error::{RpcError, RpcResult},
    inbox::{Inbox, ProcessOutcome},
    message::{MailboxItem, ReplyContext},
    reference::AskFuture,
    thread_pool::ThreadPool,
};

struct EndpointEntry {
    name: String,
    inbox: Arc<Inbox>,
}

enum ReadySignal {
    Entry(Arc<EndpointEntry>),
    Poison,
}

struct Registry {
    entries: HashMap<String, Arc<EndpointEntry>>,
    stopped: bool,
}

struct DispatcherInner {
    registry: Mutex<Registry>,
    ready_tx: Sender<ReadySignal>,
    deliver_pool: Arc<ThreadPool>,
}

/// Owns every registered endpoint's inbox and the worker pool that drives them.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns `worker_count` (minimum 1) named worker threads sharing one ready-queue.
    /// `deliver_pool` is where completed local `ask` replies are actually sent from, kept
    /// off the replying endpoint's own worker thread.
    pub fn new(worker_count: usize, deliver_pool: Arc<ThreadPool>) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let ready_rx = Arc::new(Mutex::new(ready_rx));
        let inner = Arc::new(DispatcherInner {
            registry: Mutex::new(Registry {
                entries: HashMap::new(),
                stopped: false,
            }),
            ready_tx,
            deliver_pool,
        });

        let workers = (0..worker_count.max(1))
            .map(|index| {
                let inner = Arc::clone(&inner);
                let ready_rx = Arc::clone(&ready_rx);
                std::thread::Builder::new()
                    .name(format!("dispatcher-{index}"))
                    .spawn(move || worker_loop(&inner, &ready_rx))
                    .expect("failed to spawn dispatcher worker")
            })
            .collect();

        Arc::new(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Creates the endpoint's inbox and schedules its `OnStart`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::EnvironmentStopped`] if called after [`Dispatcher::shutdown`], or
    /// [`RpcError::NameAlreadyRegistered`] if `name` is already taken.
    pub fn register(&self, name: impl Into<String>, endpoint: Box<dyn Endpoint>) -> RpcResult<()> {
        let name = name.into();
        let entry = {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|p| p.into_inner());
            if registry.stopped {
                return Err(RpcError::EnvironmentStopped);
            }
            if registry.entries.contains_key(&name) {
                return Err(RpcError::NameAlreadyRegistered(name));
            }
            let entry = Arc::new(EndpointEntry {
                name: name.clone(),
                inbox: Arc::new(Inbox::new(name.clone(), endpoint)),
            });
            registry.entries.insert(name.clone(), Arc::clone(&entry));
            entry
        };
        self.announce(entry);
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Stops a single endpoint without touching any other registered entry or the worker
    /// pool: appends `OnStop` to its inbox and re-announces it so a worker drains whatever
    /// was already queued before the entry is removed from the registry. Non-blocking --
    /// this returns as soon as the stop is scheduled, not once draining finishes.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoSuchEndpoint`] if `name` isn't registered.
    pub fn unregister(&self, name: &str) -> RpcResult<()> {
        let entry = self.lookup(name).ok_or_else(|| RpcError::NoSuchEndpoint(name.to_string()))?;
        if entry.inbox.stop() {
            self.announce(entry);
        }
        Ok(())
    }

    /// Posts a fire-and-forget message. Unlike [`Dispatcher::post_local`] and
    /// [`Dispatcher::post_remote`], failure to find `name` is raised directly to the
    /// caller, since there is no reply channel to carry it through instead.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoSuchEndpoint`] if `name` isn't registered.
    pub fn post_one_way(&self, name: &str, sender_addr: RpcAddress, payload: Vec<u8>) -> RpcResult<()> {
        let result = self.dispatch(
            name,
            MailboxItem::OneWay {
                sender: sender_addr,
                payload,
            },
        );
        if let Err(ref err) = result {
            tracing::warn!(endpoint = name, error = %err, "post_one_way: no such endpoint");
        }
        result
    }

    /// Posts a request/response message on behalf of an in-process caller, returning an
    /// [`AskFuture`] that resolves once a reply arrives. If `name` isn't registered, the
    /// future resolves immediately with [`RpcError::NoSuchEndpoint`] -- the same observable
    /// failure a real endpoint stopping mid-call would produce.
    pub fn post_local(&self, name: &str, sender_addr: RpcAddress, payload: Vec<u8>) -> AskFuture {
        let (tx, rx) = oneshot::channel();
        match self.lookup(name) {
            Some(entry) => {
                let reply_ctx = ReplyContext::local_via_pool(tx, Arc::clone(&self.inner.deliver_pool));
                entry.inbox.post(MailboxItem::Rpc {
                    sender: sender_addr,
                    payload,
                    reply_ctx,
                });
                self.announce(entry);
            }
            None => {
                let err = RpcError::NoSuchEndpoint(name.to_string());
                tracing::warn!(endpoint = name, error = %err, "post_local: no such endpoint");
                let _ = tx.send(Err(err));
            }
        }
        AskFuture::new(rx)
    }

    /// Posts a request/response message on behalf of a remote caller. `reply_callback` is
    /// the transport-layer hook that ships the eventual response back over the wire; it
    /// runs exactly once, whether the endpoint answers, the endpoint is missing, or the
    /// endpoint's callback panics.
    ///
    /// A host transport's ingress loop is the intended caller: decode a frame into
    /// `(name, sender_addr, payload)`, call this, and let `reply_callback` re-encode and
    /// write the eventual result back to the socket.
    pub fn post_remote(
        &self,
        name: &str,
        sender_addr: RpcAddress,
        payload: Vec<u8>,
        reply_callback: Box<dyn FnOnce(Result<Vec<u8>, RpcError>) + Send>,
    ) {
        match self.lookup(name) {
            Some(entry) => {
                entry.inbox.post(MailboxItem::Rpc {
                    sender: sender_addr,
                    payload,
                    reply_ctx: ReplyContext::remote(reply_callback),
                });
                self.announce(entry);
            }
            None => {
                let err = RpcError::NoSuchEndpoint(name.to_string());
                tracing::warn!(endpoint = name, error = %err, "post_remote: no such endpoint");
                reply_callback(Err(err));
            }
        }
    }

    /// Posts a lifecycle event (`on_connected`/`on_disconnected`/`on_network_error`) to
    /// every currently-registered endpoint, e.g. when an outbox's connection to a peer goes
    /// up or down. `make_item` is invoked once per recipient since [`MailboxItem`] isn't
    /// cheaply cloneable in the `Rpc` case (broadcast never targets that variant).
    pub fn post_to_all(&self, make_item: impl Fn() -> MailboxItem) {
        let entries: Vec<_> = {
            let registry = self.inner.registry.lock().unwrap_or_else(|p| p.into_inner());
            registry.entries.values().cloned().collect()
        };
        for entry in entries {
            entry.inbox.post(make_item());
            self.announce(entry);
        }
    }

    /// Stops every registered endpoint (driving each through its `OnStop`), then shuts down
    /// the worker pool. Blocking: drains each inbox on the calling thread before poisoning
    /// workers, so no endpoint's `on_stop` is skipped by a race with pool shutdown.
    pub fn shutdown(&self) {
        let entries: Vec<_> = {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|p| p.into_inner());
            registry.stopped = true;
            registry.entries.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &entries {
            entry.inbox.stop();
            while entry.inbox.process() != ProcessOutcome::Stopped {}
        }

        let worker_count = self.workers.lock().unwrap_or_else(|p| p.into_inner()).len();
        for _ in 0..worker_count {
            let _ = self.inner.ready_tx.send(ReadySignal::Poison);
        }
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<EndpointEntry>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .get(name)
            .cloned()
    }

    fn dispatch(&self, name: &str, item: MailboxItem) -> RpcResult<()> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| RpcError::NoSuchEndpoint(name.to_string()))?;
        entry.inbox.post(item);
        self.announce(entry);
        Ok(())
    }

    fn announce(&self, entry: Arc<EndpointEntry>) {
        let _ = self.inner.ready_tx.send(ReadySignal::Entry(entry));
    }
}

fn worker_loop(inner: &Arc<DispatcherInner>, ready_rx: &Arc<Mutex<Receiver<ReadySignal>>>) {
    loop {
        let signal = {
            let rx = ready_rx.lock().unwrap_or_else(|p| p.into_inner());
            rx.recv()
        };
        let entry = match signal {
            Ok(ReadySignal::Entry(entry)) => entry,
            Ok(ReadySignal::Poison) | Err(_) => break,
        };

        match entry.inbox.process() {
            ProcessOutcome::Idle => {}
            ProcessOutcome::MoreWork => {
                let _ = inner.ready_tx.send(ReadySignal::Entry(entry));
            }
            ProcessOutcome::Stopped => {
                let mut registry = inner.registry.lock().unwrap_or_else(|p| p.into_inner());
                registry.entries.remove(&entry.name);
            }
        }
    }
}
