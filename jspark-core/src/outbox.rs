// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The per-remote-address outbound queue. An `Outbox` serializes
//! everything headed to one peer, owns at most one transport client, and tolerates the
//! client not existing yet: `send()` never blocks on a connection coming up.
//!
//! Connection state is modeled as an explicit state machine (`ConnState`) rather than a
//! loose collection of flags: `Idle -> Connecting -> Live -> Stopped`, with `Stopped`
//! terminal.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    address::RpcAddress,
    error::RpcError,
    reference::encode_frame,
    thread_pool::ThreadPool,
    transport::{Client, ClientFactory},
    verifier::VERIFIER_ENDPOINT_NAME,
};

/// Items queued on an outbox, in `send()` order.
pub enum OutboxItem {
    OneWay {
        frame: Vec<u8>,
    },
    Rpc {
        frame: Vec<u8>,
        reply_callback: Box<dyn FnOnce(Result<Vec<u8>, RpcError>) + Send>,
    },
    /// Probes a remote verifier endpoint for the existence of a name. The response is a
    /// single boolean byte (`1`/`0`) riding the same RPC exchange as any other request --
    /// the exact wire framing is a transport-layer concern out of scope here.
    CheckExistence {
        name: String,
        reply_callback: Box<dyn FnOnce(Result<bool, RpcError>) + Send>,
    },
}

impl fmt::Debug for OutboxItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxItem::OneWay { frame } => {
                f.debug_struct("OneWay").field("len", &frame.len()).finish()
            }
            OutboxItem::Rpc { frame, .. } => {
                f.debug_struct("Rpc").field("len", &frame.len()).finish()
            }
            OutboxItem::CheckExistence { name, .. } => {
                f.debug_struct("CheckExistence").field("name", name).finish()
            }
        }
    }
}

#[derive(Debug)]
struct TransportMsg(String);

impl fmt::Display for TransportMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportMsg {}

enum ConnState {
    Idle,
    Connecting,
    Live(Arc<dyn Client>),
    Stopped,
}

/// A connection-lifecycle event this outbox observed, handed to the environment so it can
/// broadcast the corresponding `MailboxItem::Remote*` variant to every registered endpoint.
pub enum TransportEvent {
    Connected,
    /// The outbox failed to connect, or a live client's write failed; carries a description
    /// of the failure that caused the outbox to stop.
    Failed(String),
}

struct OutboxState {
    queue: VecDeque<OutboxItem>,
    conn: ConnState,
    draining: bool,
}

enum OutboxAction {
    None,
    Connect,
    Drain(Arc<dyn Client>),
}

pub struct Outbox {
    address: RpcAddress,
    client_factory: Arc<dyn ClientFactory>,
    pool: Arc<ThreadPool>,
    state: Mutex<OutboxState>,
    on_stopped: Box<dyn Fn(&RpcAddress) + Send + Sync>,
    on_event: Box<dyn Fn(&RpcAddress, TransportEvent) + Send + Sync>,
}

impl Outbox {
    pub fn new(
        address: RpcAddress,
        client_factory: Arc<dyn ClientFactory>,
        pool: Arc<ThreadPool>,
        on_stopped: impl Fn(&RpcAddress) + Send + Sync + 'static,
        on_event: impl Fn(&RpcAddress, TransportEvent) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            client_factory,
            pool,
            state: Mutex::new(OutboxState {
                queue: VecDeque::new(),
                conn: ConnState::Idle,
                draining: false,
            }),
            on_stopped: Box::new(on_stopped),
            on_event: Box::new(on_event),
        })
    }

    pub fn address(&self) -> &RpcAddress {
        &self.address
    }

    /// Enqueues `item`. If the outbox is `Stopped`, fails it immediately instead. Otherwise
    /// kicks off a connect (if `Idle`) or a drain (if `Live` and nobody's draining); a
    /// `Connecting` outbox just accumulates the item, never starting a second connect.
    pub fn send(self: &Arc<Self>, item: OutboxItem) {
        let action = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

            if matches!(state.conn, ConnState::Stopped) {
                drop(state);
                tracing::warn!(address = %self.address, "send on a stopped outbox");
                fail_item(
                    item,
                    RpcError::transport(self.address.to_url(), TransportMsg("outbox stopped".into())),
                );
                return;
            }

            state.queue.push_back(item);

            let live_client = match &state.conn {
                ConnState::Idle => None,
                ConnState::Live(client) => Some(Arc::clone(client)),
                ConnState::Connecting | ConnState::Stopped => None,
            };

            if matches!(state.conn, ConnState::Idle) {
                state.conn = ConnState::Connecting;
                OutboxAction::Connect
            } else if let Some(client) = live_client {
                if state.draining {
                    OutboxAction::None
                } else {
                    state.draining = true;
                    OutboxAction::Drain(client)
                }
            } else {
                OutboxAction::None
            }
        };

        match action {
            OutboxAction::None => {}
            OutboxAction::Connect => self.spawn_connect(),
            OutboxAction::Drain(client) => self.spawn_drain(client),
        }
    }

    /// Terminal: fails every queued item, drops the client if any, and detaches from the
    /// environment's outbox registry via `on_stopped`. Does not fire a [`TransportEvent`] --
    /// this is the graceful, caller-initiated path (typically environment shutdown), not a
    /// transport failure the endpoints need to hear about.
    pub fn stop(self: &Arc<Self>) {
        self.fail_all("outbox stopped".to_string(), false);
    }

    fn spawn_connect(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.pool.execute(move || {
            tracing::debug!(address = %this.address, "connecting outbox");
            match this.client_factory.create_client(&this.address.host, this.address.port) {
                Ok(client) => this.on_connected(client),
                Err(err) => {
                    tracing::warn!(address = %this.address, error = %err, "outbox connect failed");
                    this.fail_all(err.to_string(), true);
                }
            }
        });
    }

    fn on_connected(self: &Arc<Self>, client: Arc<dyn Client>) {
        let should_drain = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(state.conn, ConnState::Stopped) {
                // Stopped while the connect was in flight; drop the fresh client.
                return;
            }
            state.conn = ConnState::Live(Arc::clone(&client));
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        (self.on_event)(&self.address, TransportEvent::Connected);
        if should_drain {
            self.spawn_drain(client);
        }
    }

    fn spawn_drain(self: &Arc<Self>, client: Arc<dyn Client>) {
        let this = Arc::clone(self);
        self.pool.execute(move || this.drain_loop(client));
    }

    /// Pops items under the lock and writes each to `client` outside the lock. Exactly one
    /// drain loop runs at a time per outbox, enforced by the `draining` flag.
    fn drain_loop(self: Arc<Self>, client: Arc<dyn Client>) {
        loop {
            let item = {
                let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            if let Err(err) = self.write_one(&client, item) {
                tracing::warn!(address = %self.address, error = %err, "outbox write failed");
                self.fail_all(err.to_string(), true);
                return;
            }
        }
    }

    fn write_one(self: &Arc<Self>, client: &Arc<dyn Client>, item: OutboxItem) -> Result<(), RpcError> {
        match item {
            OutboxItem::OneWay { frame } => client.send_oneway(frame),
            OutboxItem::Rpc { frame, reply_callback } => {
                let this = Arc::clone(self);
                client.send_rpc(
                    frame,
                    Box::new(move |result| {
                        if let Err(ref err) = result {
                            this.fail_all(err.to_string(), true);
                        }
                        reply_callback(result);
                    }),
                );
                Ok(())
            }
            OutboxItem::CheckExistence { name, reply_callback } => {
                let this = Arc::clone(self);
                client.send_rpc(
                    encode_frame(VERIFIER_ENDPOINT_NAME, name.as_bytes()),
                    Box::new(move |result| match result {
                        Ok(bytes) => reply_callback(Ok(bytes.first().copied() == Some(1))),
                        Err(err) => {
                            this.fail_all(err.to_string(), true);
                            reply_callback(Err(err));
                        }
                    }),
                );
                Ok(())
            }
        }
    }

    /// Fails every queued item and stops the outbox. `notify_failure` distinguishes a
    /// genuine transport failure (connect or write error -- fires a
    /// [`TransportEvent::Failed`] so the environment can broadcast `RemoteFailure` to every
    /// endpoint) from a graceful, caller-initiated [`Outbox::stop`] (no event fired).
    fn fail_all(self: &Arc<Self>, message: String, notify_failure: bool) {
        let drained = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(state.conn, ConnState::Stopped) {
                return; // already stopped by a concurrent failure; don't double-report.
            }
            state.conn = ConnState::Stopped;
            state.draining = false;
            std::mem::take(&mut state.queue)
        };

        for item in drained {
            let err = RpcError::transport(self.address.to_url(), TransportMsg(message.clone()));
            fail_item(item, err);
        }

        (self.on_stopped)(&self.address);
        if notify_failure {
            (self.on_event)(&self.address, TransportEvent::Failed(message));
        }
    }
}

fn fail_item(item: OutboxItem, err: RpcError) {
    match item {
        OutboxItem::OneWay { .. } => {
            tracing::warn!(%err, "dropping queued one-way outbox item");
        }
        OutboxItem::Rpc { reply_callback, .. } => reply_callback(Err(err)),
        OutboxItem::CheckExistence { reply_callback, .. } => reply_callback(Err(err)),
    }
}
