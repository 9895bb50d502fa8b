// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The top-level façade: owns the dispatcher, the per-address outbox
//! registry, the connect/deliver thread pools, and (when started as a server) the transport
//! listener. This is the one type embedding applications construct directly; everything else
//! in this crate is reached through it or through an [`EndpointReference`] it hands out.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    address::RpcAddress,
    config::RpcEnvironmentConfig,
    dispatcher::Dispatcher,
    endpoint::Endpoint,
    error::{RpcError, RpcResult},
    message::MailboxItem,
    outbox::{Outbox, OutboxItem, TransportEvent},
    reference::EndpointReference,
    thread_pool::ThreadPool,
    transport::{Client, ClientFactory, Server, ServerFactory},
    verifier::{Verifier, VERIFIER_ENDPOINT_NAME},
};

/// Wraps the description carried by [`TransportEvent::Failed`] so it can ride inside an
/// [`RpcError::TransportFailure`] when broadcast as a `MailboxItem::RemoteFailure`.
#[derive(Debug)]
struct EventTransportMsg(String);

impl std::fmt::Display for EventTransportMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for EventTransportMsg {}

/// Shared state behind every [`EndpointReference`] this environment has handed out.
/// References hold this via [`Weak`]: an environment that's been
/// dropped should make every surviving reference observe [`RpcError::EnvironmentStopped`]
/// rather than keep the runtime alive on their account.
pub(crate) struct EnvironmentInner {
    own_addr: RpcAddress,
    dispatcher: Arc<Dispatcher>,
    client_factory: Arc<dyn ClientFactory>,
    connect_pool: Arc<ThreadPool>,
    outboxes: Mutex<HashMap<RpcAddress, Arc<Outbox>>>,
    server: Mutex<Option<Arc<dyn Server>>>,
}

impl EnvironmentInner {
    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn own_address(&self) -> &RpcAddress {
        &self.own_addr
    }

    /// Returns the live outbox for `addr`, creating one if this is the first message ever
    /// sent there. Insertion is single-winner via the registry mutex: two concurrent callers
    /// racing to reach a fresh address both see the same `Arc<Outbox>`, never two competing
    /// ones.
    pub(crate) fn outbox_for(self: &Arc<Self>, addr: &RpcAddress) -> Arc<Outbox> {
        let mut outboxes = self.outboxes.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = outboxes.get(addr) {
            return Arc::clone(existing);
        }

        let weak_self = Arc::downgrade(self);
        let weak_self_for_events = Arc::downgrade(self);
        let outbox = Outbox::new(
            addr.clone(),
            Arc::clone(&self.client_factory),
            Arc::clone(&self.connect_pool),
            move |stopped_addr| {
                // An outbox that transitions to `Stopped` evicts itself so that the next
                // `send`/`ask` to the same address builds a fresh one and retries the
                // connect.
                if let Some(this) = weak_self.upgrade() {
                    this.outboxes
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(stopped_addr);
                }
            },
            move |event_addr, event| {
                // Broadcasts the connection-lifecycle event to every registered endpoint as
                // the matching `MailboxItem::Remote*` variant.
                if let Some(this) = weak_self_for_events.upgrade() {
                    let addr = event_addr.clone();
                    match event {
                        TransportEvent::Connected => {
                            this.dispatcher.post_to_all(|| MailboxItem::RemoteConnected(addr.clone()));
                        }
                        TransportEvent::Failed(message) => {
                            this.dispatcher.post_to_all(|| {
                                MailboxItem::RemoteFailure(
                                    addr.clone(),
                                    RpcError::transport(addr.to_url(), EventTransportMsg(message.clone())),
                                )
                            });
                        }
                    }
                }
            },
        );
        outboxes.insert(addr.clone(), Arc::clone(&outbox));
        outbox
    }
}

/// The in-process RPC runtime. One instance per node; every endpoint registered through it
/// shares its dispatcher, and every remote address it has ever talked to gets its own
/// [`Outbox`] lazily.
pub struct RpcEnvironment {
    inner: Arc<EnvironmentInner>,
}

impl RpcEnvironment {
    /// Starts an environment with no listening server: `send`/`ask` to remote references
    /// still work (outbound-only), but this node has no address of its own other than the
    /// ["client-only" sentinel](RpcAddress::client_only) and cannot be the target of
    /// `endpoint_ref_for` from a peer.
    #[must_use]
    pub fn client_only(config: RpcEnvironmentConfig, client_factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        Self::assemble(config, RpcAddress::client_only(), client_factory, None)
    }

    /// Starts an environment bound to a real listen address: `server_factory.bind` is called
    /// with `host` and [`RpcEnvironmentConfig::authentication_enabled`], and the resulting
    /// [`Server::port`] becomes this environment's listen address. The built-in verifier
    /// endpoint is registered eagerly so that remote `endpoint_ref_for` probes can succeed as
    /// soon as `start` returns.
    ///
    /// # Errors
    ///
    /// Returns whatever [`ServerFactory::bind`] returns on failure.
    pub fn start(
        config: RpcEnvironmentConfig,
        host: impl Into<String>,
        client_factory: Arc<dyn ClientFactory>,
        server_factory: Arc<dyn ServerFactory>,
    ) -> RpcResult<Arc<Self>> {
        let host = host.into();
        let server = server_factory.bind(&host, config.authentication_enabled)?;
        let own_addr = RpcAddress::new(host, server.port());
        let env = Self::assemble(config, own_addr, client_factory, Some(server));

        env.inner
            .dispatcher
            .register(VERIFIER_ENDPOINT_NAME, Box::new(Verifier::new(Arc::downgrade(&env.inner))))
            .expect("verifier is the first registration and its name is reserved");

        Ok(env)
    }

    fn assemble(
        config: RpcEnvironmentConfig,
        own_addr: RpcAddress,
        client_factory: Arc<dyn ClientFactory>,
        server: Option<Arc<dyn Server>>,
    ) -> Arc<Self> {
        let deliver_pool = Arc::new(ThreadPool::new("jspark-deliver", config.deliver_thread_count()));
        let connect_pool = Arc::new(ThreadPool::new("jspark-connect", config.connect_thread_count()));
        let dispatcher = Dispatcher::new(config.dispatcher_thread_count(), deliver_pool);

        Arc::new(Self {
            inner: Arc::new(EnvironmentInner {
                own_addr,
                dispatcher,
                client_factory,
                connect_pool,
                outboxes: Mutex::new(HashMap::new()),
                server: Mutex::new(server),
            }),
        })
    }

    #[must_use]
    pub fn local_address(&self) -> &RpcAddress {
        &self.inner.own_addr
    }

    /// The dispatcher backing this environment. A host transport's ingress loop is the
    /// intended caller: decode an inbound frame into
    /// `(name, sender_addr, payload)` and call [`Dispatcher::post_remote`] or
    /// [`Dispatcher::post_one_way`] on the *receiving* node's environment.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Registers `endpoint` under `name`, returning a local reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NameAlreadyRegistered`] for `name` equal to the reserved verifier
    /// name or any name already taken, and [`RpcError::EnvironmentStopped`] after
    /// [`RpcEnvironment::shutdown`].
    pub fn register(self: &Arc<Self>, name: impl Into<String>, endpoint: Box<dyn Endpoint>) -> RpcResult<EndpointReference> {
        let name = name.into();
        if name == VERIFIER_ENDPOINT_NAME {
            return Err(RpcError::NameAlreadyRegistered(name));
        }
        self.inner.dispatcher.register(name.clone(), endpoint)?;
        Ok(EndpointReference::new(name, self.inner.own_addr.clone(), Arc::downgrade(&self.inner)))
    }

    /// Builds a reference to an endpoint that has already handed this process a live
    /// transport client (e.g. an ephemeral client-side connection the embedding application
    /// dialed itself), bypassing the address-keyed outbox registry entirely.
    #[must_use]
    pub fn bound_reference(self: &Arc<Self>, name: impl Into<String>, remote_addr: RpcAddress, client: Arc<dyn Client>) -> EndpointReference {
        EndpointReference::bound(name, remote_addr, Arc::downgrade(&self.inner), client)
    }

    /// Resolves a reference to `name` at `address`. For this environment's own address, this
    /// is just a registry check; for a remote address, it probes that peer's verifier
    /// endpoint over the network and only succeeds if the probe reports the name exists.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoSuchEndpoint`] if the name isn't known locally (own address) or
    /// the remote verifier reports it unregistered, or whatever transport error the probe
    /// itself fails with.
    pub async fn endpoint_ref_for(self: &Arc<Self>, name: impl Into<String>, address: RpcAddress) -> RpcResult<EndpointReference> {
        let name = name.into();

        if address == self.inner.own_addr {
            return if self.inner.dispatcher.is_registered(&name) {
                Ok(EndpointReference::new(name, address, Arc::downgrade(&self.inner)))
            } else {
                Err(RpcError::NoSuchEndpoint(name))
            };
        }

        let outbox = self.inner.outbox_for(&address);
        let (tx, rx) = tokio::sync::oneshot::channel();
        outbox.send(OutboxItem::CheckExistence {
            name: name.clone(),
            reply_callback: Box::new(move |result| {
                let _ = tx.send(result);
            }),
        });

        let exists = rx
            .await
            .map_err(|_| RpcError::EndpointPanicked("verifier probe dropped without a reply".to_string()))??;

        if exists {
            Ok(EndpointReference::new(name, address, Arc::downgrade(&self.inner)))
        } else {
            Err(RpcError::NoSuchEndpoint(name))
        }
    }

    /// Cascaded shutdown: closes the listening server (if any), stops
    /// every outbox (failing their queued replies), drains the dispatcher (which itself
    /// unregisters every endpoint, the verifier included, driving each through its stop
    /// protocol), then joins the connect pool. Idempotent.
    pub fn shutdown(&self) {
        if let Some(server) = self.inner.server.lock().unwrap_or_else(|p| p.into_inner()).take() {
            server.close();
        }

        let outboxes: Vec<_> = self
            .inner
            .outboxes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .map(|(_, outbox)| outbox)
            .collect();
        for outbox in outboxes {
            outbox.stop();
        }

        self.inner.dispatcher.shutdown();
        self.inner.connect_pool.shutdown();
    }

    #[cfg(test)]
    pub(crate) fn inner_for_test(&self) -> &Arc<EnvironmentInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct EchoEndpoint;
    impl Endpoint for EchoEndpoint {
        fn receive(&mut self, _sender_addr: &RpcAddress, _payload: Vec<u8>) {}

        fn receive_and_reply(&mut self, _sender_addr: &RpcAddress, payload: Vec<u8>, reply_ctx: crate::message::ReplyContext) {
            reply_ctx.reply(payload);
        }
    }

    #[tokio::test]
    async fn register_then_ask_echoes_and_reference_carries_the_local_address() {
        let env = RpcEnvironment::client_only(RpcEnvironmentConfig::default(), Arc::new(NeverConnects));
        let reference = env.register("echo", Box::new(EchoEndpoint)).unwrap();

        assert_eq!(reference.name(), "echo");
        assert_eq!(reference.address(), env.local_address());
        assert!(reference.is_local());

        let reply = reference.ask(vec![9, 9]).await.unwrap();
        assert_eq!(reply, vec![9, 9]);

        env.shutdown();
    }

    #[test]
    fn registering_under_the_reserved_verifier_name_fails() {
        let env = RpcEnvironment::client_only(RpcEnvironmentConfig::default(), Arc::new(NeverConnects));
        let err = env
            .register(crate::verifier::VERIFIER_ENDPOINT_NAME, Box::new(EchoEndpoint))
            .unwrap_err();
        assert!(matches!(err, RpcError::NameAlreadyRegistered(_)));
        env.shutdown();
    }

    #[tokio::test]
    async fn endpoint_ref_for_own_address_checks_the_local_registry() {
        let env = RpcEnvironment::client_only(RpcEnvironmentConfig::default(), Arc::new(NeverConnects));
        env.register("echo", Box::new(EchoEndpoint)).unwrap();

        let own_addr = env.local_address().clone();
        assert!(env.endpoint_ref_for("echo", own_addr.clone()).await.is_ok());
        assert!(matches!(
            env.endpoint_ref_for("missing", own_addr).await,
            Err(RpcError::NoSuchEndpoint(_))
        ));

        env.shutdown();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_outgoing_traffic() {
        let env = RpcEnvironment::client_only(RpcEnvironmentConfig::default(), Arc::new(NeverConnects));
        env.shutdown();
        env.shutdown(); // must not panic or double-join.

        let err = env
            .register("late", Box::new(EchoEndpoint))
            .unwrap_err();
        assert!(matches!(err, RpcError::EnvironmentStopped));
    }

    struct NeverConnects;
    impl ClientFactory for NeverConnects {
        fn create_client(&self, _host: &str, _port: u16) -> RpcResult<Arc<dyn Client>> {
            Err(RpcError::transport("unused", UnusedErr))
        }
    }

    #[derive(Debug)]
    struct UnusedErr;
    impl std::fmt::Display for UnusedErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "unused")
        }
    }
    impl std::error::Error for UnusedErr {}
}
