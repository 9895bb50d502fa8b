//! In-memory transport test double standing in for the byte-level transport this crate
//! doesn't implement. A [`LoopbackNetwork`] is a shared registry of
//! bound node addresses; a [`Client`] built against it hands frames straight to the target
//! node's dispatcher rather than touching a real socket, decoding frames per the
//! length-prefixed `(name, payload)` wire form `jspark_core::reference::encode_frame`
//! produces.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use jspark_core::{Client, ClientFactory, RpcAddress, RpcEnvironment, RpcEnvironmentConfig, RpcError, RpcResult, Server, ServerFactory};

#[derive(Clone)]
pub struct LoopbackNetwork {
    nodes: Arc<Mutex<HashMap<RpcAddress, Arc<RpcEnvironment>>>>,
    next_port: Arc<Mutex<u16>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(Mutex::new(40_000)),
        }
    }

    fn node(&self, addr: &RpcAddress) -> Option<Arc<RpcEnvironment>> {
        self.nodes.lock().unwrap().get(addr).cloned()
    }

    fn allocate_port(&self) -> u16 {
        let mut next = self.next_port.lock().unwrap();
        let port = *next;
        *next += 1;
        port
    }

    /// Binds and starts a new node listening on `host`, wiring it into this network so
    /// other nodes' `ClientFactory`s can reach it. Mirrors what a host application does once
    /// per process: bind, start, then make the resulting address discoverable.
    pub fn start_node(&self, host: &str, config: RpcEnvironmentConfig) -> Arc<RpcEnvironment> {
        let client_factory = Arc::new(LoopbackClientFactory { network: self.clone() });
        let server_factory = Arc::new(LoopbackServerFactory { network: self.clone() });
        let env = RpcEnvironment::start(config, host, client_factory, server_factory).expect("loopback bind never fails");
        self.nodes.lock().unwrap().insert(env.local_address().clone(), Arc::clone(&env));
        env
    }

    /// A client-only node: no listen address, outbound traffic only.
    #[must_use]
    pub fn start_client_only(&self, config: RpcEnvironmentConfig) -> Arc<RpcEnvironment> {
        RpcEnvironment::client_only(config, Arc::new(LoopbackClientFactory { network: self.clone() }))
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

struct LoopbackClientFactory {
    network: LoopbackNetwork,
}

impl ClientFactory for LoopbackClientFactory {
    fn create_client(&self, host: &str, port: u16) -> RpcResult<Arc<dyn Client>> {
        let addr = RpcAddress::new(host, port);
        match self.network.node(&addr) {
            Some(env) => Ok(Arc::new(LoopbackClient {
                env,
                sender_addr: addr,
            })),
            None => Err(RpcError::transport(addr.to_url(), ConnectionRefused)),
        }
    }
}

struct LoopbackClient {
    env: Arc<RpcEnvironment>,
    /// Used only to label the sender address on delivered messages; a real transport would
    /// instead use whatever address the TCP connection's peer presented.
    sender_addr: RpcAddress,
}

impl Client for LoopbackClient {
    fn send_rpc(&self, frame: Vec<u8>, callback: Box<dyn FnOnce(Result<Vec<u8>, RpcError>) + Send>) {
        let (name, payload) = decode_frame(&frame);
        self.env.dispatcher().post_remote(&name, self.sender_addr.clone(), payload, callback);
    }

    fn send_oneway(&self, frame: Vec<u8>) -> RpcResult<()> {
        let (name, payload) = decode_frame(&frame);
        self.env.dispatcher().post_one_way(&name, self.sender_addr.clone(), payload)
    }
}

fn decode_frame(frame: &[u8]) -> (String, Vec<u8>) {
    let name_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let name = String::from_utf8(frame[2..2 + name_len].to_vec()).expect("test frames always carry a utf8 name");
    let payload = frame[2 + name_len..].to_vec();
    (name, payload)
}

#[derive(Debug)]
struct ConnectionRefused;

impl fmt::Display for ConnectionRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection refused: no node listening at that address")
    }
}

impl std::error::Error for ConnectionRefused {}

struct LoopbackServerFactory {
    network: LoopbackNetwork,
}

impl ServerFactory for LoopbackServerFactory {
    fn bind(&self, host: &str, _authentication_enabled: bool) -> RpcResult<Arc<dyn Server>> {
        let addr = RpcAddress::new(host, self.network.allocate_port());
        Ok(Arc::new(LoopbackServer {
            addr,
            network: self.network.clone(),
        }))
    }
}

struct LoopbackServer {
    addr: RpcAddress,
    network: LoopbackNetwork,
}

impl Server for LoopbackServer {
    fn port(&self) -> u16 {
        self.addr.port
    }

    fn close(&self) {
        self.network.nodes.lock().unwrap().remove(&self.addr);
    }
}

/// An address nothing in the network has ever bound, for testing connect failure.
#[must_use]
pub fn unreachable_address() -> RpcAddress {
    RpcAddress::new("unreachable-test-host", 65535)
}
