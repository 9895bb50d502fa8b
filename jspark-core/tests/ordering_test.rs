//! Per-endpoint FIFO ordering holds even under concurrent producers.

mod support;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use jspark_core::{Endpoint, RpcAddress, RpcEnvironmentConfig};
use support::LoopbackNetwork;

struct RecordingEndpoint {
    arrivals: Arc<Mutex<HashMap<u32, Vec<u32>>>>,
}

impl Endpoint for RecordingEndpoint {
    fn receive(&mut self, _sender_addr: &RpcAddress, payload: Vec<u8>) {
        let producer_id = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let seq = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        self.arrivals.lock().unwrap().entry(producer_id).or_default().push(seq);
    }
}

#[test]
fn ten_producers_each_observe_their_own_strictly_increasing_sequence() {
    let network = LoopbackNetwork::new();
    let env = network.start_node("node-b", RpcEnvironmentConfig::default());

    let arrivals = Arc::new(Mutex::new(HashMap::new()));
    let reference = env
        .register("counter", Box::new(RecordingEndpoint { arrivals: arrivals.clone() }))
        .unwrap();

    let handles: Vec<_> = (0..10u32)
        .map(|producer_id| {
            let reference = reference.clone();
            std::thread::spawn(move || {
                for seq in 0..100u32 {
                    let mut payload = Vec::with_capacity(8);
                    payload.extend_from_slice(&producer_id.to_be_bytes());
                    payload.extend_from_slice(&seq.to_be_bytes());
                    reference.send(payload).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Give the dispatcher workers a moment to drain; this test only asserts per-producer
    // ordering, not that draining finishes within some deadline.
    std::thread::sleep(std::time::Duration::from_millis(300));

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 10);
    for seqs in arrivals.values() {
        assert_eq!(seqs.len(), 100);
        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(*seqs, expected);
    }

    env.shutdown();
}
