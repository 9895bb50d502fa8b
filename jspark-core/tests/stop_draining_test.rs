//! Unregistering an endpoint still drains whatever was already queued for it.

mod support;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use jspark_core::{Endpoint, RpcAddress, RpcEnvironmentConfig};
use support::LoopbackNetwork;

struct SlowEndpoint {
    receives: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl Endpoint for SlowEndpoint {
    fn receive(&mut self, _sender_addr: &RpcAddress, _payload: Vec<u8>) {
        std::thread::sleep(Duration::from_millis(50));
        self.receives.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn unregistering_mid_flight_drains_only_what_was_posted_before_it() {
    let network = LoopbackNetwork::new();
    // A single worker makes the three posted messages process strictly one after another,
    // so `unregister` is guaranteed to land after the first has started and before the rest
    // have all finished -- matching the scenario's intent.
    let mut config = RpcEnvironmentConfig::default();
    config.dispatcher_threads = 1;
    let env = network.start_node("node-c", config);

    let receives = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));
    let reference = env
        .register(
            "slow",
            Box::new(SlowEndpoint {
                receives: receives.clone(),
                stopped: stopped.clone(),
            }),
        )
        .unwrap();

    for _ in 0..3 {
        reference.send(vec![]).unwrap();
    }

    // Give the first `receive` a chance to actually start before unregistering.
    std::thread::sleep(Duration::from_millis(20));
    env.dispatcher().unregister("slow");

    // Wait out the remaining in-flight receives plus on_stop.
    std::thread::sleep(Duration::from_millis(400));

    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(receives.load(Ordering::SeqCst), 3);
    assert!(!env.dispatcher().is_registered("slow"));

    env.shutdown();
}
