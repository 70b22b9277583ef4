//! End-to-end check that a two-router chain converges and produces correct routes
//! with the distance-vector handler plugged into the real substrate.

use std::sync::Arc;

use routesim_core::{NetworkConfig, NoopObserver, RouterFactory, RouterHandler, RunOutcome};
use routesim_routers::DvRouter;

fn chain_config() -> NetworkConfig {
    let text = r#"{
        "end_time": 50,
        "client_send_rate": 5,
        "routers": ["R1", "R2"],
        "clients": ["C1", "C2"],
        "links": [
            ["C1", "R1", 0, 0, 1, 1],
            ["R1", "R2", 1, 0, 1, 1],
            ["R2", "C2", 1, 0, 1, 1]
        ],
        "correct_routes": [
            ["C1", "R1", "R2", "C2"],
            ["C2", "R2", "R1", "C1"]
        ]
    }"#;
    NetworkConfig::parse(text, "test.json").unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn two_hop_chain_converges_to_correct_routes() {
    let config = chain_config();
    let factory: &RouterFactory = &|addr: &str, heartbeat_ms: u64| -> Box<dyn RouterHandler> {
        Box::new(DvRouter::new(addr, heartbeat_ms))
    };
    let network = routesim_core::Network::new(config, factory, Arc::new(NoopObserver));

    let outcome = network.run().await;
    let RunOutcome::Completed(report) = outcome else {
        panic!("run should not be interrupted");
    };

    assert!(
        report.ends_with("SUCCESS: All Routes correct!"),
        "expected convergence to a correct two-hop route, got:\n{report}"
    );
}
