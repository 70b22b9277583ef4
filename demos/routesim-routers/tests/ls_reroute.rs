//! End-to-end check that link-state routing re-converges after a scripted link
//! failure opens an alternate path.

use std::sync::Arc;

use routesim_core::{NetworkConfig, NoopObserver, RouterFactory, RouterHandler, RunOutcome};
use routesim_routers::LsRouter;

/// A diamond: C1 talks to C2 across R1/R2 in parallel with R1/R3/R2. The direct R1-R2
/// leg is cut partway through the run, forcing traffic onto the R1-R3-R2 detour.
fn diamond_config() -> NetworkConfig {
    let text = r#"{
        "end_time": 80,
        "client_send_rate": 5,
        "routers": ["R1", "R2", "R3"],
        "clients": ["C1", "C2"],
        "links": [
            ["C1", "R1", 0, 0, 1, 1],
            ["R1", "R2", 1, 0, 1, 1],
            ["R1", "R3", 2, 0, 1, 1],
            ["R3", "R2", 1, 1, 1, 1],
            ["R2", "C2", 2, 0, 1, 1]
        ],
        "changes": [
            [30, ["R1", "R2"], "down"]
        ],
        "correct_routes": [
            ["C1", "R1", "R2", "C2"],
            ["C2", "R2", "R1", "C1"],
            ["C1", "R1", "R3", "R2", "C2"],
            ["C2", "R2", "R3", "R1", "C1"]
        ]
    }"#;
    NetworkConfig::parse(text, "test.json").unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn detour_route_survives_a_cut_direct_link() {
    let config = diamond_config();
    let factory: &RouterFactory = &|addr: &str, heartbeat_ms: u64| -> Box<dyn RouterHandler> {
        Box::new(LsRouter::new(addr, heartbeat_ms))
    };
    let network = routesim_core::Network::new(config, factory, Arc::new(NoopObserver));

    let outcome = network.run().await;
    let RunOutcome::Completed(report) = outcome else {
        panic!("run should not be interrupted");
    };

    // The direct two-hop route is only correct before time 30; by the time the report
    // is rendered (well after the cut and the final burst) the last-observed route for
    // each direction must be the three-hop detour, so the run should still report a
    // clean success against the two detour entries in `correct_routes`.
    assert!(
        report.ends_with("SUCCESS: All Routes correct!"),
        "expected re-convergence onto the detour route, got:\n{report}"
    );
    assert!(report.contains("[C1, R1, R3, R2, C2]"), "got:\n{report}");
    assert!(report.contains("[C2, R2, R3, R1, C1]"), "got:\n{report}");
}
