//! The orchestrator: wires routers, clients, and links together from a
//! [`NetworkConfig`], drives the scripted topology changes, and renders the final
//! report.
//!
//! Grounded on the reference implementation's `Network` class (construction,
//! `addLinks`, the change-script loop, `updateRoute`, the end-of-run burst, and
//! `handleInterrupt`), restructured around owned tasks and trait-object hooks instead
//! of shared mutable state and process-wide callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{self, ClientHandle, ClientLinkChange, RouteObserver};
use crate::config::{ChangeEvent, NetworkConfig};
use crate::link::Link;
use crate::observer::NetworkObserver;
use crate::report;
use crate::router::{self, LinkChange, RouterHandle, RouterHandler};

/// How a router handler is constructed for a given address. Passed the router's
/// address and the heartbeat interval in ms (`latency_multiplier * 10`, matching the
/// reference implementation's `heartbeatTime`), since a distance-vector or link-state
/// handler typically needs a periodic broadcast interval derived from network timing.
pub type RouterFactory = dyn Fn(&str, u64) -> Box<dyn RouterHandler> + Send + Sync;

/// An installed link plus the canonical addresses and ports it was declared with, so
/// a later scripted `down` or `latency` change (which may name the endpoints in either
/// order) can be resolved back to the right router ports.
struct LinkEntry {
    a1: String,
    a2: String,
    p1: u32,
    p2: u32,
    c12: u64,
    c21: u64,
    link: Arc<Link>,
}

/// Aggregates per-(src, dst) observed routes with youngest-wins timestamp semantics,
/// matching the reference implementation's `updateRoute`.
struct RouteAggregator {
    routes: Mutex<HashMap<(String, String), report::RouteEntry>>,
    correct_routes: HashMap<(String, String), Vec<Vec<String>>>,
    start: Instant,
}

impl RouteAggregator {
    fn snapshot(&self) -> HashMap<(String, String), report::RouteEntry> {
        self.routes.lock().unwrap().clone()
    }
}

impl RouteObserver for RouteAggregator {
    fn update_route(&self, src: &str, dst: &str, route: &[String]) {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let key = (src.to_string(), dst.to_string());
        let is_correct = self
            .correct_routes
            .get(&key)
            .map(|candidates| candidates.iter().any(|candidate| candidate.as_slice() == route))
            .unwrap_or(false);

        let mut guard = self.routes.lock().unwrap();
        let should_update = match guard.get(&key) {
            Some((_, _, recorded_at)) => now_ms > *recorded_at,
            None => true,
        };
        if should_update {
            guard.insert(key, (route.to_vec(), is_correct, now_ms));
        }
    }
}

/// The outcome of a completed run.
pub enum RunOutcome {
    /// The run reached `end_time` and produced a report.
    Completed(String),
    /// The run was cut short by an interrupt signal; no report was rendered.
    Interrupted,
}

/// A constructed network, ready to run. All routers and clients are already spawned
/// and ticking by the time [`Network::new`] returns; [`Network::run`] installs the
/// declared links, drives the change script, and waits out `end_time`.
pub struct Network {
    config: NetworkConfig,
    latency_multiplier: u64,
    observer: Arc<dyn NetworkObserver>,
    routers: HashMap<String, RouterHandle>,
    router_joins: Vec<JoinHandle<()>>,
    clients: HashMap<String, ClientHandle>,
    client_joins: Vec<JoinHandle<()>>,
    links: Arc<Mutex<HashMap<(String, String), LinkEntry>>>,
    aggregator: Arc<RouteAggregator>,
    start: Instant,
}

impl Network {
    /// Build a network from a validated configuration. Spawns every router and client
    /// task immediately; no packets flow until [`Network::run`] installs the declared
    /// links.
    pub fn new(
        config: NetworkConfig,
        router_factory: &RouterFactory,
        observer: Arc<dyn NetworkObserver>,
    ) -> Self {
        let latency_multiplier = config.latency_multiplier();
        let heartbeat_ms = latency_multiplier * 10;
        let start = Instant::now();

        let mut routers = HashMap::new();
        let mut router_joins = Vec::new();
        for addr in &config.routers {
            let handler = router_factory(addr, heartbeat_ms);
            let (handle, join) = router::spawn_router(addr.clone(), handler);
            routers.insert(addr.clone(), handle);
            router_joins.push(join);
        }

        let aggregator = Arc::new(RouteAggregator {
            routes: Mutex::new(HashMap::new()),
            correct_routes: config.correct_routes.clone(),
            start,
        });

        let mut clients = HashMap::new();
        let mut client_joins = Vec::new();
        let send_rate_ms = (config.client_send_rate as u64) * latency_multiplier;
        for addr in &config.clients {
            let (handle, join) = client::spawn_client(
                addr.clone(),
                config.clients.clone(),
                send_rate_ms,
                aggregator.clone() as Arc<dyn RouteObserver>,
            );
            clients.insert(addr.clone(), handle);
            client_joins.push(join);
        }

        let mut links = HashMap::new();
        for spec in &config.links {
            let link = Arc::new(Link::new(
                spec.a1.clone(),
                spec.a2.clone(),
                spec.c12,
                spec.c21,
                latency_multiplier,
                observer.clone(),
            ));
            links.insert(
                (spec.a1.clone(), spec.a2.clone()),
                LinkEntry {
                    a1: spec.a1.clone(),
                    a2: spec.a2.clone(),
                    p1: spec.p1,
                    p2: spec.p2,
                    c12: spec.c12,
                    c21: spec.c21,
                    link,
                },
            );
        }

        Self {
            config,
            latency_multiplier,
            observer,
            routers,
            router_joins,
            clients,
            client_joins,
            links: Arc::new(Mutex::new(links)),
            aggregator,
            start,
        }
    }

    /// A live snapshot of the currently observed routes table. Primarily useful for
    /// tests that want to inspect mid-run state without waiting for `end_time`.
    pub fn route_snapshot(&self) -> HashMap<(String, String), report::RouteEntry> {
        self.aggregator.snapshot()
    }

    /// Install every declared link onto its endpoints, then drive the change script
    /// (if any) and wait until `end_time`, or until an interrupt signal arrives,
    /// whichever comes first.
    pub async fn run(mut self) -> RunOutcome {
        self.install_initial_links();

        let change_task = if self.config.changes.is_empty() {
            None
        } else {
            Some(self.spawn_change_script())
        };

        let end_wait = Duration::from_millis(self.config.end_time as u64 * self.latency_multiplier);

        tokio::select! {
            _ = tokio::time::sleep(end_wait) => {
                self.final_burst().await;
                let report = report::render(&self.aggregator.snapshot());
                tracing::info!(%report, "run complete");
                self.shutdown(change_task).await;
                RunOutcome::Completed(report)
            }
            interrupt = tokio::signal::ctrl_c() => {
                if let Err(err) = interrupt {
                    tracing::error!(%err, "failed to listen for interrupt signal");
                }
                tracing::info!("interrupt received, shutting down");
                self.shutdown(change_task).await;
                RunOutcome::Interrupted
            }
        }
    }

    fn install_initial_links(&mut self) {
        let links = self.links.lock().unwrap();
        for entry in links.values() {
            self.attach_endpoint(&entry.a1, &entry.a2, entry.p1, entry.link.clone(), entry.c12);
            self.attach_endpoint(&entry.a2, &entry.a1, entry.p2, entry.link.clone(), entry.c21);
        }
    }

    /// Attach `link` to `addr`'s port table if `addr` is a router, or as `addr`'s sole
    /// uplink if it's a client. A silent no-op for addresses that are neither (can't
    /// happen once constructed from a validated [`NetworkConfig`]).
    fn attach_endpoint(&self, addr: &str, peer: &str, port: u32, link: Arc<Link>, cost: u64) {
        if let Some(router) = self.routers.get(addr) {
            router.change_link(LinkChange::Add {
                port,
                endpoint: peer.to_string(),
                link,
                cost,
            });
        } else if let Some(client) = self.clients.get(addr) {
            client.change_link(ClientLinkChange::Add(link));
        }
    }

    fn spawn_change_script(&self) -> JoinHandle<()> {
        let changes = self.config.changes.clone();
        let routers = self.routers.clone();
        let clients = self.clients.clone();
        let links = self.links.clone();
        let observer = self.observer.clone();
        let latency_multiplier = self.latency_multiplier;
        let start = self.start;

        tokio::spawn(async move {
            for scheduled in changes {
                let due = start + Duration::from_millis((scheduled.time as u64) * latency_multiplier);
                let now = Instant::now();
                if due > now {
                    tokio::time::sleep_until(due).await;
                }
                apply_change(&scheduled.event, &routers, &clients, &links, latency_multiplier, &observer);
            }
        })
    }

    /// The end-of-run burst: stop treating route updates as "discovering", tell every
    /// client to fire one last probe sweep, then give those probes time to round-trip
    /// before the report is rendered. Matches the reference implementation's
    /// `last_send` + `4 * clientSendRate` sleep.
    async fn final_burst(&self) {
        for client in self.clients.values() {
            client.last_send();
        }
        let burst_wait = Duration::from_millis(4 * (self.config.client_send_rate as u64) * self.latency_multiplier);
        tokio::time::sleep(burst_wait).await;
    }

    async fn shutdown(self, change_task: Option<JoinHandle<()>>) {
        if let Some(task) = change_task {
            task.abort();
        }
        for router in self.routers.values() {
            router.stop();
        }
        for client in self.clients.values() {
            client.stop();
        }
        for join in self.router_joins {
            let _ = join.await;
        }
        for join in self.client_joins {
            let _ = join.await;
        }
    }
}

fn apply_change(
    event: &ChangeEvent,
    routers: &HashMap<String, RouterHandle>,
    clients: &HashMap<String, ClientHandle>,
    links: &Arc<Mutex<HashMap<(String, String), LinkEntry>>>,
    latency_multiplier: u64,
    observer: &Arc<dyn NetworkObserver>,
) {
    match event {
        ChangeEvent::Up { a1, a2, p1, p2, c12, c21 } => {
            let link = Arc::new(Link::new(a1.clone(), a2.clone(), *c12, *c21, latency_multiplier, observer.clone()));
            links.lock().unwrap().insert(
                (a1.clone(), a2.clone()),
                LinkEntry {
                    a1: a1.clone(),
                    a2: a2.clone(),
                    p1: *p1,
                    p2: *p2,
                    c12: *c12,
                    c21: *c21,
                    link: link.clone(),
                },
            );
            dispatch_add(a1, a2, *p1, *c12, link.clone(), routers, clients);
            dispatch_add(a2, a1, *p2, *c21, link, routers, clients);
        }
        ChangeEvent::Down { a1, a2 } => {
            if let Some((port1, port2)) = resolve_ports(links, a1, a2) {
                dispatch_remove(a1, port1, routers, clients);
                dispatch_remove(a2, port2, routers, clients);
            }
        }
        ChangeEvent::Latency { a1, a2, new_c12, new_c21 } => {
            let link = {
                let guard = links.lock().unwrap();
                resolve_link(&guard, a1, a2)
            };
            if let Some(link) = link {
                link.change_latency(a1, *new_c12);
                link.change_latency(a2, *new_c21);
            }
        }
    }
    observer.on_change(event);
}

fn dispatch_add(
    addr: &str,
    peer: &str,
    port: u32,
    cost: u64,
    link: Arc<Link>,
    routers: &HashMap<String, RouterHandle>,
    clients: &HashMap<String, ClientHandle>,
) {
    if let Some(router) = routers.get(addr) {
        router.change_link(LinkChange::Add {
            port,
            endpoint: peer.to_string(),
            link,
            cost,
        });
    } else if let Some(client) = clients.get(addr) {
        client.change_link(ClientLinkChange::Add(link));
    }
}

fn dispatch_remove(addr: &str, port: u32, routers: &HashMap<String, RouterHandle>, clients: &HashMap<String, ClientHandle>) {
    // Clients have no `Remove` mailbox entry: they're edge devices whose sole uplink
    // going down just means future sends find no link, matching the reference
    // implementation (only routers ever receive a `("remove", port)` tuple).
    let _ = clients;
    if let Some(router) = routers.get(addr) {
        router.change_link(LinkChange::Remove { port });
    }
}

fn resolve_ports(links: &Arc<Mutex<HashMap<(String, String), LinkEntry>>>, a1: &str, a2: &str) -> Option<(u32, u32)> {
    let guard = links.lock().unwrap();
    let entry = guard
        .get(&(a1.to_string(), a2.to_string()))
        .or_else(|| guard.get(&(a2.to_string(), a1.to_string())))?;
    if entry.a1 == a1 {
        Some((entry.p1, entry.p2))
    } else {
        Some((entry.p2, entry.p1))
    }
}

fn resolve_link(guard: &HashMap<(String, String), LinkEntry>, a1: &str, a2: &str) -> Option<Arc<Link>> {
    guard
        .get(&(a1.to_string(), a2.to_string()))
        .or_else(|| guard.get(&(a2.to_string(), a1.to_string())))
        .map(|entry| entry.link.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::router::EchoHandler;
    use std::time::Duration as StdDuration;

    fn two_client_one_router_config() -> NetworkConfig {
        let text = r#"{
            "end_time": 2,
            "client_send_rate": 1,
            "routers": ["R1"],
            "clients": ["C1", "C2"],
            "links": [
                ["C1", "R1", 0, 0, 1, 1],
                ["C2", "R1", 0, 1, 1, 1]
            ],
            "correct_routes": [["C1", "R1", "C2"], ["C2", "R1", "C1"]]
        }"#;
        NetworkConfig::parse(text, "test.json").unwrap()
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn two_clients_discover_each_other_through_echo_router() {
        let config = two_client_one_router_config();
        let factory: &RouterFactory = &|_addr, _heartbeat| Box::new(EchoHandler);
        let network = Network::new(config, factory, Arc::new(NoopObserver));

        let outcome = network.run().await;
        match outcome {
            RunOutcome::Completed(report) => {
                // An echo router can't produce a 3-hop route, so routes will be marked
                // incorrect, but both directions should at least be observed.
                assert!(report.contains("C1 -> C2"));
                assert!(report.contains("C2 -> C1"));
            }
            RunOutcome::Interrupted => panic!("run should not be interrupted"),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn route_snapshot_is_populated_before_end_time() {
        let config = two_client_one_router_config();
        let factory: &RouterFactory = &|_addr, _heartbeat| Box::new(EchoHandler);
        let network = Network::new(config, factory, Arc::new(NoopObserver));
        let links = network.links.clone();
        let routers = network.routers.clone();
        let clients = network.clients.clone();

        // Drive the same install step `run` would, without waiting out end_time, so
        // we can inspect the aggregator directly after a short settle.
        {
            let guard = links.lock().unwrap();
            for entry in guard.values() {
                if let Some(r) = routers.get(&entry.a1) {
                    r.change_link(LinkChange::Add { port: entry.p1, endpoint: entry.a2.clone(), link: entry.link.clone(), cost: 1 });
                } else if let Some(c) = clients.get(&entry.a1) {
                    c.change_link(ClientLinkChange::Add(entry.link.clone()));
                }
                if let Some(r) = routers.get(&entry.a2) {
                    r.change_link(LinkChange::Add { port: entry.p2, endpoint: entry.a1.clone(), link: entry.link.clone(), cost: 1 });
                } else if let Some(c) = clients.get(&entry.a2) {
                    c.change_link(ClientLinkChange::Add(entry.link.clone()));
                }
            }
        }
        tokio::time::sleep(StdDuration::from_millis(500)).await;
        let snapshot = network.route_snapshot();
        assert!(!snapshot.is_empty());
    }
}
