//! Distance-vector routing handler: Bellman-Ford over periodic full-table broadcasts.

use std::collections::HashMap;

use routesim_core::{Packet, RouterContext, RouterHandler};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct DvPayload {
    table: HashMap<String, u64>,
}

/// A route this router currently believes in: its cost and which port leads there.
#[derive(Debug, Clone, Copy)]
struct Route {
    cost: u64,
    via_port: u32,
}

/// Distance-vector router: advertises its full routing table to every neighbor on a
/// fixed interval, and relaxes incoming tables against its own (classic Bellman-Ford).
/// Runs without split horizon's poison-reverse variant — a withdrawn route is dropped
/// locally and the next periodic broadcast lets neighbors re-converge, which is simple
/// but can transiently count to infinity on some topologies.
#[derive(Debug, Default)]
pub struct DvRouter {
    addr: String,
    heartbeat_ms: u64,
    neighbors: HashMap<u32, (String, u64)>,
    routes: HashMap<String, Route>,
    last_broadcast_ms: u64,
    dirty: bool,
}

impl DvRouter {
    pub fn new(addr: impl Into<String>, heartbeat_ms: u64) -> Self {
        Self {
            addr: addr.into(),
            heartbeat_ms,
            ..Default::default()
        }
    }

    fn broadcast(&mut self, ctx: &RouterContext<'_>) {
        for (&port, (endpoint, _cost)) in &self.neighbors {
            // Split horizon: never advertise a route back out the port it was learned
            // through.
            let table: HashMap<String, u64> = self
                .routes
                .iter()
                .filter(|(_, route)| route.via_port != port)
                .map(|(dest, route)| (dest.clone(), route.cost))
                .collect();
            let payload = DvPayload { table };
            let content = serde_json::to_string(&payload).unwrap_or_default();
            ctx.send(port, Packet::routing(self.addr.clone(), endpoint.clone(), content));
        }
    }

    fn relax(&mut self, from_port: u32, neighbor_table: &HashMap<String, u64>) {
        let Some((_, link_cost)) = self.neighbors.get(&from_port) else { return };
        for (dest, neighbor_cost) in neighbor_table {
            if *dest == self.addr {
                continue;
            }
            let candidate = neighbor_cost.saturating_add(*link_cost);
            let better = match self.routes.get(dest) {
                Some(existing) => candidate < existing.cost || existing.via_port == from_port,
                None => true,
            };
            if better {
                if let Some(existing) = self.routes.get(dest) {
                    if existing.cost == candidate && existing.via_port == from_port {
                        continue;
                    }
                }
                self.routes.insert(
                    dest.clone(),
                    Route {
                        cost: candidate,
                        via_port: from_port,
                    },
                );
                self.dirty = true;
            }
        }
    }
}

impl RouterHandler for DvRouter {
    fn handle_packet(&mut self, ctx: &RouterContext<'_>, port: u32, packet: Packet) {
        if packet.is_routing() {
            let Some(content) = packet.content() else { return };
            let Ok(payload) = serde_json::from_str::<DvPayload>(content) else {
                tracing::debug!(addr = %self.addr, "dropping malformed dv advertisement");
                return;
            };
            self.relax(port, &payload.table);
            return;
        }

        let dst = packet.dst_addr();
        if let Some(route) = self.routes.get(dst) {
            ctx.send(route.via_port, packet);
        } else {
            tracing::debug!(addr = %self.addr, dst, "no known route, dropping traceroute packet");
        }
    }

    fn handle_new_link(&mut self, _ctx: &RouterContext<'_>, port: u32, endpoint: &str, cost: u64) {
        self.neighbors.insert(port, (endpoint.to_string(), cost));
        let better = self.routes.get(endpoint).map(|r| cost < r.cost).unwrap_or(true);
        if better {
            self.routes.insert(endpoint.to_string(), Route { cost, via_port: port });
        }
        self.dirty = true;
    }

    fn handle_remove_link(&mut self, _ctx: &RouterContext<'_>, port: u32) {
        self.neighbors.remove(&port);
        self.routes.retain(|_, route| route.via_port != port);
        self.dirty = true;
    }

    fn handle_time(&mut self, ctx: &RouterContext<'_>, time_ms: u64) {
        if self.dirty || time_ms.saturating_sub(self.last_broadcast_ms) >= self.heartbeat_ms {
            self.broadcast(ctx);
            self.last_broadcast_ms = time_ms;
            self.dirty = false;
        }
    }

    fn debug_string(&self, addr: &str) -> String {
        format!("DvRouter(addr={addr}, routes={})", self.routes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    fn empty_links() -> StdHashMap<u32, Arc<routesim_core::Link>> {
        StdHashMap::new()
    }

    #[test]
    fn learns_direct_route_from_new_link() {
        let mut router = DvRouter::new("R1", 1000);
        let links = empty_links();
        let rc = RouterContext::new("R1", &links);
        router.handle_new_link(&rc, 0, "C1", 10);
        assert_eq!(router.routes.get("C1").unwrap().cost, 10);
        assert_eq!(router.routes.get("C1").unwrap().via_port, 0);
    }

    #[test]
    fn relax_prefers_cheaper_route() {
        let mut router = DvRouter::new("R1", 1000);
        router.neighbors.insert(0, ("R2".to_string(), 5));
        router.neighbors.insert(1, ("R3".to_string(), 1));

        let mut via_r2 = HashMap::new();
        via_r2.insert("C1".to_string(), 100);
        router.relax(0, &via_r2);
        assert_eq!(router.routes.get("C1").unwrap().cost, 105);

        let mut via_r3 = HashMap::new();
        via_r3.insert("C1".to_string(), 2);
        router.relax(1, &via_r3);
        assert_eq!(router.routes.get("C1").unwrap().cost, 3);
        assert_eq!(router.routes.get("C1").unwrap().via_port, 1);
    }

    #[test]
    fn remove_link_drops_routes_through_it() {
        let mut router = DvRouter::new("R1", 1000);
        router.neighbors.insert(0, ("C1".to_string(), 10));
        router.routes.insert("C1".to_string(), Route { cost: 10, via_port: 0 });
        let links = empty_links();
        let rc = RouterContext::new("R1", &links);
        router.handle_remove_link(&rc, 0);
        assert!(router.routes.get("C1").is_none());
    }
}
