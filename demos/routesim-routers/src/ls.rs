//! Link-state routing handler: flood LSAs, run Dijkstra locally to pick next hops.

use std::collections::{HashMap, HashSet};

use routesim_core::{Packet, RouterContext, RouterHandler};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lsa {
    origin: String,
    seq: u64,
    links: Vec<(String, u64)>,
}

/// Link-state router: floods its own adjacency list on every link change and on a
/// fixed interval, deduplicating by `(origin, seq)`, and computes shortest paths with
/// Dijkstra over the resulting link-state database whenever a packet needs forwarding.
#[derive(Debug, Default)]
pub struct LsRouter {
    addr: String,
    heartbeat_ms: u64,
    seq: u64,
    neighbors: HashMap<u32, (String, u64)>,
    lsdb: HashMap<String, (u64, Vec<(String, u64)>)>,
    last_broadcast_ms: u64,
    dirty: bool,
}

impl LsRouter {
    pub fn new(addr: impl Into<String>, heartbeat_ms: u64) -> Self {
        Self {
            addr: addr.into(),
            heartbeat_ms,
            ..Default::default()
        }
    }

    fn own_links(&self) -> Vec<(String, u64)> {
        self.neighbors.values().cloned().collect()
    }

    fn flood(&mut self, ctx: &RouterContext<'_>, lsa: &Lsa, except_port: Option<u32>) {
        let content = serde_json::to_string(lsa).unwrap_or_default();
        for (&port, (endpoint, _cost)) in &self.neighbors {
            if Some(port) == except_port {
                continue;
            }
            ctx.send(port, Packet::routing(self.addr.clone(), endpoint.clone(), content.clone()));
        }
    }

    fn broadcast_own_lsa(&mut self, ctx: &RouterContext<'_>) {
        self.seq += 1;
        let lsa = Lsa {
            origin: self.addr.clone(),
            seq: self.seq,
            links: self.own_links(),
        };
        self.lsdb.insert(self.addr.clone(), (lsa.seq, lsa.links.clone()));
        self.flood(ctx, &lsa, None);
    }

    /// Dijkstra from `self.addr` over the current link-state database. Returns the
    /// first-hop address on the shortest path to `dst`, if one exists. Works entirely
    /// in owned `String`s rather than borrowing from `self.lsdb`, since the visited/
    /// distance/predecessor maps otherwise outlive the per-iteration borrow of
    /// `self.lsdb.get(..)`.
    fn next_hop_toward(&self, dst: &str) -> Option<String> {
        if dst == self.addr {
            return None;
        }

        let mut dist: HashMap<String, u64> = HashMap::new();
        let mut prev: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        dist.insert(self.addr.clone(), 0);

        loop {
            let next = dist
                .iter()
                .filter(|(node, _)| !visited.contains(node.as_str()))
                .min_by_key(|(_, cost)| **cost)
                .map(|(node, cost)| (node.clone(), *cost));
            let Some((node, cost)) = next else { break };
            visited.insert(node.clone());
            if node == dst {
                break;
            }
            if let Some((_, links)) = self.lsdb.get(&node) {
                for (neighbor, link_cost) in links {
                    let candidate = cost.saturating_add(*link_cost);
                    let better = dist.get(neighbor).map_or(true, |&existing| candidate < existing);
                    if better {
                        dist.insert(neighbor.clone(), candidate);
                        prev.insert(neighbor.clone(), node.clone());
                    }
                }
            }
        }

        let mut hop = dst.to_string();
        if !prev.contains_key(&hop) {
            return None;
        }
        while let Some(p) = prev.get(&hop) {
            if p == &self.addr {
                return Some(hop);
            }
            hop = p.clone();
        }
        None
    }

    fn port_for_addr(&self, addr: &str) -> Option<u32> {
        self.neighbors
            .iter()
            .find(|(_, (endpoint, _))| endpoint == addr)
            .map(|(&port, _)| port)
    }
}

impl RouterHandler for LsRouter {
    fn handle_packet(&mut self, ctx: &RouterContext<'_>, port: u32, packet: Packet) {
        if packet.is_routing() {
            let Some(content) = packet.content() else { return };
            let Ok(lsa) = serde_json::from_str::<Lsa>(content) else {
                tracing::debug!(addr = %self.addr, "dropping malformed lsa");
                return;
            };
            if lsa.origin == self.addr {
                return;
            }
            let is_newer = self.lsdb.get(&lsa.origin).map(|(seq, _)| lsa.seq > *seq).unwrap_or(true);
            if !is_newer {
                return;
            }
            self.lsdb.insert(lsa.origin.clone(), (lsa.seq, lsa.links.clone()));
            self.flood(ctx, &lsa, Some(port));
            return;
        }

        let dst = packet.dst_addr().to_string();
        match self.next_hop_toward(&dst).and_then(|hop| self.port_for_addr(&hop)) {
            Some(out_port) => ctx.send(out_port, packet),
            None => tracing::debug!(addr = %self.addr, dst, "no known path, dropping traceroute packet"),
        }
    }

    fn handle_new_link(&mut self, ctx: &RouterContext<'_>, port: u32, endpoint: &str, cost: u64) {
        self.neighbors.insert(port, (endpoint.to_string(), cost));
        self.dirty = true;
        self.broadcast_own_lsa(ctx);
    }

    fn handle_remove_link(&mut self, ctx: &RouterContext<'_>, port: u32) {
        self.neighbors.remove(&port);
        self.dirty = true;
        self.broadcast_own_lsa(ctx);
    }

    fn handle_time(&mut self, ctx: &RouterContext<'_>, time_ms: u64) {
        if self.dirty || time_ms.saturating_sub(self.last_broadcast_ms) >= self.heartbeat_ms {
            self.broadcast_own_lsa(ctx);
            self.last_broadcast_ms = time_ms;
            self.dirty = false;
        }
    }

    fn debug_string(&self, addr: &str) -> String {
        format!("LsRouter(addr={addr}, lsdb_entries={})", self.lsdb.len())
    }
}
