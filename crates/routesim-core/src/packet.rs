//! The packet model that flows between clients, links, and routers.
//!
//! A [`Packet`] is the only thing ever exchanged across a [`crate::link::Link`]. It
//! carries its own travel history in `route`, which every hop appends to — the packet
//! is both the message and the traceroute record.

use serde::{Deserialize, Serialize};

/// Distinguishes probe traffic from routing-protocol traffic.
///
/// `Traceroute` packets carry no payload and exist only to accumulate a route trace.
/// `Routing` packets carry a handler-defined opaque string payload (e.g. a serialized
/// distance-vector table or link-state advertisement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    Traceroute,
    Routing,
}

/// A packet in flight (or at rest) in the simulated network.
///
/// `route` is initialized to `[src_addr]` at construction and grows by one address per
/// hop traversed. The first element of `route` is always `src_addr` — this invariant is
/// never broken because `route` is only ever mutated through [`Packet::push_hop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    kind: PacketKind,
    src_addr: String,
    dst_addr: String,
    content: Option<String>,
    route: Vec<String>,
}

impl Packet {
    /// Construct a new packet. `route` starts as `[src_addr]`.
    pub fn new(kind: PacketKind, src_addr: impl Into<String>, dst_addr: impl Into<String>) -> Self {
        let src_addr = src_addr.into();
        let route = vec![src_addr.clone()];
        Self {
            kind,
            src_addr,
            dst_addr: dst_addr.into(),
            content: None,
            route,
        }
    }

    /// Construct a routing packet carrying an opaque string payload.
    pub fn routing(
        src_addr: impl Into<String>,
        dst_addr: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut packet = Self::new(PacketKind::Routing, src_addr, dst_addr);
        packet.content = Some(content.into());
        packet
    }

    /// Construct a traceroute probe.
    pub fn traceroute(src_addr: impl Into<String>, dst_addr: impl Into<String>) -> Self {
        Self::new(PacketKind::Traceroute, src_addr, dst_addr)
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn is_traceroute(&self) -> bool {
        self.kind == PacketKind::Traceroute
    }

    pub fn is_routing(&self) -> bool {
        self.kind == PacketKind::Routing
    }

    pub fn src_addr(&self) -> &str {
        &self.src_addr
    }

    pub fn dst_addr(&self) -> &str {
        &self.dst_addr
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn route(&self) -> &[String] {
        &self.route
    }

    /// Append `addr` to the route trace. Only the substrate calls this — a handler
    /// mutating a packet's own route trace would corrupt the traceroute record.
    pub(crate) fn push_hop(&mut self, addr: &str) {
        self.route.push(addr.to_string());
    }

    /// Produce an independent copy. Mutating the route or content of the returned
    /// packet never affects `self` and vice versa — this is automatic in Rust because
    /// `Packet` owns its data (no reference-counted fields), but the substrate still
    /// calls this explicitly at every `send` to document the aliasing-freedom contract
    /// that the reference implementation enforces with an explicit deep-copy.
    pub fn copy(&self) -> Self {
        self.clone()
    }
}
