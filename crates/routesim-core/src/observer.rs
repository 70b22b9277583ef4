//! Optional hooks for an external viewer.
//!
//! The reference implementation patches a process-wide class attribute
//! (`Network.visualizeChangesCallback`, `Packet.animate`) that a viewer installs before
//! the run starts. That pattern doesn't translate to a library that might be embedded
//! or tested concurrently, so this crate replaces it with a `NetworkObserver` trait
//! object passed in at construction — per REDESIGN FLAGS in `SPEC_FULL.md`. The core
//! never requires one: [`NoopObserver`] is the default and costs nothing to call.

use crate::config::ChangeEvent;
use crate::packet::Packet;

/// Hooks a viewer (or a test) can register to watch a running [`crate::network::Network`].
///
/// Both methods have no-op default bodies so an observer only needs to implement the
/// hook it actually cares about.
pub trait NetworkObserver: Send + Sync {
    /// Called synchronously at every [`crate::link::Link::send`], before the packet is
    /// actually scheduled for delivery.
    fn on_send(&self, _packet: &Packet, _src: &str, _dst: &str, _latency_ms: u64) {}

    /// Called after every scripted link change has been applied to both endpoint
    /// routers.
    fn on_change(&self, _event: &ChangeEvent) {}
}

/// The default observer: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NetworkObserver for NoopObserver {}
