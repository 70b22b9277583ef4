//! Discrete-time, task-based network simulation substrate.
//!
//! A [`network::Network`] wires together [`router`] and [`client`] tasks over
//! [`link::Link`]s, drives a scripted sequence of topology changes, and reports the
//! routes its clients discovered. Routing logic itself is supplied externally through
//! the [`router::RouterHandler`] trait — this crate only owns the substrate.

pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod network;
pub mod observer;
pub mod packet;
pub mod report;
pub mod router;

pub use client::{ClientHandle, ClientLinkChange, RouteObserver};
pub use config::{ChangeEvent, NetworkConfig, ScheduledChange};
pub use error::ConfigError;
pub use link::Link;
pub use network::{Network, RouterFactory, RunOutcome};
pub use observer::{NetworkObserver, NoopObserver};
pub use packet::{Packet, PacketKind};
pub use router::{EchoHandler, LinkChange, RouterContext, RouterHandle, RouterHandler};
