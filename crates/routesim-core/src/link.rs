//! Bidirectional, latency-preserving link between two endpoints.
//!
//! A [`Link`] connects exactly two addresses (`e1`, `e2`). Each direction has its own
//! latency and its own FIFO delivery queue. Delivery is handled by a single background
//! task per link (see the module-level note on [`DeliveryEntry`]) rather than one task
//! per packet, so a topology with many in-flight probes does not spawn unbounded tasks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::observer::NetworkObserver;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToE2,
    ToE1,
}

/// One scheduled delivery, ordered by due time (ties broken by insertion sequence so
/// same-millisecond sends still resolve deterministically).
struct DeliveryEntry {
    due: Instant,
    seq: u64,
    dir: Direction,
    packet: Packet,
}

impl PartialEq for DeliveryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for DeliveryEntry {}

impl PartialOrd for DeliveryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeliveryEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest due time sorts first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A bidirectional point-to-point link with independent per-direction latency.
pub struct Link {
    e1: String,
    e2: String,
    q_to_e1: Arc<Mutex<VecDeque<Packet>>>,
    q_to_e2: Arc<Mutex<VecDeque<Packet>>>,
    l12_ms: Arc<AtomicU64>,
    l21_ms: Arc<AtomicU64>,
    latency_multiplier: u64,
    sender: mpsc::UnboundedSender<DeliveryEntry>,
    next_seq: AtomicU64,
    observer: Arc<dyn NetworkObserver>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("e1", &self.e1)
            .field("e2", &self.e2)
            .field("l12_ms", &self.l12_ms.load(Ordering::Relaxed))
            .field("l21_ms", &self.l21_ms.load(Ordering::Relaxed))
            .finish()
    }
}

impl Link {
    /// Construct a new link. `cost_12`/`cost_21` are unscaled config-unit costs; the
    /// actual delay used is `cost × latency_multiplier` ms, matching `change_latency`.
    pub fn new(
        e1: impl Into<String>,
        e2: impl Into<String>,
        cost_12: u64,
        cost_21: u64,
        latency_multiplier: u64,
        observer: Arc<dyn NetworkObserver>,
    ) -> Self {
        let e1 = e1.into();
        let e2 = e2.into();
        let q_to_e1 = Arc::new(Mutex::new(VecDeque::new()));
        let q_to_e2 = Arc::new(Mutex::new(VecDeque::new()));
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(delivery_loop(receiver, q_to_e1.clone(), q_to_e2.clone()));

        Self {
            e1,
            e2,
            q_to_e1,
            q_to_e2,
            l12_ms: Arc::new(AtomicU64::new(cost_12 * latency_multiplier)),
            l21_ms: Arc::new(AtomicU64::new(cost_21 * latency_multiplier)),
            latency_multiplier,
            sender,
            next_seq: AtomicU64::new(0),
            observer,
        }
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.e1, &self.e2)
    }

    /// Send `packet` from `src`, which must be one of this link's two endpoints.
    /// Unknown `src` is a silent no-op (teardown races are expected).
    ///
    /// Deep-copies the packet, appends the peer address to the copy's route, and
    /// schedules delivery after the current directional latency.
    pub fn send(&self, packet: &Packet, src: &str) {
        let (dir, peer, latency_ms) = if src == self.e1 {
            (Direction::ToE2, self.e2.as_str(), self.l12_ms.load(Ordering::Acquire))
        } else if src == self.e2 {
            (Direction::ToE1, self.e1.as_str(), self.l21_ms.load(Ordering::Acquire))
        } else {
            tracing::debug!(src, "link send from unknown endpoint ignored");
            return;
        };

        let mut copy = packet.copy();
        copy.push_hop(peer);
        self.observer.on_send(&copy, src, peer, latency_ms);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let due = Instant::now() + std::time::Duration::from_millis(latency_ms);

        tracing::debug!(src, peer, latency_ms, "link scheduling delivery");
        let _ = self.sender.send(DeliveryEntry {
            due,
            seq,
            dir,
            packet: copy,
        });
    }

    /// Non-blocking receive: the oldest packet delivered toward `dst` that is now due,
    /// or `None`. Unknown `dst` returns `None`.
    pub fn recv(&self, dst: &str) -> Option<Packet> {
        if dst == self.e1 {
            self.q_to_e1.lock().unwrap().pop_front()
        } else if dst == self.e2 {
            self.q_to_e2.lock().unwrap().pop_front()
        } else {
            None
        }
    }

    /// Atomically update the latency in the `src`→peer direction. `new_cost` is an
    /// unscaled config-unit cost; the stored delay becomes `new_cost × latency_multiplier`.
    pub fn change_latency(&self, src: &str, new_cost: u64) {
        let scaled = new_cost * self.latency_multiplier;
        if src == self.e1 {
            self.l12_ms.store(scaled, Ordering::Release);
        } else if src == self.e2 {
            self.l21_ms.store(scaled, Ordering::Release);
        }
    }
}

async fn delivery_loop(
    mut receiver: mpsc::UnboundedReceiver<DeliveryEntry>,
    q_to_e1: Arc<Mutex<VecDeque<Packet>>>,
    q_to_e2: Arc<Mutex<VecDeque<Packet>>>,
) {
    let mut pending: BinaryHeap<DeliveryEntry> = BinaryHeap::new();

    loop {
        let next_due = pending.peek().map(|e| e.due);
        tokio::select! {
            biased;

            maybe_entry = receiver.recv() => {
                match maybe_entry {
                    Some(entry) => pending.push(entry),
                    None if pending.is_empty() => return,
                    None => {
                        // Sender dropped but entries remain; drain them before exiting.
                        drain_due(&mut pending, &q_to_e1, &q_to_e2);
                        if pending.is_empty() {
                            return;
                        }
                    }
                }
            }

            _ = sleep_until_or_pending(next_due) => {
                drain_due(&mut pending, &q_to_e1, &q_to_e2);
            }
        }
    }
}

async fn sleep_until_or_pending(due: Option<Instant>) {
    match due {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending::<()>().await,
    }
}

fn drain_due(
    pending: &mut BinaryHeap<DeliveryEntry>,
    q_to_e1: &Arc<Mutex<VecDeque<Packet>>>,
    q_to_e2: &Arc<Mutex<VecDeque<Packet>>>,
) {
    let now = Instant::now();
    while let Some(entry) = pending.peek() {
        if entry.due > now {
            break;
        }
        let entry = pending.pop().unwrap();
        let queue = match entry.dir {
            Direction::ToE2 => q_to_e2,
            Direction::ToE1 => q_to_e1,
        };
        queue.lock().unwrap().push_back(entry.packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use std::time::Duration;

    fn link(c12: u64, c21: u64) -> Link {
        Link::new("A", "B", c12, c21, 1, Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn send_then_recv_after_latency() {
        let l = link(10, 10);
        let p = Packet::traceroute("A", "B");
        l.send(&p, "A");

        assert!(l.recv("B").is_none());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let delivered = l.recv("B").expect("packet should have arrived");
        assert_eq!(delivered.route(), &["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn unknown_endpoint_send_is_noop() {
        let l = link(5, 5);
        let p = Packet::traceroute("A", "B");
        l.send(&p, "C");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(l.recv("A").is_none());
        assert!(l.recv("B").is_none());
    }

    #[tokio::test]
    async fn unknown_endpoint_recv_returns_none() {
        let l = link(5, 5);
        assert!(l.recv("Z").is_none());
    }

    #[tokio::test]
    async fn fifo_within_one_direction_constant_latency() {
        let l = link(5, 5);
        let p1 = Packet::traceroute("A", "B");
        let p2 = Packet::routing("A", "B", "second");
        l.send(&p1, "A");
        l.send(&p2, "A");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let first = l.recv("B").unwrap();
        let second = l.recv("B").unwrap();
        assert!(first.is_traceroute());
        assert!(second.is_routing());
    }

    #[tokio::test]
    async fn send_copies_packet_isolating_caller_mutations() {
        let l = link(5, 5);
        let original = Packet::traceroute("A", "B");
        l.send(&original, "A");
        // `original` is untouched by the send; route still just [A].
        assert_eq!(original.route(), &["A".to_string()]);
    }

    #[tokio::test]
    async fn change_latency_affects_subsequent_sends() {
        let l = link(100, 100);
        l.change_latency("A", 5);
        let p = Packet::traceroute("A", "B");
        l.send(&p, "A");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(l.recv("B").is_some());
    }
}
