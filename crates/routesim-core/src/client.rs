//! Client loop: periodically probes every peer and reports observed routes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::link::Link;
use crate::packet::Packet;

const TICK: Duration = Duration::from_millis(100);

/// The single mutation a client's mailbox understands: attach its one uplink.
/// Clients are edge devices — they never have more than one link, so there is no
/// `Remove` variant (the reference implementation's `changeLink` only ever receives
/// `("add", link)` for clients).
pub enum ClientLinkChange {
    Add(Arc<Link>),
}

/// Callback invoked whenever a client observes (or fails to observe) a route.
///
/// `route` is empty when the client has just fired a probe and has not yet heard back
/// — the orchestrator uses this to show "not yet discovered" endpoints in the report.
pub trait RouteObserver: Send + Sync {
    fn update_route(&self, src: &str, dst: &str, route: &[String]);
}

#[derive(Clone)]
pub struct ClientHandle {
    addr: String,
    changes_tx: mpsc::UnboundedSender<ClientLinkChange>,
    keep_running: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
}

impl ClientHandle {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn change_link(&self, change: ClientLinkChange) {
        let _ = self.changes_tx.send(change);
    }

    pub fn stop(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    /// Disable periodic sending and fire exactly one final probe sweep, per the
    /// orchestrator's end-of-run burst.
    pub fn last_send(&self) {
        self.sending.store(false, Ordering::Release);
    }
}

pub fn spawn_client(
    addr: impl Into<String>,
    all_clients: Vec<String>,
    send_rate_ms: u64,
    observer: Arc<dyn RouteObserver>,
) -> (ClientHandle, tokio::task::JoinHandle<()>) {
    let addr = addr.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let keep_running = Arc::new(AtomicBool::new(true));
    let sending = Arc::new(AtomicBool::new(true));

    let handle = ClientHandle {
        addr: addr.clone(),
        changes_tx: tx,
        keep_running: keep_running.clone(),
        sending: sending.clone(),
    };

    let join = tokio::spawn(client_loop(
        addr,
        all_clients,
        send_rate_ms,
        observer,
        rx,
        keep_running,
        sending,
    ));
    (handle, join)
}

fn send_traceroutes(addr: &str, all_clients: &[String], link: Option<&Arc<Link>>, observer: &Arc<dyn RouteObserver>) {
    for dst in all_clients {
        if dst == addr {
            continue;
        }
        let packet = Packet::traceroute(addr, dst.clone());
        if let Some(link) = link {
            link.send(&packet, addr);
        }
        observer.update_route(addr, dst, &[]);
    }
}

async fn client_loop(
    addr: String,
    all_clients: Vec<String>,
    send_rate_ms: u64,
    observer: Arc<dyn RouteObserver>,
    mut changes_rx: mpsc::UnboundedReceiver<ClientLinkChange>,
    keep_running: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
) {
    let mut link: Option<Arc<Link>> = None;
    let start = Instant::now();
    let mut last_time: u64 = 0;
    let mut fired_final_send = false;

    while keep_running.load(Ordering::Acquire) {
        tokio::time::sleep(TICK).await;
        let time_ms = start.elapsed().as_millis() as u64;

        if let Ok(ClientLinkChange::Add(new_link)) = changes_rx.try_recv() {
            link = Some(new_link);
        }

        if let Some(l) = &link {
            if let Some(packet) = l.recv(&addr) {
                if packet.is_traceroute() {
                    observer.update_route(packet.src_addr(), packet.dst_addr(), packet.route());
                }
                // Routing packets received by a client are silently dropped.
            }
        }

        let currently_sending = sending.load(Ordering::Acquire);
        if currently_sending {
            if time_ms.saturating_sub(last_time) > send_rate_ms {
                send_traceroutes(&addr, &all_clients, link.as_ref(), &observer);
                last_time = time_ms;
            }
        } else if !fired_final_send {
            // `last_send` was called: fire exactly one more sweep even though periodic
            // sending is now disabled, matching the reference implementation's
            // `lastSend` calling `send_traceroutes` unconditionally once.
            send_traceroutes(&addr, &all_clients, link.as_ref(), &observer);
            fired_final_send = true;
        }
    }

    tracing::debug!(addr, "client loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use std::sync::Mutex;

    struct RecordingObserver {
        calls: Mutex<Vec<(String, String, Vec<String>)>>,
    }
    impl RouteObserver for RecordingObserver {
        fn update_route(&self, src: &str, dst: &str, route: &[String]) {
            self.calls
                .lock()
                .unwrap()
                .push((src.to_string(), dst.to_string(), route.to_vec()));
        }
    }

    #[tokio::test]
    async fn client_with_no_link_still_reports_empty_routes() {
        let observer = Arc::new(RecordingObserver { calls: Mutex::new(Vec::new()) });
        let (handle, _join) = spawn_client(
            "C1",
            vec!["C1".to_string(), "C2".to_string()],
            50,
            observer.clone(),
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = observer.calls.lock().unwrap();
        assert!(calls.iter().any(|(src, dst, route)| src == "C1" && dst == "C2" && route.is_empty()));
    }

    #[tokio::test]
    async fn client_reports_full_route_on_traceroute_receipt() {
        let observer = Arc::new(RecordingObserver { calls: Mutex::new(Vec::new()) });
        let (handle, _join) = spawn_client(
            "C1",
            vec!["C1".to_string(), "C2".to_string()],
            1_000_000, // effectively disable periodic sending for this test
            observer.clone(),
        );

        let link = Arc::new(Link::new("C1", "C2", 1, 1, 1, Arc::new(NoopObserver)));
        handle.change_link(ClientLinkChange::Add(link.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut incoming = Packet::traceroute("C2", "C1");
        incoming.push_hop("C1");
        link.send(&incoming, "C2");
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = observer.calls.lock().unwrap();
        assert!(calls
            .iter()
            .any(|(src, dst, route)| src == "C2" && dst == "C1" && route == &vec!["C2".to_string(), "C1".to_string()]));
    }

    #[tokio::test]
    async fn last_send_fires_exactly_once_more_after_sending_disabled() {
        let observer = Arc::new(RecordingObserver { calls: Mutex::new(Vec::new()) });
        let (handle, _join) = spawn_client(
            "C1",
            vec!["C1".to_string(), "C2".to_string()],
            1_000_000,
            observer.clone(),
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        let before = observer.calls.lock().unwrap().len();
        handle.last_send();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let after = observer.calls.lock().unwrap().len();
        handle.stop();
        assert_eq!(after - before, 1);
    }
}
