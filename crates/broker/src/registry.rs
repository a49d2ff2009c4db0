//! Connection registry: the two directories every routed write goes through.
//!
//! Panels are indexed by write-handle identity, sensor nodes by `nodeId`.
//! Both directories tolerate concurrent insert/remove/iterate: callers
//! snapshot the target set under a short lock, release it, perform writes
//! outside any lock, then reacquire briefly to prune whichever entry's
//! write failed. A registry-wide lock is never held across a write, since a
//! write can block on a slow or dead peer.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// A connection's write half, shared between its owning session and any
/// other session performing a routed delivery.
///
/// Wrapped in `Arc` so it can serve as both a `HashMap` key (panels are
/// "indexed by write-handle" per the wire contract, not by a separate id)
/// and a cloneable handle for concurrent senders. Identity, hashing and
/// equality are defined by pointer identity of the inner `Arc`, matching
/// the socket each `PeerWriter` wraps rather than any value inside it.
/// The inner `tokio::sync::Mutex` serialises concurrent frame writes to
/// this peer; it is legal to hold across the write's `.await` because it is
/// scoped to a single peer, never to the whole registry.
#[derive(Clone)]
pub struct PeerWriter(Arc<AsyncMutex<OwnedWriteHalf>>);

impl PeerWriter {
    /// Wraps a connection's write half for registry use.
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self(Arc::new(AsyncMutex::new(write_half)))
    }

    /// Writes `payload` as a single frame, serialised against any other
    /// concurrent write to the same peer.
    pub async fn send(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut guard = self.0.lock().await;
        greenhouse_broker_proto::write_frame(&mut *guard, Some(payload))
            .await
            .map_err(Into::into)
    }
}

impl PartialEq for PeerWriter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PeerWriter {}

impl Hash for PeerWriter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Thread-safe directories of active panels and sensor nodes.
///
/// This is the only path by which one connection ever writes to another's
/// socket; every other piece of session state is owned by its own session.
#[derive(Default)]
pub struct ConnectionRegistry {
    panels: Mutex<HashMap<PeerWriter, String>>,
    sensors: Mutex<HashMap<String, PeerWriter>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a panel's display label. Idempotent on the same
    /// handle: a second call replaces the label rather than adding an entry.
    pub fn register_panel(&self, handle: PeerWriter, label: String) {
        self.panels.lock().unwrap().insert(handle, label);
    }

    /// Removes a panel entry. A no-op if the handle is not present.
    pub fn unregister_panel(&self, handle: &PeerWriter) {
        self.panels.lock().unwrap().remove(handle);
    }

    /// Inserts a sensor node mapping, last-write-wins on a duplicate id.
    pub fn register_sensor(&self, node_id: String, handle: PeerWriter) {
        self.sensors.lock().unwrap().insert(node_id, handle);
    }

    /// Removes a sensor node entry by id. A no-op if absent.
    pub fn unregister_sensor(&self, node_id: &str) {
        self.sensors.lock().unwrap().remove(node_id);
    }

    /// Looks up a sensor node's write handle by id.
    pub fn lookup_sensor(&self, node_id: &str) -> Option<PeerWriter> {
        self.sensors.lock().unwrap().get(node_id).cloned()
    }

    /// Number of currently registered panels.
    pub fn count_panels(&self) -> usize {
        self.panels.lock().unwrap().len()
    }

    /// Number of currently registered sensor nodes.
    pub fn count_sensors(&self) -> usize {
        self.sensors.lock().unwrap().len()
    }

    /// Ids of all currently registered sensor nodes. Order is unspecified.
    pub fn list_sensor_ids(&self) -> Vec<String> {
        self.sensors.lock().unwrap().keys().cloned().collect()
    }

    /// Writes `payload` to every registered panel, pruning any entry whose
    /// write fails. A single broken panel never blocks delivery to others.
    pub async fn broadcast_to_panels(&self, payload: &[u8]) {
        let snapshot: Vec<PeerWriter> = {
            let panels = self.panels.lock().unwrap();
            panels.keys().cloned().collect()
        };

        for handle in snapshot {
            if let Err(err) = handle.send(payload).await {
                warn!(error = %err, "dropping dead panel during broadcast");
                self.panels.lock().unwrap().remove(&handle);
            }
        }
    }

    /// Writes `payload` to every registered sensor node, pruning any entry
    /// whose write fails.
    pub async fn broadcast_to_sensors(&self, payload: &[u8]) {
        let snapshot: Vec<(String, PeerWriter)> = {
            let sensors = self.sensors.lock().unwrap();
            sensors
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        for (node_id, handle) in snapshot {
            if let Err(err) = handle.send(payload).await {
                warn!(node_id, error = %err, "dropping dead sensor node during broadcast");
                self.sensors.lock().unwrap().remove(&node_id);
            }
        }
    }

    /// Writes `payload` to exactly the sensor node registered under
    /// `node_id`. Returns whether delivery succeeded; on failure the entry
    /// is pruned.
    pub async fn send_to_sensor(&self, node_id: &str, payload: &[u8]) -> bool {
        let Some(handle) = self.lookup_sensor(node_id) else {
            return false;
        };

        match handle.send(payload).await {
            Ok(()) => true,
            Err(err) => {
                warn!(node_id, error = %err, "dropping dead sensor node on targeted send");
                self.sensors.lock().unwrap().remove(node_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (server, _) = listener.accept().await.unwrap();
        (server, client.await.unwrap())
    }

    #[tokio::test]
    async fn broadcast_reaches_all_panels() {
        let registry = ConnectionRegistry::new();

        let (s1, mut c1) = loopback_pair().await;
        let (s2, mut c2) = loopback_pair().await;
        registry.register_panel(PeerWriter::new(s1.into_split().1), "a".into());
        registry.register_panel(PeerWriter::new(s2.into_split().1), "b".into());

        assert_eq!(registry.count_panels(), 2);
        registry.broadcast_to_panels(b"hello").await;

        let got1 = greenhouse_broker_proto::read_frame(&mut c1).await.unwrap();
        let got2 = greenhouse_broker_proto::read_frame(&mut c2).await.unwrap();
        assert_eq!(got1, b"hello");
        assert_eq!(got2, b"hello");
    }

    #[tokio::test]
    async fn broadcast_prunes_dead_panel_but_delivers_to_others() {
        let registry = ConnectionRegistry::new();

        let (s1, mut c1) = loopback_pair().await;
        let (s2, c2) = loopback_pair().await;
        registry.register_panel(PeerWriter::new(s1.into_split().1), "alive".into());
        registry.register_panel(PeerWriter::new(s2.into_split().1), "dead".into());

        drop(c2); // underlying socket closed from the other side

        registry.broadcast_to_panels(b"tick").await;

        let got = greenhouse_broker_proto::read_frame(&mut c1).await.unwrap();
        assert_eq!(got, b"tick");
        assert_eq!(registry.count_panels(), 1);
    }

    #[tokio::test]
    async fn sensor_registration_is_last_write_wins() {
        let registry = ConnectionRegistry::new();
        let (s1, _c1) = loopback_pair().await;
        let (s2, mut c2) = loopback_pair().await;

        registry.register_sensor("dev-1".into(), PeerWriter::new(s1.into_split().1));
        registry.register_sensor("dev-1".into(), PeerWriter::new(s2.into_split().1));

        assert_eq!(registry.count_sensors(), 1);
        assert!(registry.send_to_sensor("dev-1", b"cmd").await);
        let got = greenhouse_broker_proto::read_frame(&mut c2).await.unwrap();
        assert_eq!(got, b"cmd");
    }

    #[tokio::test]
    async fn send_to_unknown_sensor_is_not_delivered() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_sensor("ghost", b"x").await);
    }
}
