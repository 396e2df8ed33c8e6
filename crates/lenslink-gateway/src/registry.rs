//! Connection registry: owns every live WebSocket connection and the
//! at-most-one-producer / at-most-one-viewer role binding.
//!
//! Connections enter unbound; their first role claim binds them to a slot.
//! A later claim on an occupied slot replaces the binding without closing
//! the displaced connection, which stays registered until it disconnects or
//! fails a liveness probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Shared handle to the registry. All access goes through this lock; no
/// lock is held across an awaited send.
pub type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unbound,
    Producer,
    Viewer,
}

/// One registered transport connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub connected_at: Instant,
    outbox: mpsc::Sender<Message>,
    shutdown: mpsc::Sender<()>,
    probe_outstanding: bool,
    last_ack: Instant,
}

impl Connection {
    /// Queue a message without blocking. A full or closed outbox is a drop.
    pub fn try_send(&self, msg: Message) -> bool {
        self.outbox.try_send(msg).is_ok()
    }

    /// When the last liveness probe was acknowledged.
    pub fn last_ack(&self) -> Instant {
        self.last_ack
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    producer: Option<ConnectionId>,
    viewer: Option<ConnectionId>,
    next_id: ConnectionId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. It starts unbound and counts as alive
    /// until it misses a probe.
    pub fn register(
        &mut self,
        outbox: mpsc::Sender<Message>,
        shutdown: mpsc::Sender<()>,
    ) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        let now = Instant::now();
        self.connections.insert(
            id,
            Connection {
                id,
                role: Role::Unbound,
                connected_at: now,
                outbox,
                shutdown,
                probe_outstanding: false,
                last_ack: now,
            },
        );
        id
    }

    /// Bind `id` to `role`, displacing whatever connection held the slot.
    /// The displaced connection reverts to unbound but stays open. Unknown
    /// ids are a no-op.
    pub fn bind_role(&mut self, id: ConnectionId, role: Role) {
        if role == Role::Unbound {
            return;
        }
        let Some(current) = self.connections.get(&id).map(|c| c.role) else {
            debug!(id, "role claim from unknown connection ignored");
            return;
        };
        // A connection switching roles vacates the slot it held.
        if current != role {
            match current {
                Role::Producer => self.producer = self.producer.filter(|p| *p != id),
                Role::Viewer => self.viewer = self.viewer.filter(|v| *v != id),
                Role::Unbound => {}
            }
        }
        let slot = match role {
            Role::Producer => &mut self.producer,
            Role::Viewer => &mut self.viewer,
            Role::Unbound => return,
        };
        let displaced = slot.replace(id).filter(|prev| *prev != id);
        if let Some(prev) = displaced {
            if let Some(conn) = self.connections.get_mut(&prev) {
                conn.role = Role::Unbound;
            }
            debug!(prev, id, ?role, "role binding replaced");
        }
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.role = role;
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.connections.get(&id).map(|c| c.role)
    }

    pub fn producer(&self) -> Option<&Connection> {
        self.producer.and_then(|id| self.connections.get(&id))
    }

    pub fn viewer(&self) -> Option<&Connection> {
        self.viewer.and_then(|id| self.connections.get(&id))
    }

    /// The connection bound opposite to `role`, if any.
    pub fn lookup_counterpart(&self, role: Role) -> Option<&Connection> {
        match role {
            Role::Producer => self.viewer(),
            Role::Viewer => self.producer(),
            Role::Unbound => None,
        }
    }

    /// Remove a connection; a role slot pointing at it is cleared.
    pub fn unregister(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            if self.producer == Some(id) {
                self.producer = None;
            }
            if self.viewer == Some(id) {
                self.viewer = None;
            }
        }
    }

    /// Force-close the transport and drop the registration.
    pub fn evict(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get(&id) {
            let _ = conn.outbox.try_send(Message::Close(None));
            let _ = conn.shutdown.try_send(());
        }
        self.unregister(id);
    }

    /// Record a probe acknowledgment from the transport.
    pub fn mark_alive(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.probe_outstanding = false;
            conn.last_ack = Instant::now();
        }
    }

    /// One probe cycle: evict connections still owing an ack from the
    /// previous cycle, then mark and ping the rest. Returns the evicted
    /// ids. A dead connection survives at most two cycles.
    pub fn sweep(&mut self) -> Vec<ConnectionId> {
        let stale: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.probe_outstanding)
            .map(|c| c.id)
            .collect();
        for id in stale.iter().copied() {
            warn!(id, "connection failed liveness probe, evicting");
            self.evict(id);
        }
        for conn in self.connections.values_mut() {
            conn.probe_outstanding = true;
            if conn.outbox.try_send(Message::Ping(Vec::new())).is_err() {
                debug!(id = conn.id, "probe not queued, outbox unavailable");
            }
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(reg: &mut Registry) -> (ConnectionId, mpsc::Receiver<Message>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let id = reg.register(tx, shutdown_tx);
        (id, rx, shutdown_rx)
    }

    #[test]
    fn ids_are_monotonic_and_connections_start_unbound() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);
        let (b, _rx_b, _sd_b) = connect(&mut reg);

        assert!(b > a);
        assert_eq!(reg.role_of(a), Some(Role::Unbound));
        assert!(reg.producer().is_none());
        assert!(reg.viewer().is_none());
    }

    #[test]
    fn role_binding_has_a_single_winner() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);
        let (b, _rx_b, _sd_b) = connect(&mut reg);

        reg.bind_role(a, Role::Producer);
        reg.bind_role(b, Role::Producer);

        assert_eq!(reg.producer().map(|c| c.id), Some(b));
        assert_eq!(reg.role_of(a), Some(Role::Unbound));
        assert_eq!(reg.role_of(b), Some(Role::Producer));
    }

    #[test]
    fn displaced_connection_is_not_closed() {
        let mut reg = Registry::new();
        let (a, _rx_a, mut sd_a) = connect(&mut reg);
        let (b, _rx_b, _sd_b) = connect(&mut reg);

        reg.bind_role(a, Role::Producer);
        reg.bind_role(b, Role::Producer);

        assert!(reg.get(a).is_some(), "displaced connection stays registered");
        assert!(sd_a.try_recv().is_err(), "no shutdown was signaled");
    }

    #[test]
    fn switching_roles_vacates_the_previous_slot() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);

        reg.bind_role(a, Role::Viewer);
        reg.bind_role(a, Role::Producer);

        assert!(reg.viewer().is_none());
        assert_eq!(reg.producer().map(|c| c.id), Some(a));
        assert_eq!(reg.role_of(a), Some(Role::Producer));
    }

    #[test]
    fn counterpart_lookup_crosses_the_slots() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);
        let (b, _rx_b, _sd_b) = connect(&mut reg);

        reg.bind_role(a, Role::Producer);
        reg.bind_role(b, Role::Viewer);

        assert_eq!(reg.lookup_counterpart(Role::Producer).map(|c| c.id), Some(b));
        assert_eq!(reg.lookup_counterpart(Role::Viewer).map(|c| c.id), Some(a));
        assert!(reg.lookup_counterpart(Role::Unbound).is_none());
    }

    #[test]
    fn unregister_clears_the_role_slot() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);

        reg.bind_role(a, Role::Producer);
        reg.unregister(a);

        assert!(reg.get(a).is_none());
        assert!(reg.producer().is_none());
    }

    #[test]
    fn evict_signals_shutdown_and_unregisters() {
        let mut reg = Registry::new();
        let (a, mut rx_a, mut sd_a) = connect(&mut reg);

        reg.bind_role(a, Role::Viewer);
        reg.evict(a);

        assert!(reg.get(a).is_none());
        assert!(reg.viewer().is_none());
        assert!(sd_a.try_recv().is_ok(), "eviction fires the shutdown handle");
        assert!(matches!(rx_a.try_recv(), Ok(Message::Close(_))));
    }

    #[test]
    fn sweep_probes_then_evicts_on_the_second_miss() {
        let mut reg = Registry::new();
        let (a, mut rx_a, _sd_a) = connect(&mut reg);
        reg.bind_role(a, Role::Producer);

        assert!(reg.sweep().is_empty(), "first sweep only probes");
        assert!(matches!(rx_a.try_recv(), Ok(Message::Ping(_))));

        let evicted = reg.sweep();
        assert_eq!(evicted, vec![a]);
        assert!(reg.get(a).is_none());
        assert!(reg.producer().is_none(), "eviction empties the role slot");
    }

    #[test]
    fn probe_ack_resets_the_window() {
        let mut reg = Registry::new();
        let (a, _rx_a, _sd_a) = connect(&mut reg);

        assert!(reg.sweep().is_empty());
        reg.mark_alive(a);
        assert!(reg.sweep().is_empty(), "acked connection is probed again");
        assert!(reg.get(a).is_some());
    }
}
