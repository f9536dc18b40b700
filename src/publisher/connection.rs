// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Live connection bookkeeping
//!
//! Each subscriber is a 64-bit id mapped to the sender side of its outbound
//! byte queue. A dedicated writer task per connection drains that queue to
//! the socket, so broadcasting never blocks on a slow peer. The registry is
//! the single source of truth for "who is connected" and is shared between
//! the accept loop, the publish path, and the diagnostics provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection's outbound queue and hand back its id.
    pub fn register(&self, sender: UnboundedSender<Vec<u8>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().insert(id, sender);
        id
    }

    /// Remove a closed connection. Dropping the sender ends its writer task.
    pub fn unregister(&self, id: u64) {
        self.connections.lock().unwrap().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Queue the same payload on every live connection. Delivery is
    /// best-effort; a connection whose writer already went away is skipped.
    pub fn broadcast(&self, payload: &[u8]) {
        let senders: Vec<UnboundedSender<Vec<u8>>> = {
            let connections = self.connections.lock().unwrap();
            connections.values().cloned().collect()
        };
        for sender in senders {
            let _ = sender.send(payload.to_vec());
        }
    }

    /// Queue a payload for one connection only.
    pub fn send_to(&self, id: u64, payload: Vec<u8>) {
        let sender = {
            let connections = self.connections.lock().unwrap();
            connections.get(&id).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.send(payload);
        }
    }

    /// Drop every connection, ending all writer tasks.
    pub fn clear(&self) {
        self.connections.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        let b = registry.register(tx_b);
        assert_ne!(a, b);
        assert_eq!(registry.connection_count(), 2);

        registry.broadcast(b"frame");
        assert_eq!(rx_a.recv().await.unwrap(), b"frame".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"frame".to_vec());
    }

    #[tokio::test]
    async fn send_to_targets_a_single_connection() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        let _b = registry.register(tx_b);

        registry.send_to(a, b"reply".to_vec());
        assert_eq!(rx_a.recv().await.unwrap(), b"reply".to_vec());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_survives_a_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.register(tx_dead);
        registry.register(tx_live);
        drop(rx_dead);

        registry.broadcast(b"frame");
        assert_eq!(rx_live.recv().await.unwrap(), b"frame".to_vec());
    }

    #[test]
    fn unregister_shrinks_the_count() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.unregister(id);
        assert_eq!(registry.connection_count(), 0);
    }
}
