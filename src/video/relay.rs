// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Video packet relay
//!
//! An orthogonal pub/sub of opaque byte packets on its own port. A client
//! declares itself with a payload starting `ROLE:` (`ROLE:PUBLISHER` or
//! `ROLE:SUBSCRIBER`; subscriber is the default). Packets received from
//! publishers are queued and a relay task fans each one out to every
//! subscriber. The payloads are never inspected beyond the role prefix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::monitoring::HealthMonitor;

const HEALTH_COMPONENT: &str = "video_manager";
const ROLE_PREFIX: &[u8] = b"ROLE:";

struct VideoClient {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    is_publisher: bool,
}

#[derive(Default)]
struct ClientMap {
    clients: Mutex<HashMap<u64, VideoClient>>,
    next_id: AtomicU64,
}

pub struct VideoRelay {
    monitor: HealthMonitor,
    clients: Arc<ClientMap>,
    tasks: Vec<JoinHandle<()>>,
}

impl VideoRelay {
    pub fn new(monitor: HealthMonitor) -> Self {
        Self {
            monitor,
            clients: Arc::new(ClientMap::default()),
            tasks: Vec::new(),
        }
    }

    /// Bind the relay port and spawn the accept and fan-out tasks. The
    /// caller treats a failure here as non-fatal.
    pub async fn start(&mut self, port: u16) -> Result<()> {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                self.monitor.update(HEALTH_COMPONENT, false, "Start failed");
                return Err(err).with_context(|| format!("failed to start server on port {port}"));
            }
        };

        let (packet_tx, mut packet_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let relay_clients = Arc::clone(&self.clients);
        let relay_monitor = self.monitor.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(packet) = packet_rx.recv().await {
                fan_out(&relay_clients, &packet);
                relay_monitor.update(HEALTH_COMPONENT, true, "Video packet broadcast");
            }
        }));

        let accept_clients = Arc::clone(&self.clients);
        let accept_monitor = self.monitor.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("video accept failed: {err}");
                        continue;
                    }
                };
                spawn_client(
                    stream,
                    Arc::clone(&accept_clients),
                    accept_monitor.clone(),
                    packet_tx.clone(),
                );
            }
        }));

        info!("video relay started on port {port}");
        self.monitor.update(
            HEALTH_COMPONENT,
            true,
            format!("Listening on port {port}"),
        );
        Ok(())
    }

    /// Tear down the relay and every client task.
    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.clients.clients.lock().unwrap().clear();
    }
}

fn spawn_client(
    stream: TcpStream,
    clients: Arc<ClientMap>,
    monitor: HealthMonitor,
    packet_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Vec<u8>>();

    let id = clients.next_id.fetch_add(1, Ordering::SeqCst);
    clients.clients.lock().unwrap().insert(
        id,
        VideoClient {
            sender,
            is_publisher: false,
        },
    );
    info!("video client connected: {id}");
    monitor.update(HEALTH_COMPONENT, true, format!("Client connected: {id}"));

    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if write_half.write_all(&payload).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            match read_half.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(n) => handle_payload(&clients, id, &buffer[..n], &packet_tx),
            }
        }

        clients.clients.lock().unwrap().remove(&id);
        info!("video client disconnected: {id}");
        monitor.update(
            HEALTH_COMPONENT,
            true,
            format!("Client disconnected: {id}"),
        );
    });
}

fn handle_payload(
    clients: &ClientMap,
    id: u64,
    payload: &[u8],
    packet_tx: &mpsc::UnboundedSender<Vec<u8>>,
) {
    // Role declarations update the client record and are not relayed.
    if payload.starts_with(ROLE_PREFIX) {
        let role = &payload[ROLE_PREFIX.len()..];
        let mut map = clients.clients.lock().unwrap();
        if let Some(client) = map.get_mut(&id) {
            client.is_publisher = role == b"PUBLISHER";
            info!(
                "video client {id} role updated -> {}",
                String::from_utf8_lossy(role)
            );
        }
        return;
    }

    {
        let map = clients.clients.lock().unwrap();
        if let Some(client) = map.get(&id) {
            if !client.is_publisher {
                warn!("video subscriber {id} attempted to push data, ignored");
                return;
            }
        }
    }

    let _ = packet_tx.send(payload.to_vec());
}

fn fan_out(clients: &ClientMap, packet: &[u8]) {
    let subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>> = {
        let map = clients.clients.lock().unwrap();
        map.values()
            .filter(|client| !client.is_publisher)
            .map(|client| client.sender.clone())
            .collect()
    };
    for subscriber in subscribers {
        let _ = subscriber.send(packet.to_vec());
    }
}
