// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Framed TCP fan-out server
//!
//! Subscribers connect over plain TCP and receive telemetry frames as
//! length-prefixed JSON. The same socket carries the command plane: inbound
//! bytes go to the command router and its acknowledgements are written back
//! as bare JSON lines. When a client joins, the registered snapshot
//! provider's frames are published so the newcomer starts from the current
//! cached view; incumbents observe the re-send as a harmless refresh.
//!
//! Delivery is best-effort. `publish` serialises a frame once and queues the
//! same buffer on every live connection; a slow or broken peer never stalls
//! the pipeline or the other subscribers.

pub mod connection;

pub use connection::ConnectionRegistry;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context as _, Result};
use log::{error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::command::DeviceCommandRouter;
use crate::config::PublisherConfig;
use crate::monitoring::HealthMonitor;
use crate::telemetry::codec;
use crate::telemetry::TelemetryFrame;

/// Produces the join-time snapshot frames, one per channel.
pub type SnapshotProvider = Box<dyn Fn() -> Vec<TelemetryFrame> + Send + Sync>;

const HEALTH_COMPONENT: &str = "telemetry_publisher";

struct PublisherInner {
    config: PublisherConfig,
    registry: Arc<ConnectionRegistry>,
    router: Arc<DeviceCommandRouter>,
    monitor: HealthMonitor,
    snapshot_provider: Mutex<Option<Arc<SnapshotProvider>>>,
    shutdown: broadcast::Sender<()>,
    local_addr: OnceLock<SocketAddr>,
}

pub struct TelemetryPublisher {
    inner: Arc<PublisherInner>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPublisher {
    pub fn new(
        config: PublisherConfig,
        registry: Arc<ConnectionRegistry>,
        router: Arc<DeviceCommandRouter>,
        monitor: HealthMonitor,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(PublisherInner {
                config,
                registry,
                router,
                monitor,
                snapshot_provider: Mutex::new(None),
                shutdown,
                local_addr: OnceLock::new(),
            }),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the listener and spawn the accept loop. A bind failure is fatal
    /// to startup and is reported to the caller.
    pub async fn start(&self) -> Result<()> {
        let bind_to = format!(
            "{}:{}",
            self.inner.config.bind_address, self.inner.config.port
        );
        let listener = TcpListener::bind(&bind_to)
            .await
            .with_context(|| format!("failed to start server on {bind_to}"))?;

        if let Ok(addr) = listener.local_addr() {
            let _ = self.inner.local_addr.set(addr);
        }

        self.inner
            .monitor
            .update(HEALTH_COMPONENT, true, "Server listening");
        info!("listening on {bind_to}");

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            accept_loop(inner, listener).await;
        });
        *self.accept_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop accepting, wake every connection task, and drop all subscribers.
    pub fn stop(&self) {
        if let Some(handle) = self.accept_task.lock().unwrap().take() {
            handle.abort();
        }
        let _ = self.inner.shutdown.send(());
        self.inner.registry.clear();
        self.inner
            .monitor
            .update(HEALTH_COMPONENT, false, "Server stopped");
    }

    /// Install the join-time snapshot source. Set once during wiring.
    pub fn set_snapshot_provider(&self, provider: SnapshotProvider) {
        *self.inner.snapshot_provider.lock().unwrap() = Some(Arc::new(provider));
    }

    pub fn has_subscribers(&self) -> bool {
        self.inner.registry.connection_count() > 0
    }

    /// Address the listener actually bound to. Useful when the configured
    /// port is 0 and the OS picked one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Broadcast one frame to every subscriber. With no subscribers this
    /// returns immediately without serialising anything.
    pub fn publish(&self, frame: &TelemetryFrame) {
        publish_frame(&self.inner, frame);
    }
}

fn publish_frame(inner: &PublisherInner, frame: &TelemetryFrame) {
    if inner.registry.connection_count() == 0 {
        return;
    }

    let payload = match codec::encode_frame(frame) {
        Ok(payload) => payload,
        Err(err) => {
            error!("failed to serialise frame: {err}");
            return;
        }
    };

    inner.registry.broadcast(&payload);
    inner
        .monitor
        .update(HEALTH_COMPONENT, true, "Frame delivered to clients");
}

async fn accept_loop(inner: Arc<PublisherInner>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };

        if inner.registry.connection_count() >= usize::from(inner.config.max_connections) {
            warn!("connection limit reached, rejecting {peer}");
            continue;
        }

        handle_new_connection(&inner, stream);
    }
}

fn handle_new_connection(inner: &Arc<PublisherInner>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Vec<u8>>();
    let id = inner.registry.register(sender);

    inner
        .monitor
        .update(HEALTH_COMPONENT, true, format!("Client connected: {id}"));

    // Writer: drain the outbound queue onto the socket until either side
    // goes away.
    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if write_half.write_all(&payload).await.is_err() {
                break;
            }
        }
    });

    // The joiner must see the current cached view; the frames go through the
    // normal publish path, so every subscriber receives them.
    let provider = inner.snapshot_provider.lock().unwrap().clone();
    if let Some(provider) = provider {
        for frame in (*provider)() {
            publish_frame(inner, &frame);
        }
    }

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        read_loop(inner, id, read_half).await;
    });
}

async fn read_loop(inner: Arc<PublisherInner>, id: u64, mut read_half: OwnedReadHalf) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut buffer = vec![0u8; 4096];

    loop {
        tokio::select! {
            read = read_half.read(&mut buffer) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let replies = inner.router.feed(id, &buffer[..n]).await;
                        for reply in replies {
                            let mut payload = reply.into_bytes();
                            payload.push(b'\n');
                            inner.registry.send_to(id, payload);
                        }
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    inner.registry.unregister(id);
    inner.router.forget_connection(id);
    inner.monitor.update(
        HEALTH_COMPONENT,
        true,
        format!("Client disconnected: {id}"),
    );
}
