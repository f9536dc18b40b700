// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end tests for the framed TCP publisher and its command plane.
//!
//! Each test binds its own publisher on an ephemeral port and talks to it
//! with a plain `TcpStream`, the same way an operator client would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use aqua_regulator::command::DeviceCommandRouter;
use aqua_regulator::config::{PublisherConfig, SensorConfig};
use aqua_regulator::monitoring::HealthMonitor;
use aqua_regulator::publisher::{ConnectionRegistry, TelemetryPublisher};
use aqua_regulator::sensors::SensorGateway;
use aqua_regulator::telemetry::{TelemetryChannel, TelemetryFrame, TelemetryReading};

struct TestBackend {
    publisher: Arc<TelemetryPublisher>,
    addr: SocketAddr,
    reloads: Arc<AtomicUsize>,
}

async fn spawn_backend(max_connections: u16) -> TestBackend {
    let monitor = HealthMonitor::new("unused.json", Duration::from_secs(3600));

    // The sensor endpoint is intentionally unreachable; register writes are
    // absorbed after a failed connect, which is all the command tests need.
    let gateway = Arc::new(SensorGateway::new(
        SensorConfig {
            endpoint: "127.0.0.1".to_string(),
            port: 1,
            retry_seconds: 600,
            registers: 6,
        },
        monitor.clone(),
    ));

    let registry = Arc::new(ConnectionRegistry::new());
    let diagnostics_registry = Arc::clone(&registry);
    let reloads = Arc::new(AtomicUsize::new(0));
    let reload_counter = Arc::clone(&reloads);

    let router = Arc::new(DeviceCommandRouter::new(
        gateway,
        monitor.clone(),
        Box::new(move || {
            serde_json::json!({
                "telemetry": {"subscribers": diagnostics_registry.connection_count() > 0},
                "pipeline": {"realtimeSeconds": 5, "historicalSeconds": 60},
            })
        }),
        Box::new(move || {
            reload_counter.fetch_add(1, Ordering::SeqCst);
        }),
    ));

    let publisher = Arc::new(TelemetryPublisher::new(
        PublisherConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            worker_threads: 4,
            max_connections,
        },
        registry,
        router,
        monitor,
    ));
    publisher.start().await.expect("publisher must bind");
    let addr = publisher.local_addr().expect("bound address");

    TestBackend {
        publisher,
        addr,
        reloads,
    }
}

fn reading(label: &str) -> TelemetryReading {
    TelemetryReading {
        label: label.to_string(),
        timestamp: "2024-01-14 10:30:45".to_string(),
        ..TelemetryReading::default()
    }
}

fn join_frame() -> TelemetryFrame {
    TelemetryFrame {
        channel: TelemetryChannel::Realtime,
        snapshot: true,
        correlation_id: "frame-1".to_string(),
        readings: vec![reading("R1"), reading("R2"), reading("R3")],
    }
}

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> (usize, TelemetryFrame) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.expect("frame header");
    let body_len = u32::from_be_bytes(header) as usize;

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await.expect("frame body");
    let frame = serde_json::from_slice(&body).expect("frame body is JSON");
    (body_len, frame)
}

async fn read_reply_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("reply line");
    assert!(line.ends_with('\n'), "replies are newline terminated");
    line.trim_end_matches('\n').to_string()
}

#[tokio::test]
async fn join_snapshot_is_length_prefixed_and_ordered() {
    let backend = spawn_backend(8).await;
    backend.publisher.set_snapshot_provider(Box::new(|| vec![join_frame()]));

    let mut client = TcpStream::connect(backend.addr).await.unwrap();
    let (body_len, frame) = read_frame(&mut client).await;

    // The announced length is exactly the JSON body that follows.
    assert!(body_len > 0);
    assert_eq!(frame, join_frame());
    let labels: Vec<&str> = frame.readings.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["R1", "R2", "R3"]);

    backend.publisher.stop();
}

#[tokio::test]
async fn published_frames_arrive_in_order_after_the_snapshot() {
    let backend = spawn_backend(8).await;
    backend.publisher.set_snapshot_provider(Box::new(|| vec![join_frame()]));

    let mut client = TcpStream::connect(backend.addr).await.unwrap();
    // The join snapshot doubles as the registration barrier.
    let (_, snapshot) = read_frame(&mut client).await;
    assert!(snapshot.snapshot);

    for n in [2u64, 3] {
        let frame = TelemetryFrame {
            channel: TelemetryChannel::Realtime,
            snapshot: false,
            correlation_id: format!("frame-{n}"),
            readings: vec![reading("live")],
        };
        backend.publisher.publish(&frame);
    }

    let (_, first) = read_frame(&mut client).await;
    let (_, second) = read_frame(&mut client).await;
    assert_eq!(first.correlation_id, "frame-2");
    assert!(!first.snapshot);
    assert_eq!(second.correlation_id, "frame-3");

    backend.publisher.stop();
}

#[tokio::test]
async fn chunked_threshold_then_diagnostics_replies_in_order() {
    let backend = spawn_backend(8).await;

    let client = TcpStream::connect(backend.addr).await.unwrap();
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    // One command split mid-word across two writes, then a second command
    // in the same chunk as the first one's tail.
    write_half.write_all(b"{\"type\":\"thr").await.unwrap();
    write_half
        .write_all(
            b"eshold\",\"soil\":50,\"rain\":30,\"temp\":25,\"light\":800}\n{\"type\":\"diagnostics\"}\n",
        )
        .await
        .unwrap();

    let first = read_reply_line(&mut reader).await;
    assert_eq!(first, r#"{"status":"ok","message":"threshold updated"}"#);

    let second = read_reply_line(&mut reader).await;
    let diagnostics: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(diagnostics["telemetry"]["subscribers"], true);
    assert_eq!(diagnostics["pipeline"]["realtimeSeconds"], 5);
    assert_eq!(diagnostics["pipeline"]["historicalSeconds"], 60);

    backend.publisher.stop();
}

#[tokio::test]
async fn unknown_command_leaves_the_connection_usable() {
    let backend = spawn_backend(8).await;

    let client = TcpStream::connect(backend.addr).await.unwrap();
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"{\"type\":\"nope\"}\n").await.unwrap();
    assert_eq!(
        read_reply_line(&mut reader).await,
        r#"{"status":"error","message":"unknown command"}"#
    );

    write_half
        .write_all(b"{\"type\":\"config_reload\"}\n")
        .await
        .unwrap();
    assert_eq!(
        read_reply_line(&mut reader).await,
        r#"{"status":"ok","message":"configuration reload requested"}"#
    );
    assert_eq!(backend.reloads.load(Ordering::SeqCst), 1);

    backend.publisher.stop();
}

#[tokio::test]
async fn publish_without_subscribers_returns_immediately() {
    let backend = spawn_backend(8).await;

    assert!(!backend.publisher.has_subscribers());
    let started = std::time::Instant::now();
    backend.publisher.publish(&join_frame());
    assert!(started.elapsed() < Duration::from_millis(100));

    backend.publisher.stop();
}

#[tokio::test]
async fn connections_beyond_the_limit_are_rejected() {
    let backend = spawn_backend(1).await;
    backend.publisher.set_snapshot_provider(Box::new(|| vec![join_frame()]));

    let mut first = TcpStream::connect(backend.addr).await.unwrap();
    // Wait for the snapshot so the first connection is fully registered
    // before the second one arrives.
    let _ = read_frame(&mut first).await;

    let mut second = TcpStream::connect(backend.addr).await.unwrap();
    let mut buffer = [0u8; 16];
    // The server drops the excess connection without writing anything.
    let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buffer))
        .await
        .expect("rejected connection closes promptly");
    assert_eq!(read.unwrap_or(0), 0);

    assert!(backend.publisher.has_subscribers());
    backend.publisher.stop();
}
