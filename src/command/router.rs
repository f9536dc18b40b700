// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-connection command routing
//!
//! Inbound bytes arrive in arbitrary chunks; the router accumulates them per
//! connection and dispatches every complete `\n`-terminated line as one JSON
//! command. Partial lines survive across chunks. Each command produces at
//! most one single-line JSON acknowledgement, returned to the caller in
//! dispatch order; the transport owns writing them back.
//!
//! ## Commands
//!
//! | type | effect |
//! |------|--------|
//! | `threshold` | write registers 10..13 with soil/rain/temp/light × 100 |
//! | `light_control` | write register 14 with light × 100 |
//! | `mode_select` | write register 15 with the raw mode value |
//! | `write_register` | write an arbitrary register; negative address ignored |
//! | `diagnostics` | reply with the injected diagnostics document |
//! | `config_reload` | raise the reload-requested flag |
//!
//! Errors never close the connection: unknown types and unparsable lines
//! are answered with a single-line error acknowledgement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::monitoring::HealthMonitor;
use crate::sensors::SensorGateway;

/// Builds the JSON document returned for `diagnostics` commands.
pub type DiagnosticsProvider = Box<dyn Fn() -> Value + Send + Sync>;

/// Raises the supervisor's reload-requested flag.
pub type ReloadSignal = Box<dyn Fn() + Send + Sync>;

const HEALTH_COMPONENT: &str = "command_router";

const ACK_THRESHOLD: &str = r#"{"status":"ok","message":"threshold updated"}"#;
const ACK_LIGHT: &str = r#"{"status":"ok","message":"light control updated"}"#;
const ACK_MODE: &str = r#"{"status":"ok","message":"mode updated"}"#;
const ACK_WRITE: &str = r#"{"status":"ok","message":"register write queued"}"#;
const ACK_RELOAD: &str = r#"{"status":"ok","message":"configuration reload requested"}"#;
const ERR_UNKNOWN: &str = r#"{"status":"error","message":"unknown command"}"#;
const ERR_PAYLOAD: &str = r#"{"status":"error","message":"invalid payload"}"#;

pub struct DeviceCommandRouter {
    gateway: Arc<SensorGateway>,
    monitor: HealthMonitor,
    diagnostics: DiagnosticsProvider,
    request_reload: ReloadSignal,
    buffers: Mutex<HashMap<u64, Vec<u8>>>,
}

impl DeviceCommandRouter {
    pub fn new(
        gateway: Arc<SensorGateway>,
        monitor: HealthMonitor,
        diagnostics: DiagnosticsProvider,
        request_reload: ReloadSignal,
    ) -> Self {
        Self {
            gateway,
            monitor,
            diagnostics,
            request_reload,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one inbound chunk for `connection_id` and return the replies for
    /// every complete line it finished, in order.
    pub async fn feed(&self, connection_id: u64, chunk: &[u8]) -> Vec<String> {
        let lines = {
            let mut buffers = self.buffers.lock().unwrap();
            let buffer = buffers.entry(connection_id).or_default();
            buffer.extend_from_slice(chunk);
            drain_lines(buffer)
        };

        let mut replies = Vec::new();
        for line in lines {
            let reply = self.dispatch_line(&line).await;
            if !reply.is_empty() {
                replies.push(reply);
            }
        }
        replies
    }

    /// Drop the inbound buffer of a closed connection.
    pub fn forget_connection(&self, connection_id: u64) {
        self.buffers.lock().unwrap().remove(&connection_id);
    }

    async fn dispatch_line(&self, line: &[u8]) -> String {
        let message: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(err) => {
                self.monitor
                    .update(HEALTH_COMPONENT, false, err.to_string());
                return ERR_PAYLOAD.to_string();
            }
        };
        if !message.is_object() {
            self.monitor.update(
                HEALTH_COMPONENT,
                false,
                "command payload is not a JSON object",
            );
            return ERR_PAYLOAD.to_string();
        }

        match message.get("type").and_then(Value::as_str).unwrap_or("") {
            "threshold" => {
                self.handle_threshold(&message).await;
                ACK_THRESHOLD.to_string()
            }
            "light_control" => {
                self.handle_light_control(&message).await;
                ACK_LIGHT.to_string()
            }
            "mode_select" => {
                self.handle_mode_select(&message).await;
                ACK_MODE.to_string()
            }
            "write_register" => {
                self.handle_direct_write(&message).await;
                ACK_WRITE.to_string()
            }
            "diagnostics" => (self.diagnostics)().to_string(),
            "config_reload" => {
                (self.request_reload)();
                ACK_RELOAD.to_string()
            }
            _ => ERR_UNKNOWN.to_string(),
        }
    }

    async fn handle_threshold(&self, message: &Value) {
        let soil = float_field(message, "soil");
        let rain = float_field(message, "rain");
        let temp = float_field(message, "temp");
        let light = float_field(message, "light");

        self.gateway.write_register(10, to_register(soil)).await;
        self.gateway.write_register(11, to_register(rain)).await;
        self.gateway.write_register(12, to_register(temp)).await;
        self.gateway.write_register(13, to_register(light)).await;
        self.monitor
            .update(HEALTH_COMPONENT, true, "threshold updated");
    }

    async fn handle_light_control(&self, message: &Value) {
        let light = float_field(message, "light");
        self.gateway.write_register(14, to_register(light)).await;
        self.monitor
            .update(HEALTH_COMPONENT, true, "light control updated");
    }

    async fn handle_mode_select(&self, message: &Value) {
        let mode = int_field(message, "mode", 0);
        self.gateway.write_register(15, mode as u16).await;
        self.monitor.update(HEALTH_COMPONENT, true, "mode updated");
    }

    async fn handle_direct_write(&self, message: &Value) {
        let address = int_field(message, "address", -1);
        let value = int_field(message, "value", 0);
        if address >= 0 {
            self.gateway
                .write_register(address as u16, value as u16)
                .await;
        }
    }
}

/// Split every complete `\n`-terminated line off the front of `buffer`,
/// leaving a trailing partial line in place.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

fn float_field(message: &Value, key: &str) -> f64 {
    message.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn int_field(message: &Value, key: &str, default: i64) -> i64 {
    message.get(key).and_then(Value::as_i64).unwrap_or(default)
}

/// Physical value to wire register: × 100, truncated into the u16 range.
fn to_register(value: f64) -> u16 {
    (value * 100.0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        router: DeviceCommandRouter,
        reloads: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let monitor = HealthMonitor::new("unused.json", Duration::from_secs(60));
        let sensor = SensorConfig {
            endpoint: "127.0.0.1".to_string(),
            port: 1,
            retry_seconds: 60,
            registers: 6,
        };
        let gateway = Arc::new(SensorGateway::new(sensor, monitor.clone()));
        let reloads = Arc::new(AtomicUsize::new(0));
        let reload_counter = Arc::clone(&reloads);

        let router = DeviceCommandRouter::new(
            gateway,
            monitor,
            Box::new(|| serde_json::json!({"telemetry": {"subscribers": false}})),
            Box::new(move || {
                reload_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        Fixture { router, reloads }
    }

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buffer = b"one\ntwo\nthr".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(buffer, b"thr".to_vec());

        buffer.extend_from_slice(b"ee\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"three".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn to_register_scales_and_truncates() {
        assert_eq!(to_register(50.0), 5000);
        assert_eq!(to_register(30.0), 3000);
        assert_eq!(to_register(25.0), 2500);
        assert_eq!(to_register(0.0), 0);
        // Out-of-range products clamp at the register ceiling.
        assert_eq!(to_register(800.0), u16::MAX);
    }

    #[tokio::test]
    async fn unknown_command_gets_an_error_ack_and_the_connection_survives() {
        let fixture = fixture();
        let replies = fixture.router.feed(1, b"{\"type\":\"nope\"}\n").await;
        assert_eq!(replies, vec![ERR_UNKNOWN.to_string()]);

        let replies = fixture.router.feed(1, b"{\"type\":\"config_reload\"}\n").await;
        assert_eq!(replies, vec![ACK_RELOAD.to_string()]);
        assert_eq!(fixture.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_line_flags_health_and_acks_invalid_payload() {
        let fixture = fixture();
        let replies = fixture.router.feed(7, b"{oops\n").await;
        assert_eq!(replies, vec![ERR_PAYLOAD.to_string()]);

        let state = fixture.router.monitor.state_of("command_router").unwrap();
        assert!(!state.healthy);
    }

    #[tokio::test]
    async fn non_object_json_is_an_invalid_payload() {
        let fixture = fixture();
        let replies = fixture.router.feed(7, b"42\n").await;
        assert_eq!(replies, vec![ERR_PAYLOAD.to_string()]);
    }

    #[tokio::test]
    async fn chunk_splitting_does_not_change_the_dispatched_lines() {
        let stream: &[u8] =
            b"{\"type\":\"diagnostics\"}\n{\"type\":\"nope\"}\n{\"type\":\"config_reload\"}\n";

        let whole = fixture();
        let mut expected = Vec::new();
        expected.extend(whole.router.feed(1, stream).await);

        for split in [1usize, 3, 7, 20] {
            let chunked = fixture();
            let mut replies = Vec::new();
            for piece in stream.chunks(split) {
                replies.extend(chunked.router.feed(1, piece).await);
            }
            assert_eq!(replies, expected, "chunk size {split}");
        }
    }

    #[tokio::test]
    async fn buffers_are_per_connection() {
        let fixture = fixture();
        // Connection 1 leaves a partial line behind.
        assert!(fixture.router.feed(1, b"{\"type\":\"config").await.is_empty());
        // Connection 2 is unaffected by it.
        let replies = fixture.router.feed(2, b"{\"type\":\"nope\"}\n").await;
        assert_eq!(replies, vec![ERR_UNKNOWN.to_string()]);

        // Completing connection 1's line works across the interleaving.
        let replies = fixture.router.feed(1, b"_reload\"}\n").await;
        assert_eq!(replies, vec![ACK_RELOAD.to_string()]);
    }

    #[tokio::test]
    async fn forget_connection_discards_the_partial_line() {
        let fixture = fixture();
        assert!(fixture.router.feed(1, b"{\"type\":\"con").await.is_empty());
        fixture.router.forget_connection(1);

        // A fresh buffer starts clean, so this line parses on its own.
        let replies = fixture.router.feed(1, b"{\"type\":\"nope\"}\n").await;
        assert_eq!(replies, vec![ERR_UNKNOWN.to_string()]);
    }

    #[tokio::test]
    async fn missing_numeric_fields_default_to_zero() {
        let fixture = fixture();
        // Gateway endpoint is unreachable, so the writes are absorbed; the
        // acknowledgement contract holds regardless.
        let replies = fixture.router.feed(3, b"{\"type\":\"threshold\"}\n").await;
        assert_eq!(replies, vec![ACK_THRESHOLD.to_string()]);

        let replies = fixture
            .router
            .feed(3, b"{\"type\":\"write_register\",\"value\":9}\n")
            .await;
        // Default address is negative, so the write is ignored but acked.
        assert_eq!(replies, vec![ACK_WRITE.to_string()]);
    }

    #[tokio::test]
    async fn diagnostics_reply_is_the_provider_document() {
        let fixture = fixture();
        let replies = fixture.router.feed(4, b"{\"type\":\"diagnostics\"}\n").await;
        assert_eq!(replies.len(), 1);

        let parsed: Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(parsed["telemetry"]["subscribers"], false);
    }
}
