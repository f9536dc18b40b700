// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP sensor gateway
//!
//! Wraps the Modbus client behind a single mutex so reads and register
//! writes never overlap. The connection is opened lazily on first use and a
//! failed attempt starts a retry window during which further operations
//! return empty without touching the socket. A failure on a live connection
//! drops the handle; the next operation goes back through the throttle.
//!
//! ## Realtime register map
//!
//! Holding registers 0..6 carry the sensor cluster's current sample, each
//! value scaled as physical × 100:
//!
//! | Register | Field |
//! |----------|-------------|
//! | 0 | soil moisture |
//! | 1 | gas |
//! | 2 | raindrop |
//! | 3 | temperature |
//! | 4 | humidity |
//! | 5 | light |
//!
//! Writes are raw 16-bit values with no interpretation here; callers apply
//! the physical-to-wire scaling themselves.

use std::time::{Duration, Instant};

use chrono::Local;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::config::SensorConfig;
use crate::monitoring::HealthMonitor;
use crate::telemetry::TelemetryReading;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct GatewayState {
    context: Option<Context>,
    last_attempt: Option<Instant>,
}

/// Serialised access to the Modbus sensor cluster.
pub struct SensorGateway {
    config: SensorConfig,
    monitor: HealthMonitor,
    state: Mutex<GatewayState>,
}

impl SensorGateway {
    pub fn new(config: SensorConfig, monitor: HealthMonitor) -> Self {
        Self {
            config,
            monitor,
            state: Mutex::new(GatewayState::default()),
        }
    }

    /// Poll the sensor cluster for one realtime sample.
    ///
    /// Returns `None` when the gateway is disconnected, throttled, or the
    /// read fails; the failure is recorded in the health registry and the
    /// caller is expected to carry on with its cadence.
    pub async fn read_realtime(&self) -> Option<TelemetryReading> {
        let mut state = self.state.lock().await;
        if !self.ensure_connection(&mut state).await {
            return None;
        }

        let count = self.config.registers;
        let registers = {
            let context = state.context.as_mut()?;
            match context.read_holding_registers(0, count).await {
                Ok(registers) => registers,
                Err(err) => {
                    state.context = None;
                    self.handle_failure(format!("readRegisters failed: {err}"));
                    return None;
                }
            }
        };

        let mut reading = TelemetryReading {
            label: "Realtime".to_string(),
            timestamp: local_timestamp(),
            ..TelemetryReading::default()
        };
        if registers.len() >= 6 {
            reading.soil = f64::from(registers[0]) / 100.0;
            reading.gas = f64::from(registers[1]) / 100.0;
            reading.raindrop = f64::from(registers[2]) / 100.0;
            reading.temperature = f64::from(registers[3]) / 100.0;
            reading.humidity = f64::from(registers[4]) / 100.0;
            reading.light = f64::from(registers[5]) / 100.0;
        }

        self.monitor
            .update("sensor_gateway", true, "Realtime sample collected");
        Some(reading)
    }

    /// Write one holding register. Failures are absorbed after a health
    /// update; the command plane never sees a transport error.
    pub async fn write_register(&self, address: u16, value: u16) {
        let mut state = self.state.lock().await;
        if !self.ensure_connection(&mut state).await {
            return;
        }

        let Some(context) = state.context.as_mut() else {
            return;
        };
        match context.write_single_register(address, value).await {
            Ok(()) => {
                self.monitor
                    .update("sensor_gateway", true, "Register write successful");
            }
            Err(err) => {
                state.context = None;
                self.handle_failure(format!("writeRegister failed: {err}"));
            }
        }
    }

    async fn ensure_connection(&self, state: &mut GatewayState) -> bool {
        if state.context.is_some() {
            return true;
        }

        // One reconnect attempt per retry window.
        if let Some(last) = state.last_attempt {
            if last.elapsed() < Duration::from_secs(self.config.retry_seconds) {
                return false;
            }
        }
        state.last_attempt = Some(Instant::now());

        let target = format!("{}:{}", self.config.endpoint, self.config.port);
        let addr = match tokio::net::lookup_host(&target).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    self.handle_failure(format!("Connection error: {target} did not resolve"));
                    return false;
                }
            },
            Err(err) => {
                self.handle_failure(format!("Connection error: {err}"));
                return false;
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, tcp::connect_slave(addr, Slave(1))).await {
            Ok(Ok(context)) => {
                state.context = Some(context);
                self.monitor
                    .update("sensor_gateway", true, "Modbus connected");
                info!(
                    "connected to Modbus sensor at {}:{}",
                    self.config.endpoint, self.config.port
                );
                true
            }
            Ok(Err(err)) => {
                self.handle_failure(format!("Connection error: {err}"));
                false
            }
            Err(_) => {
                self.handle_failure(format!("Connection error: {target} timed out"));
                false
            }
        }
    }

    fn handle_failure(&self, reason: String) {
        warn!("{reason}");
        self.monitor.update("sensor_gateway", false, reason);
    }
}

/// Local wall-clock time in the `YYYY-MM-DD HH:MM:SS` form readings carry.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
