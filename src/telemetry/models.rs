// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Core telemetry data model
//!
//! A [`TelemetryReading`] is one timestamped sample. Readings travel in
//! [`TelemetryFrame`]s, each tagged with the [`TelemetryChannel`] it belongs
//! to. Frames serialise to JSON with the exact field names expected by the
//! operator clients, so the serde attributes here are part of the wire
//! contract.

use serde::{Deserialize, Serialize};

/// The three logical telemetry streams carried over one TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryChannel {
    /// Live sensor samples, one reading per frame.
    #[serde(rename = "realtime")]
    Realtime,
    /// Historical rows from the `environmental_conditions` relation.
    #[serde(rename = "historical_env")]
    HistoricalEnvironment,
    /// Historical rows from the `soil_and_air_quality` relation.
    #[serde(rename = "historical_soil")]
    HistoricalSoil,
}

impl TelemetryChannel {
    /// Wire name of the channel, as it appears in the frame JSON.
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryChannel::Realtime => "realtime",
            TelemetryChannel::HistoricalEnvironment => "historical_env",
            TelemetryChannel::HistoricalSoil => "historical_soil",
        }
    }
}

/// One timestamped sample. Fields a producing path does not populate stay
/// zero; historical environment rows carry no soil/gas/raindrop values and
/// soil/air rows carry no temperature/humidity/light values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub label: String,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
    pub soil: f64,
    pub gas: f64,
    pub raindrop: f64,
}

impl Default for TelemetryReading {
    fn default() -> Self {
        Self {
            label: "Realtime".to_string(),
            timestamp: String::new(),
            temperature: 0.0,
            humidity: 0.0,
            light: 0.0,
            soil: 0.0,
            gas: 0.0,
            raindrop: 0.0,
        }
    }
}

/// The publish unit sent to subscribers.
///
/// `snapshot` marks a replay of cached state delivered when a client joins;
/// incremental realtime pushes carry `snapshot = false`. Historical pushes
/// keep `snapshot = true`; clients treat the flag as a hint rather than a
/// strict invariant. `correlation_id` is a process-local `frame-<N>` string
/// from a monotonic counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub channel: TelemetryChannel,
    pub snapshot: bool,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub readings: Vec<TelemetryReading>,
}
