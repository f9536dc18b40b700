// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Application configuration
//!
//! The configuration file is a single JSON document with one section per
//! subsystem. Every field has a default; unknown fields are ignored and a
//! missing file is replaced by a generated template, so a bare checkout
//! starts without manual setup. [`manager::ConfigManager`] owns loading and
//! modification-time probing.

pub mod manager;

pub use manager::ConfigManager;

use serde::{Deserialize, Serialize};

/// Connection settings for the MariaDB historical store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Database (schema) name holding the history relations.
    pub schema: String,
    pub port: u16,
    /// Upper bound for ad-hoc recent-row queries.
    #[serde(rename = "recentLimit")]
    pub read_recent_limit: u16,
    #[serde(rename = "retrySeconds")]
    pub retry_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "192.168.31.250".to_string(),
            user: "devuser".to_string(),
            password: "123456".to_string(),
            schema: "testdb".to_string(),
            port: 3306,
            read_recent_limit: 50,
            retry_seconds: 5,
        }
    }
}

/// Modbus/TCP sensor cluster endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub endpoint: String,
    pub port: u16,
    /// Minimum delay between reconnect attempts after a failure.
    #[serde(rename = "retrySeconds")]
    pub retry_seconds: u64,
    /// Number of holding registers read per realtime sample.
    pub registers: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            endpoint: "192.168.31.186".to_string(),
            port: 502,
            retry_seconds: 5,
            registers: 6,
        }
    }
}

/// Framed TCP fan-out server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    #[serde(rename = "bindAddress")]
    pub bind_address: String,
    pub port: u16,
    /// Sizing hint for the runtime's I/O worker threads.
    #[serde(rename = "workerThreads")]
    pub worker_threads: u16,
    #[serde(rename = "maxConnections")]
    pub max_connections: u16,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5555,
            worker_threads: 4,
            max_connections: 200,
        }
    }
}

/// Video relay listen port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub port: u16,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { port: 6000 }
    }
}

/// Health registry snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(rename = "statusFile")]
    pub status_file: String,
    #[serde(rename = "intervalSeconds")]
    pub interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            status_file: "artifacts/health_status.json".to_string(),
            interval_seconds: 10,
        }
    }
}

/// Telemetry pipeline cadences and cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seconds between realtime sensor polls.
    #[serde(rename = "realtimeSeconds")]
    pub realtime_interval_seconds: u64,
    /// Seconds between historical store refreshes.
    #[serde(rename = "historicalSeconds")]
    pub historical_interval_seconds: u64,
    /// Per-channel cache capacity, also the historical query limit.
    #[serde(rename = "cacheSize")]
    pub cache_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            realtime_interval_seconds: 5,
            historical_interval_seconds: 60,
            cache_size: 120,
        }
    }
}

/// Aggregate of every configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sensor: SensorConfig,
    pub publisher: PublisherConfig,
    pub video: VideoConfig,
    pub health: HealthConfig,
    pub pipeline: PipelineConfig,
}
