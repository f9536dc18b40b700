// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Historical telemetry repository
//!
//! Reads the two history relations from the MariaDB store:
//!
//! - `environmental_conditions(time, temperature, humidity, light)`
//! - `soil_and_air_quality(time, soil, gas, raindrop)`
//!
//! Queries fetch the newest rows (`ORDER BY time DESC LIMIT n`) and the
//! result is reversed so callers always see chronological order, oldest
//! first. The pool checks connection liveness before every acquire and
//! re-opens broken connections, which stands in for an explicit
//! ping-then-reconnect cycle. A failed query logs, flags health, and yields
//! an empty list; only the initial connect is fatal.

use anyhow::{Context as _, Result};
use chrono::NaiveDateTime;
use log::error;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::monitoring::HealthMonitor;
use crate::telemetry::TelemetryReading;

const HEALTH_COMPONENT: &str = "telemetry_repo";

pub struct TelemetryRepository {
    pool: MySqlPool,
    monitor: HealthMonitor,
}

impl TelemetryRepository {
    /// Open the connection pool. Failure here aborts startup.
    pub async fn connect(config: &DatabaseConfig, monitor: HealthMonitor) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            config.user, config.password, config.host, config.port, config.schema
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(config.retry_seconds.max(1)))
            .test_before_acquire(true)
            .connect(&url)
            .await
            .with_context(|| {
                format!(
                    "connecting to MariaDB at {}:{}/{}",
                    config.host, config.port, config.schema
                )
            })?;

        monitor.update(HEALTH_COMPONENT, true, "Database connected");
        Ok(Self { pool, monitor })
    }

    /// Newest `limit` environment rows, returned oldest first.
    pub async fn load_environmental(&self, limit: usize) -> Vec<TelemetryReading> {
        let rows = match sqlx::query(
            "SELECT time, temperature, humidity, light \
             FROM environmental_conditions ORDER BY time DESC LIMIT ?",
        )
        .bind(limit as u32)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.record_query_failure("environmental_conditions", &err);
                return Vec::new();
            }
        };

        chronological(rows.iter().map(env_reading_from_row).collect())
    }

    /// Newest `limit` soil/air rows, returned oldest first.
    pub async fn load_soil_and_air(&self, limit: usize) -> Vec<TelemetryReading> {
        let rows = match sqlx::query(
            "SELECT time, soil, gas, raindrop \
             FROM soil_and_air_quality ORDER BY time DESC LIMIT ?",
        )
        .bind(limit as u32)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.record_query_failure("soil_and_air_quality", &err);
                return Vec::new();
            }
        };

        chronological(rows.iter().map(soil_reading_from_row).collect())
    }

    fn record_query_failure(&self, relation: &str, err: &sqlx::Error) {
        error!("query against {relation} failed: {err}");
        self.monitor.update(
            HEALTH_COMPONENT,
            false,
            format!("query against {relation} failed: {err}"),
        );
    }
}

/// Reverse a newest-first result set into chronological order.
fn chronological(mut readings: Vec<TelemetryReading>) -> Vec<TelemetryReading> {
    readings.reverse();
    readings
}

fn env_reading_from_row(row: &MySqlRow) -> TelemetryReading {
    TelemetryReading {
        label: "Historical_ENV".to_string(),
        timestamp: timestamp_cell(row, 0),
        temperature: numeric_cell(row, 1),
        humidity: numeric_cell(row, 2),
        light: numeric_cell(row, 3),
        ..TelemetryReading::default()
    }
}

fn soil_reading_from_row(row: &MySqlRow) -> TelemetryReading {
    TelemetryReading {
        label: "Historical_Soil".to_string(),
        timestamp: timestamp_cell(row, 0),
        soil: numeric_cell(row, 1),
        gas: numeric_cell(row, 2),
        raindrop: numeric_cell(row, 3),
        ..TelemetryReading::default()
    }
}

/// `time` cell as the canonical reading timestamp. NULL or an unexpected
/// column type comes back as `"N/A"`.
fn timestamp_cell(row: &MySqlRow, index: usize) -> String {
    if let Ok(Some(when)) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return when.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(index) {
        return text;
    }
    "N/A".to_string()
}

/// Numeric cell as f64; NULL and unexpected types decode to zero.
fn numeric_cell(row: &MySqlRow, index: usize) -> f64 {
    if let Ok(Some(value)) = row.try_get::<Option<f64>, _>(index) {
        return value;
    }
    if let Ok(Some(value)) = row.try_get::<Option<f32>, _>(index) {
        return f64::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(index) {
        return value as f64;
    }
    0.0
}
