// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Cross-component health registry
//!
//! Every worker reports its condition here under a stable component name.
//! A background task serialises the registry to a JSON status file on a
//! fixed interval so external tooling can watch the process without an API.
//! Entries are last-writer-wins; the registry is not an event log.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Condition of one component at the time of its most recent update.
#[derive(Debug, Clone, Serialize)]
pub struct HealthState {
    pub healthy: bool,
    pub detail: String,
    /// Unix seconds of the update.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

struct MonitorInner {
    status_file: PathBuf,
    interval: Duration,
    states: Mutex<HashMap<String, HealthState>>,
    running: AtomicBool,
    wake: Notify,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the shared health registry.
///
/// `update` may be called from any task. `start` spawns the periodic file
/// writer; `stop` wakes it, waits for a final flush, and returns once the
/// status file reflects the last updates.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(status_file: impl AsRef<Path>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                status_file: status_file.as_ref().to_path_buf(),
                interval,
                states: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                wake: Notify::new(),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Replace the entry for `component` and stamp it with the current time.
    pub fn update(&self, component: &str, healthy: bool, detail: impl Into<String>) {
        let state = HealthState {
            healthy,
            detail: detail.into(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        let mut states = self.inner.states.lock().unwrap();
        states.insert(component.to_string(), state);
    }

    /// Latest recorded state of `component`, if it ever reported.
    pub fn state_of(&self, component: &str) -> Option<HealthState> {
        self.inner.states.lock().unwrap().get(component).cloned()
    }

    /// Spawn the periodic status-file writer. Calling `start` twice is a
    /// no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("health monitor is already running");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while inner.running.load(Ordering::SeqCst) {
                write_snapshot(&inner).await;
                tokio::select! {
                    _ = tokio::time::sleep(inner.interval) => {}
                    _ = inner.wake.notified() => {}
                }
            }
            // One last flush so the file carries the final component states.
            write_snapshot(&inner).await;
        });
        *self.inner.writer.lock().unwrap() = Some(handle);
    }

    /// Stop the writer after a final flush.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.wake.notify_one();

        let handle = self.inner.writer.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("health monitor writer did not stop within timeout");
            }
        }
    }
}

async fn write_snapshot(inner: &MonitorInner) {
    // Copy into an ordered map so the file is stable across rewrites.
    let snapshot: BTreeMap<String, HealthState> = {
        let states = inner.states.lock().unwrap();
        states
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    };

    let json = match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => json,
        Err(err) => {
            error!("failed to serialise health information: {err}");
            return;
        }
    };

    if let Some(parent) = inner.status_file.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                error!("failed to create health status directory: {err}");
                return;
            }
        }
    }

    if let Err(err) = tokio::fs::write(&inner.status_file, json).await {
        error!("failed to persist health information: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_last_writer_wins() {
        let monitor = HealthMonitor::new("unused.json", Duration::from_secs(60));

        monitor.update("sensor_gateway", true, "connected");
        monitor.update("sensor_gateway", false, "read failed");
        monitor.update("sensor_gateway", true, "recovered");

        let state = monitor.state_of("sensor_gateway").unwrap();
        assert!(state.healthy);
        assert_eq!(state.detail, "recovered");
    }

    #[test]
    fn components_are_tracked_independently() {
        let monitor = HealthMonitor::new("unused.json", Duration::from_secs(60));
        monitor.update("a", true, "fine");
        monitor.update("b", false, "broken");

        assert!(monitor.state_of("a").unwrap().healthy);
        assert!(!monitor.state_of("b").unwrap().healthy);
        assert!(monitor.state_of("c").is_none());
    }

    #[tokio::test]
    async fn stop_flushes_final_states_to_the_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("health_status.json");
        let monitor = HealthMonitor::new(&path, Duration::from_secs(3600));

        monitor.start();
        monitor.update("telemetry_service", true, "Realtime frame published");
        monitor.stop().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["telemetry_service"]["healthy"], true);
        assert_eq!(
            parsed["telemetry_service"]["detail"],
            "Realtime frame published"
        );
        assert!(parsed["telemetry_service"]["updatedAt"].is_i64());
    }
}
