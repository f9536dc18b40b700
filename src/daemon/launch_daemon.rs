// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon supervisor
//!
//! Wires the component graph in dependency order and owns every long-lived
//! service for the lifetime of the process:
//!
//! 1. health registry (always first, everything reports into it)
//! 2. historical repository (database connect failure aborts startup)
//! 3. sensor gateway
//! 4. command router, with the diagnostics and reload hooks injected
//! 5. frame publisher (bind failure aborts startup)
//! 6. telemetry pipeline
//! 7. video relay (start failure is logged and tolerated)
//!
//! Shutdown runs the reverse dependency order: video, pipeline, publisher,
//! health registry, so no background task outlives a component it calls
//! into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde_json::json;

use crate::command::DeviceCommandRouter;
use crate::config::Config;
use crate::database::TelemetryRepository;
use crate::monitoring::HealthMonitor;
use crate::pipeline::TelemetryService;
use crate::publisher::{ConnectionRegistry, TelemetryPublisher};
use crate::sensors::SensorGateway;
use crate::video::VideoRelay;

/// Owns the wired component graph.
pub struct Daemon {
    reload_requested: Arc<AtomicBool>,
    monitor: Option<HealthMonitor>,
    publisher: Option<Arc<TelemetryPublisher>>,
    service: Option<TelemetryService>,
    video: Option<VideoRelay>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    pub fn new() -> Self {
        Self {
            reload_requested: Arc::new(AtomicBool::new(false)),
            monitor: None,
            publisher: None,
            service: None,
            video: None,
        }
    }

    /// Flag raised by the `config_reload` command; the supervisor's poll
    /// loop consumes it.
    pub fn reload_requested(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reload_requested)
    }

    /// Build and start every service. An error out of here means the
    /// process should exit non-zero without starting the remaining workers.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let monitor = HealthMonitor::new(
            &config.health.status_file,
            Duration::from_secs(config.health.interval_seconds.max(1)),
        );
        monitor.start();

        let repository = match TelemetryRepository::connect(&config.database, monitor.clone()).await
        {
            Ok(repository) => Arc::new(repository),
            Err(err) => {
                error!("failed to connect to database, exiting: {err:#}");
                self.monitor = Some(monitor);
                return Err(err);
            }
        };

        let gateway = Arc::new(SensorGateway::new(config.sensor.clone(), monitor.clone()));

        let registry = Arc::new(ConnectionRegistry::new());

        // The diagnostics document reads only the lock-safe connection
        // counter and boot-time pipeline parameters.
        let diagnostics_registry = Arc::clone(&registry);
        let realtime_seconds = config.pipeline.realtime_interval_seconds;
        let historical_seconds = config.pipeline.historical_interval_seconds;
        let diagnostics = Box::new(move || {
            json!({
                "telemetry": {
                    "subscribers": diagnostics_registry.connection_count() > 0,
                },
                "pipeline": {
                    "realtimeSeconds": realtime_seconds,
                    "historicalSeconds": historical_seconds,
                },
            })
        });

        let reload_requested = Arc::clone(&self.reload_requested);
        let request_reload = Box::new(move || {
            reload_requested.store(true, Ordering::SeqCst);
        });

        let router = Arc::new(DeviceCommandRouter::new(
            Arc::clone(&gateway),
            monitor.clone(),
            diagnostics,
            request_reload,
        ));

        let publisher = Arc::new(TelemetryPublisher::new(
            config.publisher.clone(),
            registry,
            router,
            monitor.clone(),
        ));
        if let Err(err) = publisher.start().await {
            error!("failed to start telemetry publisher: {err:#}");
            self.monitor = Some(monitor);
            return Err(err);
        }

        let mut service = TelemetryService::new(
            config.pipeline.clone(),
            repository,
            gateway,
            Arc::clone(&publisher),
            monitor.clone(),
        );
        service.start();

        let mut video = VideoRelay::new(monitor.clone());
        if let Err(err) = video.start(config.video.port).await {
            warn!("video manager failed to start: {err:#}");
        }

        self.monitor = Some(monitor);
        self.publisher = Some(publisher);
        self.service = Some(service);
        self.video = Some(video);

        info!("AquaRegulator backend is running");
        Ok(())
    }

    /// Stop every service in reverse dependency order and flush the final
    /// health snapshot.
    pub async fn shutdown(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.stop().await;
        }
        if let Some(service) = self.service.as_mut() {
            service.stop().await;
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.stop();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
    }
}
