// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Telemetry pipeline worker
//!
//! One task drives two cadences. Every `realtimeSeconds` it polls the sensor
//! gateway, caches the sample, and pushes an incremental frame when anyone
//! is listening. Every `historicalSeconds` (and always on the first
//! iteration) it pulls both history relations, refills the historical cache
//! channels, and pushes one frame per non-empty channel. A tick that overran
//! the realtime interval starts the next one without sleeping.
//!
//! Historical pushes keep `snapshot = true` even though they are incremental
//! refreshes; subscribers treat the flag as a replace-your-view hint, and
//! join-time snapshots reuse the same frame builder.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::database::TelemetryRepository;
use crate::monitoring::HealthMonitor;
use crate::publisher::TelemetryPublisher;
use crate::sensors::SensorGateway;
use crate::telemetry::{TelemetryCache, TelemetryChannel, TelemetryFrame, TelemetryReading};

const HEALTH_COMPONENT: &str = "telemetry_service";

struct PipelineContext {
    config: PipelineConfig,
    repository: Arc<TelemetryRepository>,
    gateway: Arc<SensorGateway>,
    publisher: Arc<TelemetryPublisher>,
    monitor: HealthMonitor,
    cache: Arc<TelemetryCache>,
    correlation: Arc<AtomicU64>,
}

/// Owner of the pipeline worker task.
pub struct TelemetryService {
    context: Arc<PipelineContext>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryService {
    /// Wire the pipeline against its collaborators and register the
    /// join-time snapshot provider on the publisher.
    pub fn new(
        config: PipelineConfig,
        repository: Arc<TelemetryRepository>,
        gateway: Arc<SensorGateway>,
        publisher: Arc<TelemetryPublisher>,
        monitor: HealthMonitor,
    ) -> Self {
        let cache = Arc::new(TelemetryCache::new(config.cache_size));
        let correlation = Arc::new(AtomicU64::new(0));

        let provider_cache = Arc::clone(&cache);
        let provider_correlation = Arc::clone(&correlation);
        publisher.set_snapshot_provider(Box::new(move || {
            [
                TelemetryChannel::Realtime,
                TelemetryChannel::HistoricalEnvironment,
                TelemetryChannel::HistoricalSoil,
            ]
            .into_iter()
            .map(|channel| {
                build_snapshot_frame(
                    channel,
                    provider_cache.snapshot(channel),
                    &provider_correlation,
                )
            })
            .collect::<Vec<TelemetryFrame>>()
        }));

        Self {
            context: Arc::new(PipelineContext {
                config,
                repository,
                gateway,
                publisher,
                monitor,
                cache,
                correlation,
            }),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let context = Arc::clone(&self.context);
        let running = Arc::clone(&self.running);
        self.worker = Some(tokio::spawn(async move {
            run_loop(context, running).await;
        }));
    }

    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let abort = worker.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .is_err()
            {
                warn!("pipeline worker did not stop within timeout");
                abort.abort();
            }
        }
    }
}

async fn run_loop(context: Arc<PipelineContext>, running: Arc<AtomicBool>) {
    let realtime_interval = Duration::from_secs(context.config.realtime_interval_seconds);
    let historical_interval = Duration::from_secs(context.config.historical_interval_seconds);
    let mut last_historical: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();

        process_realtime(&context).await;

        if last_historical.map_or(true, |at| at.elapsed() >= historical_interval) {
            process_historical(&context).await;
            last_historical = Some(Instant::now());
        }

        let elapsed = started.elapsed();
        if elapsed < realtime_interval {
            tokio::time::sleep(realtime_interval - elapsed).await;
        }
    }
}

async fn process_realtime(context: &PipelineContext) {
    let Some(reading) = context.gateway.read_realtime().await else {
        context
            .monitor
            .update(HEALTH_COMPONENT, false, "Realtime read failed");
        return;
    };

    context
        .cache
        .store(TelemetryChannel::Realtime, reading.clone());

    if context.publisher.has_subscribers() {
        let frame = TelemetryFrame {
            channel: TelemetryChannel::Realtime,
            snapshot: false,
            correlation_id: next_correlation_id(&context.correlation),
            readings: vec![reading],
        };
        context.publisher.publish(&frame);
    }

    context
        .monitor
        .update(HEALTH_COMPONENT, true, "Realtime frame published");
}

async fn process_historical(context: &PipelineContext) {
    let limit = context.config.cache_size;
    let environmental = context.repository.load_environmental(limit).await;
    let soil = context.repository.load_soil_and_air(limit).await;

    for reading in &environmental {
        context
            .cache
            .store(TelemetryChannel::HistoricalEnvironment, reading.clone());
    }
    for reading in &soil {
        context
            .cache
            .store(TelemetryChannel::HistoricalSoil, reading.clone());
    }

    if context.publisher.has_subscribers() {
        if !environmental.is_empty() {
            let frame = build_snapshot_frame(
                TelemetryChannel::HistoricalEnvironment,
                environmental,
                &context.correlation,
            );
            context.publisher.publish(&frame);
        }
        if !soil.is_empty() {
            let frame = build_snapshot_frame(
                TelemetryChannel::HistoricalSoil,
                soil,
                &context.correlation,
            );
            context.publisher.publish(&frame);
        }
    }

    context
        .monitor
        .update(HEALTH_COMPONENT, true, "Historical frame published");
}

fn build_snapshot_frame(
    channel: TelemetryChannel,
    readings: Vec<TelemetryReading>,
    correlation: &AtomicU64,
) -> TelemetryFrame {
    TelemetryFrame {
        channel,
        snapshot: true,
        correlation_id: next_correlation_id(correlation),
        readings,
    }
}

fn next_correlation_id(correlation: &AtomicU64) -> String {
    let id = correlation.fetch_add(1, Ordering::SeqCst) + 1;
    format!("frame-{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_monotonic_from_one() {
        let counter = AtomicU64::new(0);
        assert_eq!(next_correlation_id(&counter), "frame-1");
        assert_eq!(next_correlation_id(&counter), "frame-2");
        assert_eq!(next_correlation_id(&counter), "frame-3");
    }

    #[test]
    fn snapshot_frames_carry_the_snapshot_flag_and_their_readings() {
        let counter = AtomicU64::new(0);
        let readings = vec![TelemetryReading::default(), TelemetryReading::default()];
        let frame = build_snapshot_frame(
            TelemetryChannel::HistoricalSoil,
            readings.clone(),
            &counter,
        );

        assert!(frame.snapshot);
        assert_eq!(frame.channel, TelemetryChannel::HistoricalSoil);
        assert_eq!(frame.correlation_id, "frame-1");
        assert_eq!(frame.readings, readings);
    }
}
