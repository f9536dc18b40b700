// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the AquaRegulator field-gateway backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use log::info;

use aqua_regulator::config::ConfigManager;
use aqua_regulator::daemon::Daemon;

/// Telemetry broker bridging a Modbus sensor cluster, a MariaDB history
/// store, and remote operator clients.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config/app_config.json")]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_manager = ConfigManager::new(&args.config);

    // The publisher's worker-thread hint sizes the whole runtime; every
    // other task shares the same pool.
    let worker_threads = usize::from(config_manager.get().publisher.worker_threads.max(1));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config_manager))
}

async fn run(mut config_manager: ConfigManager) -> Result<()> {
    let mut daemon = Daemon::new();
    if let Err(err) = daemon.launch(config_manager.get()).await {
        daemon.shutdown().await;
        return Err(err);
    }

    let should_run = Arc::new(AtomicBool::new(true));
    spawn_signal_listener(Arc::clone(&should_run));

    // Slow supervision poll: consume reload requests raised on the command
    // plane and probe for external edits of the configuration file. Running
    // services keep their boot-time parameters either way.
    let reload_requested = daemon.reload_requested();
    while should_run.load(Ordering::SeqCst) {
        if reload_requested.swap(false, Ordering::SeqCst) {
            if config_manager.reload_if_changed() {
                info!(
                    "configuration reload requested but runtime hot-reload \
                     is not implemented for all services"
                );
            }
        } else {
            config_manager.reload_if_changed();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    daemon.shutdown().await;
    Ok(())
}

fn spawn_signal_listener(should_run: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("received shutdown signal, terminating daemon");
        should_run.store(false, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
