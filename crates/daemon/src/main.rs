// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `draind` — runs the drain loop to completion (or until stopped).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use clap::Parser;
use drain_adapters::{BrTrackerClient, ClaudeSessionRunner, RealCommandRunner};
use drain_core::{BeadId, SystemClock};
use drain_daemon::{Cli, DrainConfig, DrainHandle};
use drain_engine::{Controller, ControllerConfig, EventBus, WorkQueue, WorkQueueConfig};
use drain_storage::{LogSink, StateSink};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = DrainConfig::load(cli)?;
    init_tracing(&config.log_filter);

    let tracker = BrTrackerClient::new(Arc::new(RealCommandRunner::new(config.tracker_command.clone())))
        .with_timeouts(config.tracker_timeout, config.tracker_show_timeout);
    let runner = ClaudeSessionRunner::new();

    let work_queue = WorkQueue::new(
        WorkQueueConfig {
            epic: config.epic.as_deref().map(BeadId::new),
            selection_mode: config.selection_mode,
            eager_switch: config.eager_switch,
            ..WorkQueueConfig::default()
        },
        config.backoff,
        config.max_failures,
        SystemClock,
    );

    let event_bus = EventBus::new();

    let state_sink = StateSink::load_or_empty(&config.state_file_path)?;
    let restored = state_sink.snapshot();

    let cwd = std::env::current_dir()?;
    let controller_config = ControllerConfig {
        poll_interval: config.poll_interval,
        command: config.agent_command.clone(),
        cwd: cwd.clone(),
        prompt_template_path: config.prompt_template_path.clone(),
        follow_up_template_path: config.follow_up_template_path.clone(),
        epic: config.epic.as_deref().map(BeadId::new),
        ..ControllerConfig::default()
    };

    let controller = Arc::new(Controller::new(
        Arc::new(tracker),
        Arc::new(runner),
        SystemClock,
        work_queue,
        event_bus.clone(),
        controller_config,
    ));
    controller.restore_from_snapshot(restored);

    let log_sink_handle = LogSink::new(config.event_log_path.clone()).start(event_bus.subscribe());
    let state_sink_handle = state_sink.start(event_bus.subscribe());

    let drain_handle = DrainHandle::new(controller.handle());
    spawn_signal_handlers(drain_handle);

    info!(work_dir = %cwd.display(), "starting drain loop");
    let result = controller.run(&cwd.display().to_string()).await;

    event_bus.close();
    log_sink_handle.wait().await;
    state_sink_handle.wait().await;

    match result {
        Ok(()) => {
            info!("drain loop exited cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "drain loop exited with an error");
            Err(e.into())
        }
    }
}

/// SIGTERM is a forceful stop, SIGINT a graceful one — the drain loop
/// finishes its current iteration before stopping either way.
fn spawn_signal_handlers(handle: DrainHandle) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, stopping");
                handle.stop();
            }
            _ = sigint.recv() => {
                info!("received SIGINT, stopping gracefully");
                handle.graceful_stop();
            }
        }
    });
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
