//! Gantry Worker
//!
//! A long-running agent that polls a remote queue for claimable work,
//! admits claims subject to slot, device, and disk capacity, executes
//! each claim in its own runner, and coordinates graceful or immediate
//! termination.
//!
//! Architecture:
//! - Configuration: environment-driven settings with validation
//! - Repository: HTTP communication with the queue service
//! - Services: host collaborators (devices, disk, gc, volumes, host,
//!   lifecycle, task handlers)
//! - Scheduler: the poll/claim/admit loop and per-claim runners
//! - State: the mutex-guarded running set and capacity counters

mod cancel;
mod config;
mod monitor;
mod reporter;
mod repository;
mod scheduler;
mod service;
mod shutdown;
mod state;

#[cfg(test)]
mod testkit;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_client::QueueClient;

use crate::cancel::{spawn_cancel_feed, CancelListener};
use crate::config::Config;
use crate::monitor::{Monitor, TracingMonitor};
use crate::reporter::CapacityReporter;
use crate::repository::{HttpWorkQueue, WorkQueue};
use crate::scheduler::{PollerDeps, WorkPoller};
use crate::service::devices::{DeviceManager, PooledDeviceManager};
use crate::service::disk::DfProbe;
use crate::service::gc::ContainerReclaimer;
use crate::service::handler::{ContainerHandlerFactory, HandlerFactory};
use crate::service::host::{HostController, LinuxHost};
use crate::service::lifecycle::InstanceLifecycle;
use crate::service::volumes::DirVolumeCache;
use crate::shutdown::ShutdownCoordinator;
use crate::state::{SharedState, WorkerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gantry Worker");

    let config = load_config()?;
    info!(
        worker_id = %config.worker_id,
        queue_url = %config.queue_url,
        capacity = config.capacity,
        "loaded configuration"
    );

    let monitor: Arc<dyn Monitor> = Arc::new(TracingMonitor::root());
    let worker_monitor = monitor.child(&config.worker_type);

    let client = Arc::new(QueueClient::new(config.queue_url.clone()));
    let queue: Arc<dyn WorkQueue> = Arc::new(HttpWorkQueue::new(
        client.clone(),
        config.worker_id.clone(),
    ));

    let devices: Arc<dyn DeviceManager> = Arc::new(
        PooledDeviceManager::from_host(config.restrict_cpu, &config.device_pools)
            .context("failed to enumerate host devices")?,
    );
    let disk = Arc::new(DfProbe::new());
    let gc = Arc::new(ContainerReclaimer::new());
    let volumes = Arc::new(DirVolumeCache::new(
        config.cache_path.clone(),
        config.cache_retention,
    ));
    let host: Arc<dyn HostController> = Arc::new(LinuxHost::new(config.billing_cycle));
    let handlers: Arc<dyn HandlerFactory> =
        Arc::new(ContainerHandlerFactory::new(config.default_image.clone()));

    let lifecycle = InstanceLifecycle::new(config.shutdown_after_idle);
    lifecycle.spawn_watchers(config.termination_notice_url.clone());

    let state: SharedState = Arc::new(Mutex::new(WorkerState::new(config.capacity)));

    let shutdown = Arc::new(ShutdownCoordinator::new(
        state.clone(),
        host.clone(),
        worker_monitor.clone(),
    ));

    CapacityReporter::new(
        config.capacity,
        config.report_interval,
        state.clone(),
        host.clone(),
        worker_monitor.clone(),
    )
    .spawn();

    let (cancel_tx, cancel_rx) = mpsc::channel(32);
    spawn_cancel_feed(
        client,
        config.worker_id.clone(),
        config.poll_interval,
        cancel_tx,
    );
    CancelListener::new(state.clone(), worker_monitor.clone()).spawn(cancel_rx);

    let poller = WorkPoller::new(
        config,
        PollerDeps {
            state,
            queue,
            devices,
            disk,
            gc,
            volumes,
            handlers,
            lifecycle,
            shutdown,
            monitor: worker_monitor,
        },
    );

    info!("worker initialized, starting poll loop");
    poller.run().await
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
