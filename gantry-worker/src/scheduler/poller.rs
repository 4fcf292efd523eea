//! Work poller
//!
//! Periodically runs one full poll cycle: report liveness, act on
//! shutdown intent, compute admissible capacity, sweep garbage, gate on
//! disk pressure, claim work, and launch one runner per claim. Cycle
//! errors are logged and never stop the next tick; the only error that
//! escapes is a failed host shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::monitor::Monitor;
use crate::repository::WorkQueue;
use crate::scheduler::runner::ClaimRunner;
use crate::service::devices::DeviceManager;
use crate::service::disk::DiskProbe;
use crate::service::gc::GarbageCollector;
use crate::service::handler::HandlerFactory;
use crate::service::lifecycle::ShutdownManager;
use crate::service::volumes::VolumeCache;
use crate::shutdown::ShutdownCoordinator;
use crate::state::SharedState;

/// Collaborators of the poll loop
pub struct PollerDeps {
    pub state: SharedState,
    pub queue: Arc<dyn WorkQueue>,
    pub devices: Arc<dyn DeviceManager>,
    pub disk: Arc<dyn DiskProbe>,
    pub gc: Arc<dyn GarbageCollector>,
    pub volumes: Arc<dyn VolumeCache>,
    pub handlers: Arc<dyn HandlerFactory>,
    pub lifecycle: Arc<dyn ShutdownManager>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub monitor: Arc<dyn Monitor>,
}

/// Periodic poll/claim/admit driver
///
/// Holds one pending timer at a time. `pause` clears the pending timer
/// and suppresses ticks until `resume`; `close` ends the loop.
pub struct WorkPoller {
    config: Config,
    deps: PollerDeps,
    paused: AtomicBool,
    closed: AtomicBool,
    wakeup: Notify,
    device_clamped: AtomicBool,
}

impl WorkPoller {
    pub fn new(config: Config, deps: PollerDeps) -> Arc<Self> {
        Arc::new(Self {
            config,
            deps,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wakeup: Notify::new(),
            device_clamped: AtomicBool::new(false),
        })
    }

    /// Run the polling loop until closed
    ///
    /// The first tick fires after 1 ms so boot problems surface
    /// immediately; afterwards ticks re-arm at the poll interval.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(interval = ?self.config.poll_interval, "starting work poller");

        let mut delay = Duration::from_millis(1);

        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                self.wakeup.notified().await;
                continue;
            }

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = self.wakeup.notified() => continue,
            }

            if self.closed.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst) {
                continue;
            }

            if let Err(e) = self.poll_cycle().await {
                if self.deps.shutdown.in_shutdown() {
                    error!(error = %format!("{:#}", e), "shutdown failed");
                    return Err(e);
                }
                error!(error = %format!("{:#}", e), "poll cycle failed");
            }

            delay = self.config.poll_interval;
        }

        info!("work poller stopped");
        Ok(())
    }

    /// Clear the pending timer and stop scheduling ticks
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// Resume ticking at the poll interval
    #[allow(dead_code)]
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// End the polling loop
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    #[allow(dead_code)]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// One full poll cycle
    pub(crate) async fn poll_cycle(&self) -> Result<()> {
        // Liveness and shutdown intent come before any admission work.
        let running = { self.deps.state.lock().unwrap().size() };
        if running == 0 {
            self.deps.lifecycle.on_idle();
        } else {
            self.deps.lifecycle.on_working();
        }

        self.deps.shutdown.raise(self.deps.lifecycle.should_exit());
        if self.deps.shutdown.enforce(self).await? {
            return Ok(());
        }

        let open_slots = {
            let state = self.deps.state.lock().unwrap();
            state.capacity.saturating_sub(state.size())
        };

        let device_capacity = match self.deps.devices.available_capacity().await {
            Ok(capacity) => capacity,
            Err(e) => {
                error!(
                    alert = true,
                    error = %format!("{:#}", e),
                    "device capacity probe failed, claiming nothing"
                );
                0
            }
        };

        if device_capacity < open_slots {
            if !self.device_clamped.swap(true, Ordering::SeqCst) {
                info!(
                    device_capacity,
                    open_slots, "device supply clamps claimable capacity"
                );
            }
        } else {
            self.device_clamped.store(false, Ordering::SeqCst);
        }

        let admissible = open_slots.min(device_capacity);
        {
            self.deps.state.lock().unwrap().last_known_capacity = admissible;
        }

        // Garbage collects every cycle; only a fully idle worker can
        // afford the full sweep.
        if let Err(e) = self.deps.gc.sweep(running == 0).await {
            warn!(error = %format!("{:#}", e), "gc sweep failed");
        }

        if admissible == 0 {
            return Ok(());
        }

        match self
            .deps
            .disk
            .exceeds_threshold(
                &self.config.volume_path,
                self.config.disk_threshold_bytes,
                admissible,
            )
            .await
        {
            Ok(false) => {}
            Ok(true) => return Ok(()),
            Err(e) => {
                error!(
                    alert = true,
                    error = %format!("{:#}", e),
                    "disk probe failed, claiming nothing"
                );
                return Ok(());
            }
        }

        let claims = match self.deps.queue.claim_work(admissible).await {
            Ok(claims) => claims,
            Err(e) => {
                error!(
                    alert = true,
                    error = %format!("{:#}", e),
                    "failed to claim work"
                );
                return Ok(());
            }
        };

        if claims.is_empty() {
            debug!("no claimable work");
            return Ok(());
        }

        info!(claimed = claims.len(), "claimed task(s)");

        // Once per cycle that returned claims, before any runner starts.
        if let Err(e) = self.deps.volumes.purge_caches().await {
            warn!(error = %format!("{:#}", e), "volume cache purge failed");
        }

        for claim in claims {
            let runner = ClaimRunner::new(
                claim,
                self.config.restrict_cpu,
                self.deps.state.clone(),
                self.deps.devices.clone(),
                self.deps.handlers.clone(),
                self.deps.monitor.clone(),
            );
            // Fire and forget; the runner retires itself.
            tokio::spawn(runner.run());
        }

        Ok(())
    }
}
