//! Shutdown coordination
//!
//! Owns the worker's shutdown intent and acts on it at each poll cycle.
//! Intent is monotonic: it only ever moves toward higher severity and
//! never reverts. Graceful drains by zeroing capacity; immediate aborts
//! every running handler and busy-waits the running set empty before
//! delegating to the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time;
use tracing::{debug, info, warn};

use gantry_core::domain::WorkerEvent;

use crate::monitor::Monitor;
use crate::scheduler::WorkPoller;
use crate::service::host::HostController;
use crate::state::SharedState;

/// External intent about worker termination, in severity order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownIntent {
    None,
    Graceful,
    Immediate,
}

/// Acts on shutdown intent against the running set
pub struct ShutdownCoordinator {
    state: SharedState,
    host: Arc<dyn HostController>,
    monitor: Arc<dyn Monitor>,
    intent: Mutex<ShutdownIntent>,
    shutdown_started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(state: SharedState, host: Arc<dyn HostController>, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            state,
            host,
            monitor,
            intent: Mutex::new(ShutdownIntent::None),
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Raise the intent; lower or equal severity is ignored
    pub fn raise(&self, next: ShutdownIntent) {
        let mut intent = self.intent.lock().unwrap();
        if next > *intent {
            info!(from = ?*intent, to = ?next, "shutdown intent raised");
            *intent = next;
        }
    }

    pub fn intent(&self) -> ShutdownIntent {
        *self.intent.lock().unwrap()
    }

    /// Whether final shutdown has begun
    pub fn in_shutdown(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Act on the current intent
    ///
    /// Returns true when the worker is shutting down and the poll cycle
    /// must not proceed to admission.
    pub async fn enforce(&self, poller: &WorkPoller) -> Result<bool> {
        match self.intent() {
            ShutdownIntent::None => Ok(false),
            ShutdownIntent::Graceful => {
                let empty = {
                    let mut state = self.state.lock().unwrap();
                    state.capacity = 0;
                    state.is_empty()
                };
                if empty {
                    self.final_shutdown(poller).await?;
                    Ok(true)
                } else {
                    debug!("draining before graceful shutdown");
                    Ok(false)
                }
            }
            ShutdownIntent::Immediate => {
                self.abort_all().await;
                self.drain().await;
                self.final_shutdown(poller).await?;
                Ok(true)
            }
        }
    }

    /// Abort every running handler and release its leases
    async fn abort_all(&self) {
        self.monitor.count("spot-termination");

        let handles = { self.state.lock().unwrap().handles() };
        warn!(running = handles.len(), "aborting running tasks for immediate shutdown");

        for (task_id, run_id, handler, leases) in handles {
            if let Err(e) = handler.abort("worker-shutdown").await {
                // The queue reconciles via claim expiry, so a failed
                // abort is not worth more than a debug record.
                debug!(task_id, run_id, error = %e, "abort failed");
            }
            for lease in leases {
                lease.release();
            }
        }
    }

    /// Wait for aborted runners to retire their entries
    async fn drain(&self) {
        loop {
            if self.state.lock().unwrap().is_empty() {
                return;
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Stop polling and hand the instance to the host for poweroff
    async fn final_shutdown(&self, poller: &WorkPoller) -> Result<()> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        poller.pause();
        self.state.lock().unwrap().capacity = 0;

        self.monitor.event(WorkerEvent::InstanceShutdown);
        self.monitor.event(WorkerEvent::Exit);

        self.host.shutdown().await.context("host shutdown failed")?;
        poller.close();
        Ok(())
    }
}
