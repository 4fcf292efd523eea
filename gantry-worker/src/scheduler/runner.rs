//! Per-claim task runner
//!
//! Executes one claimed run: leases devices, constructs the handler,
//! admits itself into the running set, awaits the handler, and retires.
//! Retirement runs on every exit path, so a started task always reaches
//! a terminal logged outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::error;

use gantry_core::domain::{Claim, WorkerEvent};

use crate::monitor::Monitor;
use crate::service::devices::{DeviceLease, DeviceManager};
use crate::service::handler::{ExecutionOptions, HandlerFactory};
use crate::state::{RunningState, SharedState};

/// Runs one claim to its terminal outcome
pub struct ClaimRunner {
    claim: Claim,
    restrict_cpu: bool,
    state: SharedState,
    devices: Arc<dyn DeviceManager>,
    handlers: Arc<dyn HandlerFactory>,
    monitor: Arc<dyn Monitor>,
}

impl ClaimRunner {
    pub fn new(
        claim: Claim,
        restrict_cpu: bool,
        state: SharedState,
        devices: Arc<dyn DeviceManager>,
        handlers: Arc<dyn HandlerFactory>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            claim,
            restrict_cpu,
            state,
            devices,
            handlers,
            monitor,
        }
    }

    pub async fn run(self) {
        let task_id = self.claim.task_id().to_string();
        let run_id = self.claim.run_id;
        let started = Instant::now();

        // A task with no prior runs is being picked up for the first time.
        if self.claim.status.runs.is_empty() {
            let waited = Utc::now().signed_duration_since(self.claim.task.created);
            self.monitor
                .measure("time-to-first-claim", waited.num_milliseconds().max(0) as f64);
        }

        let mut leases = HashMap::new();
        let outcome = self.execute(&task_id, run_id, started, &mut leases).await;

        self.retire(&task_id, run_id, started, leases);

        if let Err(e) = outcome {
            error!(
                task_id,
                run_id,
                error = %format!("{:#}", e),
                "task execution failed"
            );
            self.monitor.count("task.error");
        }
    }

    /// Stages between claim and handler exit
    async fn execute(
        &self,
        task_id: &str,
        run_id: u32,
        started: Instant,
        leases: &mut HashMap<String, DeviceLease>,
    ) -> Result<()> {
        let mut options = ExecutionOptions::default();

        if self.restrict_cpu {
            let lease = self
                .devices
                .get_device("cpu")
                .context("failed to lease cpu")?;
            options.cpu_id = Some(lease.id().to_string());
            leases.insert("cpu".to_string(), lease);
        }

        if let Some(capabilities) = &self.claim.task.payload.capabilities {
            for kind in capabilities.devices.keys() {
                let lease = self
                    .devices
                    .get_device(kind)
                    .with_context(|| format!("failed to lease {} device", kind))?;
                options.device_ids.insert(kind.clone(), lease.id().to_string());
                leases.insert(kind.clone(), lease);
            }
        }

        let handler = self
            .handlers
            .create(&self.claim, options)
            .context("failed to construct task handler")?;

        {
            let mut state = self.state.lock().unwrap();
            state.admit(
                RunningState {
                    task_id: task_id.to_string(),
                    run_id,
                    started,
                    devices: leases.clone(),
                    handler: handler.clone(),
                },
                &*self.monitor,
            );
        }

        self.monitor.event(WorkerEvent::TaskQueue {
            task_id: task_id.to_string(),
            run_id,
            timestamp: self.claim.task.created,
        });
        self.monitor.event(WorkerEvent::TaskStart {
            task_id: task_id.to_string(),
            run_id,
        });

        let outcome = handler.start().await;

        self.monitor.event(WorkerEvent::TaskFinish {
            task_id: task_id.to_string(),
            run_id,
            success: outcome.is_ok(),
        });

        outcome
    }

    /// Remove the entry and free its devices, on success and failure alike
    fn retire(
        &self,
        task_id: &str,
        run_id: u32,
        started: Instant,
        leases: HashMap<String, DeviceLease>,
    ) {
        let mut state = self.state.lock().unwrap();

        match state.retire(task_id, run_id, &*self.monitor) {
            Some(entry) => {
                for lease in entry.devices.values() {
                    lease.release();
                }
                state.total_run_time += started.elapsed();
                state.last_known_capacity += 1;
            }
            None => {
                // Admission never happened (or someone else removed the
                // entry); the leases acquired here still must go back.
                for lease in leases.values() {
                    lease.release();
                }
            }
        }
    }
}
