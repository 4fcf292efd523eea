//! Capacity reporting
//!
//! Periodically turns the capacity snapshot into weighted occupancy
//! counters and reports slot efficiency over the billing cycle. Also
//! emits the boot/ready events at worker startup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::info;

use gantry_core::domain::WorkerEvent;

use crate::monitor::Monitor;
use crate::service::host::HostController;
use crate::state::SharedState;

/// Periodic reporter of capacity and efficiency metrics
pub struct CapacityReporter {
    /// Slots from the immutable configuration; the runtime capacity is
    /// zeroed during graceful drain and would corrupt the denominator
    configured_capacity: usize,
    interval: Duration,
    state: SharedState,
    host: Arc<dyn HostController>,
    monitor: Arc<dyn Monitor>,
}

impl CapacityReporter {
    pub fn new(
        configured_capacity: usize,
        interval: Duration,
        state: SharedState,
        host: Arc<dyn HostController>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            configured_capacity,
            interval,
            state,
            host,
            monitor,
        }
    }

    /// Emit startup events and start the reporting timer
    pub fn spawn(self) -> JoinHandle<()> {
        let boot = Utc::now()
            - chrono::Duration::from_std(self.host.uptime()).unwrap_or(chrono::Duration::zero());
        self.monitor.event(WorkerEvent::InstanceBoot { timestamp: boot });
        self.monitor.event(WorkerEvent::WorkerReady);

        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            // interval fires immediately; the first report should wait
            // a full period.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.report();
            }
        })
    }

    /// Record the elapsed interval and measure slot efficiency
    pub fn report(&self) {
        let (run_time, in_flight, claimable, idle_for) = {
            let mut state = self.state.lock().unwrap();
            state.record_capacity(&*self.monitor);
            (
                state.total_run_time,
                state.running_elapsed(),
                state.last_known_capacity,
                state.last_task_event.elapsed(),
            )
        };

        let billing = self.host.billing_cycle_uptime();
        if self.configured_capacity == 0 || billing.is_zero() {
            return;
        }

        let used_ms = (run_time + in_flight).as_millis() as f64;
        let offered_ms = self.configured_capacity as f64 * billing.as_secs_f64() * 1000.0;
        let efficiency = used_ms / offered_ms * 100.0;

        info!(
            efficiency = format!("{:.2}", efficiency),
            claimable,
            since_last_task = ?idle_for,
            "slot efficiency over billing cycle"
        );
        self.monitor.measure("total-efficiency", efficiency);
    }
}
