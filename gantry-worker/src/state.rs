//! Shared worker state
//!
//! One mutex-guarded [`WorkerState`] holds the running set, the
//! capacity counters, and the capacity snapshot. The guard is only ever
//! held for synchronous sections; nothing awaits while holding it.
//!
//! Capacity accounting rule: the weighted capacity counters are emitted
//! from the snapshot taken *before* a running-set mutation, so the
//! recorded interval describes the state that actually held during it.
//! `admit` and `retire` encode that ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::monitor::Monitor;
use crate::service::devices::DeviceLease;
use crate::service::handler::TaskHandler;

/// Worker state shared between the poll loop, runners, and reporters
pub type SharedState = Arc<Mutex<WorkerState>>;

/// Occupancy thresholds for the weighted capacity histogram
const OCCUPANCY_THRESHOLDS: [usize; 7] = [0, 1, 2, 3, 4, 6, 8];

/// One in-flight task
pub struct RunningState {
    pub task_id: String,
    pub run_id: u32,

    /// Monotonic start time, for run-time accounting
    pub started: Instant,

    /// Leased devices held until this entry is retired
    pub devices: HashMap<String, DeviceLease>,

    /// Controller for the executing task
    pub handler: Arc<dyn TaskHandler>,
}

/// Immutable sample of slot occupancy at a point in time
#[derive(Debug, Clone, Copy)]
pub struct CapacitySnapshot {
    pub idle: usize,
    pub busy: usize,
    pub taken: Instant,
}

/// Registry of in-flight tasks plus the worker's capacity counters
pub struct WorkerState {
    running: Vec<RunningState>,

    /// Task slots currently offered; zeroed during graceful drain
    pub capacity: usize,

    /// Admissible slots as of the last completed capacity gate
    pub last_known_capacity: usize,

    /// Accumulated run time of completed tasks
    pub total_run_time: Duration,

    /// When the running set last changed
    pub last_task_event: Instant,

    snapshot: CapacitySnapshot,
}

impl WorkerState {
    pub fn new(capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            running: Vec::new(),
            capacity,
            last_known_capacity: capacity,
            total_run_time: Duration::ZERO,
            last_task_event: now,
            snapshot: CapacitySnapshot {
                idle: capacity,
                busy: 0,
                taken: now,
            },
        }
    }

    pub fn size(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Look up an in-flight task by its claim identity
    pub fn find(&self, task_id: &str, run_id: u32) -> Option<&RunningState> {
        self.running
            .iter()
            .find(|r| r.task_id == task_id && r.run_id == run_id)
    }

    /// Admit a task into the running set
    ///
    /// Records capacity first so the emitted interval reflects the
    /// pre-insert state.
    pub fn admit(&mut self, entry: RunningState, monitor: &dyn Monitor) {
        self.record_capacity(monitor);
        self.last_task_event = Instant::now();
        self.running.push(entry);
    }

    /// Remove a task from the running set, returning its entry
    ///
    /// Records capacity first, whether or not the entry is found.
    /// A missing entry is logged as a warning, never an error.
    pub fn retire(&mut self, task_id: &str, run_id: u32, monitor: &dyn Monitor) -> Option<RunningState> {
        self.record_capacity(monitor);

        let index = self
            .running
            .iter()
            .position(|r| r.task_id == task_id && r.run_id == run_id);

        match index {
            Some(index) => {
                self.last_task_event = Instant::now();
                Some(self.running.remove(index))
            }
            None => {
                warn!(task_id, run_id, "retired task not present in running set");
                None
            }
        }
    }

    /// Handles and leases of every in-flight task, for out-of-band teardown
    pub fn handles(&self) -> Vec<(String, u32, Arc<dyn TaskHandler>, Vec<DeviceLease>)> {
        self.running
            .iter()
            .map(|r| {
                (
                    r.task_id.clone(),
                    r.run_id,
                    r.handler.clone(),
                    r.devices.values().cloned().collect(),
                )
            })
            .collect()
    }

    /// Total elapsed run time of the tasks currently in flight
    pub fn running_elapsed(&self) -> Duration {
        let now = Instant::now();
        self.running
            .iter()
            .map(|r| now.duration_since(r.started))
            .sum()
    }

    #[allow(dead_code)]
    pub fn snapshot(&self) -> CapacitySnapshot {
        self.snapshot
    }

    /// Emit weighted capacity counters for the interval since the last
    /// snapshot, then replace the snapshot with the current occupancy
    pub fn record_capacity(&mut self, monitor: &dyn Monitor) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.snapshot.taken).as_millis() as u64;

        emit_weighted(&self.snapshot, elapsed_ms, monitor);

        let busy = self.running.len();
        self.snapshot = CapacitySnapshot {
            idle: self.capacity.saturating_sub(busy),
            busy,
            taken: now,
        };
    }
}

/// Emit the weighted occupancy counters for one interval
///
/// Each counter accumulates milliseconds weighted by the occupancy that
/// held over the interval: `capacity-busy`/`capacity-idle` weighted by
/// slot count, plus threshold buckets (`running-eq-0`, `running-ge-k`,
/// and the `idle-*` equivalents).
pub fn emit_weighted(snapshot: &CapacitySnapshot, elapsed_ms: u64, monitor: &dyn Monitor) {
    monitor.count_n("capacity-busy", snapshot.busy as u64 * elapsed_ms);
    monitor.count_n("capacity-idle", snapshot.idle as u64 * elapsed_ms);

    for &threshold in OCCUPANCY_THRESHOLDS.iter() {
        if threshold == 0 {
            if snapshot.busy == 0 {
                monitor.count_n("running-eq-0", elapsed_ms);
            }
            if snapshot.idle == 0 {
                monitor.count_n("idle-eq-0", elapsed_ms);
            }
        } else {
            if snapshot.busy >= threshold {
                monitor.count_n(&format!("running-ge-{}", threshold), elapsed_ms);
            }
            if snapshot.idle >= threshold {
                monitor.count_n(&format!("idle-ge-{}", threshold), elapsed_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockHandler, RecordingMonitor};

    fn entry(task_id: &str, run_id: u32) -> RunningState {
        RunningState {
            task_id: task_id.to_string(),
            run_id,
            started: Instant::now(),
            devices: HashMap::new(),
            handler: Arc::new(MockHandler::completing()),
        }
    }

    #[test]
    fn admit_and_find() {
        let monitor = RecordingMonitor::new();
        let mut state = WorkerState::new(2);

        state.admit(entry("a", 0), &monitor);
        assert_eq!(state.size(), 1);
        assert!(state.find("a", 0).is_some());
        assert!(state.find("a", 1).is_none());
        assert!(state.find("b", 0).is_none());
    }

    #[test]
    fn retire_removes_matching_entry() {
        let monitor = RecordingMonitor::new();
        let mut state = WorkerState::new(4);

        state.admit(entry("a", 0), &monitor);
        state.admit(entry("a", 1), &monitor);

        let removed = state.retire("a", 0, &monitor);
        assert!(removed.is_some());
        assert_eq!(state.size(), 1);
        assert!(state.find("a", 1).is_some());
    }

    #[test]
    fn retire_missing_entry_returns_none() {
        let monitor = RecordingMonitor::new();
        let mut state = WorkerState::new(2);

        assert!(state.retire("ghost", 0, &monitor).is_none());
    }

    #[test]
    fn snapshot_reflects_pre_mutation_state() {
        let monitor = RecordingMonitor::new();
        let mut state = WorkerState::new(2);

        // After admitting the first entry, the snapshot describes the
        // occupancy at the moment of admission (one busy slot).
        state.admit(entry("a", 0), &monitor);
        assert_eq!(state.snapshot().busy, 0);
        assert_eq!(state.snapshot().idle, 2);

        state.admit(entry("b", 0), &monitor);
        assert_eq!(state.snapshot().busy, 1);
        assert_eq!(state.snapshot().idle, 1);

        state.retire("a", 0, &monitor);
        assert_eq!(state.snapshot().busy, 2);
        assert_eq!(state.snapshot().idle, 0);
    }

    #[test]
    fn weighted_counters_use_thresholds() {
        let monitor = RecordingMonitor::new();
        let snapshot = CapacitySnapshot {
            idle: 0,
            busy: 3,
            taken: Instant::now(),
        };

        emit_weighted(&snapshot, 1000, &monitor);

        assert_eq!(monitor.counted("capacity-busy"), 3000);
        assert_eq!(monitor.counted("capacity-idle"), 0);
        assert_eq!(monitor.counted("running-ge-1"), 1000);
        assert_eq!(monitor.counted("running-ge-3"), 1000);
        assert_eq!(monitor.counted("running-ge-4"), 0);
        assert_eq!(monitor.counted("running-eq-0"), 0);
        assert_eq!(monitor.counted("idle-eq-0"), 1000);
        assert_eq!(monitor.counted("idle-ge-1"), 0);
    }

    #[test]
    fn weighted_counters_when_idle() {
        let monitor = RecordingMonitor::new();
        let snapshot = CapacitySnapshot {
            idle: 8,
            busy: 0,
            taken: Instant::now(),
        };

        emit_weighted(&snapshot, 500, &monitor);

        assert_eq!(monitor.counted("running-eq-0"), 500);
        assert_eq!(monitor.counted("idle-ge-8"), 500);
        assert_eq!(monitor.counted("idle-ge-6"), 500);
        assert_eq!(monitor.counted("capacity-idle"), 4000);
    }
}
