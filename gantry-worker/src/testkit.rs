//! Test doubles for the worker's collaborators
//!
//! Every mock records the calls it receives so tests can assert on the
//! exact interaction the loop had with it.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time;

use gantry_core::domain::{Claim, WorkerEvent};

use crate::monitor::Monitor;
use crate::repository::WorkQueue;
use crate::service::devices::{DeviceLease, DeviceManager};
use crate::service::disk::DiskProbe;
use crate::service::gc::GarbageCollector;
use crate::service::handler::{ExecutionOptions, HandlerFactory, HandlerStatus, TaskHandler};
use crate::service::host::HostController;
use crate::service::lifecycle::ShutdownManager;
use crate::service::volumes::VolumeCache;
use crate::shutdown::ShutdownIntent;

/// Monitor that records every count, measurement, and event
pub struct RecordingMonitor {
    inner: Arc<RecordingInner>,
}

struct RecordingInner {
    counts: Mutex<HashMap<String, u64>>,
    measures: Mutex<Vec<(String, f64)>>,
    events: Mutex<Vec<WorkerEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecordingInner {
                counts: Mutex::new(HashMap::new()),
                measures: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn counted(&self, name: &str) -> u64 {
        self.inner
            .counts
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn measured(&self, name: &str) -> Option<f64> {
        self.inner
            .measures
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn count_events(&self, matches: impl Fn(&WorkerEvent) -> bool) -> usize {
        self.inner
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches(e))
            .count()
    }
}

impl Monitor for RecordingMonitor {
    fn count_n(&self, name: &str, n: u64) {
        *self
            .inner
            .counts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += n;
    }

    fn measure(&self, name: &str, value: f64) {
        self.inner
            .measures
            .lock()
            .unwrap()
            .push((name.to_string(), value));
    }

    fn event(&self, event: WorkerEvent) {
        self.inner.events.lock().unwrap().push(event);
    }

    fn child(&self, _name: &str) -> Arc<dyn Monitor> {
        Arc::new(Self {
            inner: self.inner.clone(),
        })
    }
}

/// Handler whose completion the test controls
pub struct MockHandler {
    auto_complete: bool,
    fail: AtomicBool,
    gate: Notify,
    status: Mutex<HandlerStatus>,
    cancels: Mutex<Vec<String>>,
    aborts: Mutex<Vec<String>>,
}

impl MockHandler {
    /// Completes on its own shortly after start
    pub fn completing() -> Self {
        Self {
            auto_complete: true,
            fail: AtomicBool::new(false),
            gate: Notify::new(),
            status: Mutex::new(HandlerStatus::Created),
            cancels: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
        }
    }

    /// Completes with an error shortly after start
    pub fn failing() -> Self {
        let handler = Self::completing();
        handler.fail.store(true, Ordering::SeqCst);
        handler
    }

    /// Runs until the test (or a cancel/abort) completes it
    pub fn gated() -> Self {
        Self {
            auto_complete: false,
            ..Self::completing()
        }
    }

    /// Let a gated handler finish
    pub fn complete(&self) {
        self.gate.notify_one();
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    async fn start(&self) -> Result<()> {
        *self.status.lock().unwrap() = HandlerStatus::Running;

        if self.auto_complete {
            time::sleep(Duration::from_millis(10)).await;
        } else {
            self.gate.notified().await;
        }

        *self.status.lock().unwrap() = HandlerStatus::Finished;

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock handler failed");
        }
        Ok(())
    }

    async fn cancel(&self, reason: &str) {
        *self.status.lock().unwrap() = HandlerStatus::Cancelled;
        self.cancels.lock().unwrap().push(reason.to_string());
        self.gate.notify_one();
    }

    async fn abort(&self, reason: &str) -> Result<()> {
        *self.status.lock().unwrap() = HandlerStatus::Aborted;
        self.aborts.lock().unwrap().push(reason.to_string());
        self.gate.notify_one();
        Ok(())
    }

    fn status(&self) -> HandlerStatus {
        *self.status.lock().unwrap()
    }
}

/// Factory handing out prepared handlers, or completing ones by default
pub struct MockFactory {
    prepared: Mutex<VecDeque<Arc<MockHandler>>>,
    created: Mutex<Vec<Arc<MockHandler>>>,
    options: Mutex<Vec<ExecutionOptions>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            prepared: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handlers(handlers: Vec<Arc<MockHandler>>) -> Self {
        let factory = Self::new();
        *factory.prepared.lock().unwrap() = handlers.into();
        factory
    }

    pub fn created(&self) -> Vec<Arc<MockHandler>> {
        self.created.lock().unwrap().clone()
    }

    pub fn options(&self) -> Vec<ExecutionOptions> {
        self.options.lock().unwrap().clone()
    }
}

impl HandlerFactory for MockFactory {
    fn create(&self, _claim: &Claim, options: ExecutionOptions) -> Result<Arc<dyn TaskHandler>> {
        self.options.lock().unwrap().push(options);
        let handler = self
            .prepared
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Arc::new(MockHandler::completing()));
        self.created.lock().unwrap().push(handler.clone());
        Ok(handler)
    }
}

/// Queue returning scripted claim batches
pub struct MockQueue {
    batches: Mutex<VecDeque<Vec<Claim>>>,
    calls: Mutex<Vec<usize>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_batch(&self, claims: Vec<Claim>) {
        self.batches.lock().unwrap().push_back(claims);
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for MockQueue {
    async fn claim_work(&self, count: usize) -> Result<Vec<Claim>> {
        self.calls.lock().unwrap().push(count);
        Ok(self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// Device manager handing out detached leases of any kind
pub struct MockDevices {
    capacity: Mutex<Option<usize>>,
    sequence: AtomicUsize,
    leases: Mutex<Vec<DeviceLease>>,
}

impl MockDevices {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Mutex::new(Some(capacity)),
            sequence: AtomicUsize::new(0),
            leases: Mutex::new(Vec::new()),
        }
    }

    /// Probe fails, as if host enumeration broke
    pub fn failing() -> Self {
        Self {
            capacity: Mutex::new(None),
            sequence: AtomicUsize::new(0),
            leases: Mutex::new(Vec::new()),
        }
    }

    pub fn leases(&self) -> Vec<DeviceLease> {
        self.leases.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceManager for MockDevices {
    async fn available_capacity(&self) -> Result<usize> {
        self.capacity
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("device enumeration failed"))
    }

    fn get_device(&self, kind: &str) -> Result<DeviceLease> {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let lease = DeviceLease::detached(kind, format!("{}-{}", kind, n));
        self.leases.lock().unwrap().push(lease.clone());
        Ok(lease)
    }
}

/// Disk probe with scripted pressure
pub struct MockDisk {
    pressure: AtomicBool,
    calls: AtomicUsize,
}

impl MockDisk {
    pub fn ok() -> Self {
        Self {
            pressure: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn pressured() -> Self {
        let disk = Self::ok();
        disk.pressure.store(true, Ordering::SeqCst);
        disk
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiskProbe for MockDisk {
    async fn exceeds_threshold(
        &self,
        _volume: &Path,
        _threshold_bytes: u64,
        _admissible: usize,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pressure.load(Ordering::SeqCst))
    }
}

/// Garbage collector recording sweep kinds
pub struct MockGc {
    sweeps: Mutex<Vec<bool>>,
}

impl MockGc {
    pub fn new() -> Self {
        Self {
            sweeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sweeps(&self) -> Vec<bool> {
        self.sweeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl GarbageCollector for MockGc {
    async fn sweep(&self, full: bool) -> Result<()> {
        self.sweeps.lock().unwrap().push(full);
        Ok(())
    }
}

/// Volume cache counting purges
pub struct MockVolumes {
    purges: AtomicUsize,
}

impl MockVolumes {
    pub fn new() -> Self {
        Self {
            purges: AtomicUsize::new(0),
        }
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeCache for MockVolumes {
    async fn purge_caches(&self) -> Result<()> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Host recording shutdowns
pub struct MockHost {
    uptime: Duration,
    shutdowns: AtomicUsize,
}

impl MockHost {
    pub fn new() -> Self {
        Self::with_uptime(Duration::from_secs(1800))
    }

    pub fn with_uptime(uptime: Duration) -> Self {
        Self {
            uptime,
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostController for MockHost {
    fn uptime(&self) -> Duration {
        self.uptime
    }

    fn billing_cycle_uptime(&self) -> Duration {
        self.uptime
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shutdown manager whose intent the test scripts
pub struct ScriptedLifecycle {
    intent: Mutex<ShutdownIntent>,
    idle_reports: AtomicUsize,
    working_reports: AtomicUsize,
}

impl ScriptedLifecycle {
    pub fn new() -> Self {
        Self {
            intent: Mutex::new(ShutdownIntent::None),
            idle_reports: AtomicUsize::new(0),
            working_reports: AtomicUsize::new(0),
        }
    }

    pub fn set_intent(&self, intent: ShutdownIntent) {
        *self.intent.lock().unwrap() = intent;
    }

    pub fn idle_reports(&self) -> usize {
        self.idle_reports.load(Ordering::SeqCst)
    }

    pub fn working_reports(&self) -> usize {
        self.working_reports.load(Ordering::SeqCst)
    }
}

impl ShutdownManager for ScriptedLifecycle {
    fn on_idle(&self) {
        self.idle_reports.fetch_add(1, Ordering::SeqCst);
    }

    fn on_working(&self) {
        self.working_reports.fetch_add(1, Ordering::SeqCst);
    }

    fn should_exit(&self) -> ShutdownIntent {
        *self.intent.lock().unwrap()
    }
}
