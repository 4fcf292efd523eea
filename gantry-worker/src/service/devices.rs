//! Device leasing
//!
//! Devices are exclusive-use host resources (CPU pins, loopback video
//! nodes) leased to one task at a time. A lease returns to its pool on
//! release; release is idempotent so both the retirement path and the
//! out-of-band cancellation path may call it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Supplier of leasable devices
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// How many more tasks the device supply can support
    ///
    /// The probe may fail (e.g. host enumeration errors); callers treat
    /// a failure as zero available capacity for the cycle.
    async fn available_capacity(&self) -> Result<usize>;

    /// Lease one device of the given kind
    fn get_device(&self, kind: &str) -> Result<DeviceLease>;
}

struct PoolInner {
    kind: String,
    free: Mutex<Vec<String>>,
}

impl PoolInner {
    fn reclaim(&self, id: String) {
        debug!(kind = %self.kind, id = %id, "device returned to pool");
        self.free.lock().unwrap().push(id);
    }
}

/// Pool of identical devices of one kind
pub struct DevicePool {
    inner: Arc<PoolInner>,
}

impl DevicePool {
    pub fn new(kind: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                kind: kind.into(),
                free: Mutex::new(ids),
            }),
        }
    }

    /// Lease a device, or None if the pool is exhausted
    pub fn acquire(&self) -> Option<DeviceLease> {
        let id = self.inner.free.lock().unwrap().pop()?;
        debug!(kind = %self.inner.kind, id = %id, "device leased");
        Some(DeviceLease {
            inner: Arc::new(LeaseInner {
                kind: self.inner.kind.clone(),
                id,
                released: AtomicBool::new(false),
                pool: Some(Arc::downgrade(&self.inner)),
            }),
        })
    }

    /// Devices currently free in this pool
    pub fn available(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }
}

struct LeaseInner {
    kind: String,
    id: String,
    released: AtomicBool,
    pool: Option<Weak<PoolInner>>,
}

/// A held device lease
///
/// Clones share the lease; the first `release` returns the device to
/// its pool and later calls are no-ops.
#[derive(Clone)]
pub struct DeviceLease {
    inner: Arc<LeaseInner>,
}

impl DeviceLease {
    /// Device identifier (CPU index, device node path, ...)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Return the device to its pool; idempotent
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pool) = self.inner.pool.as_ref().and_then(Weak::upgrade) {
            pool.reclaim(self.inner.id.clone());
        }
    }

    #[allow(dead_code)]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// A lease not backed by any pool, for tests
    #[cfg(test)]
    pub fn detached(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                kind: kind.into(),
                id: id.into(),
                released: AtomicBool::new(false),
                pool: None,
            }),
        }
    }
}

/// Device manager over in-memory pools keyed by kind
pub struct PooledDeviceManager {
    pools: HashMap<String, DevicePool>,
}

impl PooledDeviceManager {
    pub fn new(pools: HashMap<String, DevicePool>) -> Self {
        Self { pools }
    }

    /// Build pools from configuration and host enumeration
    ///
    /// Every configured kind becomes a pool of the listed device ids.
    /// On top of that, a `cpu` pool sized from the host's parallelism
    /// is added when CPU restriction is on, and a `loopbackVideo` pool
    /// for any `/dev/video*` nodes present. Configured pools win over
    /// the enumerated defaults for the same kind.
    pub fn from_host(
        restrict_cpu: bool,
        configured: &HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let mut pools = HashMap::new();

        for (kind, ids) in configured {
            pools.insert(kind.clone(), DevicePool::new(kind.clone(), ids.clone()));
        }

        if restrict_cpu && !pools.contains_key("cpu") {
            let cpus = std::thread::available_parallelism()?.get();
            let ids = (0..cpus).map(|i| i.to_string()).collect();
            pools.insert("cpu".to_string(), DevicePool::new("cpu", ids));
        }

        if !pools.contains_key("loopbackVideo") {
            let video = enumerate_nodes(Path::new("/dev"), "video")?;
            if !video.is_empty() {
                pools.insert(
                    "loopbackVideo".to_string(),
                    DevicePool::new("loopbackVideo", video),
                );
            }
        }

        Ok(Self::new(pools))
    }
}

fn enumerate_nodes(dir: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut nodes = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(nodes),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(prefix) {
            nodes.push(entry.path().to_string_lossy().to_string());
        }
    }
    nodes.sort();
    Ok(nodes)
}

#[async_trait]
impl DeviceManager for PooledDeviceManager {
    async fn available_capacity(&self) -> Result<usize> {
        // An unconstrained worker (no pools) never limits admission.
        Ok(self
            .pools
            .values()
            .map(DevicePool::available)
            .min()
            .unwrap_or(usize::MAX))
    }

    fn get_device(&self, kind: &str) -> Result<DeviceLease> {
        let pool = self
            .pools
            .get(kind)
            .ok_or_else(|| anyhow::anyhow!("no {} devices on this host", kind))?;
        pool.acquire()
            .ok_or_else(|| anyhow::anyhow!("all {} devices are leased", kind))
    }
}
