//! Worker configuration
//!
//! Defines all configurable parameters for the worker including
//! capacity, polling intervals, disk pressure limits, and queue
//! connection settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration
///
/// All capacities and intervals are configurable to allow tuning for
/// different instance types (large multi-slot hosts vs single-slot dev
/// machines).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Worker type name, used to group capacity metrics
    pub worker_type: String,

    /// Queue service base URL (e.g., "http://localhost:8080")
    pub queue_url: String,

    /// Number of task slots this worker offers
    pub capacity: usize,

    /// How often to poll the queue for claimable work
    pub poll_interval: Duration,

    /// How often to emit capacity and efficiency metrics
    pub report_interval: Duration,

    /// Whether each task gets pinned to a leased CPU
    pub restrict_cpu: bool,

    /// Additional leasable device pools, keyed by capability kind
    /// (e.g. gpu -> [/dev/nvidia0, /dev/nvidia1])
    pub device_pools: HashMap<String, Vec<String>>,

    /// Volume that holds task workspaces, watched for disk pressure
    pub volume_path: PathBuf,

    /// Minimum free bytes on the work volume before claiming stops
    pub disk_threshold_bytes: u64,

    /// Root directory of purgeable volume caches
    pub cache_path: PathBuf,

    /// Age beyond which cached volumes are purged
    pub cache_retention: Duration,

    /// Shut down gracefully after being idle this long (None = never)
    pub shutdown_after_idle: Option<Duration>,

    /// Length of the host billing cycle, for efficiency denominators
    pub billing_cycle: Duration,

    /// Instance metadata URL polled for spot termination notices
    pub termination_notice_url: String,

    /// Default container image for tasks that do not name one
    pub default_image: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, queue_url: String) -> Self {
        Self {
            worker_id,
            worker_type: "standard".to_string(),
            queue_url,
            capacity: 2,
            poll_interval: Duration::from_secs(5),
            report_interval: Duration::from_secs(60),
            restrict_cpu: false,
            device_pools: HashMap::new(),
            volume_path: PathBuf::from("/var/lib/gantry"),
            disk_threshold_bytes: 10 * 1024 * 1024 * 1024,
            cache_path: PathBuf::from("/var/lib/gantry/caches"),
            cache_retention: Duration::from_secs(3600),
            shutdown_after_idle: None,
            billing_cycle: Duration::from_secs(3600),
            termination_notice_url:
                "http://169.254.169.254/latest/meta-data/spot/termination-time".to_string(),
            default_image: "docker.io/alpine:latest".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (required)
    /// - QUEUE_URL (required)
    /// - WORKER_TYPE (optional, default: standard)
    /// - CAPACITY (optional, default: 2)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - REPORT_INTERVAL (optional, seconds, default: 60)
    /// - RESTRICT_CPU (optional, default: false)
    /// - DEVICE_POOLS (optional, `kind=id,id;kind=id`, default: none)
    /// - VOLUME_PATH (optional, default: /var/lib/gantry)
    /// - DISK_THRESHOLD_BYTES (optional, default: 10 GiB)
    /// - CACHE_RETENTION (optional, seconds, default: 3600)
    /// - SHUTDOWN_AFTER_IDLE (optional, seconds, default: never)
    /// - BILLING_CYCLE (optional, seconds, default: 3600)
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .map_err(|_| anyhow::anyhow!("WORKER_ID environment variable not set"))?;

        let queue_url = std::env::var("QUEUE_URL")
            .map_err(|_| anyhow::anyhow!("QUEUE_URL environment variable not set"))?;

        let mut config = Self::new(worker_id, queue_url);

        if let Ok(worker_type) = std::env::var("WORKER_TYPE") {
            config.worker_type = worker_type;
        }

        if let Some(capacity) = env_parse::<usize>("CAPACITY") {
            config.capacity = capacity;
        }

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("REPORT_INTERVAL") {
            config.report_interval = Duration::from_secs(secs);
        }

        if let Some(restrict) = env_parse::<bool>("RESTRICT_CPU") {
            config.restrict_cpu = restrict;
        }

        if let Ok(raw) = std::env::var("DEVICE_POOLS") {
            config.device_pools = parse_device_pools(&raw)?;
        }

        if let Ok(path) = std::env::var("VOLUME_PATH") {
            config.volume_path = PathBuf::from(&path);
            config.cache_path = PathBuf::from(path).join("caches");
        }

        if let Some(bytes) = env_parse::<u64>("DISK_THRESHOLD_BYTES") {
            config.disk_threshold_bytes = bytes;
        }

        if let Some(secs) = env_parse::<u64>("CACHE_RETENTION") {
            config.cache_retention = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("SHUTDOWN_AFTER_IDLE") {
            config.shutdown_after_idle = Some(Duration::from_secs(secs));
        }

        if let Some(secs) = env_parse::<u64>("BILLING_CYCLE") {
            config.billing_cycle = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if self.queue_url.is_empty() {
            anyhow::bail!("queue_url cannot be empty");
        }

        if !self.queue_url.starts_with("http://") && !self.queue_url.starts_with("https://") {
            anyhow::bail!("queue_url must start with http:// or https://");
        }

        if self.capacity == 0 {
            anyhow::bail!("capacity must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.report_interval.is_zero() {
            anyhow::bail!("report_interval must be greater than 0");
        }

        if self.billing_cycle.is_zero() {
            anyhow::bail!("billing_cycle must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// Parses a `kind=id,id;kind=id` device pool specification
fn parse_device_pools(raw: &str) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut pools = HashMap::new();

    for entry in raw.split(';').filter(|entry| !entry.trim().is_empty()) {
        let (kind, ids) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid device pool entry (expected kind=ids): {}", entry))?;

        let kind = kind.trim();
        if kind.is_empty() {
            anyhow::bail!("device pool entry has an empty kind: {}", entry);
        }

        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            anyhow::bail!("device pool {} lists no devices", kind);
        }

        pools.insert(kind.to_string(), ids);
    }

    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capacity, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert!(!config.restrict_cpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty worker_id should fail
        config.worker_id = String::new();
        assert!(config.validate().is_err());

        config.worker_id = "test".to_string();

        // Invalid URL should fail
        config.queue_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.queue_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());

        // Zero capacity should fail
        config.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_device_pools() {
        let pools =
            parse_device_pools("gpu=/dev/nvidia0,/dev/nvidia1;loopbackAudio=/dev/snd/controlC0")
                .unwrap();

        assert_eq!(
            pools.get("gpu"),
            Some(&vec!["/dev/nvidia0".to_string(), "/dev/nvidia1".to_string()])
        );
        assert_eq!(
            pools.get("loopbackAudio"),
            Some(&vec!["/dev/snd/controlC0".to_string()])
        );

        assert!(parse_device_pools("").unwrap().is_empty());
        assert!(parse_device_pools("gpu").is_err());
        assert!(parse_device_pools("=a,b").is_err());
        assert!(parse_device_pools("gpu=").is_err());
    }
}
