//! Garbage collection of execution leftovers
//!
//! Invoked once per poll cycle. A light sweep removes exited task
//! containers; a full sweep (only requested while no tasks run) also
//! reclaims dangling volumes and images.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Reclaims container/volume resources between poll cycles
#[async_trait]
pub trait GarbageCollector: Send + Sync {
    async fn sweep(&self, full: bool) -> Result<()>;
}

/// Collector backed by podman prune commands
pub struct ContainerReclaimer;

impl ContainerReclaimer {
    pub fn new() -> Self {
        Self
    }

    async fn prune(&self, object: &str) -> Result<()> {
        let output = Command::new("podman")
            .arg(object)
            .arg("prune")
            .arg("-f")
            .output()
            .await
            .with_context(|| format!("failed to execute podman {} prune", object))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(object, stderr = %stderr.trim(), "prune failed");
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                debug!(object, reclaimed = %stdout.trim(), "prune reclaimed resources");
            }
        }

        Ok(())
    }
}

impl Default for ContainerReclaimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GarbageCollector for ContainerReclaimer {
    async fn sweep(&self, full: bool) -> Result<()> {
        self.prune("container").await?;

        if full {
            self.prune("volume").await?;
            self.prune("image").await?;
        }

        Ok(())
    }
}
