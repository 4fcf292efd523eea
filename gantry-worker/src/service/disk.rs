//! Disk pressure probe
//!
//! Guards the work volume against filling up: when available space
//! drops below the configured threshold, the poll cycle stops claiming
//! until the garbage collector frees room.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

/// Free-space predicate for the work volume
#[async_trait]
pub trait DiskProbe: Send + Sync {
    /// True when available bytes on `volume` are below `threshold_bytes`
    /// for each of the `admissible` slots about to be offered
    ///
    /// Every admitted task may fill up to the threshold concurrently,
    /// so the required headroom is `threshold_bytes × admissible`.
    async fn exceeds_threshold(
        &self,
        volume: &Path,
        threshold_bytes: u64,
        admissible: usize,
    ) -> Result<bool>;
}

/// Probe backed by `df`
pub struct DfProbe;

impl DfProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DfProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiskProbe for DfProbe {
    async fn exceeds_threshold(
        &self,
        volume: &Path,
        threshold_bytes: u64,
        admissible: usize,
    ) -> Result<bool> {
        let output = Command::new("df")
            .arg("--output=avail")
            .arg("-B1")
            .arg(volume)
            .output()
            .await
            .context("failed to execute df")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "df failed for {}: {}",
                volume.display(),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let available: u64 = stdout
            .lines()
            .nth(1)
            .map(str::trim)
            .and_then(|line| line.parse().ok())
            .with_context(|| format!("unexpected df output: {}", stdout.trim()))?;

        let required = threshold_bytes.saturating_mul(admissible as u64);
        let exceeded = available < required;
        if exceeded {
            warn!(
                volume = %volume.display(),
                available,
                required,
                threshold = threshold_bytes,
                admissible,
                "available diskspace below threshold, holding back claims"
            );
        }

        Ok(exceeded)
    }
}
