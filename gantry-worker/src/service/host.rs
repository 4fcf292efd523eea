//! Host instance control
//!
//! Uptime feeds boot-event timestamps and the efficiency denominator;
//! shutdown is the final act of the worker and its failure is the one
//! fatal error in the loop.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

/// Control surface of the host instance
#[async_trait]
pub trait HostController: Send + Sync {
    /// Seconds the host has been up
    fn uptime(&self) -> Duration;

    /// Uptime within the current billing cycle
    fn billing_cycle_uptime(&self) -> Duration;

    /// Power the instance off
    async fn shutdown(&self) -> Result<()>;
}

/// Host controller reading `/proc/uptime` and shelling out for poweroff
pub struct LinuxHost {
    billing_cycle: Duration,
}

impl LinuxHost {
    pub fn new(billing_cycle: Duration) -> Self {
        Self { billing_cycle }
    }

    fn read_proc_uptime() -> Result<Duration> {
        let content =
            std::fs::read_to_string("/proc/uptime").context("failed to read /proc/uptime")?;
        let seconds: f64 = content
            .split_whitespace()
            .next()
            .and_then(|field| field.parse().ok())
            .with_context(|| format!("unexpected /proc/uptime content: {}", content.trim()))?;
        Ok(Duration::from_secs_f64(seconds))
    }
}

#[async_trait]
impl HostController for LinuxHost {
    fn uptime(&self) -> Duration {
        Self::read_proc_uptime().unwrap_or(Duration::ZERO)
    }

    fn billing_cycle_uptime(&self) -> Duration {
        let cycle = self.billing_cycle.as_secs().max(1);
        Duration::from_secs(self.uptime().as_secs() % cycle)
    }

    async fn shutdown(&self) -> Result<()> {
        info!("powering off host instance");

        let status = Command::new("shutdown")
            .arg("-h")
            .arg("now")
            .status()
            .await
            .context("failed to execute shutdown command")?;

        if !status.success() {
            anyhow::bail!("shutdown command exited with {}", status);
        }

        Ok(())
    }
}
