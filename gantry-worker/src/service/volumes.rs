//! Task volume caches
//!
//! Tasks may reuse cached volumes between runs. Before admitting a new
//! batch of claims the worker purges caches past their retention age so
//! stale data does not accumulate on the work volume.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Purgeable cache of reusable task volumes
#[async_trait]
pub trait VolumeCache: Send + Sync {
    /// Remove caches past their retention age
    async fn purge_caches(&self) -> Result<()>;
}

/// Volume cache backed by directories under a cache root
pub struct DirVolumeCache {
    root: PathBuf,
    retention: Duration,
}

impl DirVolumeCache {
    pub fn new(root: PathBuf, retention: Duration) -> Self {
        Self { root, retention }
    }
}

#[async_trait]
impl VolumeCache for DirVolumeCache {
    async fn purge_caches(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            // A missing cache root just means nothing is cached yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read cache root {}", self.root.display()))
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let expired = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .map(|age| age > self.retention)
                .unwrap_or(false);

            if !expired {
                continue;
            }

            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };

            match result {
                Ok(()) => debug!(cache = %path.display(), "purged expired cache"),
                Err(e) => warn!(cache = %path.display(), error = %e, "failed to purge cache"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_root_is_not_an_error() {
        let cache = DirVolumeCache::new(
            PathBuf::from("/nonexistent/gantry-test-caches"),
            Duration::from_secs(60),
        );
        assert!(cache.purge_caches().await.is_ok());
    }

    #[tokio::test]
    async fn fresh_caches_survive_purge() {
        let root = std::env::temp_dir().join(format!("gantry-cache-{}", uuid::Uuid::new_v4()));
        let kept = root.join("fresh");
        std::fs::create_dir_all(&kept).unwrap();

        let cache = DirVolumeCache::new(root.clone(), Duration::from_secs(3600));
        cache.purge_caches().await.unwrap();

        assert!(kept.exists());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn expired_caches_are_removed() {
        let root = std::env::temp_dir().join(format!("gantry-cache-{}", uuid::Uuid::new_v4()));
        let stale = root.join("stale");
        std::fs::create_dir_all(&stale).unwrap();

        // Zero retention expires everything immediately.
        let cache = DirVolumeCache::new(root.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.purge_caches().await.unwrap();

        assert!(!stale.exists());
        std::fs::remove_dir_all(&root).ok();
    }
}
