//! External shutdown intent
//!
//! The worker itself never decides to die; it asks an external shutdown
//! manager every poll cycle. The standard implementation combines three
//! signals:
//! - a spot-termination notice from the instance metadata service
//!   (immediate shutdown)
//! - SIGINT (graceful drain)
//! - an optional idle timeout (graceful drain)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownIntent;

/// External authority over when the worker should exit
pub trait ShutdownManager: Send + Sync {
    /// Called each poll cycle the running set is empty
    fn on_idle(&self);

    /// Called each poll cycle the running set is non-empty
    fn on_working(&self);

    /// Current shutdown intent
    fn should_exit(&self) -> ShutdownIntent;
}

/// Shutdown manager for cloud instances
pub struct InstanceLifecycle {
    shutdown_after_idle: Option<Duration>,
    idle_since: Mutex<Option<Instant>>,
    interrupted: AtomicBool,
    termination_notice: AtomicBool,
}

impl InstanceLifecycle {
    pub fn new(shutdown_after_idle: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            shutdown_after_idle,
            idle_since: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            termination_notice: AtomicBool::new(false),
        })
    }

    /// Start the SIGINT listener and the spot-notice poller
    pub fn spawn_watchers(self: &Arc<Self>, notice_url: String) {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining gracefully");
                lifecycle.interrupted.store(true, Ordering::SeqCst);
            }
        });

        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let mut ticker = time::interval(Duration::from_secs(5));

            loop {
                ticker.tick().await;

                match client.get(&notice_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        warn!("spot termination notice received");
                        lifecycle.termination_notice.store(true, Ordering::SeqCst);
                        return;
                    }
                    // 404 is the steady state: no notice posted yet.
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "termination notice poll failed"),
                }
            }
        });
    }

    fn idle_expired(&self) -> bool {
        let Some(limit) = self.shutdown_after_idle else {
            return false;
        };
        self.idle_since
            .lock()
            .unwrap()
            .map(|since| since.elapsed() > limit)
            .unwrap_or(false)
    }
}

impl ShutdownManager for InstanceLifecycle {
    fn on_idle(&self) {
        let mut idle_since = self.idle_since.lock().unwrap();
        if idle_since.is_none() {
            *idle_since = Some(Instant::now());
        }
    }

    fn on_working(&self) {
        *self.idle_since.lock().unwrap() = None;
    }

    fn should_exit(&self) -> ShutdownIntent {
        if self.termination_notice.load(Ordering::SeqCst) {
            return ShutdownIntent::Immediate;
        }
        if self.interrupted.load(Ordering::SeqCst) || self.idle_expired() {
            return ShutdownIntent::Graceful;
        }
        ShutdownIntent::None
    }
}
