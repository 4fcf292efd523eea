//! Cancellation handling
//!
//! The queue may resolve a run as canceled while the worker is still
//! executing it. A background feed polls the queue for such messages
//! and forwards them to a listener, which signals the matching handler.
//! The runner's normal retirement path then completes the teardown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use gantry_client::QueueClient;
use gantry_core::domain::CancelMessage;

use crate::monitor::Monitor;
use crate::state::SharedState;

/// Resolution reason that triggers cooperative cancellation
const REASON_CANCELED: &str = "canceled";

/// Consumes cancellation messages and signals running handlers
pub struct CancelListener {
    state: SharedState,
    monitor: Arc<dyn Monitor>,
}

impl CancelListener {
    pub fn new(state: SharedState, monitor: Arc<dyn Monitor>) -> Self {
        Self { state, monitor }
    }

    /// Start consuming messages from the feed
    pub fn spawn(self, mut messages: mpsc::Receiver<CancelMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if let Err(e) = self.handle(message).await {
                    warn!(error = %format!("{:#}", e), "cancellation handling failed");
                }
            }
        })
    }

    /// Apply one cancellation message against the running set
    pub async fn handle(&self, message: CancelMessage) -> Result<()> {
        let run_id = message.payload.run_id;
        let task_id = message.payload.status.task_id.clone();

        // Only act on runs the queue actually resolved as canceled;
        // other resolutions (deadline-exceeded, completed) are the
        // runner's own business.
        let Some(reason) = message.reason_resolved() else {
            return Ok(());
        };
        if reason != REASON_CANCELED {
            return Ok(());
        }
        let reason = reason.to_string();

        let target = {
            let state = self.state.lock().unwrap();
            state
                .find(&task_id, run_id)
                .map(|entry| (entry.handler.clone(), entry.devices.clone()))
        };

        let Some((handler, devices)) = target else {
            debug!(task_id, run_id, "cancellation for task not running here");
            return Ok(());
        };

        handler.cancel(&reason).await;
        self.monitor.count("task.cancelled");

        // Free the devices now; the runner's retirement tolerates the
        // already-released leases.
        for lease in devices.values() {
            lease.release();
        }

        Ok(())
    }
}

/// Poll the queue for cancellation messages and forward them to `tx`
pub fn spawn_cancel_feed(
    client: Arc<QueueClient>,
    worker_id: String,
    interval: Duration,
    tx: mpsc::Sender<CancelMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);

        loop {
            ticker.tick().await;

            match client.fetch_cancellations(&worker_id).await {
                Ok(messages) => {
                    for message in messages {
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!(error = %e, "cancellation fetch failed"),
            }
        }
    })
}
