//! Work queue repository
//!
//! The poll loop only ever talks to the queue through [`WorkQueue`];
//! the HTTP implementation delegates to the shared queue client.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use gantry_client::QueueClient;
use gantry_core::domain::Claim;

/// Source of claimable work
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Claim up to `count` tasks for this worker
    ///
    /// The queue may grant fewer claims than requested, including none.
    async fn claim_work(&self, count: usize) -> Result<Vec<Claim>>;
}

/// HTTP implementation of [`WorkQueue`]
pub struct HttpWorkQueue {
    client: Arc<QueueClient>,
    worker_id: String,
}

impl HttpWorkQueue {
    pub fn new(client: Arc<QueueClient>, worker_id: String) -> Self {
        Self { client, worker_id }
    }
}

#[async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn claim_work(&self, count: usize) -> Result<Vec<Claim>> {
        self.client
            .claim_work(&self.worker_id, count)
            .await
            .context("failed to claim work from queue")
    }
}
