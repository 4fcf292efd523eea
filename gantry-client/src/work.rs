//! Work-claiming API endpoints

use serde::Serialize;

use crate::error::Result;
use crate::QueueClient;
use gantry_core::domain::{CancelMessage, Claim};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimWorkRequest<'a> {
    worker_id: &'a str,
    num_tasks: usize,
}

impl QueueClient {
    /// Claim up to `num_tasks` units of work for this worker
    ///
    /// The queue may return fewer claims than requested, including none.
    ///
    /// # Arguments
    /// * `worker_id` - Unique identifier of the claiming worker
    /// * `num_tasks` - Maximum number of claims to grant
    pub async fn claim_work(&self, worker_id: &str, num_tasks: usize) -> Result<Vec<Claim>> {
        let url = format!("{}/api/work/claim", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ClaimWorkRequest {
                worker_id,
                num_tasks,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch cancellation messages pending for this worker
    ///
    /// Returns resolution notices for runs the queue has cancelled out
    /// from under the worker since the last fetch.
    pub async fn fetch_cancellations(&self, worker_id: &str) -> Result<Vec<CancelMessage>> {
        let url = format!("{}/api/work/cancellations", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("workerId", worker_id)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}
