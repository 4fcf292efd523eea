//! Task handlers
//!
//! A handler is the opaque controller for one claimed run: the loop
//! starts it, may cancel it cooperatively, and may abort it during
//! immediate shutdown. The standard handler runs the task payload in a
//! podman container, pinned to any leased devices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use gantry_core::domain::Claim;

/// Observable execution state of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Created,
    Running,
    Cancelled,
    Aborted,
    Finished,
}

/// Device placement passed into handler construction
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Leased CPU to pin the task to, when CPU restriction is on
    pub cpu_id: Option<String>,

    /// Leased device node per requested capability kind
    pub device_ids: HashMap<String, String>,
}

/// Controller for one executing run
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task to completion
    ///
    /// Returns on every exit path: normal completion, execution
    /// failure, cooperative cancellation, or abort.
    async fn start(&self) -> Result<()>;

    /// Cooperatively stop the run; `start` returns within bounded time
    async fn cancel(&self, reason: &str);

    /// Tear the run down synchronously (immediate shutdown)
    async fn abort(&self, reason: &str) -> Result<()>;

    fn status(&self) -> HandlerStatus;
}

/// Builds a handler for each admitted claim
pub trait HandlerFactory: Send + Sync {
    fn create(&self, claim: &Claim, options: ExecutionOptions) -> Result<Arc<dyn TaskHandler>>;
}

/// Handler that executes the task payload in a podman container
pub struct ContainerHandler {
    container_name: String,
    image: String,
    command: Vec<String>,
    options: ExecutionOptions,
    status: Mutex<HandlerStatus>,
}

impl ContainerHandler {
    fn new(claim: &Claim, default_image: &str, options: ExecutionOptions) -> Self {
        let payload = &claim.task.payload;
        Self {
            container_name: format!(
                "gantry-{}-{}-{}",
                claim.task_id(),
                claim.run_id,
                Uuid::new_v4().simple()
            ),
            image: payload
                .image
                .clone()
                .unwrap_or_else(|| default_image.to_string()),
            command: payload.command.clone().unwrap_or_default(),
            options,
            status: Mutex::new(HandlerStatus::Created),
        }
    }

    fn set_status(&self, status: HandlerStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn interrupted(&self) -> bool {
        matches!(
            self.status(),
            HandlerStatus::Cancelled | HandlerStatus::Aborted
        )
    }
}

#[async_trait]
impl TaskHandler for ContainerHandler {
    async fn start(&self) -> Result<()> {
        self.set_status(HandlerStatus::Running);

        let mut command = Command::new("podman");
        command
            .arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&self.container_name);

        if let Some(cpu) = &self.options.cpu_id {
            command.arg(format!("--cpuset-cpus={}", cpu));
        }
        for device in self.options.device_ids.values() {
            command.arg("--device").arg(device);
        }

        command.arg(&self.image);
        command.args(&self.command);

        debug!(container = %self.container_name, image = %self.image, "starting task container");

        let status = command
            .status()
            .await
            .context("failed to execute podman run")?;

        // A stopped or killed container exits non-zero; that is the
        // expected outcome of cancel/abort, not a task failure.
        if self.interrupted() {
            info!(container = %self.container_name, "task container interrupted");
            return Ok(());
        }

        self.set_status(HandlerStatus::Finished);

        if !status.success() {
            anyhow::bail!(
                "task container {} exited with {}",
                self.container_name,
                status
            );
        }

        Ok(())
    }

    async fn cancel(&self, reason: &str) {
        info!(container = %self.container_name, reason, "cancelling task container");
        self.set_status(HandlerStatus::Cancelled);

        let result = Command::new("podman")
            .arg("stop")
            .arg(&self.container_name)
            .output()
            .await;

        if let Err(e) = result {
            debug!(container = %self.container_name, error = %e, "container stop failed");
        }
    }

    async fn abort(&self, reason: &str) -> Result<()> {
        info!(container = %self.container_name, reason, "killing task container");
        self.set_status(HandlerStatus::Aborted);

        let output = Command::new("podman")
            .arg("kill")
            .arg(&self.container_name)
            .output()
            .await
            .context("failed to execute podman kill")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "podman kill {} failed: {}",
                self.container_name,
                stderr.trim()
            );
        }

        Ok(())
    }

    fn status(&self) -> HandlerStatus {
        *self.status.lock().unwrap()
    }
}

/// Factory for container-backed handlers
pub struct ContainerHandlerFactory {
    default_image: String,
}

impl ContainerHandlerFactory {
    pub fn new(default_image: String) -> Self {
        Self { default_image }
    }
}

impl HandlerFactory for ContainerHandlerFactory {
    fn create(&self, claim: &Claim, options: ExecutionOptions) -> Result<Arc<dyn TaskHandler>> {
        Ok(Arc::new(ContainerHandler::new(
            claim,
            &self.default_image,
            options,
        )))
    }
}
