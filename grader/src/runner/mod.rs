//! Concrete implementation on building and running submissions as containers.
//!
//! This module is not responsible for judging what runs inside the container.
//! See [`crate::probe`] for corresponding code.

use async_trait::async_trait;
use bollard::Docker;

pub mod container;
pub mod image;
pub mod model;
pub mod network;
mod util;

pub use model::{
    BuildError, BuildImageOptions, BuildImageOptionsBuilder, ContainerHandle, RunError, RunOptions,
    RunOptionsBuilder,
};

/// Maximum size of a container log tail kept in results.
const LOG_SIZE_LIMIT: usize = 16 * 1024;

/// Some kind of container engine that can build and run submissions.
///
/// `stop` and `remove` never fail: teardown is best-effort, and a failure in
/// one step must never keep the other from running.
#[async_trait]
pub trait ContainerRuntime: Sync + Send {
    /// Build an image from the build context in `opt`.
    async fn build_image(&self, opt: &BuildImageOptions) -> Result<(), BuildError>;

    /// Start a detached container.
    async fn run(&self, opt: &RunOptions) -> Result<ContainerHandle, RunError>;

    async fn stop(&self, handle: &ContainerHandle);

    async fn remove(&self, handle: &ContainerHandle);

    /// The last `tail` lines of the container's output, if available.
    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Option<String>;

    async fn remove_image(&self, tag: &str);

    /// Stop and remove the container, consuming its handle.
    async fn teardown(&self, mut handle: ContainerHandle) {
        tracing::debug!(name = %handle.name, "Tearing down container");
        self.stop(&handle).await;
        self.remove(&handle).await;
        handle.defuse();
    }
}

/// [`ContainerRuntime`] talking to a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    /// Seconds given to the container to exit on `stop` before it is killed
    stop_grace_secs: i64,
}

impl DockerRuntime {
    pub fn new(docker: Docker, stop_grace_secs: i64) -> Self {
        DockerRuntime {
            docker,
            stop_grace_secs,
        }
    }

    /// Connect to the local daemon using the platform's default socket.
    pub fn connect_local(stop_grace_secs: i64) -> Result<Self, bollard::errors::Error> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(DockerRuntime::new(docker, stop_grace_secs))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, opt: &BuildImageOptions) -> Result<(), BuildError> {
        image::build_image(&self.docker, opt).await
    }

    async fn run(&self, opt: &RunOptions) -> Result<ContainerHandle, RunError> {
        container::run_container(&self.docker, opt).await
    }

    async fn stop(&self, handle: &ContainerHandle) {
        container::stop_container(&self.docker, handle, self.stop_grace_secs).await
    }

    async fn remove(&self, handle: &ContainerHandle) {
        container::remove_container(&self.docker, handle).await
    }

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Option<String> {
        container::container_logs(&self.docker, handle, tail, LOG_SIZE_LIMIT).await
    }

    async fn remove_image(&self, tag: &str) {
        image::remove_image(&self.docker, tag).await
    }
}
