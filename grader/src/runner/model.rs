use derive_builder::Builder;
use drop_bomb::DropBomb;
use err_derive::Error;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(display = "No Dockerfile found in {}", _0)]
    MissingBuildFile(String),

    #[error(display = "Failed to pack build context: {}", _0)]
    FileTransfer(String),

    #[error(display = "Image build failed: {}", _0)]
    Build(String),

    #[error(display = "Image build timed out after {:?}", _0)]
    Timeout(Duration),

    #[error(display = "Docker error while building: {}", _0)]
    Docker(#[error(source)] bollard::errors::Error),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(display = "Failed to prepare network {}: {}", _0, _1)]
    Network(String, #[error(source, no_from)] bollard::errors::Error),

    #[error(display = "Failed to create container: {}", _0)]
    Create(#[error(source, no_from)] bollard::errors::Error),

    #[error(display = "Failed to start container: {}", _0)]
    Start(#[error(source, no_from)] bollard::errors::Error),

    #[error(display = "Container did not start within {:?}", _0)]
    Timeout(Duration),
}

/// Options of building the image of one submission.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into), pattern = "owned")]
pub struct BuildImageOptions {
    /// The build context, containing the `Dockerfile`
    pub context_dir: PathBuf,

    /// The tag of this image. Please select a tag that's unlikely to be used
    /// by other processes, e.g. with namespace and the submission index
    pub tag: String,

    /// The CPU fraction allowed to use
    #[builder(default)]
    pub cpu_quota: Option<f64>,

    #[builder(default)]
    pub timeout: Option<Duration>,
}

/// Options of running the container of one submission.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into), pattern = "owned")]
pub struct RunOptions {
    pub image: String,

    /// Name of the container. Any existing container of the same name is
    /// removed before the new one is created.
    pub container_name: String,

    /// The port the server listens on inside the container
    pub container_port: u16,

    /// The host port `container_port` is published on
    pub host_port: u16,

    /// The network to attach the container to
    #[builder(default)]
    pub network: Option<String>,

    #[builder(default)]
    pub timeout: Option<Duration>,
}

/// A started container. Must be handed back to
/// [`ContainerRuntime::teardown`](super::ContainerRuntime::teardown); dropping
/// it otherwise panics.
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub network: Option<String>,

    _drop_bomb: DropBomb,
}

impl ContainerHandle {
    pub fn new(id: String, opt: &RunOptions) -> ContainerHandle {
        ContainerHandle {
            id,
            name: opt.container_name.clone(),
            host_port: opt.host_port,
            container_port: opt.container_port,
            network: opt.network.clone(),
            _drop_bomb: DropBomb::new("`ContainerRuntime::teardown()` must be called before dropping!"),
        }
    }

    /// Mark this container as torn down.
    pub fn defuse(&mut self) {
        self._drop_bomb.defuse();
    }

    /// The URL the submission's server can be reached at: either the mapped
    /// port on `host`, or the container's own name and port on its network.
    pub fn base_url(&self, host: &str, via_network: bool) -> String {
        if via_network && self.network.is_some() {
            format!("http://{}:{}", self.name, self.container_port)
        } else {
            format!("http://{}:{}", host, self.host_port)
        }
    }
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host_port", &self.host_port)
            .field("container_port", &self.container_port)
            .field("network", &self.network)
            .finish()
    }
}
