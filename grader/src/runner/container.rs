//! Creating, starting and destroying the container of a submission.

use std::{collections::HashMap, fmt::Write};

use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    models::{HostConfig, PortBinding},
    Docker,
};
use bytes::BytesMut;
use tokio_stream::StreamExt;

use super::{
    model::{ContainerHandle, RunError, RunOptions},
    network::ensure_network,
    util::{is_conflict, is_not_found, is_not_modified, is_recoverable_error},
};

/// Create and start the container described by `opt`.
///
/// If creation succeeds but starting (or the whole operation) fails, the
/// container is removed before the error is returned.
#[tracing::instrument(skip(docker, opt), fields(name = %opt.container_name))]
pub async fn run_container(docker: &Docker, opt: &RunOptions) -> Result<ContainerHandle, RunError> {
    let job = create_and_start(docker, opt);
    let res = match opt.timeout {
        Some(timeout) => tokio::time::timeout(timeout, job)
            .await
            .unwrap_or(Err(RunError::Timeout(timeout))),
        None => job.await,
    };
    if res.is_err() {
        // the container may or may not exist at this point
        force_remove_by_name(docker, &opt.container_name).await;
    }
    res
}

async fn create_and_start(docker: &Docker, opt: &RunOptions) -> Result<ContainerHandle, RunError> {
    if let Some(network) = &opt.network {
        ensure_network(docker, network)
            .await
            .map_err(|e| RunError::Network(network.clone(), e))?;
    }

    // a previous run in the same slot may have left its container behind
    force_remove_by_name(docker, &opt.container_name).await;

    let port_key = format!("{}/tcp", opt.container_port);
    let exposed_ports: HashMap<String, HashMap<(), ()>> =
        Some((port_key.clone(), HashMap::new())).into_iter().collect();
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = Some((
        port_key,
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".into()),
            host_port: Some(opt.host_port.to_string()),
        }]),
    ))
    .into_iter()
    .collect();

    let res = docker
        .create_container(
            Some(CreateContainerOptions {
                name: opt.container_name.as_str(),
                ..Default::default()
            }),
            Config {
                image: Some(opt.image.clone()),
                exposed_ports: Some(exposed_ports),
                host_config: Some(HostConfig {
                    port_bindings: Some(port_bindings),
                    network_mode: opt.network.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .map_err(RunError::Create)?;
    tracing::debug!(id = %res.id, "Container created");

    docker
        .start_container(&res.id, None::<StartContainerOptions<String>>)
        .await
        .map_err(RunError::Start)?;

    // only armed once the container is running, so a timeout above can never
    // drop an armed handle
    let handle = ContainerHandle::new(res.id, opt);
    tracing::info!(id = %handle.id, port = handle.host_port, "Container started");
    Ok(handle)
}

async fn force_remove_by_name(docker: &Docker, name: &str) {
    let res = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            }),
        )
        .await;
    match res {
        Ok(()) => tracing::info!(name, "Removed leftover container"),
        Err(e) if is_not_found(&e) || is_conflict(&e) => {}
        Err(e) => tracing::warn!(name, "Failed to remove leftover container: {}", e),
    }
}

/// Stop a container. Stopping a stopped or missing container is logged and
/// ignored, and so is any other failure.
pub async fn stop_container(docker: &Docker, handle: &ContainerHandle, grace_secs: i64) {
    let res = docker
        .stop_container(&handle.id, Some(StopContainerOptions { t: grace_secs }))
        .await;
    match res {
        Ok(()) => tracing::debug!(name = %handle.name, "Container stopped"),
        Err(e) if is_not_modified(&e) => {
            tracing::debug!(name = %handle.name, "Container was already stopped")
        }
        Err(e) if is_not_found(&e) => {
            tracing::debug!(name = %handle.name, "Container is already gone")
        }
        Err(e) => tracing::warn!(name = %handle.name, "Failed to stop container: {}", e),
    }
}

/// Remove a container. Removing a missing container is logged and ignored,
/// and so is any other failure.
pub async fn remove_container(docker: &Docker, handle: &ContainerHandle) {
    let res = docker
        .remove_container(
            &handle.id,
            Some(RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            }),
        )
        .await;
    match res {
        Ok(()) => tracing::debug!(name = %handle.name, "Container removed"),
        Err(e) if is_not_found(&e) || is_conflict(&e) => {
            tracing::debug!(name = %handle.name, "Container is already gone")
        }
        Err(e) => tracing::warn!(name = %handle.name, "Failed to remove container: {}", e),
    }
}

/// Fetch the last `tail` lines of a container's output, capped at
/// `size_limit` bytes.
pub async fn container_logs(
    docker: &Docker,
    handle: &ContainerHandle,
    tail: usize,
    size_limit: usize,
) -> Option<String> {
    let logs = docker.logs(
        &handle.id,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        }),
    );
    tokio::pin!(logs);

    let mut output = SizeConstraintBytesMut::new(size_limit);
    while let Some(v) = logs.next().await {
        match v {
            Ok(LogOutput::StdOut { message })
            | Ok(LogOutput::StdErr { message })
            | Ok(LogOutput::Console { message }) => output.append(&message),
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) if is_recoverable_error(&e) => continue,
            Err(e) => {
                tracing::warn!(name = %handle.name, "Failed to fetch container logs: {}", e);
                return None;
            }
        }
    }
    Some(output.into_string())
}

struct SizeConstraintBytesMut {
    size_limit: usize,
    bytes: BytesMut,
}

impl SizeConstraintBytesMut {
    pub fn new(size_limit: usize) -> Self {
        SizeConstraintBytesMut {
            size_limit,
            bytes: BytesMut::new(),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if self.bytes.len() >= self.size_limit {
            // do nothing
        } else if self.bytes.len() + bytes.len() > self.size_limit {
            let cut_at = self.size_limit - self.bytes.len();
            self.bytes.extend_from_slice(&bytes[0..cut_at]);
        } else {
            self.bytes.extend_from_slice(bytes);
        }
    }

    pub fn is_oversized(&self) -> bool {
        self.bytes.len() >= self.size_limit
    }

    pub fn into_string(self) -> String {
        let oversized = self.is_oversized();
        let mut s = String::from_utf8_lossy(&self.bytes).into_owned();
        if oversized {
            let _ = writeln!(s);
            let _ = writeln!(
                s,
                "--- output buffer capped out at {} bytes ---",
                self.size_limit
            );
        }
        s
    }
}
