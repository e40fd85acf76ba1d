//! Tests to verify that [`crate::runner::DockerRuntime`] talks to docker
//! correctly.
//!
//! Tests in this module should be ignored by default, since test environments may
//! not have docker, or the docker instance may not be exposed in the default
//! path.

use std::time::Duration;

use test_env_log::test;

use crate::runner::{
    model::{BuildImageOptionsBuilder, RunOptionsBuilder},
    BuildError, ContainerRuntime, DockerRuntime,
};

const IMAGE_TAG: &str = "rurikawa-grader-test:busybox-httpd";

async fn build_httpd_image(runtime: &DockerRuntime) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(
        dir.path().join("Dockerfile"),
        "FROM busybox\nRUN mkdir /www && echo ok > /www/index.html\nCMD [\"httpd\", \"-f\", \"-p\", \"6001\", \"-h\", \"/www\"]\n",
    )
    .await
    .unwrap();
    let opt = BuildImageOptionsBuilder::default()
        .context_dir(dir.path())
        .tag(IMAGE_TAG)
        .timeout(Some(Duration::from_secs(300)))
        .build()
        .unwrap();
    runtime.build_image(&opt).await.expect("Failed to build image");
    dir
}

#[test(tokio::test)]
#[ignore]
async fn test_missing_dockerfile() {
    let runtime = DockerRuntime::connect_local(1).expect("Failed to connect docker");
    let dir = tempfile::tempdir().unwrap();
    let opt = BuildImageOptionsBuilder::default()
        .context_dir(dir.path())
        .tag(IMAGE_TAG)
        .build()
        .unwrap();
    assert!(matches!(
        runtime.build_image(&opt).await,
        Err(BuildError::MissingBuildFile(_))
    ));
}

#[test(tokio::test)]
#[ignore]
async fn test_run_and_teardown() {
    let runtime = DockerRuntime::connect_local(1).expect("Failed to connect docker");
    let _dir = build_httpd_image(&runtime).await;

    let opt = RunOptionsBuilder::default()
        .image(IMAGE_TAG)
        .container_name("rurikawa-grader-test-0")
        .container_port(6001u16)
        .host_port(16001u16)
        .timeout(Some(Duration::from_secs(30)))
        .build()
        .unwrap();
    let handle = runtime.run(&opt).await.expect("Failed to run container");

    // stopping and removing twice must not fail or panic
    runtime.stop(&handle).await;
    runtime.remove(&handle).await;
    runtime.stop(&handle).await;
    runtime.remove(&handle).await;
    runtime.teardown(handle).await;

    runtime.remove_image(IMAGE_TAG).await;
}

#[test(tokio::test)]
#[ignore]
async fn test_stale_container_is_replaced() {
    let runtime = DockerRuntime::connect_local(1).expect("Failed to connect docker");
    let _dir = build_httpd_image(&runtime).await;

    let opt = RunOptionsBuilder::default()
        .image(IMAGE_TAG)
        .container_name("rurikawa-grader-test-1")
        .container_port(6001u16)
        .host_port(16002u16)
        .network("rurikawa-grader-test-net".to_string())
        .build()
        .unwrap();
    let first = runtime.run(&opt).await.expect("Failed to run container");
    // the first container is left behind, as if the grader had crashed
    let second = runtime.run(&opt).await.expect("Failed to replace container");
    assert_ne!(first.id, second.id);

    runtime.teardown(second).await;
    runtime.teardown(first).await;
    runtime.remove_image(IMAGE_TAG).await;
}
