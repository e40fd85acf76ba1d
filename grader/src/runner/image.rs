use std::path::{Path, PathBuf};

use crate::runner::{
    model::{BuildError, BuildImageOptions},
    util::is_recoverable_error,
};
use crate::util::tar::{context_ignore, pack_as_tar};

use bollard::{image::RemoveImageOptions, Docker};
use hyper::Body;
use tokio_stream::StreamExt;

/// Build file names looked up at the root of a build context, in order.
const DOCKERFILE_NAMES: &[&str] = &["Dockerfile", "dockerfile"];

async fn find_dockerfile(context_dir: &Path) -> Option<&'static str> {
    for name in DOCKERFILE_NAMES {
        if let Ok(meta) = tokio::fs::metadata(context_dir.join(name)).await {
            if meta.is_file() {
                return Some(*name);
            }
        }
    }
    None
}

/// Build an image from the `Dockerfile` at the root of `opt.context_dir`.
#[tracing::instrument(skip(docker, opt), fields(tag = %opt.tag))]
pub async fn build_image(docker: &Docker, opt: &BuildImageOptions) -> Result<(), BuildError> {
    let build_job = build_image_from_dockerfile(docker, opt);
    if let Some(timeout) = opt.timeout {
        tokio::time::timeout(timeout, build_job)
            .await
            .map_err(|_| BuildError::Timeout(timeout))
            .and_then(|i| i)
    } else {
        build_job.await
    }
}

async fn build_image_from_dockerfile(
    docker: &Docker,
    opt: &BuildImageOptions,
) -> Result<(), BuildError> {
    let source_path: PathBuf = opt.context_dir.clone();
    let dockerfile = find_dockerfile(&source_path)
        .await
        .ok_or_else(|| BuildError::MissingBuildFile(source_path.display().to_string()))?;

    let cpu_quota = opt.cpu_quota.map(|x| (x * 100_000f64).floor() as u64);
    let cpu_period = cpu_quota.map(|_| 100_000);

    let build_options = bollard::image::BuildImageOptions {
        dockerfile,
        t: opt.tag.as_str(),
        cpuquota: cpu_quota,
        cpuperiod: cpu_period,

        rm: true,
        forcerm: true,

        buildargs: [("CI", "true")].iter().cloned().collect(),

        ..Default::default()
    };

    let ignore = context_ignore(&source_path)
        .await
        .map_err(|e| BuildError::FileTransfer(e.to_string()))?;
    let (tar, join_tar) = pack_as_tar(source_path, ignore);

    tracing::info!("Building image");
    let res = docker.build_image(build_options, None, Some(Body::wrap_stream(tar)));
    tokio::pin!(res);

    while let Some(info) = res.next().await {
        match info {
            Ok(info) => {
                if let Some(e) = info.error {
                    let detail = info
                        .error_detail
                        .and_then(|d| d.message)
                        .filter(|d| d != &e);
                    let msg = match detail {
                        Some(d) => format!("{} ({})", e.trim(), d.trim()),
                        None => e.trim().to_owned(),
                    };
                    return Err(BuildError::Build(msg));
                }
                if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                    if !line.is_empty() {
                        tracing::debug!("{}", line);
                    }
                }
            }
            Err(e) => {
                if is_recoverable_error(&e) {
                    tracing::warn!("Recoverable error when building image: {:?}", e);
                    continue;
                }
                return Err(BuildError::Docker(e));
            }
        }
    }

    join_tar
        .await
        .map_err(|e| {
            BuildError::FileTransfer(format!("Internal panic when archiving files: {}", e))
        })?
        .map_err(|e| BuildError::FileTransfer(format!("Failed to archive files: {}", e)))?;

    tracing::info!("Image built");
    Ok(())
}

/// Remove an image, logging instead of failing.
pub async fn remove_image(docker: &Docker, tag: &str) {
    let res = docker
        .remove_image(
            tag,
            Some(RemoveImageOptions {
                force: true,
                ..Default::default()
            }),
            None,
        )
        .await;
    match res {
        Ok(_) => tracing::debug!(tag, "Image removed"),
        Err(e) => tracing::warn!(tag, "Failed to remove image: {}", e),
    }
}
