//! Operations related to TAR archives, used to send build contexts to Docker.

use bytes::BytesMut;
use futures::{future::BoxFuture, FutureExt, Stream};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    task::JoinHandle,
};
use tokio_tar::Builder;
use tokio_util::codec::{BytesCodec, FramedRead};

/// Patterns that never make it into a build context.
const ALWAYS_IGNORED: &[&str] = &[".git"];

#[tracing::instrument(skip(input))]
pub fn ignore_from_string_list<'a>(
    root: &Path,
    input: impl Iterator<Item = &'a str>,
) -> std::io::Result<Gitignore> {
    input
        .fold(GitignoreBuilder::new(&root), |mut builder, x| {
            match builder.add_line(None, x) {
                Ok(_) => (),
                Err(e) => tracing::error!("Invalid ignore pattern: {}", e),
            };
            builder
        })
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Turn a `.dockerignore` line into a gitignore pattern with the same meaning.
///
/// Docker matches every pattern against the path relative to the context
/// root, so `*.env` only covers the root folder. Gitignore would match it in
/// any folder, hence every pattern gets anchored with a leading `/`.
fn anchor_dockerignore_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (negate, pattern) = match line.strip_prefix('!') {
        Some(rest) => ("!", rest.trim()),
        None => ("", line),
    };
    let pattern = pattern.trim_start_matches("./").trim_start_matches('/');
    if pattern.is_empty() {
        return None;
    }
    Some(format!("{}/{}", negate, pattern))
}

/// Read the ignore rules of a build context: its `.dockerignore` (if any)
/// plus [`ALWAYS_IGNORED`].
pub async fn context_ignore(root: &Path) -> std::io::Result<Gitignore> {
    let dockerignore = match tokio::fs::read_to_string(root.join(".dockerignore")).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let anchored: Vec<String> = dockerignore
        .lines()
        .filter_map(anchor_dockerignore_line)
        .collect();
    ignore_from_string_list(
        root,
        ALWAYS_IGNORED
            .iter()
            .copied()
            .chain(anchored.iter().map(String::as_str)),
    )
}

/// Spawn a task to pack the given `path` into a Tar file, skipping everything
/// matched by `ignore`.
///
/// Returns the tar file stream to read from and the join handle to the packing
/// task.
pub fn pack_as_tar(
    path: PathBuf,
    ignore: Gitignore,
) -> (
    impl Stream<Item = Result<BytesMut, std::io::Error>> + 'static,
    JoinHandle<Result<(), std::io::Error>>,
) {
    let (pipe_send, pipe_recv) = tokio::io::duplex(8192);
    let frame = FramedRead::new(pipe_recv, BytesCodec::new());

    let task = async move {
        let mut tar = Builder::new(pipe_send);
        tar.follow_symlinks(false);
        add_dir_glob(&path, &path, &ignore, &mut tar).await?;
        let mut pipe = tar.into_inner().await?;
        pipe.shutdown().await?;
        Ok(())
    };
    (frame, tokio::spawn(task))
}

/// Add the given directory into the given tar, skipping paths matched by `glob`.
fn add_dir_glob<'a>(
    root: &'a Path,
    dir: &'a Path,
    glob: &'a Gitignore,
    tar: &'a mut Builder<DuplexStream>,
) -> BoxFuture<'a, Result<(), std::io::Error>> {
    async move {
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(next) = read_dir.next_entry().await? {
            let path = next.path();
            let meta = tokio::fs::symlink_metadata(&path).await?;
            if glob.matched(&path, meta.is_dir()).is_ignore() {
                continue;
            }
            let name = path
                .strip_prefix(root)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

            if meta.is_dir() {
                tar.append_dir(name, &path).await?;
                add_dir_glob(root, &path, glob, tar).await?;
            } else {
                tar.append_path_with_name(&path, name).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::TryStreamExt;
    use test_env_log::test;

    async fn entry_names(archive: Vec<u8>) -> Vec<String> {
        let mut ar = tokio_tar::Archive::new(&archive[..]);
        let mut names: Vec<String> = ar
            .entries()
            .unwrap()
            .map_ok(|e| e.path().unwrap().display().to_string())
            .try_collect()
            .await
            .unwrap();
        names.sort();
        names
    }

    #[test(tokio::test)]
    async fn test_pack_respects_dockerignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join(".git/objects")).await.unwrap();
        tokio::fs::write(root.join(".git/HEAD"), b"ref").await.unwrap();
        tokio::fs::create_dir_all(root.join("src")).await.unwrap();
        tokio::fs::write(root.join("src/app.py"), b"print(1)").await.unwrap();
        tokio::fs::write(root.join("Dockerfile"), b"FROM python").await.unwrap();
        tokio::fs::write(root.join("secret.env"), b"x").await.unwrap();
        tokio::fs::create_dir_all(root.join("config/logs")).await.unwrap();
        tokio::fs::write(root.join("config/local.env"), b"y").await.unwrap();
        tokio::fs::write(root.join("config/logs/run.log"), b"z").await.unwrap();
        tokio::fs::write(root.join(".dockerignore"), b"# secrets\n*.env\n**/*.log\n")
            .await
            .unwrap();

        let ignore = context_ignore(root).await.unwrap();
        let (stream, join) = pack_as_tar(root.to_owned(), ignore);
        let bytes: Vec<u8> = stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap();
        join.await.unwrap().unwrap();

        let names = entry_names(bytes).await;
        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"src/app.py".to_string()));
        assert!(names.contains(&".dockerignore".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".git/") || n == ".git"));
        assert!(!names.contains(&"secret.env".to_string()));
        // `*.env` only applies to the context root, `**/` reaches everywhere
        assert!(names.contains(&"config/local.env".to_string()));
        assert!(!names.contains(&"config/logs/run.log".to_string()));
    }

    #[test]
    fn test_anchor_dockerignore_line() {
        assert_eq!(anchor_dockerignore_line("*.env").as_deref(), Some("/*.env"));
        assert_eq!(anchor_dockerignore_line("/build").as_deref(), Some("/build"));
        assert_eq!(anchor_dockerignore_line("./dist/").as_deref(), Some("/dist/"));
        assert_eq!(anchor_dockerignore_line("!keep.env").as_deref(), Some("!/keep.env"));
        assert_eq!(anchor_dockerignore_line("**/*.log").as_deref(), Some("/**/*.log"));
        assert_eq!(anchor_dockerignore_line("  # comment"), None);
        assert_eq!(anchor_dockerignore_line(""), None);
    }
}
