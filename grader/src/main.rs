use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use once_cell::sync::Lazy;
use rurikawa_grader::{
    config::GraderConfig,
    fs::net::{GitCloneOptions, GitFetcher},
    grader::{model::GradeEvent, parse_url_list, Grader},
    probe::ProbeEngine,
    runner::DockerRuntime,
    score::score,
};
use std::{
    path::Path,
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing_subscriber::EnvFilter;

mod opt;

static CTRL_C: AtomicBool = AtomicBool::new(false);
static CTRL_C_TWICE: AtomicBool = AtomicBool::new(false);
static CANCELLED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

#[tokio::main]
async fn main() {
    let opt = opt::Opts::parse();
    if let Err(e) = init_logging() {
        eprintln!("Failed to set up logger: {}", e);
        exit(2);
    }

    if let Err(e) = ctrlc::set_handler(handle_ctrl_c) {
        tracing::warn!("Failed to set termination handler: {}", e);
    }

    let res = match opt.cmd {
        opt::SubCmd::Grade(cmd) => grade(cmd).await,
        opt::SubCmd::Probe(cmd) => probe(cmd).await,
    };
    match res {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            tracing::error!("{:?}", e);
            exit(2);
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<GraderConfig> {
    match path {
        Some(path) => GraderConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(GraderConfig::default()),
    }
}

/// Grade every submission. Returns whether all of them passed.
async fn grade(cmd: opt::GradeSubCmd) -> anyhow::Result<bool> {
    let mut cfg = load_config(cmd.config.as_deref()).await?;
    if let Some(workspace) = cmd.workspace {
        cfg.workspace_root = workspace;
    }
    if let Some(concurrency) = cmd.concurrency {
        cfg.concurrency = concurrency;
    }
    if let Some(network) = cmd.network {
        cfg.docker.network = Some(network);
    }
    if let Some(weight) = cmd.weight {
        cfg.weight = weight;
    }
    cfg.remove_image |= cmd.remove_image;
    cfg.validate()?;

    let mut urls = cmd.urls;
    if let Some(path) = &cmd.url_file {
        let list = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read URL list {}", path.display()))?;
        urls.extend(parse_url_list(&list));
    }
    if urls.is_empty() {
        anyhow::bail!("No submissions to grade");
    }

    let runtime = DockerRuntime::connect_local(cfg.docker.stop_timeout_secs)
        .context("Failed to connect to docker daemon")?;
    let fetcher = GitFetcher {
        options: GitCloneOptions {
            depth: cfg.fetch.depth,
            timeout: cfg.fetch_timeout(),
        },
    };

    let total = urls.len();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        let mut done = 0;
        while let Some(ev) = rx.recv().await {
            match ev {
                GradeEvent::Started { index, url } => {
                    tracing::info!("[{}/{}] Grading {}", index + 1, total, url)
                }
                GradeEvent::Stage { .. } => {}
                GradeEvent::Finished { passed, score, .. } => {
                    done += 1;
                    tracing::info!("[{}/{}] done: passed={} score={}", done, total, passed, score)
                }
            }
        }
    });

    let grader = Grader::new(Arc::new(cfg), Arc::new(runtime), Arc::new(fetcher))?
        .with_events(tx)
        .with_cancel_flag(CANCELLED.clone());

    let mut all_passed = true;
    {
        let results = grader.grade_all(urls);
        futures::pin_mut!(results);
        while let Some(result) = results.next().await {
            let result = result?;
            all_passed &= result.passed;
            println!("{}", serde_json::to_string(&result)?);
        }
    }
    drop(grader);
    let _ = progress.await;

    Ok(all_passed)
}

/// Probe a running server. Returns whether every probe succeeded.
async fn probe(cmd: opt::ProbeSubCmd) -> anyhow::Result<bool> {
    let cfg = load_config(cmd.config.as_deref()).await?;
    cfg.validate()?;
    let engine = ProbeEngine::new(&cfg.probe)?;
    let suite: Vec<_> = cfg.probe.suite().into_iter().map(Arc::new).collect();

    if !cmd.no_wait && !engine.wait_ready(&cmd.base_url).await {
        tracing::warn!("{} is not answering, probing anyway", cmd.base_url);
    }
    let outcomes = engine.probe_all(&cmd.base_url, &suite).await;
    let result = score(&cmd.base_url, outcomes, cfg.weight)?;

    print!("{}", result.details);
    println!("score: {}/{}", result.score, result.max_score);
    Ok(result.passed)
}

fn handle_ctrl_c() {
    if !CTRL_C.load(Ordering::SeqCst) {
        tracing::warn!(
            "Waiting for running submissions to finish... Press Ctrl-C again to force quit."
        );
        CTRL_C.store(true, Ordering::SeqCst);
        CANCELLED.store(true, Ordering::SeqCst);
    } else if !CTRL_C_TWICE.load(Ordering::SeqCst) {
        tracing::error!("Force quit!");
        CTRL_C_TWICE.store(true, Ordering::SeqCst);
        exit(101);
    }
}
