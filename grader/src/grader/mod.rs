//! Sequencing the grading pipeline over a batch of submissions.

pub mod model;

use self::model::{GradeEvent, GradeResult, Stage, Submission, SubmissionContext};
use crate::{
    config::{GraderConfig, ScorerKind},
    fs::{net::SourceFetcher, repo_name, WorkspaceManager},
    probe::{model::ProbeSpec, ProbeEngine},
    runner::{BuildImageOptionsBuilder, ContainerHandle, ContainerRuntime, RunOptionsBuilder},
    score::{score, ScoringError},
    script::run_script,
    util::names::{submission_container_name, submission_image_tag},
};
use chrono::Utc;
use futures::{FutureExt, Stream, StreamExt, TryStreamExt};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info_span;
use tracing_futures::Instrument;

/// Parse a list of submission URLs, one per line. Blank lines and lines
/// starting with `#` are skipped.
pub fn parse_url_list(list: &str) -> Vec<String> {
    list.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Grades submissions one pipeline at a time (or `concurrency` at a time).
///
/// The grader holds no state across batches: every call of [`Grader::grade_all`]
/// starts from scratch.
pub struct Grader {
    cfg: Arc<GraderConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: Arc<dyn SourceFetcher>,
    engine: ProbeEngine,
    suite: Vec<Arc<ProbeSpec>>,
    workspace: WorkspaceManager,
    events: Option<UnboundedSender<GradeEvent>>,
    cancelled: Arc<AtomicBool>,
}

impl Grader {
    pub fn new(
        cfg: Arc<GraderConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> anyhow::Result<Grader> {
        let engine = ProbeEngine::new(&cfg.probe)?;
        let workspace = WorkspaceManager::new(&cfg.workspace_root)?;
        let suite = cfg.probe.suite().into_iter().map(Arc::new).collect();
        Ok(Grader {
            cfg,
            runtime,
            fetcher,
            engine,
            suite,
            workspace,
            events: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Report progress into `events`.
    pub fn with_events(mut self, events: UnboundedSender<GradeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a cancellation flag. Once set, submissions that have not started
    /// yet are reported as cancelled; running ones still finish and tear down.
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Highest score a submission can get with the configured probe suite.
    pub fn max_score(&self) -> u32 {
        (self.suite.len() as u32).saturating_mul(self.cfg.weight)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, event: GradeEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn enter_stage(&self, ctx: &SubmissionContext, stage: Stage) {
        tracing::debug!(%stage, "Entering stage");
        self.emit(GradeEvent::Stage {
            index: ctx.index,
            stage,
        });
    }

    /// Grade every submission in `urls`, yielding one result per URL in input
    /// order.
    ///
    /// A failing submission yields a zero-score result and never stops the
    /// batch. The stream only yields `Err` on an internal scoring error.
    pub fn grade_all(
        &self,
        urls: Vec<String>,
    ) -> impl Stream<Item = Result<GradeResult, ScoringError>> + '_ {
        futures::stream::iter(urls.into_iter().enumerate())
            .map(move |(index, url)| self.grade(index, url))
            .buffered(self.cfg.concurrency.max(1))
    }

    /// [`Grader::grade_all`], collected.
    pub async fn grade_all_to_vec(
        &self,
        urls: Vec<String>,
    ) -> Result<Vec<GradeResult>, ScoringError> {
        self.grade_all(urls).try_collect().await
    }

    fn context(&self, index: usize, url: &str) -> SubmissionContext {
        let concurrency = self.cfg.concurrency.max(1);
        // `buffered` never runs index `i` and `i + concurrency` at the same
        // time, so slots are exclusive
        let slot = index % concurrency;
        let docker = &self.cfg.docker;
        let repo = repo_name(url).unwrap_or("submission");
        SubmissionContext {
            index,
            url: url.to_owned(),
            container_name: submission_container_name(&docker.container_prefix, slot),
            image_tag: submission_image_tag(&docker.image_prefix, index, repo),
            host_port: docker.host_port.saturating_add(slot as u16),
            workspace: if concurrency == 1 {
                self.workspace.clone()
            } else {
                self.workspace.child(&slot.to_string())
            },
        }
    }

    /// Grade a single submission.
    pub async fn grade(&self, index: usize, url: String) -> Result<GradeResult, ScoringError> {
        let span = info_span!("submission", id = index, url = %url);
        async move {
            let started_at = Utc::now();
            let mut result = if self.is_cancelled() {
                let reason = "grading was cancelled";
                GradeResult::failed(&url, Stage::Cancelled, self.max_score(), reason)
            } else {
                self.emit(GradeEvent::Started {
                    index,
                    url: url.clone(),
                });
                let ctx = self.context(index, &url);
                self.grade_in_workspace(&ctx).await?
            };
            result.started_at = Some(started_at);
            result.finished_at = Some(Utc::now());

            tracing::info!(
                passed = result.passed,
                score = result.score,
                max_score = result.max_score,
                "Submission graded"
            );
            self.emit(GradeEvent::Finished {
                index,
                passed: result.passed,
                score: result.score,
            });
            Ok::<_, ScoringError>(result)
        }
        .instrument(span)
        .await
    }

    async fn grade_in_workspace(
        &self,
        ctx: &SubmissionContext,
    ) -> Result<GradeResult, ScoringError> {
        self.enter_stage(ctx, Stage::Workspace);
        let path = match ctx.workspace.prepare(&ctx.url).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Failed to prepare workspace: {}", e);
                return Ok(GradeResult::failed(&ctx.url, Stage::Workspace, self.max_score(), e));
            }
        };
        let submission = Submission {
            url: ctx.url.clone(),
            path,
        };

        let res = self.grade_checked_out(ctx, &submission).await;

        if let Err(e) = ctx.workspace.cleanup(&submission.path).await {
            tracing::warn!("Failed to clean up workspace: {}", e);
        }
        res
    }

    async fn grade_checked_out(
        &self,
        ctx: &SubmissionContext,
        submission: &Submission,
    ) -> Result<GradeResult, ScoringError> {
        let fail = |stage: Stage, reason: &dyn std::fmt::Display| -> Result<_, ScoringError> {
            tracing::warn!(%stage, "Submission failed: {}", reason);
            Ok(GradeResult::failed(&ctx.url, stage, self.max_score(), reason))
        };

        self.enter_stage(ctx, Stage::Fetch);
        if let Err(e) = self.fetcher.fetch(&submission.url, &submission.path).await {
            return fail(Stage::Fetch, &e);
        }

        if self.is_cancelled() {
            return fail(Stage::Cancelled, &"grading was cancelled");
        }

        self.enter_stage(ctx, Stage::Build);
        let build_opt = BuildImageOptionsBuilder::default()
            .context_dir(submission.path.clone())
            .tag(ctx.image_tag.clone())
            .cpu_quota(self.cfg.docker.build_cpu_share)
            .timeout(Some(self.cfg.build_timeout()))
            .build();
        let build_opt = match build_opt {
            Ok(opt) => opt,
            Err(e) => return fail(Stage::Build, &e),
        };
        if let Err(e) = self.runtime.build_image(&build_opt).await {
            return fail(Stage::Build, &e);
        }

        let res = self.run_and_check(ctx).await;

        if self.cfg.remove_image {
            self.runtime.remove_image(&ctx.image_tag).await;
        }
        res
    }

    async fn run_and_check(&self, ctx: &SubmissionContext) -> Result<GradeResult, ScoringError> {
        self.enter_stage(ctx, Stage::Run);
        let run_opt = RunOptionsBuilder::default()
            .image(ctx.image_tag.clone())
            .container_name(ctx.container_name.clone())
            .container_port(self.cfg.docker.container_port)
            .host_port(ctx.host_port)
            .network(self.cfg.docker.network.clone())
            .timeout(Some(self.cfg.run_timeout()))
            .build();
        let run_opt = match run_opt {
            Ok(opt) => opt,
            Err(e) => {
                return Ok(GradeResult::failed(&ctx.url, Stage::Run, self.max_score(), e));
            }
        };
        let handle = match self.runtime.run(&run_opt).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Submission failed to run: {}", e);
                return Ok(GradeResult::failed(&ctx.url, Stage::Run, self.max_score(), e));
            }
        };

        // Teardown must happen whatever probing does, panics included.
        let checked = AssertUnwindSafe(self.check(ctx, &handle)).catch_unwind().await;
        self.runtime.teardown(handle).await;

        match checked {
            Ok(res) => res,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Probe (or script-grade) a running submission.
    async fn check(
        &self,
        ctx: &SubmissionContext,
        handle: &ContainerHandle,
    ) -> Result<GradeResult, ScoringError> {
        self.enter_stage(ctx, Stage::Probe);
        let docker = &self.cfg.docker;
        let base_url = handle.base_url(&docker.probe_host, docker.probe_via_network);
        tracing::info!(%base_url, "Probing submission");

        self.engine.wait_ready(&base_url).await;

        let mut result = match (self.cfg.scorer, &self.cfg.script) {
            (ScorerKind::Probes, _) => {
                let outcomes = self.engine.probe_all(&base_url, &self.suite).await;
                score(&ctx.url, outcomes, self.cfg.weight)?
            }
            (ScorerKind::Script, Some(script)) => match run_script(script, &base_url).await {
                Ok(report) => GradeResult::from_script(&ctx.url, report, self.max_score()),
                Err(e) => GradeResult::failed(&ctx.url, Stage::Probe, self.max_score(), e),
            },
            (ScorerKind::Script, None) => GradeResult::failed(
                &ctx.url,
                Stage::Probe,
                self.max_score(),
                "no grading script configured",
            ),
        };

        if !result.passed {
            result.container_log = self.runtime.logs(handle, docker.log_tail).await;
        }
        Ok(result)
    }
}
