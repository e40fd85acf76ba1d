use crate::probe::{model::ProbeSpec, suite::exam_variant_2, Readiness};
use err_derive::Error;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(display = "Failed to read config file: {}", _0)]
    Io(#[error(source)] std::io::Error),

    #[error(display = "TOML deserialization error: {}", _0)]
    TomlDes(#[error(source)] toml::de::Error),

    #[error(display = "Invalid config: {}", _0)]
    Invalid(String),
}

/// Top-level configuration of a grading run, usually read from `grader.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Root folder where submissions are checked out
    pub workspace_root: PathBuf,
    /// How many submissions may be graded at the same time
    pub concurrency: usize,
    /// Points awarded for each successful probe
    pub weight: u32,
    /// Which scorer decides the result of a running submission
    pub scorer: ScorerKind,
    /// Remove the built image after grading
    pub remove_image: bool,
    pub docker: DockerConfig,
    pub fetch: FetchConfig,
    pub probe: ProbeConfig,
    pub script: Option<ScriptConfig>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        GraderConfig {
            workspace_root: dirs::cache_dir()
                .map(|dir| dir.join("rurikawa-grader"))
                .unwrap_or_else(|| PathBuf::from("./submissions")),
            concurrency: 1,
            weight: 10,
            scorer: ScorerKind::Probes,
            remove_image: false,
            docker: Default::default(),
            fetch: Default::default(),
            probe: Default::default(),
            script: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerKind {
    /// Run the configured probe suite and score it with fixed weights
    Probes,
    /// Delegate to an external grading script, see [`ScriptConfig`]
    Script,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// The port the submission listens on inside its container
    pub container_port: u16,
    /// The host port mapped to `container_port`. Parallel runs use
    /// `host_port + slot`, where `slot < concurrency`.
    pub host_port: u16,
    /// Host used to reach the mapped port
    pub probe_host: String,
    /// Network every graded container is attached to. Created if absent.
    pub network: Option<String>,
    /// Reach the container by its name on `network` instead of the mapped
    /// host port. Needed when the grader itself runs in a container.
    pub probe_via_network: bool,
    pub container_prefix: String,
    pub image_prefix: String,

    /// CPU share available for image building use. This field will result
    /// in allowing the CPU to run `build_cpu_share * 100ms` in every 100ms
    /// CPU time.
    pub build_cpu_share: Option<f64>,
    pub build_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Grace period given to `docker stop` before killing
    pub stop_timeout_secs: i64,
    /// Lines of container output kept when probing did not fully pass
    pub log_tail: usize,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            container_port: 6001,
            host_port: 6001,
            probe_host: "127.0.0.1".into(),
            network: None,
            probe_via_network: false,
            container_prefix: "student".into(),
            image_prefix: "student-app".into(),
            build_cpu_share: Some(0.5),
            build_timeout_secs: 600,
            run_timeout_secs: 60,
            stop_timeout_secs: 5,
            log_tail: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Clone depth, `None` for a full clone
    pub depth: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            depth: Some(1),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessKind {
    Poll,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub readiness: ReadinessKind,
    pub settle_delay_secs: u64,
    pub readiness_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub parallel_probes: bool,
    /// Probe suite replacing the built-in one
    pub suite: Option<Vec<ProbeSpec>>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            readiness: ReadinessKind::Poll,
            settle_delay_secs: 5,
            readiness_timeout_secs: 30,
            poll_interval_ms: 250,
            request_timeout_secs: 10,
            parallel_probes: false,
            suite: None,
        }
    }
}

impl ProbeConfig {
    pub fn readiness(&self) -> Readiness {
        match self.readiness {
            ReadinessKind::Fixed => Readiness::Fixed(Duration::from_secs(self.settle_delay_secs)),
            ReadinessKind::Poll => Readiness::Poll {
                interval: Duration::from_millis(self.poll_interval_ms),
                timeout: Duration::from_secs(self.readiness_timeout_secs),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The probe suite in effect: the configured one, or the built-in suite.
    pub fn suite(&self) -> Vec<ProbeSpec> {
        self.suite.clone().unwrap_or_else(exam_variant_2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Program and arguments. The submission's base URL is appended.
    pub command: Vec<String>,
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

fn default_script_timeout() -> u64 {
    120
}

impl GraderConfig {
    pub async fn load(path: &Path) -> Result<GraderConfig, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let cfg: GraderConfig = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Check values that serde cannot check by itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.weight == 0 {
            return Err(ConfigError::Invalid("weight must be positive".into()));
        }
        if (self.docker.host_port as usize) + self.concurrency - 1 > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "host ports {}..{} do not fit into the port range",
                self.docker.host_port,
                self.docker.host_port as usize + self.concurrency
            )));
        }
        if self.docker.probe_via_network && self.docker.network.is_none() {
            return Err(ConfigError::Invalid(
                "probe_via_network requires docker.network to be set".into(),
            ));
        }
        if let Some(suite) = &self.probe.suite {
            if suite.is_empty() {
                return Err(ConfigError::Invalid("probe suite is empty".into()));
            }
        }
        let probes = self.probe.suite.as_ref().map_or(exam_variant_2().len(), Vec::len);
        let max_score = u32::try_from(probes)
            .ok()
            .and_then(|n| n.checked_mul(self.weight));
        if max_score.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{} probes with weight {} exceed the score range",
                probes, self.weight
            )));
        }
        match (&self.scorer, &self.script) {
            (ScorerKind::Script, None) => Err(ConfigError::Invalid(
                "scorer = \"script\" requires a [script] section".into(),
            )),
            (ScorerKind::Script, Some(s)) if s.command.is_empty() => {
                Err(ConfigError::Invalid("script command is empty".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.build_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.run_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }
}
