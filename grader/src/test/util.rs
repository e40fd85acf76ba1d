use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server,
};
use tokio::sync::oneshot;

use crate::{
    config::{GraderConfig, ReadinessKind},
    fs::net::{FetchError, SourceFetcher},
    probe::suite::GITHUB_ERROR_MARKER,
    runner::{BuildError, BuildImageOptions, ContainerHandle, ContainerRuntime, RunError, RunOptions},
};

/// Responses of a fake exam submission, as `(status, body)`.
#[derive(Debug, Clone)]
pub struct ExamAnswers {
    pub help: (u16, String),
    pub github: (u16, String),
    pub bitwise: (u16, String),
    pub pandas: (u16, String),
}

impl Default for ExamAnswers {
    /// A submission that gets everything right.
    fn default() -> Self {
        ExamAnswers {
            help: (200, "/help /github /bitwise /pandas".into()),
            github: (200, "Hello-World has 1 star".into()),
            bitwise: (200, "yes".into()),
            pandas: (200, "42".into()),
        }
    }
}

impl ExamAnswers {
    fn answer(&self, method: &Method, path: &str, query: Option<&str>, body: &str) -> (u16, String) {
        match (method, path) {
            (&Method::GET, "/") => (200, "hello".into()),
            (&Method::GET, "/help") => self.help.clone(),
            (&Method::GET, "/github") => {
                let query = query.unwrap_or("");
                if query.contains("owner=octocat") && query.contains("repo=Hello-World") {
                    self.github.clone()
                } else {
                    (200, GITHUB_ERROR_MARKER.into())
                }
            }
            (&Method::POST, "/bitwise") => match serde_json::from_str::<serde_json::Value>(body) {
                Ok(v) if v == serde_json::json!({"n": 5, "p": 3}) => self.bitwise.clone(),
                _ => (400, "bad payload".into()),
            },
            (&Method::POST, "/pandas") => match serde_json::from_str::<serde_json::Value>(body) {
                Ok(v) if v == serde_json::json!({"magnitude": 5, "depth": 10}) => {
                    self.pandas.clone()
                }
                _ => (400, "bad payload".into()),
            },
            _ => (404, "not found".into()),
        }
    }
}

/// A running in-process HTTP server standing in for a submission. Stops when
/// dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

pub fn spawn_exam_server(answers: ExamAnswers) -> TestServer {
    let answers = Arc::new(answers);
    let make_svc = make_service_fn(move |_conn| {
        let answers = answers.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let answers = answers.clone();
                async move {
                    let method = req.method().clone();
                    let path = req.uri().path().to_owned();
                    let query = req.uri().query().map(str::to_owned);
                    let body = hyper::body::to_bytes(req.into_body())
                        .await
                        .unwrap_or_default();
                    let body = String::from_utf8_lossy(&body);
                    let (status, text) = answers.answer(&method, &path, query.as_deref(), &body);
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Body::from(text))
                            .unwrap(),
                    )
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.with_graceful_shutdown(async {
        rx.await.ok();
    }));
    TestServer {
        addr,
        _shutdown: tx,
    }
}

/// A local port nothing listens on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Configuration suitable for tests: fast readiness polling and short timeouts.
pub fn test_config(workspace_root: &Path) -> GraderConfig {
    let mut cfg = GraderConfig::default();
    cfg.workspace_root = workspace_root.to_owned();
    cfg.probe.readiness = ReadinessKind::Poll;
    cfg.probe.poll_interval_ms = 10;
    cfg.probe.readiness_timeout_secs = 2;
    cfg.probe.request_timeout_secs = 2;
    cfg
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Build(String),
    Run { name: String, host_port: u16 },
    Stop(String),
    Remove(String),
    Logs(String),
    RemoveImage(String),
}

/// A [`ContainerRuntime`] that never touches docker. Every container it
/// "starts" is reachable at `server_port`.
pub struct MockRuntime {
    pub server_port: u16,
    /// Image tags containing any of these fail to run
    pub crash_on: Vec<String>,
    pub calls: Mutex<Vec<Call>>,
    active: Mutex<HashSet<String>>,
    /// Set when a container was started while another one with the same name
    /// or host port was still alive
    pub collisions: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn new(server_port: u16) -> MockRuntime {
        MockRuntime {
            server_port,
            crash_on: vec![],
            calls: Mutex::new(vec![]),
            active: Mutex::new(HashSet::new()),
            collisions: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn build_image(&self, opt: &BuildImageOptions) -> Result<(), BuildError> {
        self.record(Call::Build(opt.tag.clone()));
        if tokio::fs::metadata(opt.context_dir.join("Dockerfile"))
            .await
            .is_err()
        {
            return Err(BuildError::MissingBuildFile(
                opt.context_dir.display().to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, opt: &RunOptions) -> Result<ContainerHandle, RunError> {
        self.record(Call::Run {
            name: opt.container_name.clone(),
            host_port: opt.host_port,
        });
        if self.crash_on.iter().any(|x| opt.image.contains(x.as_str())) {
            return Err(RunError::Timeout(Duration::from_secs(60)));
        }
        {
            let mut active = self.active.lock().unwrap();
            for key in [opt.container_name.clone(), format!("port:{}", opt.host_port)] {
                if !active.insert(key.clone()) {
                    self.collisions.lock().unwrap().push(key);
                }
            }
        }
        let mut opt = opt.clone();
        let requested_port = opt.host_port;
        opt.host_port = self.server_port;
        let mut handle = ContainerHandle::new(format!("mock-{}", opt.container_name), &opt);
        // keep the requested port around so `remove` can release it
        handle.id = format!("{}:{}", handle.id, requested_port);
        Ok(handle)
    }

    async fn stop(&self, handle: &ContainerHandle) {
        self.record(Call::Stop(handle.name.clone()));
    }

    async fn remove(&self, handle: &ContainerHandle) {
        self.record(Call::Remove(handle.name.clone()));
        let mut active = self.active.lock().unwrap();
        active.remove(&handle.name);
        if let Some((_, port)) = handle.id.rsplit_once(':') {
            active.remove(&format!("port:{}", port));
        }
    }

    async fn logs(&self, handle: &ContainerHandle, _tail: usize) -> Option<String> {
        self.record(Call::Logs(handle.name.clone()));
        Some(format!("log of {}", handle.name))
    }

    async fn remove_image(&self, tag: &str) {
        self.record(Call::RemoveImage(tag.to_owned()));
    }
}

/// A [`SourceFetcher`] that writes a Dockerfile into the destination instead
/// of cloning anything.
///
/// URLs containing `missing` fail to fetch; URLs containing `no-dockerfile`
/// are fetched without a Dockerfile.
#[derive(Default)]
pub struct MockFetcher {
    pub delays: HashMap<String, Duration>,
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.fetched.lock().unwrap().push(url.to_owned());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        if url.contains("missing") {
            return Err(FetchError::Failed {
                code: Some(128),
                stderr: "fatal: repository not found".into(),
            });
        }
        tokio::fs::write(dest.join("app.py"), b"print('hi')").await?;
        if !url.contains("no-dockerfile") {
            tokio::fs::write(dest.join("Dockerfile"), b"FROM python:3\nCMD python app.py\n")
                .await?;
        }
        Ok(())
    }
}
