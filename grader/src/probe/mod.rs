//! Probing a running submission over HTTP.
//!
//! Nothing in this module returns an error to the caller: every failure to
//! talk to the submission becomes a failed [`ProbeOutcome`].

pub mod model;
pub mod suite;

use self::model::{HttpMethod, ProbeOutcome, ProbeSpec};
use crate::config::ProbeConfig;
use err_derive::Error;
use std::{sync::Arc, time::Duration};

/// Bodies longer than this are cut before being stored in outcomes.
const BODY_SIZE_LIMIT: usize = 16 * 1024;

/// How to wait for the server inside a fresh container to start listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep for a fixed amount of time
    Fixed(Duration),
    /// Send `GET /` every `interval` until any HTTP response arrives, for at
    /// most `timeout`
    Poll { interval: Duration, timeout: Duration },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(display = "Request failed: {}", _0)]
    Request(#[error(source, no_from)] reqwest::Error),

    #[error(display = "Failed to read response body: {}", _0)]
    Body(#[error(source, no_from)] reqwest::Error),
}

pub struct ProbeEngine {
    client: reqwest::Client,
    readiness: Readiness,
    parallel: bool,
}

impl ProbeEngine {
    pub fn new(cfg: &ProbeConfig) -> reqwest::Result<ProbeEngine> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(ProbeEngine::with_client(
            client,
            cfg.readiness(),
            cfg.parallel_probes,
        ))
    }

    pub fn with_client(client: reqwest::Client, readiness: Readiness, parallel: bool) -> Self {
        ProbeEngine {
            client,
            readiness,
            parallel,
        }
    }

    /// Wait until the server at `base_url` is ready to be probed. Returns
    /// `false` if it never answered within the readiness timeout.
    pub async fn wait_ready(&self, base_url: &str) -> bool {
        match self.readiness {
            Readiness::Fixed(delay) => {
                tracing::debug!(?delay, "Waiting for server to settle");
                tokio::time::sleep(delay).await;
                true
            }
            Readiness::Poll { interval, timeout } => {
                let poll = async {
                    loop {
                        match self.client.get(base_url).send().await {
                            Ok(res) => {
                                tracing::debug!(status = %res.status(), "Server is ready");
                                return;
                            }
                            Err(e) => tracing::trace!(error = %e, "Server not ready yet"),
                        }
                        tokio::time::sleep(interval).await;
                    }
                };
                let ready = tokio::time::timeout(timeout, poll).await.is_ok();
                if !ready {
                    tracing::warn!(?timeout, "Server did not become ready in time");
                }
                ready
            }
        }
    }

    async fn send(&self, base_url: &str, spec: &ProbeSpec) -> Result<(u16, String), ProbeError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), spec.path);
        let mut req = match spec.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if !spec.query.is_empty() {
            req = req.query(&spec.query);
        }
        if let Some(payload) = &spec.payload {
            // also sets `Content-Type: application/json`
            req = req.json(payload);
        }

        let res = req.send().await.map_err(ProbeError::Request)?;
        let status = res.status().as_u16();
        let mut body = res.text().await.map_err(ProbeError::Body)?;
        truncate_at_char_boundary(&mut body, BODY_SIZE_LIMIT);
        Ok((status, body))
    }

    /// Issue the request described by `spec` and judge the response.
    #[tracing::instrument(skip(self, spec), fields(probe = %spec.name))]
    pub async fn probe(&self, base_url: &str, spec: Arc<ProbeSpec>) -> ProbeOutcome {
        match self.send(base_url, &spec).await {
            Ok((status, body)) => {
                let outcome = ProbeOutcome::from_response(spec, status, body);
                match &outcome.detail {
                    None => tracing::info!(status, "Probe succeeded"),
                    Some(reason) => tracing::info!(status, %reason, "Probe failed"),
                }
                outcome
            }
            Err(e) => {
                tracing::info!(error = %e, "Probe failed");
                ProbeOutcome::network_failure(spec, e.to_string())
            }
        }
    }

    /// Run every probe of `suite`. Outcomes are in suite order regardless of
    /// whether probes ran concurrently.
    pub async fn probe_all(&self, base_url: &str, suite: &[Arc<ProbeSpec>]) -> Vec<ProbeOutcome> {
        if self.parallel {
            futures::future::join_all(suite.iter().map(|spec| self.probe(base_url, spec.clone())))
                .await
        } else {
            let mut outcomes = Vec::with_capacity(suite.len());
            for spec in suite {
                outcomes.push(self.probe(base_url, spec.clone()).await);
            }
            outcomes
        }
    }
}

fn truncate_at_char_boundary(s: &mut String, limit: usize) {
    if s.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_truncate() {
        let mut s = "héllo".to_string();
        truncate_at_char_boundary(&mut s, 2);
        assert_eq!(s, "h");
        let mut s = "hello".to_string();
        truncate_at_char_boundary(&mut s, 10);
        assert_eq!(s, "hello");
    }
}
