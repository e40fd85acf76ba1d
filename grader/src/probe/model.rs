use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// The fixed description of one HTTP check performed against a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Display name, used in result details as `"<name> endpoint works"`.
    pub name: String,
    pub method: HttpMethod,
    /// Path relative to the server root, e.g. `/help`
    pub path: String,
    /// Query parameters, sent with `GET` requests
    #[serde(default)]
    pub query: Vec<(String, String)>,
    /// JSON body, sent with `POST` requests
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default = "default_status")]
    pub expected_status: u16,
    pub check: ResponseCheck,
}

fn default_status() -> u16 {
    200
}

/// What a response body must look like, on top of the status code matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseCheck {
    /// Only the status code is checked
    StatusOnly,
    /// The body must not contain `marker`
    Lacks { marker: String },
    /// The body must be exactly one of `accepted`
    OneOf { accepted: Vec<String> },
    /// The body must be a non-negative integer literal (ASCII digits only)
    NonNegativeInteger,
    /// The body must contain every one of `needles`
    ContainsAll { needles: Vec<String> },
}

impl ResponseCheck {
    pub fn accepts(&self, body: &str) -> bool {
        match self {
            ResponseCheck::StatusOnly => true,
            ResponseCheck::Lacks { marker } => !body.contains(marker.as_str()),
            ResponseCheck::OneOf { accepted } => accepted.iter().any(|x| x == body),
            ResponseCheck::NonNegativeInteger => {
                !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
            }
            ResponseCheck::ContainsAll { needles } => {
                needles.iter().all(|n| body.contains(n.as_str()))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ResponseCheck::StatusOnly => "any body".into(),
            ResponseCheck::Lacks { marker } => format!("a body without {:?}", marker),
            ResponseCheck::OneOf { accepted } => format!("one of {:?}", accepted),
            ResponseCheck::NonNegativeInteger => "a non-negative integer".into(),
            ResponseCheck::ContainsAll { needles } => format!("a body mentioning {:?}", needles),
        }
    }
}

impl ProbeSpec {
    /// Judge an observed response against this spec. Returns `None` when the
    /// response is accepted, or the reason of rejection.
    pub fn judge(&self, status: u16, body: &str) -> Option<String> {
        if status != self.expected_status {
            return Some(format!(
                "expected status {}, got {}",
                self.expected_status, status
            ));
        }
        if !self.check.accepts(body) {
            return Some(format!("expected {}, got {:?}", self.check.describe(), body));
        }
        None
    }
}

/// The observed result of running one [`ProbeSpec`] against one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub spec: Arc<ProbeSpec>,
    /// `None` if no response was received at all
    pub status: Option<u16>,
    pub body: Option<String>,
    pub success: bool,
    /// Why the probe failed: a rejection reason or the network error text
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn from_response(spec: Arc<ProbeSpec>, status: u16, body: String) -> ProbeOutcome {
        let detail = spec.judge(status, &body);
        ProbeOutcome {
            spec,
            status: Some(status),
            body: Some(body),
            success: detail.is_none(),
            detail,
        }
    }

    pub fn network_failure(spec: Arc<ProbeSpec>, error: String) -> ProbeOutcome {
        ProbeOutcome {
            spec,
            status: None,
            body: None,
            success: false,
            detail: Some(error),
        }
    }
}
