//! Built-in probe suites.

use super::model::{HttpMethod, ProbeSpec, ResponseCheck};
use serde_json::json;

/// Marker the `/github` endpoint prints when the repository lookup fails.
pub const GITHUB_ERROR_MARKER: &str = "Error with User or Repo";

/// The endpoints of exam variant 2: `/help`, `/github`, `/bitwise` and `/pandas`.
pub fn exam_variant_2() -> Vec<ProbeSpec> {
    vec![
        ProbeSpec {
            name: "Help".into(),
            method: HttpMethod::Get,
            path: "/help".into(),
            query: vec![],
            payload: None,
            expected_status: 200,
            check: ResponseCheck::ContainsAll {
                needles: ["/help", "/github", "/bitwise", "/pandas"]
                    .iter()
                    .map(|&x| x.into())
                    .collect(),
            },
        },
        ProbeSpec {
            name: "GitHub".into(),
            method: HttpMethod::Get,
            path: "/github".into(),
            query: vec![
                ("owner".into(), "octocat".into()),
                ("repo".into(), "Hello-World".into()),
            ],
            payload: None,
            expected_status: 200,
            check: ResponseCheck::Lacks {
                marker: GITHUB_ERROR_MARKER.into(),
            },
        },
        ProbeSpec {
            name: "Bitwise".into(),
            method: HttpMethod::Post,
            path: "/bitwise".into(),
            query: vec![],
            payload: Some(json!({"n": 5, "p": 3})),
            expected_status: 200,
            check: ResponseCheck::OneOf {
                accepted: vec!["yes".into(), "no".into()],
            },
        },
        ProbeSpec {
            name: "Pandas".into(),
            method: HttpMethod::Post,
            path: "/pandas".into(),
            query: vec![],
            payload: Some(json!({"magnitude": 5, "depth": 10})),
            expected_status: 200,
            check: ResponseCheck::NonNegativeInteger,
        },
    ]
}
