use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_REPLACER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9-._]").unwrap());
static REPO_REPLACER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-._/]").unwrap());

/// Docker rejects tags longer than this.
const MAX_TAG_LEN: usize = 128;

/// Transform a random string as a valid docker tag (only containing alpha/num & dashes).
///
/// This function replaces invalid characters into double underlines `__`.
pub fn transform_string_as_docker_tag(s: &str) -> Cow<str> {
    TAG_REPLACER.replace_all(s, "__")
}

/// Transform a string into a valid image repository name, which must be
/// lowercase.
pub fn transform_string_as_image_repo(s: &str) -> String {
    REPO_REPLACER
        .replace_all(&s.to_lowercase(), "-")
        .trim_matches(|c| c == '-' || c == '.' || c == '_')
        .to_owned()
}

/// The image tag of the `index`-th submission of a batch, e.g.
/// `student-app:0-exam-variant-2`.
pub fn submission_image_tag(prefix: &str, index: usize, repo: &str) -> String {
    let mut tag = transform_string_as_docker_tag(&format!("{}-{}", index, repo)).into_owned();
    tag.truncate(MAX_TAG_LEN);
    format!("{}:{}", transform_string_as_image_repo(prefix), tag)
}

/// The container name of the `index`-th submission of a batch. Names only
/// depend on the slot, so a crashed run's leftovers are found and replaced by
/// the next run in the same slot.
pub fn submission_container_name(prefix: &str, index: usize) -> String {
    format!("{}-{}", transform_string_as_docker_tag(prefix), index)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(transform_string_as_docker_tag("a b/c"), "a__b__c");
        assert_eq!(
            submission_image_tag("Student-App", 3, "exam-variant-2-StandartIvard"),
            "student-app:3-exam-variant-2-StandartIvard"
        );
        let long = "x".repeat(300);
        let tag = submission_image_tag("p", 0, &long);
        assert_eq!(tag.len(), "p:".len() + MAX_TAG_LEN);
    }

    #[test]
    fn test_container_names() {
        assert_eq!(submission_container_name("student", 0), "student-0");
        assert_eq!(submission_container_name("my student", 2), "my__student-2");
    }
}
