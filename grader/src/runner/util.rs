use bollard::errors::Error;

pub fn is_recoverable_error(e: &Error) -> bool {
    matches!(
        &e,
        Error::JsonDataError { .. }
            | Error::JsonSerdeError { .. }
            | Error::StrParseError { .. }
            | Error::StrFmtError { .. }
            | Error::URLEncodedError { .. }
    )
}

/// The HTTP status the Docker daemon answered with, if the error came from it.
pub fn status_code(e: &Error) -> Option<u16> {
    match e {
        Error::DockerResponseNotModifiedError { .. } => Some(304),
        Error::DockerResponseBadParameterError { .. } => Some(400),
        Error::DockerResponseNotFoundError { .. } => Some(404),
        Error::DockerResponseConflictError { .. } => Some(409),
        Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// "No such container / image / network"
pub fn is_not_found(e: &Error) -> bool {
    status_code(e) == Some(404)
}

/// "Container already stopped"
pub fn is_not_modified(e: &Error) -> bool {
    status_code(e) == Some(304)
}

/// "Already exists" or "removal already in progress"
pub fn is_conflict(e: &Error) -> bool {
    status_code(e) == Some(409)
}

#[cfg(test)]
mod test {
    use super::*;

    fn message() -> String {
        "no such thing".into()
    }

    #[test]
    fn test_daemon_status_classification() {
        let not_found = Error::DockerResponseNotFoundError { message: message() };
        let conflict = Error::DockerResponseConflictError { message: message() };
        let not_modified = Error::DockerResponseNotModifiedError { message: message() };
        let server = Error::DockerResponseServerError {
            status_code: 500,
            message: message(),
        };

        assert!(is_not_found(&not_found));
        assert!(!is_conflict(&not_found));
        assert!(is_conflict(&conflict));
        assert!(!is_not_found(&conflict));
        assert!(is_not_modified(&not_modified));
        assert!(!is_not_found(&not_modified));

        assert_eq!(status_code(&server), Some(500));
        assert!(!is_not_found(&server) && !is_conflict(&server) && !is_not_modified(&server));
        assert_eq!(status_code(&Error::RequestTimeoutError), None);
    }
}
