use bollard::errors::Error as BollardError;
use dot_core::EngineError;

/// Translate a daemon error for operation `op` into the engine-neutral form.
pub(crate) fn engine_error(op: &'static str, err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NoSuchContainer(format!("{op}: {message}")),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api(format!("{op}: daemon returned {status_code}: {message}")),
        BollardError::IOError { err } => EngineError::Unavailable(format!("{op}: {err}")),
        BollardError::RequestTimeoutError => {
            EngineError::Unavailable(format!("{op}: request timed out"))
        }
        other => EngineError::Api(format!("{op}: {other}")),
    }
}

/// Like [`engine_error`], but a 404 means the path (not the container) is missing.
pub(crate) fn path_error(op: &'static str, path: &str, err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NoSuchPath(path.to_string()),
        other => engine_error(op, other),
    }
}
