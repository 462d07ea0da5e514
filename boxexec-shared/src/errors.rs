//! Error taxonomy shared by the exec core, the HTTP layer and the daemon.
//!
//! Every variant maps to exactly one HTTP status (see `status_code`), so the
//! API layer never has to inspect message text to classify a failure.

use std::io;
use thiserror::Error;

/// Errors produced by the exec subsystem.
#[derive(Debug, Error)]
pub enum BoxexecError {
    /// Structurally invalid request. Nothing was allocated.
    #[error("{0}")]
    InvalidRequest(String),

    /// Request body was sent with a media type other than `application/json`.
    #[error("Content-Type specified ({0}) must be 'application/json'")]
    UnsupportedMediaType(String),

    /// The container reference does not resolve to a live container.
    #[error("No such container: {0}")]
    ContainerNotFound(String),

    /// No exec session with this id.
    #[error("No such exec instance: {0}")]
    SessionNotFound(String),

    /// The session's container stopped (or was replaced) after the session was created.
    #[error("Container {0} is not running")]
    ContainerNotRunning(String),

    /// A start raced with (or followed) another start of the same session.
    #[error("Exec instance {id} has already been started ({state})")]
    AlreadyStarted { id: String, state: String },

    /// Compare-and-transition found the session in an unexpected state.
    #[error("exec {id}: expected state {expected}, found {actual}")]
    StateConflict {
        id: String,
        expected: String,
        actual: String,
    },

    /// Namespace entry or process creation failed at the OS level.
    ///
    /// `exit_code` is what the session records when it is moved to `Exited`.
    #[error("failed to launch exec process: {message}")]
    LaunchFailed { message: String, exit_code: i32 },

    /// Invalid daemon configuration (options file, log filter, listen address).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl BoxexecError {
    /// HTTP status code this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            BoxexecError::InvalidRequest(_) => 400,
            BoxexecError::UnsupportedMediaType(_) => 415,
            BoxexecError::ContainerNotFound(_)
            | BoxexecError::SessionNotFound(_)
            | BoxexecError::ContainerNotRunning(_) => 404,
            BoxexecError::AlreadyStarted { .. } | BoxexecError::StateConflict { .. } => 409,
            BoxexecError::LaunchFailed { .. }
            | BoxexecError::Config(_)
            | BoxexecError::Internal(_)
            | BoxexecError::Io(_) => 500,
        }
    }

    /// True for errors caused by the caller rather than the daemon.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type BoxexecResult<T> = Result<T, BoxexecError>;
