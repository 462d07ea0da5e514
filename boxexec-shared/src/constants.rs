//! Shared constants between the daemon, the core and API clients.
//!
//! Messages listed here are part of the wire contract and must not change.

/// Fixed messages returned by the HTTP API
pub mod messages {
    /// Returned with 400 when an exec is created without `Cmd`
    pub const NO_EXEC_COMMAND: &str = "No exec command specified";

    /// Generic 500 body returned for requests with a non-JSON content type
    pub const GENERIC_INTERNAL_ERROR: &str =
        "The server encountered an internal error or misconfiguration...\n";

    /// Body of `GET /_ping`
    pub const PING: &str = "OK";
}

/// Media types
pub mod media {
    pub const JSON: &str = "application/json";

    /// Raw multiplexed output of an attached exec start
    pub const RAW_STREAM: &str = "application/vnd.docker.raw-stream";
}

/// Exit codes recorded for sessions whose process never ran
pub mod exit_codes {
    /// Executable could not be found inside the container
    pub const COMMAND_NOT_FOUND: i32 = 127;

    /// Namespace entry or process creation failed for any other reason
    pub const CANNOT_EXECUTE: i32 = 126;

    /// Offset added to the signal number for signal-terminated processes
    pub const SIGNAL_BASE: i32 = 128;

    /// The process could not be waited on, so its real status is unknown
    pub const UNKNOWN: i32 = -1;
}

/// Environment variables read by the daemon
pub mod envs {
    pub const LISTEN: &str = "BOXEXEC_LISTEN";
    pub const CONFIG: &str = "BOXEXEC_CONFIG";
    pub const LAUNCHER: &str = "BOXEXEC_LAUNCHER";
    pub const LOG_DIR: &str = "BOXEXEC_LOG_DIR";
}
