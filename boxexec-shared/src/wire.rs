//! JSON bodies of the exec HTTP API.
//!
//! Field names follow the Docker Engine exec endpoints so existing clients
//! can talk to the daemon unchanged.

use serde::{Deserialize, Serialize};

/// Body of `POST /containers/{name}/exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecCreateRequest {
    /// Entrypoint followed by arguments. `null` and `[]` are both rejected.
    pub cmd: Option<Vec<String>>,
    /// `KEY=VALUE` entries appended to the process environment.
    pub env: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub tty: bool,
    pub privileged: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// Accepted for compatibility; the start request decides detach mode.
    pub detach: bool,
}

/// Response of a successful exec creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateResponse {
    pub id: String,
}

/// Body of `POST /exec/{id}/start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecStartRequest {
    pub detach: bool,
    pub tty: bool,
}

/// Process configuration reported by inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub entrypoint: String,
    pub arguments: Vec<String>,
    pub tty: bool,
    pub privileged: bool,
    pub user: String,
}

/// Response of `GET /exec/{id}/json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspectResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub running: bool,
    /// `null` until the session has exited.
    pub exit_code: Option<i32>,
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    /// 0 until the process has been launched.
    pub pid: u32,
    pub open_stdin: bool,
    pub open_stdout: bool,
    pub open_stderr: bool,
    pub can_remove: bool,
    pub process_config: ProcessConfig,
    pub created_at: String,
    pub started_at: Option<String>,
    pub exited_at: Option<String>,
}

/// Body of every JSON error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}
