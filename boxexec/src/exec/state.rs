//! Exec session status and state machine.
//!
//! Defines the possible states of an exec session and the valid transitions
//! between them.

use crate::container::ContainerInstance;
use crate::types::ExecId;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an exec session.
///
/// States only ever move forward:
/// ```text
/// create() → Created
/// start()  → Starting → Running (process launched)
///                     ↘ Exited  (launch failed)
/// exit     → Exited
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    /// Allocated, never started.
    Created,

    /// A start request won the race and is launching the process.
    Starting,

    /// Process is running inside the container.
    Running,

    /// Process finished, or could not be launched. Terminal.
    Exited,
}

impl ExecStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ExecStatus::Running)
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, ExecStatus::Exited)
    }

    /// Check if start() can be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, ExecStatus::Created)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: ExecStatus) -> bool {
        use ExecStatus::*;
        matches!(
            (self, target),
            (Created, Starting) | (Starting, Running) | (Starting, Exited) | (Running, Exited)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Created => "created",
            ExecStatus::Starting => "starting",
            ExecStatus::Running => "running",
            ExecStatus::Exited => "exited",
        }
    }
}

impl std::str::FromStr for ExecStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ExecStatus::Created),
            "starting" => Ok(ExecStatus::Starting),
            "running" => Ok(ExecStatus::Running),
            "exited" => Ok(ExecStatus::Exited),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validated process configuration of an exec session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Container name or id as given by the caller.
    pub container_ref: String,
    /// Entrypoint followed by arguments. Never empty.
    pub command: Vec<String>,
    /// `(KEY, VALUE)` pairs appended to the process environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<String>,
    pub user: Option<ExecUser>,
    pub tty: bool,
    /// Reported by inspect only. Exec processes get the same privileges
    /// either way.
    pub privileged: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

impl ExecConfig {
    /// Config running `command` with every other option at its default.
    pub fn new<I, S>(container_ref: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container_ref: container_ref.into(),
            command: command.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            working_dir: None,
            user: None,
            tty: false,
            privileged: false,
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
        }
    }

    pub fn entrypoint(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn arguments(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// Numeric identity the process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecUser {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl std::fmt::Display for ExecUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gid {
            Some(gid) => write!(f, "{}:{}", self.uid, gid),
            None => write!(f, "{}", self.uid),
        }
    }
}

/// One exec invocation bound to a container.
///
/// Owned by the session store. Everything outside the store only ever sees
/// clones; the stored record changes only inside
/// `SessionStore::compare_and_transition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSession {
    id: ExecId,
    container: ContainerInstance,
    config: ExecConfig,
    detach: bool,
    status: ExecStatus,
    exit_code: Option<i32>,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    exited_at: Option<DateTime<Utc>>,
}

impl ExecSession {
    /// Create a session in `Created` status.
    pub fn new(id: ExecId, container: ContainerInstance, config: ExecConfig) -> Self {
        Self {
            id,
            container,
            config,
            detach: false,
            status: ExecStatus::Created,
            exit_code: None,
            pid: None,
            created_at: Utc::now(),
            started_at: None,
            exited_at: None,
        }
    }

    pub fn id(&self) -> &ExecId {
        &self.id
    }

    pub fn container(&self) -> &ContainerInstance {
        &self.container
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn detach(&self) -> bool {
        self.detach
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }

    /// Present iff the session is `Exited`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn exited_at(&self) -> Option<DateTime<Utc>> {
        self.exited_at
    }

    /// Attempt state transition with validation.
    ///
    /// Returns error if the transition is not valid, or if an exit code is
    /// present without entering `Exited` (or missing when entering it).
    pub(crate) fn transition_to(&mut self, new_status: ExecStatus) -> BoxexecResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(BoxexecError::StateConflict {
                id: self.id.to_string(),
                expected: format!("a state preceding {}", new_status),
                actual: self.status.to_string(),
            });
        }
        if new_status.is_exited() != self.exit_code.is_some() {
            return Err(BoxexecError::Internal(format!(
                "exec {}: exit code must be recorded exactly when entering exited",
                self.id
            )));
        }

        self.status = new_status;
        Ok(())
    }

    pub fn set_detach(&mut self, detach: bool) {
        self.detach = detach;
    }

    /// Record a successful launch. Only the first call takes effect.
    pub fn record_start(&mut self, pid: u32) {
        if self.started_at.is_none() {
            self.pid = Some(pid);
            self.started_at = Some(Utc::now());
        }
    }

    /// Record process exit. Only the first call takes effect.
    pub fn record_exit(&mut self, exit_code: i32) {
        if self.exited_at.is_none() {
            self.exit_code = Some(exit_code);
            self.exited_at = Some(Utc::now());
        }
    }

    /// Whether this session has been `Exited` since before `cutoff`.
    pub fn exited_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_exited() && self.exited_at.is_some_and(|t| t < cutoff)
    }
}
