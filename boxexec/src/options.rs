//! Configuration for the exec daemon.

use crate::exec::{HostLauncher, Launcher};
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Launcher selection
// ============================================================================

/// How exec processes are spawned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Join the container init process's namespaces (Linux only).
    Namespace,
    /// Spawn directly on the host.
    Host,
}

impl std::str::FromStr for LauncherKind {
    type Err = BoxexecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "namespace" | "ns" => Ok(LauncherKind::Namespace),
            "host" => Ok(LauncherKind::Host),
            other => Err(BoxexecError::Config(format!(
                "unknown launcher '{}', expected 'namespace' or 'host'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherKind::Namespace => write!(f, "namespace"),
            LauncherKind::Host => write!(f, "host"),
        }
    }
}

impl LauncherKind {
    /// Instantiate the launcher.
    ///
    /// `Namespace` is refused on platforms without `setns`.
    pub fn build(self) -> BoxexecResult<Arc<dyn Launcher>> {
        match self {
            LauncherKind::Host => Ok(Arc::new(HostLauncher)),
            #[cfg(target_os = "linux")]
            LauncherKind::Namespace => Ok(Arc::new(crate::exec::NamespaceLauncher)),
            #[cfg(not(target_os = "linux"))]
            LauncherKind::Namespace => Err(BoxexecError::Config(
                "the namespace launcher is only available on Linux".into(),
            )),
        }
    }
}

// ============================================================================
// Daemon options
// ============================================================================

/// Daemon options, loadable from a JSON file.
///
/// Every field has a default, so `{}` is a complete configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Address the HTTP API binds to.
    ///
    /// Default: 127.0.0.1:2375
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Seconds an exited session is kept for inspection before it is reaped.
    ///
    /// Default: 300
    #[serde(default = "default_exited_ttl")]
    pub exited_ttl: u64,

    /// Seconds between reaper passes.
    ///
    /// Default: 30
    #[serde(default = "default_reap_interval")]
    pub reap_interval: u64,

    /// Answer non-JSON create requests with 415 instead of the generic 500.
    #[serde(default)]
    pub strict_content_type: bool,

    #[serde(default = "default_launcher")]
    pub launcher: LauncherKind,

    /// Default log filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for rotated log files. Stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 2375))
}

fn default_exited_ttl() -> u64 {
    300
}

fn default_reap_interval() -> u64 {
    30
}

fn default_launcher() -> LauncherKind {
    if cfg!(target_os = "linux") {
        LauncherKind::Namespace
    } else {
        LauncherKind::Host
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            exited_ttl: default_exited_ttl(),
            reap_interval: default_reap_interval(),
            strict_content_type: false,
            launcher: default_launcher(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl ExecOptions {
    /// Load options from a JSON file.
    pub fn load(path: &Path) -> BoxexecResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BoxexecError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let options: ExecOptions = serde_json::from_str(&raw).map_err(|e| {
            BoxexecError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> BoxexecResult<()> {
        if self.reap_interval == 0 {
            return Err(BoxexecError::Config(
                "reap_interval must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn exited_ttl(&self) -> Duration {
        Duration::from_secs(self.exited_ttl)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval)
    }
}
