use boxexec::{ExecOptions, LauncherKind};
use boxexec_shared::constants::envs;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Serve the exec API for running containers
#[derive(Parser, Debug)]
#[command(author, version, about = "boxexecd - exec sessions for running containers")]
pub struct DaemonArgs {
    /// JSON options file. Flags below override its values.
    #[arg(long, env = envs::CONFIG)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:2375)
    #[arg(short, long, env = envs::LISTEN)]
    pub listen: Option<SocketAddr>,

    /// How exec processes are spawned: namespace or host
    #[arg(long, env = envs::LAUNCHER)]
    pub launcher: Option<LauncherKind>,

    /// Container to serve, as NAME=PID of its init process. Repeatable.
    #[arg(short, long = "container", value_name = "NAME=PID", value_parser = parse_container)]
    pub containers: Vec<(String, u32)>,

    /// Answer non-JSON requests with 415 instead of the generic 500
    #[arg(long)]
    pub strict_content_type: bool,

    /// Seconds an exited exec stays inspectable
    #[arg(long)]
    pub exited_ttl: Option<u64>,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, env = envs::LOG_DIR)]
    pub log_dir: Option<PathBuf>,
}

impl DaemonArgs {
    /// Options file (or defaults) with flags applied on top.
    pub fn options(&self) -> anyhow::Result<ExecOptions> {
        let mut options = match &self.config {
            Some(path) => ExecOptions::load(path)?,
            None => ExecOptions::default(),
        };

        if let Some(listen) = self.listen {
            options.listen = listen;
        }
        if let Some(launcher) = self.launcher {
            options.launcher = launcher;
        }
        if self.strict_content_type {
            options.strict_content_type = true;
        }
        if let Some(ttl) = self.exited_ttl {
            options.exited_ttl = ttl;
        }
        if let Some(level) = &self.log_level {
            options.log_level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            options.log_dir = Some(dir.clone());
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_container(s: &str) -> Result<(String, u32), String> {
    let (name, pid) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PID, got '{}'", s))?;
    if name.is_empty() {
        return Err("container name must not be empty".to_string());
    }
    let pid = pid
        .parse::<u32>()
        .map_err(|e| format!("invalid pid '{}': {}", pid, e))?;
    Ok((name.to_string(), pid))
}
