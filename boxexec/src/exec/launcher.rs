//! Launcher trait and implementations.
//!
//! Provides abstraction for spawning exec processes in different contexts:
//! - NamespaceLauncher: joins the container's namespaces before exec
//! - HostLauncher: runs commands directly on the host

use super::exec_handle::ExecHandle;
use super::state::{ExecSession, ExecUser};
use crate::types::ExecId;
use async_trait::async_trait;
use boxexec_shared::constants::exit_codes;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Everything a launcher needs to spawn one exec process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec_id: ExecId,
    pub program: String,
    pub args: Vec<String>,
    /// Appended to the base environment; later entries win.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<String>,
    pub user: Option<ExecUser>,
    /// Init process of the target container.
    pub container_pid: u32,
    /// Pipe stdout/stderr back to the caller instead of discarding them.
    pub capture_output: bool,
}

impl LaunchSpec {
    pub fn from_session(session: &ExecSession, capture_output: bool) -> Self {
        let config = session.config();
        Self {
            exec_id: session.id().clone(),
            program: config.entrypoint().to_string(),
            args: config.arguments().to_vec(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            user: config.user,
            container_pid: session.container().pid,
            capture_output,
        }
    }
}

/// Launcher spawns exec processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn the process described by `spec`.
    ///
    /// Fails with [`BoxexecError::LaunchFailed`] when the process could not be
    /// created; the error carries the exit code to record for the session.
    async fn launch(&self, spec: &LaunchSpec) -> BoxexecResult<ExecHandle>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Map a spawn failure to `LaunchFailed` with its sentinel exit code.
pub fn launch_error(program: &str, err: io::Error) -> BoxexecError {
    let exit_code = match err.kind() {
        io::ErrorKind::NotFound => exit_codes::COMMAND_NOT_FOUND,
        _ => exit_codes::CANNOT_EXECUTE,
    };
    BoxexecError::LaunchFailed {
        message: format!("exec: \"{}\": {}", program, err),
        exit_code,
    }
}

/// Fail with `CANNOT_EXECUTE` unless `dir`, resolved under `root`, is a
/// directory. A missing working directory must not look like a missing
/// executable.
fn check_working_dir(root: &Path, dir: &str) -> BoxexecResult<()> {
    let path = root.join(dir.trim_start_matches('/'));
    let problem = match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => "not a directory".to_string(),
        Err(e) => e.to_string(),
    };
    Err(BoxexecError::LaunchFailed {
        message: format!("chdir to working directory \"{}\" failed: {}", dir, problem),
        exit_code: exit_codes::CANNOT_EXECUTE,
    })
}

fn base_command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    if spec.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }
    cmd
}

fn spawn(mut cmd: Command, spec: &LaunchSpec) -> BoxexecResult<ExecHandle> {
    let child = cmd.spawn().map_err(|e| launch_error(&spec.program, e))?;
    ExecHandle::from_child(child)
}

/// Executes commands directly on the host (no namespace entry).
#[derive(Debug, Default, Clone, Copy)]
pub struct HostLauncher;

#[async_trait]
impl Launcher for HostLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> BoxexecResult<ExecHandle> {
        let mut cmd = base_command(spec);
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if let Some(dir) = &spec.working_dir {
            check_working_dir(Path::new("/"), dir)?;
            cmd.current_dir(dir);
        }
        if let Some(user) = spec.user {
            cmd.uid(user.uid);
            if let Some(gid) = user.gid {
                cmd.gid(gid);
            }
        }

        spawn(cmd, spec)
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

#[cfg(target_os = "linux")]
pub use namespace::NamespaceLauncher;

#[cfg(target_os = "linux")]
mod namespace {
    use super::*;
    use nix::errno::Errno;
    use nix::sched::{CloneFlags, setns};
    use nix::sys::signal::{SigHandler, SigSet, kill, signal};
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, Gid, Pid, Uid, chdir, fork, setgid, setgroups, setuid, write};
    use std::fs::{File, OpenOptions};
    use std::os::fd::OwnedFd;
    use std::os::unix::fs::MetadataExt;
    use std::path::PathBuf;

    /// Joined in this order; the mount namespace goes last so `/proc` paths
    /// resolved earlier stay valid.
    const NAMESPACES: [&str; 6] = ["cgroup", "ipc", "uts", "net", "pid", "mnt"];

    const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

    const CGROUP_ROOT: &str = "/sys/fs/cgroup";

    /// Executes commands inside the container of the init process.
    ///
    /// Namespace and cgroup files are opened in the parent. The child moves
    /// itself into the container's cgroups, enters the namespaces with
    /// `setns`, then applies working directory and user from inside the
    /// container's mount namespace. Namespaces we already share with the init
    /// process are skipped.
    ///
    /// Joining a PID namespace only affects children, so when one is entered
    /// the child forks once more: the grandchild execs the command as a member
    /// of the container, and the child stays behind on the host to relay its
    /// exit status. The pid reported to callers is the relaying process.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NamespaceLauncher;

    #[async_trait]
    impl Launcher for NamespaceLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> BoxexecResult<ExecHandle> {
            let namespaces = open_namespaces(spec.container_pid)?;
            let cgroups = open_cgroups(spec.container_pid)?;
            let enters_pid_ns = namespaces.iter().any(|(kind, _)| *kind == "pid");

            let working_dir = spec.working_dir.as_deref().unwrap_or("/");
            let container_root = PathBuf::from(format!("/proc/{}/root", spec.container_pid));
            check_working_dir(&container_root, working_dir)?;
            let working_dir = PathBuf::from(working_dir);

            let mut cmd = base_command(spec);
            cmd.env_clear();
            cmd.envs(container_env(spec.container_pid));
            cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

            let user = spec.user;

            tracing::debug!(
                exec_id = %spec.exec_id,
                container_pid = spec.container_pid,
                namespaces = namespaces.len(),
                cgroups = cgroups.len(),
                enters_pid_ns,
                "Entering container"
            );

            // SAFETY: the closure only makes async-signal-safe syscalls on
            // data prepared before fork.
            unsafe {
                cmd.pre_exec(move || {
                    for procs in &cgroups {
                        write(procs, b"0")?;
                    }
                    for (_, ns) in &namespaces {
                        setns(ns, CloneFlags::empty())?;
                    }
                    chdir(working_dir.as_path())?;
                    if let Some(user) = user {
                        if let Some(gid) = user.gid {
                            setgroups(&[])?;
                            setgid(Gid::from_raw(gid))?;
                        }
                        setuid(Uid::from_raw(user.uid))?;
                    }
                    if enters_pid_ns {
                        fork_into_pid_namespace()?;
                    }
                    Ok(())
                });
            }

            spawn(cmd, spec)
        }

        fn name(&self) -> &'static str {
            "namespace"
        }
    }

    /// Fork so the command runs as a member of the PID namespace joined
    /// earlier. Returns in the grandchild; the child never returns.
    fn fork_into_pid_namespace() -> io::Result<()> {
        // SAFETY: runs between fork and exec, where only this thread exists.
        match unsafe { fork() }? {
            ForkResult::Child => {
                // SAFETY: prctl with constant arguments.
                unsafe {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong);
                }
                Ok(())
            }
            ForkResult::Parent { child } => relay_exit(child),
        }
    }

    /// Wait for `child` and exit the same way it did.
    fn relay_exit(child: Pid) -> ! {
        // Drop every inherited descriptor above stdio, including the spawn
        // error pipe, so the daemon sees exec success as soon as it happens.
        // SAFETY: plain close syscalls on descriptors this process owns.
        unsafe {
            if libc::syscall(libc::SYS_close_range, 3u32, u32::MAX, 0u32) != 0 {
                for fd in 3..1024 {
                    libc::close(fd);
                }
            }
        }

        let status = loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => continue,
                other => break other,
            }
        };

        let code = match status {
            Ok(WaitStatus::Exited(_, code)) => code,
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                // SAFETY: restores the default disposition before re-raising.
                unsafe {
                    let _ = signal(sig, SigHandler::SigDfl);
                }
                let mut set = SigSet::empty();
                set.add(sig);
                let _ = set.thread_unblock();
                let _ = kill(Pid::this(), sig);
                exit_codes::SIGNAL_BASE + sig as i32
            }
            _ => exit_codes::CANNOT_EXECUTE,
        };
        // SAFETY: terminates this forked process without running destructors.
        unsafe { libc::_exit(code) }
    }

    fn ns_error(path: &str, err: io::Error) -> BoxexecError {
        BoxexecError::LaunchFailed {
            message: format!("failed to open namespace {}: {}", path, err),
            exit_code: exit_codes::CANNOT_EXECUTE,
        }
    }

    /// Open the namespaces of `pid` that differ from our own.
    fn open_namespaces(pid: u32) -> BoxexecResult<Vec<(&'static str, OwnedFd)>> {
        let mut fds = Vec::with_capacity(NAMESPACES.len());
        for ns in NAMESPACES {
            let target = format!("/proc/{}/ns/{}", pid, ns);
            let target_meta = std::fs::metadata(&target).map_err(|e| ns_error(&target, e))?;

            let own = format!("/proc/self/ns/{}", ns);
            let shared = std::fs::metadata(&own)
                .map(|m| m.dev() == target_meta.dev() && m.ino() == target_meta.ino())
                .unwrap_or(false);
            if shared {
                continue;
            }

            let file = File::open(&target).map_err(|e| ns_error(&target, e))?;
            fds.push((ns, OwnedFd::from(file)));
        }
        Ok(fds)
    }

    /// Open `cgroup.procs` of every cgroup `pid` belongs to that we are not
    /// already in.
    fn open_cgroups(pid: u32) -> BoxexecResult<Vec<OwnedFd>> {
        let read = |path: String| {
            std::fs::read_to_string(&path).map_err(|e| BoxexecError::LaunchFailed {
                message: format!("failed to read {}: {}", path, e),
                exit_code: exit_codes::CANNOT_EXECUTE,
            })
        };
        let target = read(format!("/proc/{}/cgroup", pid))?;
        let own = read("/proc/self/cgroup".to_string())?;
        let own: Vec<&str> = own.lines().collect();

        let differing: String = target
            .lines()
            .filter(|line| !own.contains(line))
            .map(|line| format!("{}\n", line))
            .collect();

        cgroup_procs_paths(&differing)
            .into_iter()
            .map(|path| {
                OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map(OwnedFd::from)
                    .map_err(|e| BoxexecError::LaunchFailed {
                        message: format!("failed to join cgroup {}: {}", path.display(), e),
                        exit_code: exit_codes::CANNOT_EXECUTE,
                    })
            })
            .collect()
    }

    /// Map `/proc/<pid>/cgroup` lines to the `cgroup.procs` files that place
    /// a process into the same cgroups.
    ///
    /// `0::/path` is the unified hierarchy, mounted at the cgroup root on
    /// pure v2 hosts and under `unified/` when v1 controllers are present.
    fn cgroup_procs_paths(content: &str) -> Vec<PathBuf> {
        let entries: Vec<(&str, &str)> = content
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, ':');
                let _id = parts.next()?;
                Some((parts.next()?, parts.next()?))
            })
            .collect();
        let hybrid = entries.iter().any(|(controllers, _)| !controllers.is_empty());

        entries
            .into_iter()
            .map(|(controllers, path)| {
                let hierarchy = match controllers {
                    "" if hybrid => "unified",
                    "" => "",
                    named => named.strip_prefix("name=").unwrap_or(named),
                };
                PathBuf::from(CGROUP_ROOT)
                    .join(hierarchy)
                    .join(path.trim_start_matches('/'))
                    .join("cgroup.procs")
            })
            .collect()
    }

    /// Environment of the container's init process, or a default `PATH`
    /// when it cannot be read.
    fn container_env(pid: u32) -> Vec<(String, String)> {
        let raw = match std::fs::read(format!("/proc/{}/environ", pid)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(pid, error = %e, "Cannot read container environment");
                Vec::new()
            }
        };

        let mut env: Vec<(String, String)> = raw
            .split(|b| *b == 0)
            .filter_map(|entry| std::str::from_utf8(entry).ok())
            .filter_map(|entry| entry.split_once('='))
            .filter(|(key, _)| !key.is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if !env.iter().any(|(k, _)| k == "PATH") {
            if let Some((k, v)) = DEFAULT_PATH.split_once('=') {
                env.push((k.to_string(), v.to_string()));
            }
        }
        env
    }

    #[cfg(test)]
    mod tests {
        use super::super::tests::{collect, spec};
        use super::*;
        use crate::exec::exec_handle::ExitStatus;
        use std::io::{BufRead, BufReader};
        use std::time::Duration;

        /// Throwaway container: an init process in fresh PID, mount and UTS
        /// namespaces with its own `/proc`, a hostname and a tmpfs on `/mnt`.
        struct Sandbox {
            unshare: std::process::Child,
            init_pid: u32,
        }

        impl Sandbox {
            const HOSTNAME: &'static str = "boxexec-sandbox";

            /// `None` when not running as root or `unshare` cannot create
            /// the namespaces here.
            fn start() -> Option<Self> {
                if !Uid::effective().is_root() {
                    return None;
                }
                let script = format!(
                    "echo {} > /proc/sys/kernel/hostname && mount -t tmpfs tmpfs /mnt \
                     && mkdir /mnt/work && echo ready && exec sleep 60",
                    Self::HOSTNAME
                );
                let unshare = std::process::Command::new("unshare")
                    .args(["--pid", "--fork", "--kill-child", "--mount", "--mount-proc", "--uts"])
                    .args(["--", "sh", "-c", &script])
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .spawn()
                    .ok()?;
                let mut sandbox = Sandbox {
                    unshare,
                    init_pid: 0,
                };

                let mut line = String::new();
                let stdout = sandbox.unshare.stdout.take()?;
                BufReader::new(stdout).read_line(&mut line).ok()?;
                if line.trim() != "ready" {
                    return None;
                }

                let pid = sandbox.unshare.id();
                let children =
                    std::fs::read_to_string(format!("/proc/{0}/task/{0}/children", pid)).ok()?;
                sandbox.init_pid = children.split_whitespace().next()?.parse().ok()?;
                Some(sandbox)
            }

            fn spec(&self, command: &[&str]) -> LaunchSpec {
                let mut spec = spec(command);
                spec.container_pid = self.init_pid;
                spec
            }
        }

        impl Drop for Sandbox {
            fn drop(&mut self) {
                let _ = self.unshare.kill();
                let _ = self.unshare.wait();
            }
        }

        macro_rules! sandbox_or_skip {
            () => {
                match Sandbox::start() {
                    Some(sandbox) => sandbox,
                    None => {
                        eprintln!("skipping: needs root and unshare");
                        return;
                    }
                }
            };
        }

        #[test]
        fn test_own_namespaces_are_skipped() {
            let fds = open_namespaces(std::process::id()).unwrap();
            assert!(fds.is_empty());
        }

        #[test]
        fn test_own_cgroups_are_skipped() {
            let fds = open_cgroups(std::process::id()).unwrap();
            assert!(fds.is_empty());
        }

        #[test]
        fn test_missing_process_fails_with_cannot_execute() {
            let err = open_namespaces(i32::MAX as u32).unwrap_err();
            assert!(matches!(
                err,
                BoxexecError::LaunchFailed { exit_code: 126, .. }
            ));
        }

        #[test]
        fn test_cgroup_procs_paths_unified() {
            let paths = cgroup_procs_paths("0::/system.slice/ctr-web.scope\n");
            assert_eq!(
                paths,
                vec![PathBuf::from(
                    "/sys/fs/cgroup/system.slice/ctr-web.scope/cgroup.procs"
                )]
            );
        }

        #[test]
        fn test_cgroup_procs_paths_v1_hierarchies() {
            let content = "4:cpu,cpuacct:/docker/abc\n1:name=systemd:/docker/abc\n0::/docker/abc\n";
            let paths = cgroup_procs_paths(content);
            assert_eq!(
                paths,
                vec![
                    PathBuf::from("/sys/fs/cgroup/cpu,cpuacct/docker/abc/cgroup.procs"),
                    PathBuf::from("/sys/fs/cgroup/systemd/docker/abc/cgroup.procs"),
                    PathBuf::from("/sys/fs/cgroup/unified/docker/abc/cgroup.procs"),
                ]
            );
        }

        #[test]
        fn test_container_env_has_path() {
            let env = container_env(std::process::id());
            assert!(env.iter().any(|(k, _)| k == "PATH"));
        }

        #[tokio::test]
        async fn test_launch_into_own_namespaces() {
            let mut spec = spec(&["sh", "-c", "echo $FOO"]);
            spec.env.push(("FOO".into(), "bar".into()));
            spec.container_pid = std::process::id();

            let mut handle = NamespaceLauncher.launch(&spec).await.unwrap();
            let out = collect(handle.stdout().unwrap()).await;
            assert_eq!(out, b"bar\n");
            assert!(handle.wait().await.unwrap().success());
        }

        #[tokio::test]
        async fn test_missing_working_dir_is_cannot_execute() {
            let mut spec = spec(&["true"]);
            spec.working_dir = Some("/definitely/not/here".into());

            let err = NamespaceLauncher.launch(&spec).await.err().unwrap();
            assert!(matches!(err, BoxexecError::LaunchFailed { exit_code: 126, .. }));
        }

        #[tokio::test]
        async fn test_launch_joins_container() {
            let sandbox = sandbox_or_skip!();
            let mut spec = sandbox.spec(&[
                "sh",
                "-c",
                "cat /proc/sys/kernel/hostname; readlink /proc/self; pwd",
            ]);
            spec.working_dir = Some("/mnt/work".into());

            let mut handle = NamespaceLauncher.launch(&spec).await.unwrap();
            let out = String::from_utf8(collect(handle.stdout().unwrap()).await).unwrap();
            let lines: Vec<&str> = out.lines().collect();

            assert_eq!(lines.len(), 3, "unexpected output: {:?}", out);
            assert_eq!(lines[0], Sandbox::HOSTNAME);
            // /proc/self resolves to a pid of the container's own numbering
            let inner_pid: u32 = lines[1].parse().unwrap();
            assert_ne!(inner_pid, handle.pid());
            assert_eq!(lines[2], "/mnt/work");
            assert!(handle.wait().await.unwrap().success());
        }

        #[tokio::test]
        async fn test_launch_in_container_relays_exit_status() {
            let sandbox = sandbox_or_skip!();

            let mut handle = NamespaceLauncher
                .launch(&sandbox.spec(&["sh", "-c", "exit 5"]))
                .await
                .unwrap();
            assert_eq!(handle.wait().await.unwrap(), ExitStatus::Code(5));

            let mut handle = NamespaceLauncher
                .launch(&sandbox.spec(&["sh", "-c", "kill -9 $$"]))
                .await
                .unwrap();
            assert_eq!(handle.wait().await.unwrap(), ExitStatus::Signal(9));
        }

        #[tokio::test]
        async fn test_missing_binary_in_container() {
            let sandbox = sandbox_or_skip!();
            let spec = sandbox.spec(&["/definitely/not/here"]);

            let result = tokio::time::timeout(Duration::from_secs(10), NamespaceLauncher.launch(&spec))
                .await
                .expect("launch must not wait for the command");
            let err = result.err().unwrap();
            assert!(matches!(err, BoxexecError::LaunchFailed { exit_code: 127, .. }));
        }

        #[tokio::test]
        async fn test_missing_working_dir_in_container() {
            let sandbox = sandbox_or_skip!();
            let mut spec = sandbox.spec(&["true"]);
            spec.working_dir = Some("/mnt/absent".into());

            let err = NamespaceLauncher.launch(&spec).await.err().unwrap();
            assert!(matches!(err, BoxexecError::LaunchFailed { exit_code: 126, .. }));
        }
    }
}
