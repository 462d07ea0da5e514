//! Process execution handle
//!
//! Provides types for managing a launched exec process.
//! Works for both namespace and direct host execution.

use boxexec_shared::constants::exit_codes;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::Stream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Chunks of process output, in the order they were read.
pub type OutputStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

type ExitFuture = BoxFuture<'static, BoxexecResult<ExitStatus>>;

const READ_CHUNK: usize = 8192;

/// Turn an async reader into an [`OutputStream`]. Ends at EOF or after the
/// first read error.
pub fn output_stream<R>(reader: R) -> OutputStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = reader;
    Box::pin(async_stream::stream! {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}

/// Process exit status
///
/// Either normal exit with code or termination by signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited normally with exit code
    Code(i32),

    /// Process was terminated by signal
    Signal(i32),
}

impl ExitStatus {
    /// Exit code as reported to API callers.
    ///
    /// Signal termination is reported shell-style as `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Code(c) => *c,
            ExitStatus::Signal(s) => exit_codes::SIGNAL_BASE + s,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Code(code),
            (None, Some(signal)) => ExitStatus::Signal(signal),
            (None, None) => ExitStatus::Code(exit_codes::UNKNOWN),
        }
    }
}

/// Handle to a launched process
///
/// Carries the pid, an awaitable exit status and, when output was captured,
/// the stdout and stderr streams. Streams can be taken and moved into their
/// own tasks before the handle is consumed by [`ExecHandle::wait`].
pub struct ExecHandle {
    pid: u32,
    exit: ExitFuture,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
}

impl ExecHandle {
    /// Create a handle from a pid and a future resolving to its exit status.
    pub fn new<F>(pid: u32, exit: F) -> Self
    where
        F: Future<Output = BoxexecResult<ExitStatus>> + Send + 'static,
    {
        Self {
            pid,
            exit: Box::pin(exit),
            stdout: None,
            stderr: None,
        }
    }

    /// Wrap a spawned child. Piped stdout/stderr become output streams.
    pub fn from_child(mut child: tokio::process::Child) -> BoxexecResult<Self> {
        let pid = child
            .id()
            .ok_or_else(|| BoxexecError::Internal("Process exited immediately".into()))?;

        let stdout = child.stdout.take().map(output_stream);
        let stderr = child.stderr.take().map(output_stream);

        let exit = async move {
            child.wait().await.map(ExitStatus::from).map_err(|e| {
                BoxexecError::Internal(format!("Failed to wait for process {}: {}", pid, e))
            })
        };

        Ok(Self::new(pid, exit).with_output(stdout, stderr))
    }

    pub fn with_output(mut self, stdout: Option<OutputStream>, stderr: Option<OutputStream>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take stdout stream
    ///
    /// Returns `None` if output was not captured or was already taken.
    pub fn stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Take stderr stream
    pub fn stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Wait for process to complete
    ///
    /// Consumes the handle. Output streams not taken beforehand are dropped.
    pub async fn wait(self) -> BoxexecResult<ExitStatus> {
        self.exit.await
    }
}
