//! Read-only projection of a session into its API representation.

use super::state::ExecSession;
use boxexec_shared::wire::{ExecInspectResponse, ProcessConfig};
use chrono::{DateTime, SecondsFormat, Utc};

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Project a session snapshot. Never fails and never touches the store.
pub fn project(session: &ExecSession) -> ExecInspectResponse {
    let config = session.config();
    let status = session.status();

    ExecInspectResponse {
        id: session.id().to_string(),
        running: status.is_running(),
        exit_code: session.exit_code(),
        container_id: session.container().id.to_string(),
        pid: session.pid().unwrap_or(0),
        open_stdin: config.attach_stdin,
        open_stdout: config.attach_stdout,
        open_stderr: config.attach_stderr,
        can_remove: status.is_exited(),
        process_config: ProcessConfig {
            entrypoint: config.entrypoint().to_string(),
            arguments: config.arguments().to_vec(),
            tty: config.tty,
            privileged: config.privileged,
            user: config.user.map(|u| u.to_string()).unwrap_or_default(),
        },
        created_at: timestamp(session.created_at()),
        started_at: session.started_at().map(timestamp),
        exited_at: session.exited_at().map(timestamp),
    }
}
