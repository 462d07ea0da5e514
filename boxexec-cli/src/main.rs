//! Entry point for the boxexec daemon.

mod cli;

use anyhow::Context;
use boxexec::api::{AppState, create_router};
use boxexec::exec::start_reaper;
use boxexec::{ExecController, HostContainers};
use clap::Parser;
use cli::DaemonArgs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DaemonArgs::parse();
    let options = args.options()?;

    // Keep guard alive until end of main so buffered log lines are flushed
    let _log_guard = boxexec::util::init_logging(&options.log_level, options.log_dir.as_deref())?;

    let containers = HostContainers::new();
    for (name, pid) in &args.containers {
        let instance = containers.register(name.clone(), *pid);
        if !boxexec::util::process::is_process_alive(*pid) {
            warn!(container = %name, pid, "Container init process is not running");
        }
        info!(container = %name, container_id = %instance.id.short(), pid, "Serving container");
    }

    let launcher = options.launcher.build()?;
    info!(launcher = launcher.name(), "Exec launcher ready");

    let controller = ExecController::new(Arc::new(containers), launcher);
    let shutdown = CancellationToken::new();
    let reaper = start_reaper(
        controller.clone(),
        options.exited_ttl(),
        options.reap_interval(),
        shutdown.clone(),
    );

    let state = AppState::new(controller).with_strict_content_type(options.strict_content_type);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(options.listen)
        .await
        .with_context(|| format!("failed to bind {}", options.listen))?;
    info!(listen = %options.listen, "boxexecd listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = reaper.await;
    info!("boxexecd stopped");
    Ok(())
}
