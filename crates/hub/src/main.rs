mod config;

use rc_hub_core::{graceful_shutdown, run_agent_session, run_console, run_periodic_snapshot, Hub};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env = dotenvy::dotenv().is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HUB_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "hub=info,agent=info".into()),
        )
        .init();
    tracing::debug!(loaded_env, "checked for a .env file");

    let config = config::load_from_env();
    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;

    let hub = Arc::new(Hub::open(config)?);

    {
        let hub_for_panic = Arc::clone(&hub);
        std::panic::set_hook(Box::new(move |info| {
            rc_hub_core::snapshot::append_crash_log(&hub_for_panic, &format!("panic: {info}"));
            eprintln!("{info}");
        }));
    }

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let listener = TcpListener::from_std(socket.into())?;
    info!(%addr, "hub listening");

    let accept_task = tokio::spawn(run_accept_loop(listener, Arc::clone(&hub)));
    let monitor_task = tokio::spawn(run_monitor_loop(Arc::clone(&hub)));
    let snapshot_task = tokio::spawn(run_periodic_snapshot(
        Arc::clone(&hub),
        Duration::from_secs(hub.config.snapshot_interval_secs),
    ));

    if hub.config.operator_console_enabled {
        tokio::select! {
            _ = shutdown_signal() => info!("received shutdown signal"),
            _ = run_console(Arc::clone(&hub)) => info!("operator requested shutdown"),
        }
    } else {
        shutdown_signal().await;
    }

    accept_task.abort();
    monitor_task.abort();
    snapshot_task.abort();
    graceful_shutdown(&hub).await;
    info!("hub stopped");
    Ok(())
}

async fn run_accept_loop(listener: TcpListener, hub: Arc<Hub>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    info!(%addr, "accepted connection");
                    run_agent_session(stream, hub).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Warns or cancels in-flight commands past the monitor's thresholds every
/// tick, translating a `TickResult` into the wire frames the affected
/// agents need to see.
async fn run_monitor_loop(hub: Arc<Hub>) {
    let mut ticker = tokio::time::interval(rc_hub_core::monitor::TICK_PERIOD);
    loop {
        ticker.tick().await;
        let result = hub.monitor.tick().await;

        for (id, elapsed) in result.to_warn {
            if let Some(writer) = hub.live.get(&id).await {
                let _ = writer
                    .write_line(&format!("Server: command has been running for {:.0}s", elapsed.as_secs_f64()))
                    .await;
            }
        }

        for id in result.to_cancel {
            if let Some(writer) = hub.live.get(&id).await {
                let _ = writer.write_line("CMD:CANCEL_TIMEOUT").await;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C");
    }
}
