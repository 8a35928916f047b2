// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ghostd` binary entry point: wires up the Message Bus, State Store
//! Adapter, and Daemon Shell, then runs until a termination signal arrives.

use std::sync::Arc;

use ghost_bus::{InMemoryOutbox, MessageBus, RedisTransport};
use ghost_core::SystemClock;
use ghost_daemon::{config, DaemonShell};
use ghost_storage::InMemoryStateStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let redis_url = config::redis_url();
    let transport = match RedisTransport::connect(&redis_url).await {
        Ok(transport) => Arc::new(transport) as Arc<dyn ghost_bus::Transport>,
        Err(e) => {
            tracing::error!(error = %e, redis_url, "failed to connect to redis, ghostd cannot start");
            return Err(Box::new(e));
        }
    };
    let outbox = Arc::new(InMemoryOutbox::new());
    let bus = MessageBus::new(transport, Some(outbox), SystemClock);

    let store: Arc<dyn ghost_storage::StateStoreAdapter> = Arc::new(InMemoryStateStore::new());
    let apps_dir = config::apps_dir();
    tokio::fs::create_dir_all(&apps_dir).await.ok();

    let shell = DaemonShell::boot(store, bus, SystemClock, apps_dir).await?;

    let run_handle = tokio::spawn({
        let shell = Arc::clone(&shell);
        async move { shell.run().await }
    });

    wait_for_shutdown_signal().await;
    shell.shutdown().await;
    let _ = run_handle.await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
    }
}
