//! pxobj object daemon.
//!
//! One process per StatefulSet pod. Serves the public S3 API on one port
//! and the admin + internal replication API on another; peers reach each
//! other through the admin port.

mod admin;
mod replication;
mod s3;
mod serve;
mod state;
mod tls;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pxobj_cluster::Cluster;
use pxobj_common::Config;
use pxobj_store::Store;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        data_dir = %config.data_dir.display(),
        replicas = config.cluster.replicas,
        tls = config.tls.is_some(),
        "starting pxobjd"
    );

    let store = Store::open(&config.data_dir).context("failed to open store")?;
    let cluster = Cluster::new(&config).context("failed to build cluster client")?;
    info!(ordinal = cluster.self_ordinal(), enabled = cluster.enabled(), "cluster membership");

    let state = Arc::new(AppState {
        store,
        cluster,
        token: config.admin_token.clone(),
    });

    let (s3_tls, admin_tls) = match &config.tls {
        Some(tls_cfg) => {
            let material = tls::load(tls_cfg).context("failed to load TLS material")?;
            (Some(material.s3), Some(material.admin))
        }
        None => (None, None),
    };

    let s3_listener = TcpListener::bind(("0.0.0.0", config.s3_port))
        .await
        .with_context(|| format!("failed to bind S3 port {}", config.s3_port))?;
    let admin_listener = TcpListener::bind(("0.0.0.0", config.admin_port))
        .await
        .with_context(|| format!("failed to bind admin port {}", config.admin_port))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(port = config.s3_port, "S3 API listening");
    let s3_server = tokio::spawn(serve::serve(
        s3_listener,
        s3::router(state.clone()),
        s3_tls,
        shutdown_rx.clone(),
    ));

    info!(port = config.admin_port, "admin API listening");
    let admin_router = admin::router(state.clone()).merge(replication::router(state.clone()));
    let admin_server = tokio::spawn(serve::serve(
        admin_listener,
        admin_router,
        admin_tls,
        shutdown_rx,
    ));

    wait_for_shutdown().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = s3_server.await;
    let _ = admin_server.await;
    Ok(())
}

async fn wait_for_shutdown() {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
