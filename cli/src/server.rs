// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker HTTP server bootstrap

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use nfsbroker_core::application::broker::StandardBrokerService;
use nfsbroker_core::application::repository_factory::create_broker_store;
use nfsbroker_core::presentation::api;

use crate::config::{BrokerArgs, MaskArgs};

pub async fn start_broker(args: &BrokerArgs, mask_args: &MaskArgs) -> Result<()> {
    args.check_params()?;

    let credentials = args.credentials()?;
    let catalog = args.load_catalog()?;
    let mask = Arc::new(mask_args.build_mask()?);

    info!(
        "Starting {:?} broker ({} services in catalog)",
        args.broker_type,
        catalog.services.len()
    );

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("Failed to start metrics listener on {}", addr))?;
        info!("Metrics listening on {}", addr);
    }

    let vcap_services = std::env::var("VCAP_SERVICES").ok();
    let backend = args.storage_backend(vcap_services.as_deref())?;
    let store = create_broker_store(&backend)
        .await
        .context("Failed to open broker store")?;

    let broker = StandardBrokerService::new(args.broker_type, catalog, store.clone(), mask)
        .context("Failed to initialise broker")?;
    let app = api::app(Arc::new(broker), credentials);

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.listen_addr))?;

    info!("Broker listening on {}", args.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Broker shutting down");
    if let Err(e) = store.cleanup().await {
        error!("Failed to release broker store: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
