//! tracewired — Tracewire stream decode daemon.
//!
//! Wires one `DecoderService` behind three front-ends: the native control
//! RPC, the optional HTTP gateway, and the UDP data plane. The control
//! listener must bind before anything else starts; failing that bind is the
//! only startup error that kills the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};

use tracewire_core::config::TracewireConfig;
use tracewire_services::decoder::{DecodedRecord, DecoderService, InboundDatagram};
use tracewire_services::remote::{HttpKv, RemoteKv};

use tracewired::control::ControlListener;
use tracewired::data::DataListener;
use tracewired::pipeline::DecodePipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = TracewireConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TracewireConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TracewireConfig::default()
    });

    // Remote cache tier, chosen once here.
    let remote: Option<Arc<dyn RemoteKv>> = if config.cache.enabled {
        let kv = HttpKv::new(
            config.cache.base_url.as_str(),
            Duration::from_secs(config.cache.timeout_secs),
        )
        .context("failed to build remote cache client")?;
        tracing::info!(base_url = %config.cache.base_url, "remote cache enabled");
        Some(Arc::new(kv))
    } else {
        None
    };

    let decoder = Arc::new(DecoderService::new(remote));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Bind the control listener first ──────────────────────────────────────
    // Nothing else is considered ready until the control socket accepts.

    let control = ControlListener::bind(
        &config.control.bind,
        decoder.clone(),
        shutdown_tx.subscribe(),
    )
    .await?;

    let (datagram_tx, datagram_rx) = mpsc::channel::<InboundDatagram>(config.data.queue_depth);
    // The daemon has no in-process record consumer; decoded records are
    // logged by the pipeline and this receiver is dropped.
    let (record_tx, _record_rx) = mpsc::channel::<DecodedRecord>(config.data.queue_depth);

    let data = DataListener::bind(
        &config.data.bind,
        config.data.buffer_bytes,
        datagram_tx,
        shutdown_tx.subscribe(),
    )
    .await?;

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let control_task = tokio::spawn(control.run());
    let data_task = tokio::spawn(data.run());
    let pipeline_task = tokio::spawn(
        DecodePipeline::new(
            decoder.clone(),
            datagram_rx,
            record_tx,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let gateway_task = if config.gateway.enabled {
        let state = tracewire_api::ApiState { decoder };
        let bind = config.gateway.bind.clone();
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = tracewire_api::serve(state, &bind, shutdown).await {
                tracing::error!(error = %e, "gateway failed");
            }
        }))
    } else {
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = control_task  => tracing::error!("control listener exited: {:?}", r),
        r = data_task     => tracing::error!("data listener exited: {:?}", r),
        r = pipeline_task => tracing::error!("decode pipeline exited: {:?}", r),
    }

    // Give the remaining tasks their shutdown signal and let in-flight work
    // finish.
    let _ = shutdown_tx.send(());
    if let Some(task) = gateway_task {
        let _ = task.await;
    }

    Ok(())
}
