use anyhow::Result;
use facegate_core::enrollment::{load_identities, load_manifest};
use facegate_core::{DetectorAdapter, EmbeddingRepository, MatchEvaluator, RemoteAnalyzer};
use facegate_hw::{CaptureLifecycleManager, V4lDevice};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod debouncer;
mod engine;
mod feedback;

use config::Config;
use engine::Engine;
use feedback::ChannelFeedback;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        analyzer = %config.analyzer_socket.display(),
        manifest = %config.enrollment_manifest.display(),
        threshold = config.acceptance_threshold,
        "facegated starting"
    );

    let mut analyzer = RemoteAnalyzer::new(&config.analyzer_socket, config.analyzer_timeout());
    let repository = match load_manifest(&config.enrollment_manifest) {
        Ok(sources) => load_identities(&mut analyzer, &DetectorAdapter::default(), &sources).await,
        Err(err) => {
            tracing::warn!(error = %err, "enrollment manifest unavailable; starting with no identities");
            EmbeddingRepository::new(Vec::new())
        }
    };
    let evaluator = MatchEvaluator::new(Arc::new(repository), config.thresholds());

    let capture = CaptureLifecycleManager::new(
        V4lDevice::new(&config.camera_device),
        config.capture_constraints(),
        Duration::from_millis(config.stall_timeout_ms),
    );

    let (feedback, events) = ChannelFeedback::new();
    let (engine, handle) = Engine::new(&config, capture, analyzer, evaluator, Box::new(feedback));

    // Keep the connection alive for the life of the engine.
    let _connection = match dbus_interface::serve(handle.clone(), config.session_bus).await {
        Ok(conn) => {
            tracing::info!(name = dbus_interface::BUS_NAME, "D-Bus interface registered");
            tokio::spawn(dbus_interface::forward_feedback(conn.clone(), events));
            Some(conn)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; feedback is log-only");
            tokio::spawn(dbus_interface::log_feedback(events));
            None
        }
    };

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("facegated shutting down");
            shutdown.shutdown().await;
        }
    });
    drop(handle);

    engine.run().await;
    Ok(())
}
