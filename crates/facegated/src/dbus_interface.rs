use crate::engine::{EngineError, EngineHandle};
use crate::feedback::{FeedbackEvent, LogFeedback};
use tokio::sync::mpsc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.facegate.Gate1";
pub const OBJECT_PATH: &str = "/org/facegate/Gate1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Gate1
/// Object path: /org/facegate/Gate1
///
/// Methods are operator controls. Signals carry the live decision feedback.
pub struct GateService {
    engine: EngineHandle,
}

impl GateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Capture(e) => zbus::fdo::Error::Failed(e.to_string()),
        EngineError::ChannelClosed => zbus::fdo::Error::Failed("engine is not running".into()),
    }
}

#[interface(name = "org.facegate.Gate1")]
impl GateService {
    /// Clear the visible decision. Returns false when nothing was showing.
    async fn dismiss(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("dismiss requested");
        self.engine.dismiss().await.map_err(to_fdo)
    }

    /// Tear down the camera stream and acquire it again.
    async fn restart_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("camera restart requested");
        self.engine.restart_capture().await.map_err(to_fdo)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(signal)]
    async fn decision(
        emitter: &SignalEmitter<'_>,
        status: &str,
        text: &str,
        expire_ms: u64,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn cleared(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn warning(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;
}

/// Claim the bus name and export the interface.
pub async fn serve(engine: EngineHandle, session_bus: bool) -> zbus::Result<zbus::Connection> {
    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GateService::new(engine))?
        .build()
        .await
}

/// Turn engine feedback events into D-Bus signals, logging each one too.
pub async fn forward_feedback(conn: zbus::Connection, mut events: mpsc::UnboundedReceiver<FeedbackEvent>) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::error!(error = %e, "cannot create signal emitter; feedback is log-only");
            return log_feedback(events).await;
        }
    };

    let mut log = LogFeedback;
    while let Some(event) = events.recv().await {
        event.apply_to(&mut log);
        let sent = match &event {
            FeedbackEvent::Show(fb) => {
                GateService::decision(&emitter, fb.status.as_str(), &fb.display_text, fb.auto_expire_after_ms)
                    .await
            }
            FeedbackEvent::Dismiss => GateService::cleared(&emitter).await,
            FeedbackEvent::Warning(message) => GateService::warning(&emitter, message).await,
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "failed to emit feedback signal");
        }
    }
}

/// Fallback consumer when no bus is available.
pub async fn log_feedback(mut events: mpsc::UnboundedReceiver<FeedbackEvent>) {
    let mut log = LogFeedback;
    while let Some(event) = events.recv().await {
        event.apply_to(&mut log);
    }
}
