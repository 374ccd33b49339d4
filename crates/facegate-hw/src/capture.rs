//! Capture lifecycle: owns the single camera stream and heals it.
//!
//! Acquisition failures (`CaptureError`) need user or OS action and are
//! reported, not retried. Stalls (track ended, paused, frozen sequence) are
//! transient: the manager tears the stream down and re-acquires on the next
//! health check.

use crate::frame::Frame;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("no capture device: {0}")]
    NoDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Requested stream shape. Video only; there is never an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self { width: 1280, height: 720, frame_rate: 30 }
    }
}

/// Ready state of the underlying video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Live,
    Paused,
    Ended,
}

/// Why a running stream was judged unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStall {
    TrackEnded,
    Paused,
    /// No new frame sequence for at least this long.
    Frozen(Duration),
}

/// A live stream bound to the video sink.
pub trait VideoStream {
    fn track_state(&self) -> TrackState;

    /// Most recent frame, or `None` before the first frame arrives.
    fn latest_frame(&self) -> Option<Arc<Frame>>;

    /// Negotiated dimensions; `(0, 0)` until the stream has warmed up.
    fn dimensions(&self) -> (u32, u32);

    /// Ask every track to stop and release the device. Idempotent and
    /// non-blocking: the device may be released shortly after this returns.
    fn stop(&mut self);
}

/// Something that can hand out a camera stream.
#[allow(async_fn_in_trait)]
pub trait CaptureDevice {
    type Stream: VideoStream;

    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Self::Stream, CaptureError>;
}

/// Liveness bookkeeping, mutated only by the manager.
#[derive(Debug, Clone, Default)]
pub struct CaptureHealth {
    pub active: bool,
    pub last_frame_at: Option<Instant>,
    pub consecutive_stall_count: u32,
    pub last_error: Option<CaptureError>,
}

/// Result of one watchdog pass.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthCheck {
    Healthy,
    /// No stream is held and none is owed: never acquired, stopped by the
    /// operator, or the initial acquisition failed.
    Inactive,
    Recovered(CaptureStall),
    RecoveryFailed(CaptureStall, CaptureError),
}

pub struct CaptureLifecycleManager<D: CaptureDevice> {
    device: D,
    constraints: CaptureConstraints,
    stall_timeout: Duration,
    stream: Option<D::Stream>,
    health: CaptureHealth,
    last_sequence: Option<u32>,
    /// Stall whose re-acquisition failed; retried on every watchdog pass.
    pending_recovery: Option<CaptureStall>,
}

impl<D: CaptureDevice> CaptureLifecycleManager<D> {
    pub fn new(device: D, constraints: CaptureConstraints, stall_timeout: Duration) -> Self {
        Self {
            device,
            constraints,
            stall_timeout,
            stream: None,
            health: CaptureHealth::default(),
            last_sequence: None,
            pending_recovery: None,
        }
    }

    pub fn health(&self) -> &CaptureHealth {
        &self.health
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire a stream, stopping any previous one first.
    pub async fn start(&mut self, now: Instant) -> Result<(), CaptureError> {
        self.release();

        match self.device.acquire(&self.constraints).await {
            Ok(stream) => {
                let (width, height) = stream.dimensions();
                tracing::info!(
                    width,
                    height,
                    requested_width = self.constraints.width,
                    requested_height = self.constraints.height,
                    frame_rate = self.constraints.frame_rate,
                    "capture stream acquired"
                );
                self.stream = Some(stream);
                self.pending_recovery = None;
                self.health.active = true;
                self.health.last_frame_at = Some(now);
                self.health.last_error = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "camera acquisition failed");
                self.health.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Operator restart: full teardown, then a fresh acquisition.
    pub async fn restart(&mut self, now: Instant) -> Result<(), CaptureError> {
        tracing::info!("capture restart requested");
        self.health.consecutive_stall_count = 0;
        self.pending_recovery = None;
        self.start(now).await
    }

    /// Stop all tracks and detach the sink. Cancels any pending recovery.
    pub fn stop(&mut self) {
        self.pending_recovery = None;
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("capture stream stopped");
        }
        self.health.active = false;
        self.last_sequence = None;
    }

    /// Current frame for the recognition loop.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.stream.as_ref().and_then(|s| s.latest_frame())
    }

    /// Dimensions the sink reports; zero until a frame has arrived.
    pub fn reported_dimensions(&self) -> (u32, u32) {
        match &self.stream {
            Some(stream) if stream.latest_frame().is_some() => stream.dimensions(),
            _ => (0, 0),
        }
    }

    /// Watchdog pass: detect a dead or stalled stream and re-acquire.
    ///
    /// A failed re-acquisition is retried on later passes until it succeeds
    /// or the operator stops or restarts capture.
    pub async fn check_health(&mut self, now: Instant) -> HealthCheck {
        let stall = match (self.detect_stall(now), self.pending_recovery) {
            (Some(stall), _) => {
                self.health.consecutive_stall_count += 1;
                tracing::warn!(
                    ?stall,
                    consecutive = self.health.consecutive_stall_count,
                    "capture stalled; re-acquiring"
                );
                stall
            }
            (None, Some(stall)) if self.stream.is_none() => {
                tracing::debug!(?stall, "retrying capture recovery");
                stall
            }
            (None, _) => {
                return if self.stream.is_some() { HealthCheck::Healthy } else { HealthCheck::Inactive };
            }
        };

        match self.start(now).await {
            Ok(()) => {
                tracing::info!("capture recovered");
                HealthCheck::Recovered(stall)
            }
            Err(err) => {
                self.pending_recovery = Some(stall);
                HealthCheck::RecoveryFailed(stall, err)
            }
        }
    }

    fn detect_stall(&mut self, now: Instant) -> Option<CaptureStall> {
        let stream = self.stream.as_ref()?;

        match stream.track_state() {
            TrackState::Ended => return Some(CaptureStall::TrackEnded),
            TrackState::Paused => return Some(CaptureStall::Paused),
            TrackState::Live => {}
        }

        let sequence = stream.latest_frame().map(|f| f.sequence);
        if sequence.is_some() && sequence != self.last_sequence {
            self.last_sequence = sequence;
            self.health.last_frame_at = Some(now);
            self.health.consecutive_stall_count = 0;
            return None;
        }

        let since = self.health.last_frame_at.map(|t| now.saturating_duration_since(t))?;
        (since >= self.stall_timeout).then_some(CaptureStall::Frozen(since))
    }
}

impl<D: CaptureDevice> Drop for CaptureLifecycleManager<D> {
    fn drop(&mut self) {
        self.stop();
    }
}
