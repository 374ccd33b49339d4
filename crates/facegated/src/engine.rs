//! Recognition engine.
//!
//! One cooperative loop owns every piece of cross-cycle state: the capture
//! lifecycle manager, the debouncer and the face analyzer. It multiplexes the
//! periodic recognition trigger, the independent capture watchdog, the one
//! in-flight evaluation, the live decision's expiry and operator commands.
//! Nothing here runs in parallel; the analyzer is moved into the in-flight
//! evaluation and handed back when it completes.

use crate::config::Config;
use crate::debouncer::DecisionDebouncer;
use crate::feedback::{Feedback, FeedbackStatus, FeedbackSurface};
use chrono::{DateTime, Utc};
use facegate_core::{DenyReason, DetectorAdapter, Evaluation, FaceAnalyzer, MatchEvaluator};
use facegate_hw::{
    CaptureDevice, CaptureError, CaptureLifecycleManager, Frame, FrameVerdict, HealthCheck,
    QualityGate,
};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("engine loop exited")]
    ChannelClosed,
}

/// Messages sent from the control surface to the engine loop.
enum EngineCommand {
    Dismiss(oneshot::Sender<bool>),
    RestartCapture(oneshot::Sender<Result<(), CaptureError>>),
    Status(oneshot::Sender<StatusReport>),
    Shutdown,
}

/// Clone-safe handle to the engine loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Clear the live decision. Returns whether one was showing.
    pub async fn dismiss(&self) -> Result<bool, EngineError> {
        self.request(EngineCommand::Dismiss).await
    }

    /// Stop the camera stream and acquire it again.
    pub async fn restart_capture(&self) -> Result<(), EngineError> {
        self.request(EngineCommand::RestartCapture).await?.map_err(EngineError::from)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(EngineCommand::Status).await
    }

    /// Ask the loop to exit. Returns immediately if it already has.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub active: bool,
    pub ms_since_last_frame: Option<u64>,
    pub consecutive_stall_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveDecisionStatus {
    pub status: FeedbackStatus,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub expires_in_ms: u64,
}

/// Snapshot served by `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub capture: CaptureStatus,
    pub enrolled_entries: usize,
    pub enrolled_names: Vec<String>,
    pub debouncer: &'static str,
    pub live_decision: Option<LiveDecisionStatus>,
    pub cycles_evaluated: u64,
    pub warnings: Vec<String>,
}

type InFlight<A> = Pin<Box<dyn Future<Output = (A, Evaluation)>>>;

pub struct Engine<D: CaptureDevice, A: FaceAnalyzer> {
    capture: CaptureLifecycleManager<D>,
    /// `None` while an evaluation is in flight.
    analyzer: Option<A>,
    adapter: DetectorAdapter,
    evaluator: MatchEvaluator,
    gate: QualityGate,
    debouncer: DecisionDebouncer,
    feedback: Box<dyn FeedbackSurface>,
    tick: Duration,
    health_check: Duration,
    cycles_evaluated: u64,
    capture_warning: Option<String>,
    enrollment_warning: Option<String>,
    commands: mpsc::Receiver<EngineCommand>,
}

impl<D, A> Engine<D, A>
where
    D: CaptureDevice,
    A: FaceAnalyzer + 'static,
{
    pub fn new(
        config: &Config,
        capture: CaptureLifecycleManager<D>,
        analyzer: A,
        evaluator: MatchEvaluator,
        feedback: Box<dyn FeedbackSurface>,
    ) -> (Self, EngineHandle) {
        let (tx, commands) = mpsc::channel(8);
        let engine = Self {
            capture,
            analyzer: Some(analyzer),
            adapter: DetectorAdapter::default(),
            evaluator,
            gate: config.quality_gate(),
            debouncer: DecisionDebouncer::new(config.debouncer()),
            feedback,
            tick: Duration::from_millis(config.tick_ms.max(1)),
            health_check: Duration::from_millis(config.health_check_ms.max(1)),
            cycles_evaluated: 0,
            capture_warning: None,
            enrollment_warning: None,
            commands,
        };
        (engine, EngineHandle { tx })
    }

    /// Run until shutdown is requested or every handle is dropped.
    ///
    /// On exit the in-flight evaluation is cancelled, both timers are dropped
    /// and the camera is released, whatever state the debouncer was in.
    pub async fn run(mut self) {
        tracing::info!(
            enrolled = self.evaluator.repository().len(),
            tick_ms = self.tick.as_millis() as u64,
            health_check_ms = self.health_check.as_millis() as u64,
            "engine starting"
        );

        if self.evaluator.repository().is_empty() {
            let message = "no enrolled identities; every face will be denied".to_string();
            self.feedback.warn(&message);
            self.enrollment_warning = Some(message);
        }
        self.start_capture().await;

        let mut trigger = time::interval(self.tick);
        trigger.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut watchdog = time::interval_at(Instant::now() + self.health_check, self.health_check);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<InFlight<A>> = None;

        loop {
            let expiry = self.debouncer.expires_at();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                (analyzer, evaluation) = poll_in_flight(&mut in_flight) => {
                    in_flight = None;
                    self.analyzer = Some(analyzer);
                    self.finish_cycle(evaluation, Instant::now());
                }
                _ = time::sleep_until(expiry.unwrap_or_else(Instant::now)), if expiry.is_some() => {
                    self.expire(Instant::now());
                }
                _ = watchdog.tick() => {
                    self.watchdog(Instant::now()).await;
                }
                _ = trigger.tick() => {
                    if in_flight.is_none() {
                        in_flight = self.on_trigger(Instant::now());
                    }
                }
            }
        }

        if in_flight.take().is_some() {
            tracing::debug!("cancelling in-flight evaluation");
            self.debouncer.cancel();
        }
        if self.debouncer.dismiss().is_some() {
            self.feedback.dismiss();
        }
        self.capture.stop();
        tracing::info!(cycles = self.cycles_evaluated, "engine stopped");
    }

    /// Periodic trigger: gate the current frame and start an evaluation.
    fn on_trigger(&mut self, now: Instant) -> Option<InFlight<A>> {
        if let Err(reason) = self.debouncer.check_ready(now) {
            tracing::trace!(?reason, "trigger dropped");
            return None;
        }

        let Some(frame) = self.capture.current_frame() else {
            tracing::trace!("no frame available");
            return None;
        };
        let (width, height) = self.capture.reported_dimensions();
        match self.gate.inspect(&frame, width, height) {
            FrameVerdict::Usable(stats) => {
                tracing::trace!(mean = stats.mean, variance = stats.variance, "frame usable")
            }
            verdict => {
                tracing::debug!(?verdict, seq = frame.sequence, "frame rejected by quality gate");
                return None;
            }
        }

        self.debouncer.begin(now).ok()?;

        if self.evaluator.repository().is_empty() {
            self.finish_cycle(Evaluation::denied(DenyReason::NoEnrollment), now);
            return None;
        }

        let Some(analyzer) = self.analyzer.take() else {
            self.debouncer.cancel();
            return None;
        };
        Some(Box::pin(run_cycle(
            analyzer,
            self.adapter.clone(),
            self.evaluator.clone(),
            frame,
        )))
    }

    fn finish_cycle(&mut self, evaluation: Evaluation, now: Instant) {
        self.cycles_evaluated += 1;

        match &evaluation.result {
            Some(result) => tracing::info!(
                decision = %evaluation.decision.display_text(),
                best_name = %result.best_name,
                distance = result.best_distance,
                similarity = result.best_similarity(),
                "cycle evaluated"
            ),
            None => tracing::debug!(decision = %evaluation.decision.display_text(), "cycle evaluated"),
        }

        if let Some(live) = self.debouncer.complete(evaluation.decision, now) {
            let feedback = Feedback::for_decision(&live.decision, live.lifetime());
            self.feedback.show(&feedback);
        }
    }

    fn expire(&mut self, now: Instant) {
        if let Some(cleared) = self.debouncer.expire(now) {
            tracing::debug!(decision = %cleared.decision.display_text(), "decision expired");
            self.feedback.dismiss();
        }
    }

    async fn watchdog(&mut self, now: Instant) {
        match self.capture.check_health(now).await {
            HealthCheck::Healthy | HealthCheck::Inactive => {}
            HealthCheck::Recovered(_) => self.clear_capture_warning(),
            HealthCheck::RecoveryFailed(_, err) => self.raise_capture_warning(&err),
        }
    }

    async fn start_capture(&mut self) {
        match self.capture.start(Instant::now()).await {
            Ok(()) => self.clear_capture_warning(),
            Err(err) => self.raise_capture_warning(&err),
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Dismiss(reply) => {
                let dismissed = self.debouncer.dismiss().is_some();
                if dismissed {
                    tracing::info!("decision dismissed by operator");
                    self.feedback.dismiss();
                }
                let _ = reply.send(dismissed);
            }
            EngineCommand::RestartCapture(reply) => {
                let result = self.capture.restart(Instant::now()).await;
                match &result {
                    Ok(()) => self.clear_capture_warning(),
                    Err(err) => self.raise_capture_warning(err),
                }
                let _ = reply.send(result);
            }
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status(Instant::now()));
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn raise_capture_warning(&mut self, err: &CaptureError) {
        let message = format!("camera unavailable: {err}");
        if self.capture_warning.as_deref() != Some(message.as_str()) {
            self.feedback.warn(&message);
            self.capture_warning = Some(message);
        }
    }

    fn clear_capture_warning(&mut self) {
        if self.capture_warning.take().is_some() {
            tracing::info!("camera available again");
        }
    }

    fn status(&self, now: Instant) -> StatusReport {
        let health = self.capture.health();
        let repository = self.evaluator.repository();

        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            capture: CaptureStatus {
                active: health.active,
                ms_since_last_frame: health
                    .last_frame_at
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                consecutive_stall_count: health.consecutive_stall_count,
                last_error: health.last_error.as_ref().map(ToString::to_string),
            },
            enrolled_entries: repository.len(),
            enrolled_names: repository.names().into_iter().map(String::from).collect(),
            debouncer: self.debouncer.state().name(),
            live_decision: self.debouncer.live().map(|live| LiveDecisionStatus {
                status: FeedbackStatus::from(&live.decision),
                text: live.decision.display_text(),
                created_at: live.created_at,
                expires_in_ms: live.expires_at.saturating_duration_since(now).as_millis() as u64,
            }),
            cycles_evaluated: self.cycles_evaluated,
            warnings: self
                .capture_warning
                .iter()
                .chain(self.enrollment_warning.iter())
                .cloned()
                .collect(),
        }
    }
}

/// One evaluation cycle. Detection failures count as "no face".
async fn run_cycle<A: FaceAnalyzer>(
    mut analyzer: A,
    adapter: DetectorAdapter,
    evaluator: MatchEvaluator,
    frame: Arc<Frame>,
) -> (A, Evaluation) {
    let evaluation = match adapter
        .detect(&mut analyzer, &frame.data, frame.width, frame.height)
        .await
    {
        Ok(detection) => {
            tracing::debug!(
                faces = detection.samples.len(),
                tier = ?detection.tier,
                seq = frame.sequence,
                "detection finished"
            );
            evaluator.evaluate(&detection.samples)
        }
        Err(err) => {
            tracing::warn!(error = %err, "detection failed; treating cycle as no face");
            Evaluation::inconclusive()
        }
    };
    (analyzer, evaluation)
}

/// Await the in-flight evaluation, or never resolve when there is none.
async fn poll_in_flight<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackEvent;
    use facegate_core::{
        AnalyzerError, BoundingBox, DetectorConfig, Embedding, EmbeddingRepository,
        EnrolledIdentity, MatchThresholds, EMBEDDING_DIM,
    };
    use facegate_hw::{CaptureConstraints, TrackState, VideoStream};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const W: u32 = 64;
    const H: u32 = 48;

    fn textured_frame() -> Frame {
        let data = (0..H)
            .flat_map(|y| (0..W).map(move |x| ((x + y) * 255 / (W + H)) as u8))
            .collect();
        Frame { data, width: W, height: H, timestamp: std::time::Instant::now(), sequence: 0 }
    }

    fn dark_frame() -> Frame {
        Frame { data: vec![2; (W * H) as usize], ..textured_frame() }
    }

    fn alice_vector() -> Vec<f32> {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[0] = 1.0;
        values
    }

    /// Stream whose sequence advances on every read.
    struct LoopStream {
        frame: Frame,
        sequence: Cell<u32>,
        stops: Rc<Cell<usize>>,
    }

    impl VideoStream for LoopStream {
        fn track_state(&self) -> TrackState {
            TrackState::Live
        }

        fn latest_frame(&self) -> Option<Arc<Frame>> {
            let sequence = self.sequence.get() + 1;
            self.sequence.set(sequence);
            Some(Arc::new(Frame { sequence, ..self.frame.clone() }))
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.frame.width, self.frame.height)
        }

        fn stop(&mut self) {
            self.stops.set(self.stops.get() + 1);
        }
    }

    struct FakeCamera {
        frame: Frame,
        fail: Option<CaptureError>,
        acquisitions: Rc<Cell<usize>>,
        stops: Rc<Cell<usize>>,
    }

    impl CaptureDevice for FakeCamera {
        type Stream = LoopStream;

        async fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<LoopStream, CaptureError> {
            self.acquisitions.set(self.acquisitions.get() + 1);
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            Ok(LoopStream { frame: self.frame.clone(), sequence: Cell::new(0), stops: self.stops.clone() })
        }
    }

    /// Sees the same single face (or none) in every frame.
    struct FakeAnalyzer {
        face: Option<Vec<f32>>,
        fail: bool,
        calls: Rc<Cell<usize>>,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        async fn detect(
            &mut self,
            _frame: &[u8],
            width: u32,
            height: u32,
            _config: &DetectorConfig,
        ) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(AnalyzerError::Remote("model crashed".into()));
            }
            Ok(self
                .face
                .iter()
                .map(|_| BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        async fn embed(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Vec<f32>, AnalyzerError> {
            Ok(self.face.clone().unwrap_or_default())
        }
    }

    struct RecordingFeedback {
        events: Rc<RefCell<Vec<FeedbackEvent>>>,
    }

    impl FeedbackSurface for RecordingFeedback {
        fn show(&mut self, feedback: &Feedback) {
            self.events.borrow_mut().push(FeedbackEvent::Show(feedback.clone()));
        }

        fn dismiss(&mut self) {
            self.events.borrow_mut().push(FeedbackEvent::Dismiss);
        }

        fn warn(&mut self, message: &str) {
            self.events.borrow_mut().push(FeedbackEvent::Warning(message.to_string()));
        }
    }

    struct Harness {
        engine: Engine<FakeCamera, FakeAnalyzer>,
        handle: EngineHandle,
        events: Rc<RefCell<Vec<FeedbackEvent>>>,
        analyzer_calls: Rc<Cell<usize>>,
        acquisitions: Rc<Cell<usize>>,
        stops: Rc<Cell<usize>>,
    }

    struct Setup {
        frame: Frame,
        camera_error: Option<CaptureError>,
        face: Option<Vec<f32>>,
        analyzer_fails: bool,
        enrolled: Vec<(&'static str, Vec<f32>)>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                frame: textured_frame(),
                camera_error: None,
                face: Some(alice_vector()),
                analyzer_fails: false,
                enrolled: vec![("Alice", alice_vector())],
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let config = Config::default();
        let acquisitions = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));
        let analyzer_calls = Rc::new(Cell::new(0));
        let events = Rc::new(RefCell::new(Vec::new()));

        let camera = FakeCamera {
            frame: setup.frame,
            fail: setup.camera_error,
            acquisitions: acquisitions.clone(),
            stops: stops.clone(),
        };
        let capture = CaptureLifecycleManager::new(
            camera,
            config.capture_constraints(),
            Duration::from_millis(config.stall_timeout_ms),
        );
        let analyzer = FakeAnalyzer {
            face: setup.face,
            fail: setup.analyzer_fails,
            calls: analyzer_calls.clone(),
        };
        let repository: EmbeddingRepository = setup
            .enrolled
            .into_iter()
            .map(|(name, values)| EnrolledIdentity {
                name: name.to_string(),
                embedding: Embedding::new(values).unwrap(),
            })
            .collect();
        let evaluator = MatchEvaluator::new(Arc::new(repository), MatchThresholds::default());
        let feedback = Box::new(RecordingFeedback { events: events.clone() });

        let (engine, handle) = Engine::new(&config, capture, analyzer, evaluator, feedback);
        Harness { engine, handle, events, analyzer_calls, acquisitions, stops }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_granted_decision_shows_then_expires() {
        let Harness { engine, handle, events, stops, .. } = harness(Setup::default());

        let driver = async {
            time::sleep(ms(100)).await;
            let status = handle.status().await.unwrap();
            assert_eq!(status.debouncer, "displaying");
            assert_eq!(status.cycles_evaluated, 1);
            let live = status.live_decision.unwrap();
            assert_eq!(live.status, FeedbackStatus::Granted);
            assert_eq!(live.text, "Access granted: Alice");
            assert_eq!(live.expires_in_ms, 4900);

            // Triggers during the display window are dropped.
            time::sleep(ms(3000)).await;
            assert_eq!(handle.status().await.unwrap().cycles_evaluated, 1);

            time::sleep(ms(2000)).await;
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        let events = events.borrow();
        assert_eq!(
            events[0],
            FeedbackEvent::Show(Feedback {
                status: FeedbackStatus::Granted,
                display_text: "Access granted: Alice".into(),
                auto_expire_after_ms: 5000,
            })
        );
        assert_eq!(events[1], FeedbackEvent::Dismiss);
        assert_eq!(stops.get(), 1, "camera released on shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_occluded_frames_never_reach_detector() {
        let Harness { engine, handle, events, analyzer_calls, .. } =
            harness(Setup { frame: dark_frame(), ..Setup::default() });

        let driver = async {
            time::sleep(ms(3500)).await;
            let status = handle.status().await.unwrap();
            assert_eq!(status.debouncer, "idle");
            assert_eq!(status.cycles_evaluated, 0);
            assert!(status.live_decision.is_none());
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(analyzer_calls.get(), 0);
        assert!(events.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_repository_denies_without_detection() {
        let Harness { engine, handle, events, analyzer_calls, .. } =
            harness(Setup { enrolled: vec![], ..Setup::default() });

        let driver = async {
            time::sleep(ms(100)).await;
            let status = handle.status().await.unwrap();
            assert_eq!(status.enrolled_entries, 0);
            assert_eq!(status.warnings.len(), 1);
            assert_eq!(
                status.live_decision.unwrap().text,
                "Access denied: no enrolled identities"
            );

            time::sleep(ms(12_000)).await;
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(analyzer_calls.get(), 0);
        let events = events.borrow();
        let warnings = events.iter().filter(|e| matches!(e, FeedbackEvent::Warning(_))).count();
        assert_eq!(warnings, 1, "no-enrollment warning is surfaced once");
        assert!(events.len() > 3, "loop keeps running and denying");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_failure_is_silent_no_face() {
        let Harness { engine, handle, events, analyzer_calls, .. } =
            harness(Setup { analyzer_fails: true, ..Setup::default() });

        let driver = async {
            time::sleep(ms(2500)).await;
            let status = handle.status().await.unwrap();
            assert_eq!(status.cycles_evaluated, 3);
            assert_eq!(status.debouncer, "idle");
            assert!(status.warnings.is_empty());
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(analyzer_calls.get(), 3);
        assert!(events.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_face_escalates_through_every_tier() {
        let Harness { engine, handle, analyzer_calls, .. } =
            harness(Setup { face: None, ..Setup::default() });

        let driver = async {
            time::sleep(ms(100)).await;
            assert_eq!(handle.status().await.unwrap().debouncer, "idle");
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(analyzer_calls.get(), facegate_core::DEFAULT_TIERS.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_dismiss() {
        let Harness { engine, handle, events, .. } = harness(Setup::default());

        let driver = async {
            time::sleep(ms(100)).await;
            assert!(handle.dismiss().await.unwrap());
            assert_eq!(handle.status().await.unwrap().debouncer, "idle");
            assert!(!handle.dismiss().await.unwrap());
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], FeedbackEvent::Dismiss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_error_reported_not_retried() {
        let Harness { engine, handle, events, analyzer_calls, acquisitions, .. } = harness(Setup {
            camera_error: Some(CaptureError::PermissionDenied("/dev/video0".into())),
            ..Setup::default()
        });

        let driver = async {
            time::sleep(ms(4500)).await;
            let status = handle.status().await.unwrap();
            assert!(!status.capture.active);
            assert_eq!(
                status.capture.last_error.as_deref(),
                Some("camera permission denied: /dev/video0")
            );
            assert_eq!(status.warnings, vec!["camera unavailable: camera permission denied: /dev/video0"]);
            assert_eq!(acquisitions.get(), 1, "watchdog does not retry acquisition errors");

            let err = handle.restart_capture().await.unwrap_err();
            assert!(matches!(err, EngineError::Capture(CaptureError::PermissionDenied(_))));
            assert_eq!(acquisitions.get(), 2);
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(analyzer_calls.get(), 0);
        let warnings = events.borrow().iter().filter(|e| matches!(e, FeedbackEvent::Warning(_))).count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_capture_reacquires() {
        let Harness { engine, handle, acquisitions, stops, .. } = harness(Setup::default());

        let driver = async {
            time::sleep(ms(100)).await;
            handle.restart_capture().await.unwrap();
            assert_eq!(acquisitions.get(), 2);
            assert_eq!(stops.get(), 1);
            assert!(handle.status().await.unwrap().capture.active);
            handle.shutdown().await;
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(stops.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_errors_after_engine_exit() {
        let Harness { engine, handle, .. } = harness(Setup::default());
        handle.shutdown().await;
        engine.run().await;
        assert!(matches!(handle.status().await, Err(EngineError::ChannelClosed)));
    }
}
