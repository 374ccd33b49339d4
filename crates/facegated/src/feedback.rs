//! Feedback surface: where live decisions and persistent warnings go.

use facegate_core::AccessDecision;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Granted,
    Denied,
    Inconclusive,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Granted => "granted",
            FeedbackStatus::Denied => "denied",
            FeedbackStatus::Inconclusive => "inconclusive",
        }
    }
}

impl From<&AccessDecision> for FeedbackStatus {
    fn from(decision: &AccessDecision) -> Self {
        match decision {
            AccessDecision::Granted(_) => FeedbackStatus::Granted,
            AccessDecision::Denied(_) => FeedbackStatus::Denied,
            AccessDecision::Inconclusive => FeedbackStatus::Inconclusive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub status: FeedbackStatus,
    pub display_text: String,
    pub auto_expire_after_ms: u64,
}

impl Feedback {
    pub fn for_decision(decision: &AccessDecision, lifetime: Duration) -> Self {
        Self {
            status: decision.into(),
            display_text: decision.display_text(),
            auto_expire_after_ms: lifetime.as_millis() as u64,
        }
    }
}

pub trait FeedbackSurface {
    fn show(&mut self, feedback: &Feedback);
    fn dismiss(&mut self);
    /// Persistent, operator-visible warning (capture error, no enrollment).
    fn warn(&mut self, message: &str);
}

/// Surface used when no bus is available.
pub struct LogFeedback;

impl FeedbackSurface for LogFeedback {
    fn show(&mut self, feedback: &Feedback) {
        tracing::info!(
            status = feedback.status.as_str(),
            text = %feedback.display_text,
            expire_ms = feedback.auto_expire_after_ms,
            "decision"
        );
    }

    fn dismiss(&mut self) {
        tracing::info!("decision cleared");
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!(message, "operator warning");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    Show(Feedback),
    Dismiss,
    Warning(String),
}

impl FeedbackEvent {
    /// Replay this event onto another surface.
    pub fn apply_to(&self, surface: &mut dyn FeedbackSurface) {
        match self {
            FeedbackEvent::Show(feedback) => surface.show(feedback),
            FeedbackEvent::Dismiss => surface.dismiss(),
            FeedbackEvent::Warning(message) => surface.warn(message),
        }
    }
}

/// Forwards events to an async consumer (the D-Bus signal task).
pub struct ChannelFeedback {
    tx: mpsc::UnboundedSender<FeedbackEvent>,
}

impl ChannelFeedback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedbackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: FeedbackEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("feedback consumer gone; event dropped");
        }
    }
}

impl FeedbackSurface for ChannelFeedback {
    fn show(&mut self, feedback: &Feedback) {
        self.send(FeedbackEvent::Show(feedback.clone()));
    }

    fn dismiss(&mut self) {
        self.send(FeedbackEvent::Dismiss);
    }

    fn warn(&mut self, message: &str) {
        self.send(FeedbackEvent::Warning(message.to_string()));
    }
}
