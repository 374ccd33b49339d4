//! Decision debouncer: `Idle → Evaluating → Displaying → Idle`.
//!
//! Owns the single live decision. Evaluations are serialized through the
//! `Evaluating` state, and a completed decision is shown for a fixed
//! lifetime before the state falls back to `Idle`.

use chrono::{DateTime, Utc};
use facegate_core::AccessDecision;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncerConfig {
    /// Minimum time between the end of one evaluation and the start of the next.
    pub min_cycle_spacing: Duration,
    /// How long a decision stays live.
    pub display_for: Duration,
    /// When false, `Inconclusive` cycles return straight to `Idle`.
    pub show_inconclusive: bool,
}

impl Default for DebouncerConfig {
    fn default() -> Self {
        Self {
            min_cycle_spacing: Duration::from_millis(500),
            display_for: Duration::from_millis(5000),
            show_inconclusive: false,
        }
    }
}

/// The decision currently visible to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDecision {
    pub decision: AccessDecision,
    pub created_at: DateTime<Utc>,
    pub shown_at: Instant,
    pub expires_at: Instant,
}

impl LiveDecision {
    pub fn lifetime(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.shown_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebouncerState {
    Idle,
    Evaluating { started_at: Instant },
    Displaying(LiveDecision),
}

impl DebouncerState {
    pub fn name(&self) -> &'static str {
        match self {
            DebouncerState::Idle => "idle",
            DebouncerState::Evaluating { .. } => "evaluating",
            DebouncerState::Displaying(_) => "displaying",
        }
    }
}

/// Why a trigger was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    Evaluating,
    Displaying,
    Cooldown { remaining: Duration },
}

pub struct DecisionDebouncer {
    config: DebouncerConfig,
    state: DebouncerState,
    last_completed: Option<Instant>,
}

impl DecisionDebouncer {
    pub fn new(config: DebouncerConfig) -> Self {
        Self { config, state: DebouncerState::Idle, last_completed: None }
    }

    pub fn state(&self) -> &DebouncerState {
        &self.state
    }

    pub fn live(&self) -> Option<&LiveDecision> {
        match &self.state {
            DebouncerState::Displaying(live) => Some(live),
            _ => None,
        }
    }

    /// Deadline of the live decision, if one is showing.
    pub fn expires_at(&self) -> Option<Instant> {
        self.live().map(|live| live.expires_at)
    }

    /// Whether a trigger at `now` may start an evaluation.
    pub fn check_ready(&self, now: Instant) -> Result<(), NotReady> {
        match self.state {
            DebouncerState::Evaluating { .. } => return Err(NotReady::Evaluating),
            DebouncerState::Displaying(_) => return Err(NotReady::Displaying),
            DebouncerState::Idle => {}
        }
        if let Some(last) = self.last_completed {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_cycle_spacing {
                return Err(NotReady::Cooldown { remaining: self.config.min_cycle_spacing - elapsed });
            }
        }
        Ok(())
    }

    /// Enter `Evaluating`. Fails, leaving the state untouched, when not ready.
    pub fn begin(&mut self, now: Instant) -> Result<(), NotReady> {
        self.check_ready(now)?;
        self.state = DebouncerState::Evaluating { started_at: now };
        Ok(())
    }

    /// Abandon an evaluation without recording a decision.
    pub fn cancel(&mut self) {
        if matches!(self.state, DebouncerState::Evaluating { .. }) {
            self.state = DebouncerState::Idle;
        }
    }

    /// Record the outcome of an evaluation.
    ///
    /// The new decision replaces whatever was live. Returns the decision now
    /// showing, or `None` when it was an unshown `Inconclusive`.
    pub fn complete(&mut self, decision: AccessDecision, now: Instant) -> Option<&LiveDecision> {
        self.last_completed = Some(now);

        if decision == AccessDecision::Inconclusive && !self.config.show_inconclusive {
            self.state = DebouncerState::Idle;
            return None;
        }

        self.state = DebouncerState::Displaying(LiveDecision {
            decision,
            created_at: Utc::now(),
            shown_at: now,
            expires_at: now + self.config.display_for,
        });
        self.live()
    }

    /// Clear the live decision once its lifetime has elapsed.
    pub fn expire(&mut self, now: Instant) -> Option<LiveDecision> {
        match self.expires_at() {
            Some(deadline) if now >= deadline => self.clear(),
            _ => None,
        }
    }

    /// Manual dismiss: clear the live decision immediately.
    pub fn dismiss(&mut self) -> Option<LiveDecision> {
        self.clear()
    }

    fn clear(&mut self) -> Option<LiveDecision> {
        match std::mem::replace(&mut self.state, DebouncerState::Idle) {
            DebouncerState::Displaying(live) => Some(live),
            other => {
                self.state = other;
                None
            }
        }
    }
}
