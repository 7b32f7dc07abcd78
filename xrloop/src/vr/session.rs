//! Session lifecycle: runtime events in, begin/end calls and run flags out.
//!
//! The lifecycle is a pure transition function over [`SessionState`] that
//! returns the side effects to perform; [`SessionStateMachine`] drains the
//! runtime's event queue, filters events addressed to other sessions, and
//! executes those effects against the runtime and the [`SessionContext`].
//!
//! States: UNKNOWN -> IDLE -> READY -> SYNCHRONIZED -> VISIBLE -> FOCUSED
//! -> STOPPING -> EXITING | LOSS_PENDING

use tracing::{debug, error, info, warn};

use crate::error::{Result, XrError};
use crate::vr::runtime::{RuntimeEvent, XrRuntime};
use crate::vr::types::{SessionHandle, ViewConfigurationType};

/// Session state (mirrors the OpenXR session states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss-pending",
            Self::Exiting => "exiting",
        }
    }

    /// States in which frames are composed and may be rendered.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Synchronized | Self::Visible | Self::Focused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exiting | Self::LossPending)
    }
}

// ── Pure transition ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    BeginSession,
    EndSession,
    SetSessionRunning(bool),
    SetApplicationRunning(bool),
    InvalidateReferenceSpace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn stay(state: SessionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }
}

/// Lifecycle step for an event already known to address the active session.
///
/// Terminal states absorb everything. Re-entering the current state and the
/// never-emitted `Unknown` state are no-ops, so a duplicated READY cannot
/// begin the session twice.
pub fn transition(current: SessionState, event: &RuntimeEvent) -> Transition {
    if current.is_terminal() {
        return Transition::stay(current);
    }

    match event {
        RuntimeEvent::EventsLost { .. } | RuntimeEvent::InteractionProfileChanged { .. } => {
            Transition::stay(current)
        }
        RuntimeEvent::ReferenceSpaceChangePending { .. } => Transition {
            next: current,
            effects: vec![SideEffect::InvalidateReferenceSpace],
        },
        RuntimeEvent::InstanceLossPending { .. } => Transition {
            next: SessionState::LossPending,
            effects: vec![
                SideEffect::SetSessionRunning(false),
                SideEffect::SetApplicationRunning(false),
            ],
        },
        RuntimeEvent::SessionStateChanged { state, .. } => {
            let next = *state;
            if next == current || next == SessionState::Unknown {
                return Transition::stay(current);
            }
            let effects = match next {
                SessionState::Ready => {
                    vec![SideEffect::BeginSession, SideEffect::SetSessionRunning(true)]
                }
                SessionState::Stopping => {
                    vec![SideEffect::EndSession, SideEffect::SetSessionRunning(false)]
                }
                SessionState::Exiting | SessionState::LossPending => vec![
                    SideEffect::SetSessionRunning(false),
                    SideEffect::SetApplicationRunning(false),
                ],
                _ => Vec::new(),
            };
            Transition { next, effects }
        }
    }
}

// ── Context ─────────────────────────────────────────────────

/// Single-owner run state shared by the state machine and the frame loop.
#[derive(Debug, Clone)]
pub struct SessionContext {
    state: SessionState,
    session_running: bool,
    application_running: bool,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unknown,
            session_running: false,
            application_running: true,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames may be ticked only while this is set.
    pub fn is_session_running(&self) -> bool {
        self.session_running
    }

    pub fn is_application_running(&self) -> bool {
        self.application_running
    }

    /// Platform-originated shutdown. Takes effect at the next gate check.
    pub fn request_exit(&mut self) {
        if self.application_running {
            info!("XR: application exit requested in state {}", self.state.as_str());
        }
        self.application_running = false;
    }

    pub fn status_sexp(&self) -> String {
        format!(
            "(:state :{} :session-running {} :application-running {})",
            self.state.as_str(),
            if self.session_running { "t" } else { "nil" },
            if self.application_running { "t" } else { "nil" },
        )
    }
}

// ── State machine ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub processed: usize,
    pub discarded: usize,
    pub reference_space_change_pending: bool,
}

pub struct SessionStateMachine {
    session: SessionHandle,
    view_configuration: ViewConfigurationType,
    lost_events: u64,
    stale_events: u64,
}

impl SessionStateMachine {
    pub fn new(session: SessionHandle, view_configuration: ViewConfigurationType) -> Self {
        Self {
            session,
            view_configuration,
            lost_events: 0,
            stale_events: 0,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    /// Total events the runtime reported as dropped from its queue.
    pub fn lost_events(&self) -> u64 {
        self.lost_events
    }

    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }

    /// Drain every queued event without blocking.
    pub fn poll_events(
        &mut self,
        runtime: &mut dyn XrRuntime,
        ctx: &mut SessionContext,
    ) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        while let Some(event) = runtime.poll_event()? {
            match self.handle_event(runtime, ctx, &event) {
                Ok(applied) => {
                    summary.processed += 1;
                    if applied.effects.contains(&SideEffect::InvalidateReferenceSpace) {
                        summary.reference_space_change_pending = true;
                    }
                }
                Err(e @ XrError::StaleSessionEvent { .. }) => {
                    warn!("{}", e);
                    self.stale_events += 1;
                    summary.discarded += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Apply one event. Events for another session are rejected untouched.
    pub fn handle_event(
        &mut self,
        runtime: &mut dyn XrRuntime,
        ctx: &mut SessionContext,
        event: &RuntimeEvent,
    ) -> Result<Transition> {
        if let Some(session) = event.session() {
            if session != self.session {
                return Err(XrError::StaleSessionEvent {
                    event: session,
                    active: self.session,
                });
            }
        }

        match event {
            RuntimeEvent::EventsLost { lost_event_count } => {
                self.lost_events += u64::from(*lost_event_count);
                warn!("XR: runtime dropped {} event(s)", lost_event_count);
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                warn!("XR: instance loss pending at {}", loss_time);
            }
            RuntimeEvent::InteractionProfileChanged { .. } => {
                info!("XR: interaction profile changed");
            }
            RuntimeEvent::ReferenceSpaceChangePending {
                space_type,
                change_time,
                ..
            } => {
                info!(
                    "XR: {} reference space change pending at {}",
                    space_type.as_str(),
                    change_time
                );
            }
            RuntimeEvent::SessionStateChanged { .. } => {}
        }

        let old = ctx.state;
        let step = transition(old, event);

        if old.is_terminal() {
            debug!("XR: {} ignored in terminal state {}", event.kind(), old.as_str());
            return Ok(step);
        }

        for effect in &step.effects {
            self.apply(runtime, ctx, *effect)?;
        }

        if step.next != old {
            info!("XR: session state: {} -> {}", old.as_str(), step.next.as_str());
            ctx.state = step.next;
        }
        Ok(step)
    }

    fn apply(
        &mut self,
        runtime: &mut dyn XrRuntime,
        ctx: &mut SessionContext,
        effect: SideEffect,
    ) -> Result<()> {
        match effect {
            SideEffect::BeginSession => {
                runtime.begin_session(self.view_configuration).map_err(|e| {
                    error!("XR: failed to begin session: {}", e);
                    e
                })?;
                info!("XR: session begun ({})", self.view_configuration);
            }
            SideEffect::EndSession => {
                runtime.end_session().map_err(|e| {
                    error!("XR: failed to end session: {}", e);
                    e
                })?;
                info!("XR: session ended");
            }
            SideEffect::SetSessionRunning(running) => ctx.session_running = running,
            SideEffect::SetApplicationRunning(running) => ctx.application_running = running,
            // Handled by the owner of the reference space, between frames.
            SideEffect::InvalidateReferenceSpace => {}
        }
        Ok(())
    }
}
