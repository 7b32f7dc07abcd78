//! Error types for the XR presentation core.
//!
//! Setup-time failures (negotiation, swapchain and space creation, session
//! begin) are fatal and terminate the run. Per-frame failures split into
//! transient ones ([`XrError::is_transient`]) that degrade to an empty layer
//! submission, and runtime call failures that propagate.

use thiserror::Error;

use crate::vr::graphics::{GraphicsApi, TextureViewId};
use crate::vr::types::{SessionHandle, ViewConfigurationType, XrTime};

/// Raw runtime result codes the core itself produces or inspects.
pub mod codes {
    pub const ERROR_RUNTIME_FAILURE: i32 = -2;
    pub const ERROR_HANDLE_INVALID: i32 = -12;
    pub const ERROR_SESSION_RUNNING: i32 = -14;
    pub const ERROR_SESSION_NOT_RUNNING: i32 = -16;
    pub const ERROR_LAYER_INVALID: i32 = -23;
    pub const ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED: i32 = -26;
    pub const ERROR_TIME_INVALID: i32 = -30;
    pub const ERROR_CALL_ORDER_INVALID: i32 = -37;
}

/// Startup negotiation against what the runtime advertises.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no supported color swapchain format among {offered} runtime format(s)")]
    NoColorFormat { offered: usize },

    #[error("no supported depth swapchain format among {offered} runtime format(s)")]
    NoDepthFormat { offered: usize },

    #[error("view configuration {0} reports no views")]
    NoViews(ViewConfigurationType),
}

/// Failures raised by the graphics capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    #[error("native texture format {0} is not supported by the graphics backend")]
    UnsupportedFormat(i64),

    #[error("texture view {0:?} is not alive")]
    UnknownView(TextureViewId),

    #[error("graphics backend: {0}")]
    Backend(String),

    #[error("configured for {configured:?} but the graphics backend is {backend:?}")]
    ApiMismatch {
        configured: GraphicsApi,
        backend: GraphicsApi,
    },
}

#[derive(Debug, Error)]
pub enum XrError {
    #[error("XR negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// A mandatory runtime call returned a non-success code.
    #[error("XR: {call} failed: {message} ({code})")]
    RuntimeCall {
        call: &'static str,
        code: i32,
        message: String,
    },

    /// Poses for the frame could not be resolved. Skips the frame's layers only.
    #[error("XR: failed to locate views at {time}: {reason}")]
    PoseLocation { time: XrTime, reason: String },

    #[error("XR: event for session {event:?} ignored, active session is {active:?}")]
    StaleSessionEvent {
        event: SessionHandle,
        active: SessionHandle,
    },

    #[error("XR graphics: {0}")]
    Graphics(#[from] GraphicsError),

    /// A per-view step was issued out of order.
    #[error("XR: view {view}: {op} is not allowed in phase {phase}")]
    ViewProtocol {
        view: usize,
        op: &'static str,
        phase: &'static str,
    },
}

impl XrError {
    pub fn runtime_call(call: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::RuntimeCall {
            call,
            code,
            message: message.into(),
        }
    }

    /// Errors the frame loop absorbs without tearing down the run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoseLocation { .. } | Self::StaleSessionEvent { .. })
    }
}

pub type Result<T> = std::result::Result<T, XrError>;
