//! The XR runtime as seen by the presentation core.
//!
//! Instance creation, extension selection and graphics binding happen before
//! a value implementing [`XrRuntime`] exists. Everything after that (event
//! delivery, session begin/end, swapchains, spaces and the frame calls) goes
//! through this trait so the core can be driven by a real OpenXR runtime or
//! by the simulated one in `backend::headless`.

use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;
use crate::vr::session::SessionState;
use crate::vr::types::{
    EnvironmentBlendMode, Fov, FrameState, LocatedViews, NativeImage, Pose, Rect2D,
    ReferenceSpaceType, SessionHandle, SpaceHandle, SwapchainHandle, ViewConfigurationType,
    ViewConfigurationView, XrTime,
};

/// Timeout for swapchain image waits. The compositor guarantees completion.
pub const INFINITE_TIMEOUT: Duration = Duration::MAX;

// ── Events ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    EventsLost {
        lost_event_count: u32,
    },
    InstanceLossPending {
        loss_time: XrTime,
    },
    InteractionProfileChanged {
        session: SessionHandle,
    },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        change_time: XrTime,
    },
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: XrTime,
    },
}

impl RuntimeEvent {
    /// Session the event is addressed to, if any.
    pub fn session(&self) -> Option<SessionHandle> {
        match self {
            Self::EventsLost { .. } | Self::InstanceLossPending { .. } => None,
            Self::InteractionProfileChanged { session }
            | Self::ReferenceSpaceChangePending { session, .. }
            | Self::SessionStateChanged { session, .. } => Some(*session),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::EventsLost { .. } => "events-lost",
            Self::InstanceLossPending { .. } => "instance-loss-pending",
            Self::InteractionProfileChanged { .. } => "interaction-profile-changed",
            Self::ReferenceSpaceChangePending { .. } => "reference-space-change-pending",
            Self::SessionStateChanged { .. } => "session-state-changed",
        }
    }
}

// ── Swapchains ──────────────────────────────────────────────

/// Color swapchains are created as color-attachment + sampled, depth ones as
/// depth-stencil-attachment + sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainUsage {
    Color,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsage,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

impl SwapchainCreateInfo {
    pub fn new(usage: SwapchainUsage, format: i64, width: u32, height: u32, sample_count: u32) -> Self {
        Self {
            usage,
            format,
            sample_count,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }
}

// ── Composition layers ──────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LayerFlags: u32 {
        const CORRECT_CHROMATIC_ABERRATION = 0x1;
        const BLEND_TEXTURE_SOURCE_ALPHA = 0x2;
        const UNPREMULTIPLIED_ALPHA = 0x4;
    }
}

/// One eye's contribution to a projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub flags: LayerFlags,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    Projection(ProjectionLayer),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameEndInfo<'a> {
    pub display_time: XrTime,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: &'a [CompositionLayer],
}

// ── Runtime ─────────────────────────────────────────────────

pub trait XrRuntime {
    /// The session this runtime object drives.
    fn session(&self) -> SessionHandle;

    /// Next queued event, never blocking.
    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>>;

    fn enumerate_view_configurations(&self) -> Result<Vec<ViewConfigurationType>>;

    fn enumerate_view_configuration_views(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> Result<Vec<ViewConfigurationView>>;

    fn enumerate_environment_blend_modes(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> Result<Vec<EnvironmentBlendMode>>;

    fn begin_session(&mut self, view_configuration: ViewConfigurationType) -> Result<()>;

    fn end_session(&mut self) -> Result<()>;

    fn create_reference_space(
        &mut self,
        space_type: ReferenceSpaceType,
        pose_in_space: Pose,
    ) -> Result<SpaceHandle>;

    fn destroy_space(&mut self, space: SpaceHandle) -> Result<()>;

    /// Supported swapchain formats in the runtime's order of preference.
    fn enumerate_swapchain_formats(&self) -> Result<Vec<i64>>;

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle>;

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> Result<Vec<NativeImage>>;

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<()>;

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<u32>;

    /// Blocks until the acquired image is usable by the GPU.
    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout: Duration) -> Result<()>;

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<()>;

    /// Blocks until the compositor opens the next frame slot.
    fn wait_frame(&mut self) -> Result<FrameState>;

    fn begin_frame(&mut self) -> Result<()>;

    fn end_frame(&mut self, info: &FrameEndInfo<'_>) -> Result<()>;

    fn locate_views(
        &mut self,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> Result<LocatedViews>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_session_addressing() {
        let lost = RuntimeEvent::EventsLost { lost_event_count: 3 };
        assert_eq!(lost.session(), None);

        let changed = RuntimeEvent::SessionStateChanged {
            session: SessionHandle(7),
            state: SessionState::Ready,
            time: XrTime::from_nanos(1),
        };
        assert_eq!(changed.session(), Some(SessionHandle(7)));
        assert_eq!(changed.kind(), "session-state-changed");
    }

    #[test]
    fn test_swapchain_create_info_defaults() {
        let info = SwapchainCreateInfo::new(SwapchainUsage::Color, 37, 1024, 768, 1);
        assert_eq!(info.face_count, 1);
        assert_eq!(info.array_size, 1);
        assert_eq!(info.mip_count, 1);
        assert_eq!((info.width, info.height), (1024, 768));
    }
}
