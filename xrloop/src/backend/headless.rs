//! Headless backend: a simulated XR runtime for CI and hardware-free runs.
//!
//! The simulated runtime enforces the call-order rules a real compositor
//! enforces (frame wait/begin/end pairing, swapchain acquire/wait/release,
//! session begin/end), records every stateful call, and can run a whole
//! session lifecycle on its own so the binary has something to drive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use glam::Vec3;
use tracing::{debug, info, trace};

use crate::error::{codes, Result, XrError};
use crate::vr::format::{self, TextureFormat};
use crate::vr::graphics::GraphicsApi;
use crate::vr::runtime::{
    CompositionLayer, FrameEndInfo, RuntimeEvent, SwapchainCreateInfo, SwapchainUsage, XrRuntime,
};
use crate::vr::session::SessionState;
use crate::vr::types::{
    EnvironmentBlendMode, Fov, FrameState, LocatedView, LocatedViews, NativeImage, Pose,
    ReferenceSpaceType, SessionHandle, SpaceHandle, SwapchainHandle, ViewConfigurationType,
    ViewConfigurationView, ViewStateFlags, XrTime,
};

pub use crate::backend::recording::{
    CommandLog, GraphicsCommand, RecordingGraphics, RecordingModelRenderer,
};

/// Preference order the simulated runtime advertises formats in.
const ADVERTISED_FORMATS: [TextureFormat; 4] = [
    TextureFormat::D16Unorm,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Bgra8Unorm,
    TextureFormat::D32Float,
];

// ── Configuration ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimulatedRuntimeConfig {
    pub session: SessionHandle,
    pub view_configurations: Vec<ViewConfigurationType>,
    pub blend_modes: Vec<EnvironmentBlendMode>,
    /// Layout reported for the stereo configuration; mono reports the first.
    pub views: Vec<ViewConfigurationView>,
    /// Native codes in runtime preference order.
    pub swapchain_formats: Vec<i64>,
    pub color_image_count: u32,
    pub depth_image_count: u32,
    pub display_period_ns: i64,
    /// Drive Idle/Ready/.../Focused and Stopping/Idle/Exiting automatically.
    pub auto_lifecycle: bool,
    /// Request session exit once this many frames have ended. Zero requests
    /// it as soon as the session begins.
    pub exit_after_frames: Option<u64>,
    /// Frame numbers (counting waits from 1) whose view location fails.
    pub fail_locate_on_frames: Vec<u64>,
    /// Frame numbers whose located poses come back without position validity.
    pub invalid_pose_on_frames: Vec<u64>,
    pub ipd: f32,
}

impl Default for SimulatedRuntimeConfig {
    fn default() -> Self {
        Self::for_api(GraphicsApi::Vulkan)
    }
}

impl SimulatedRuntimeConfig {
    pub fn for_api(api: GraphicsApi) -> Self {
        Self {
            session: SessionHandle(1),
            view_configurations: vec![
                ViewConfigurationType::PrimaryStereo,
                ViewConfigurationType::PrimaryMono,
            ],
            blend_modes: vec![EnvironmentBlendMode::Opaque, EnvironmentBlendMode::Additive],
            views: vec![ViewConfigurationView::recommended(1024, 1024, 1); 2],
            swapchain_formats: ADVERTISED_FORMATS
                .iter()
                .filter_map(|f| format::to_native(api, *f))
                .collect(),
            color_image_count: 3,
            depth_image_count: 2,
            display_period_ns: 11_111_111,
            auto_lifecycle: true,
            exit_after_frames: None,
            fail_locate_on_frames: Vec::new(),
            invalid_pose_on_frames: Vec::new(),
            ipd: 0.063,
        }
    }

    /// No automatic lifecycle events; tests push them explicitly.
    pub fn manual() -> Self {
        Self {
            auto_lifecycle: false,
            ..Self::default()
        }
    }
}

/// Command-line facing knobs for the headless run mode.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub view_count: u32,
    pub width: u32,
    pub height: u32,
    pub color_image_count: u32,
    pub depth_image_count: u32,
    pub exit_after_frames: Option<u64>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            view_count: 2,
            width: 1024,
            height: 1024,
            color_image_count: 3,
            depth_image_count: 2,
            exit_after_frames: None,
        }
    }
}

impl HeadlessConfig {
    /// Parse a "WxH" resolution string. Returns (width, height) or None.
    pub fn parse_resolution(s: &str) -> Option<(u32, u32)> {
        let (w, h) = s.split_once('x')?;
        let w = w.parse::<u32>().ok()?;
        let h = h.parse::<u32>().ok()?;
        if w > 0 && h > 0 {
            Some((w, h))
        } else {
            None
        }
    }

    pub fn runtime_config(&self, api: GraphicsApi) -> SimulatedRuntimeConfig {
        let mut config = SimulatedRuntimeConfig::for_api(api);
        let view = ViewConfigurationView::recommended(self.width, self.height, 1);
        config.views = vec![view; self.view_count as usize];
        if self.view_count == 1 {
            config.view_configurations = vec![ViewConfigurationType::PrimaryMono];
        }
        config.color_image_count = self.color_image_count.max(1);
        config.depth_image_count = self.depth_image_count.max(1);
        config.exit_after_frames = self.exit_after_frames;
        config
    }
}

// ── Call log ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    BeginSession(ViewConfigurationType),
    EndSession,
    CreateReferenceSpace(ReferenceSpaceType, Pose),
    DestroySpace(SpaceHandle),
    CreateSwapchain(SwapchainCreateInfo),
    DestroySwapchain(SwapchainHandle),
    AcquireSwapchainImage(SwapchainHandle),
    WaitSwapchainImage(SwapchainHandle),
    ReleaseSwapchainImage(SwapchainHandle),
    WaitFrame,
    BeginFrame,
    EndFrame {
        display_time: XrTime,
        blend_mode: EnvironmentBlendMode,
        layer_count: usize,
    },
    LocateViews(XrTime),
}

// ── Runtime ─────────────────────────────────────────────────

#[derive(Debug)]
struct SimSwapchain {
    info: SwapchainCreateInfo,
    images: Vec<NativeImage>,
    next_index: u32,
    /// Acquired and not yet released, oldest first.
    acquired: VecDeque<u32>,
    front_waited: bool,
    last_acquired: Option<u32>,
}

struct SubmittedFrame {
    display_time: XrTime,
    blend_mode: EnvironmentBlendMode,
    layers: Vec<CompositionLayer>,
}

pub struct SimulatedRuntime {
    config: SimulatedRuntimeConfig,
    events: VecDeque<RuntimeEvent>,
    calls: Vec<RuntimeCall>,
    /// Last state delivered to the application.
    state: SessionState,
    session_running: bool,
    exit_requested: bool,
    next_handle: u64,
    swapchains: HashMap<SwapchainHandle, SimSwapchain>,
    spaces: HashSet<SpaceHandle>,
    frames_waited: u64,
    frames_ended: u64,
    waited_unbegun: bool,
    frame_open: bool,
    predicted_time: XrTime,
    next_view_flags: Option<ViewStateFlags>,
    fail_next_locate: bool,
    fail_next_begin: bool,
    last_frame: Option<SubmittedFrame>,
}

impl SimulatedRuntime {
    pub fn new(config: SimulatedRuntimeConfig) -> Self {
        let mut runtime = Self {
            config,
            events: VecDeque::new(),
            calls: Vec::new(),
            state: SessionState::Unknown,
            session_running: false,
            exit_requested: false,
            next_handle: 0x100,
            swapchains: HashMap::new(),
            spaces: HashSet::new(),
            frames_waited: 0,
            frames_ended: 0,
            waited_unbegun: false,
            frame_open: false,
            predicted_time: XrTime::from_nanos(0),
            next_view_flags: None,
            fail_next_locate: false,
            fail_next_begin: false,
            last_frame: None,
        };
        if runtime.config.auto_lifecycle {
            let session = runtime.config.session;
            runtime.push_state(session, SessionState::Idle);
            runtime.push_state(session, SessionState::Ready);
        }
        runtime
    }

    pub fn config(&self) -> &SimulatedRuntimeConfig {
        &self.config
    }

    /// Session state as last delivered through `poll_event`.
    pub fn state(&self) -> SessionState {
        self.state
    }

    // ── Scripting ──

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    pub fn push_state(&mut self, session: SessionHandle, state: SessionState) {
        let time = self.predicted_time;
        self.push_event(RuntimeEvent::SessionStateChanged {
            session,
            state,
            time,
        });
    }

    /// Runtime-initiated exit, as a user pressing the system menu would cause.
    pub fn request_exit(&mut self) {
        if self.exit_requested {
            return;
        }
        self.exit_requested = true;
        let session = self.config.session;
        info!("simulated runtime: requesting session exit");
        self.push_state(session, SessionState::Stopping);
    }

    pub fn fail_next_begin_session(&mut self) {
        self.fail_next_begin = true;
    }

    pub fn fail_next_locate(&mut self) {
        self.fail_next_locate = true;
    }

    /// Override the validity flags of the next located views.
    pub fn set_next_view_flags(&mut self, flags: ViewStateFlags) {
        self.next_view_flags = Some(flags);
    }

    // ── Inspection ──

    pub fn calls(&self) -> &[RuntimeCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(*c)).count()
    }

    pub fn live_swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    pub fn live_space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Images acquired and not yet released, across all swapchains.
    pub fn held_image_count(&self) -> usize {
        self.swapchains.values().map(|s| s.acquired.len()).sum()
    }

    pub fn last_acquired(&self, swapchain: SwapchainHandle) -> Option<u32> {
        self.swapchains.get(&swapchain).and_then(|s| s.last_acquired)
    }

    pub fn image_count(&self, swapchain: SwapchainHandle) -> Option<usize> {
        self.swapchains.get(&swapchain).map(|s| s.images.len())
    }

    pub fn last_submitted_layers(&self) -> Option<&[CompositionLayer]> {
        self.last_frame.as_ref().map(|f| f.layers.as_slice())
    }

    pub fn last_end_frame(&self) -> Option<(XrTime, EnvironmentBlendMode)> {
        self.last_frame.as_ref().map(|f| (f.display_time, f.blend_mode))
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    pub fn status_sexp(&self) -> String {
        format!(
            "(:runtime simulated :state :{} :running {} :frames {} :swapchains {} :held-images {})",
            self.state.as_str(),
            if self.session_running { "t" } else { "nil" },
            self.frames_ended,
            self.swapchains.len(),
            self.held_image_count(),
        )
    }

    // ── Internals ──

    fn alloc_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn swapchain_mut(&mut self, call: &'static str, handle: SwapchainHandle) -> Result<&mut SimSwapchain> {
        self.swapchains
            .get_mut(&handle)
            .ok_or_else(|| XrError::runtime_call(call, codes::ERROR_HANDLE_INVALID, "unknown swapchain"))
    }

    fn views_for(&self, view_configuration: ViewConfigurationType) -> Vec<ViewConfigurationView> {
        match view_configuration {
            ViewConfigurationType::PrimaryStereo => self.config.views.clone(),
            ViewConfigurationType::PrimaryMono => self.config.views.iter().take(1).copied().collect(),
        }
    }

    /// Eyes straddle the origin at half the IPD, each with a slightly
    /// asymmetric frustum that widens outward.
    fn eye(&self, index: usize, count: usize) -> LocatedView {
        let half = self.config.ipd / 2.0;
        let (x, inner, outer) = match (count, index) {
            (1, _) => (0.0, 0.8, 0.8),
            (_, 0) => (-half, 0.7, 0.9),
            _ => (half, 0.7, 0.9),
        };
        let (angle_left, angle_right) = if x > 0.0 { (-inner, outer) } else { (-outer, inner) };
        LocatedView {
            pose: Pose::from_position(Vec3::new(x, 0.0, 0.0)),
            fov: Fov {
                angle_left,
                angle_right,
                angle_up: 0.8,
                angle_down: -0.8,
            },
        }
    }
}

impl XrRuntime for SimulatedRuntime {
    fn session(&self) -> SessionHandle {
        self.config.session
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>> {
        let event = self.events.pop_front();
        if let Some(RuntimeEvent::SessionStateChanged { session, state, .. }) = &event {
            if *session == self.config.session {
                self.state = *state;
            }
        }
        Ok(event)
    }

    fn enumerate_view_configurations(&self) -> Result<Vec<ViewConfigurationType>> {
        Ok(self.config.view_configurations.clone())
    }

    fn enumerate_view_configuration_views(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> Result<Vec<ViewConfigurationView>> {
        Ok(self.views_for(view_configuration))
    }

    fn enumerate_environment_blend_modes(
        &self,
        _view_configuration: ViewConfigurationType,
    ) -> Result<Vec<EnvironmentBlendMode>> {
        Ok(self.config.blend_modes.clone())
    }

    fn begin_session(&mut self, view_configuration: ViewConfigurationType) -> Result<()> {
        self.calls.push(RuntimeCall::BeginSession(view_configuration));
        if std::mem::take(&mut self.fail_next_begin) {
            return Err(XrError::runtime_call(
                "xrBeginSession",
                codes::ERROR_RUNTIME_FAILURE,
                "injected failure",
            ));
        }
        if self.session_running {
            return Err(XrError::runtime_call(
                "xrBeginSession",
                codes::ERROR_SESSION_RUNNING,
                "session already running",
            ));
        }
        self.session_running = true;
        if self.config.auto_lifecycle {
            if self.config.exit_after_frames == Some(0) {
                self.request_exit();
                return Ok(());
            }
            let session = self.config.session;
            for state in [SessionState::Synchronized, SessionState::Visible, SessionState::Focused] {
                self.push_state(session, state);
            }
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<()> {
        self.calls.push(RuntimeCall::EndSession);
        if !self.session_running {
            return Err(XrError::runtime_call(
                "xrEndSession",
                codes::ERROR_SESSION_NOT_RUNNING,
                "session not running",
            ));
        }
        self.session_running = false;
        if self.config.auto_lifecycle {
            let session = self.config.session;
            self.push_state(session, SessionState::Idle);
            self.push_state(session, SessionState::Exiting);
        }
        Ok(())
    }

    fn create_reference_space(&mut self, space_type: ReferenceSpaceType, pose_in_space: Pose) -> Result<SpaceHandle> {
        self.calls.push(RuntimeCall::CreateReferenceSpace(space_type, pose_in_space));
        let handle = SpaceHandle(self.alloc_handle());
        self.spaces.insert(handle);
        Ok(handle)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> Result<()> {
        self.calls.push(RuntimeCall::DestroySpace(space));
        if !self.spaces.remove(&space) {
            return Err(XrError::runtime_call("xrDestroySpace", codes::ERROR_HANDLE_INVALID, "unknown space"));
        }
        Ok(())
    }

    fn enumerate_swapchain_formats(&self) -> Result<Vec<i64>> {
        Ok(self.config.swapchain_formats.clone())
    }

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle> {
        self.calls.push(RuntimeCall::CreateSwapchain(*info));
        if !self.config.swapchain_formats.contains(&info.format) {
            return Err(XrError::runtime_call(
                "xrCreateSwapchain",
                codes::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED,
                format!("format {} not advertised", info.format),
            ));
        }
        let count = match info.usage {
            SwapchainUsage::Color => self.config.color_image_count,
            SwapchainUsage::DepthStencil => self.config.depth_image_count,
        };
        let handle = SwapchainHandle(self.alloc_handle());
        let images = (0..count)
            .map(|i| NativeImage((handle.0 << 8) | u64::from(i)))
            .collect();
        self.swapchains.insert(
            handle,
            SimSwapchain {
                info: *info,
                images,
                next_index: 0,
                acquired: VecDeque::new(),
                front_waited: false,
                last_acquired: None,
            },
        );
        Ok(handle)
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> Result<Vec<NativeImage>> {
        Ok(self.swapchain_mut("xrEnumerateSwapchainImages", swapchain)?.images.clone())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<()> {
        self.calls.push(RuntimeCall::DestroySwapchain(swapchain));
        match self.swapchains.remove(&swapchain) {
            Some(sc) => {
                trace!(
                    "simulated runtime: destroyed swapchain {:?} ({}x{})",
                    swapchain,
                    sc.info.width,
                    sc.info.height
                );
                Ok(())
            }
            None => Err(XrError::runtime_call(
                "xrDestroySwapchain",
                codes::ERROR_HANDLE_INVALID,
                "unknown swapchain",
            )),
        }
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<u32> {
        self.calls.push(RuntimeCall::AcquireSwapchainImage(swapchain));
        let sc = self.swapchain_mut("xrAcquireSwapchainImage", swapchain)?;
        if sc.acquired.len() >= sc.images.len() {
            return Err(XrError::runtime_call(
                "xrAcquireSwapchainImage",
                codes::ERROR_CALL_ORDER_INVALID,
                "every image is already acquired",
            ));
        }
        let index = sc.next_index;
        sc.next_index = (index + 1) % sc.images.len() as u32;
        sc.acquired.push_back(index);
        sc.last_acquired = Some(index);
        Ok(index)
    }

    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, _timeout: Duration) -> Result<()> {
        self.calls.push(RuntimeCall::WaitSwapchainImage(swapchain));
        let sc = self.swapchain_mut("xrWaitSwapchainImage", swapchain)?;
        if sc.acquired.is_empty() || sc.front_waited {
            return Err(XrError::runtime_call(
                "xrWaitSwapchainImage",
                codes::ERROR_CALL_ORDER_INVALID,
                "no acquired image to wait on",
            ));
        }
        sc.front_waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<()> {
        self.calls.push(RuntimeCall::ReleaseSwapchainImage(swapchain));
        let sc = self.swapchain_mut("xrReleaseSwapchainImage", swapchain)?;
        if !sc.front_waited {
            return Err(XrError::runtime_call(
                "xrReleaseSwapchainImage",
                codes::ERROR_CALL_ORDER_INVALID,
                "image released before it was waited on",
            ));
        }
        sc.acquired.pop_front();
        sc.front_waited = false;
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<FrameState> {
        self.calls.push(RuntimeCall::WaitFrame);
        if !self.session_running {
            return Err(XrError::runtime_call(
                "xrWaitFrame",
                codes::ERROR_SESSION_NOT_RUNNING,
                "session not running",
            ));
        }
        if self.waited_unbegun || self.frame_open {
            return Err(XrError::runtime_call(
                "xrWaitFrame",
                codes::ERROR_CALL_ORDER_INVALID,
                "previous frame was not begun and ended",
            ));
        }
        self.waited_unbegun = true;
        self.frames_waited += 1;
        self.predicted_time = XrTime::from_nanos(self.frames_waited as i64 * self.config.display_period_ns);
        Ok(FrameState {
            predicted_display_time: self.predicted_time,
            predicted_display_period_ns: self.config.display_period_ns,
            should_render: matches!(self.state, SessionState::Visible | SessionState::Focused),
        })
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.calls.push(RuntimeCall::BeginFrame);
        if !self.waited_unbegun {
            return Err(XrError::runtime_call(
                "xrBeginFrame",
                codes::ERROR_CALL_ORDER_INVALID,
                "begin without a preceding wait",
            ));
        }
        self.waited_unbegun = false;
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self, info: &FrameEndInfo<'_>) -> Result<()> {
        self.calls.push(RuntimeCall::EndFrame {
            display_time: info.display_time,
            blend_mode: info.blend_mode,
            layer_count: info.layers.len(),
        });
        if !self.frame_open {
            return Err(XrError::runtime_call(
                "xrEndFrame",
                codes::ERROR_CALL_ORDER_INVALID,
                "end without a matching begin",
            ));
        }
        self.frame_open = false;
        self.frames_ended += 1;

        if info.display_time != self.predicted_time {
            return Err(XrError::runtime_call(
                "xrEndFrame",
                codes::ERROR_TIME_INVALID,
                format!("display time {} was not the predicted {}", info.display_time, self.predicted_time),
            ));
        }
        if self.held_image_count() > 0 {
            return Err(XrError::runtime_call(
                "xrEndFrame",
                codes::ERROR_LAYER_INVALID,
                "swapchain image still acquired",
            ));
        }
        for CompositionLayer::Projection(layer) in info.layers {
            let known = self.spaces.contains(&layer.space)
                && layer.views.iter().all(|v| self.swapchains.contains_key(&v.swapchain));
            if !known {
                return Err(XrError::runtime_call(
                    "xrEndFrame",
                    codes::ERROR_LAYER_INVALID,
                    "layer references a destroyed handle",
                ));
            }
        }

        self.last_frame = Some(SubmittedFrame {
            display_time: info.display_time,
            blend_mode: info.blend_mode,
            layers: info.layers.to_vec(),
        });

        if self.config.auto_lifecycle && Some(self.frames_ended) == self.config.exit_after_frames {
            self.request_exit();
        }
        debug!("simulated runtime: frame {} ended with {} layer(s)", self.frames_ended, info.layers.len());
        Ok(())
    }

    fn locate_views(
        &mut self,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> Result<LocatedViews> {
        self.calls.push(RuntimeCall::LocateViews(display_time));
        if std::mem::take(&mut self.fail_next_locate)
            || self.config.fail_locate_on_frames.contains(&self.frames_waited)
        {
            return Err(XrError::runtime_call(
                "xrLocateViews",
                codes::ERROR_TIME_INVALID,
                "tracking unavailable",
            ));
        }
        if !self.spaces.contains(&space) {
            return Err(XrError::runtime_call("xrLocateViews", codes::ERROR_HANDLE_INVALID, "unknown space"));
        }

        let flags = self.next_view_flags.take().unwrap_or_else(|| {
            if self.config.invalid_pose_on_frames.contains(&self.frames_waited) {
                ViewStateFlags::ORIENTATION_VALID
            } else {
                ViewStateFlags::all()
            }
        });
        let count = self.views_for(view_configuration).len();
        Ok(LocatedViews {
            flags,
            views: (0..count).map(|i| self.eye(i, count)).collect(),
        })
    }
}
