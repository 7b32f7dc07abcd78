//! OpenXR runtime adapter.
//!
//! Wraps a session that was created elsewhere (instance, system and graphics
//! binding are the embedder's business) and exposes it through
//! [`XrRuntime`]. Runtime objects are kept in handle-keyed tables so the core
//! only ever sees plain integer handles.
//!
//! Only compiled with the `vr` feature.

use std::collections::HashMap;
use std::time::Duration;

use openxrs as xr;
use tracing::{debug, info, warn};

use crate::error::{codes, Result, XrError};
use crate::vr::runtime::{
    CompositionLayer, FrameEndInfo, RuntimeEvent, SwapchainCreateInfo, SwapchainUsage, XrRuntime,
    INFINITE_TIMEOUT,
};
use crate::vr::session::SessionState;
use crate::vr::types::{
    EnvironmentBlendMode, Fov, FrameState, LocatedView, LocatedViews, NativeImage, Pose,
    ReferenceSpaceType, SessionHandle, SpaceHandle, SwapchainHandle, ViewConfigurationType,
    ViewConfigurationView, ViewStateFlags, XrTime,
};

/// Conversion between a graphics binding's native types and the integer
/// codes the core negotiates with.
pub trait NativeGraphics: xr::Graphics {
    fn format_code(format: Self::Format) -> i64;
    fn format_from_code(code: i64) -> Option<Self::Format>;
    fn image(image: &Self::SwapchainImage) -> NativeImage;
}

impl NativeGraphics for xr::Vulkan {
    fn format_code(format: u32) -> i64 {
        i64::from(format)
    }

    fn format_from_code(code: i64) -> Option<u32> {
        u32::try_from(code).ok()
    }

    fn image(image: &u64) -> NativeImage {
        NativeImage(*image)
    }
}

impl NativeGraphics for xr::OpenGL {
    fn format_code(format: u32) -> i64 {
        i64::from(format)
    }

    fn format_from_code(code: i64) -> Option<u32> {
        u32::try_from(code).ok()
    }

    fn image(image: &u32) -> NativeImage {
        NativeImage(u64::from(*image))
    }
}

fn call_failed(call: &'static str) -> impl Fn(xr::sys::Result) -> XrError {
    move |result| XrError::runtime_call(call, result.into_raw(), result.to_string())
}

fn unknown_handle(call: &'static str, what: &str) -> XrError {
    XrError::runtime_call(call, codes::ERROR_HANDLE_INVALID, format!("unknown {what}"))
}

pub struct OpenXrRuntime<G: NativeGraphics> {
    instance: xr::Instance,
    system: xr::SystemId,
    session: xr::Session<G>,
    frame_waiter: xr::FrameWaiter,
    frame_stream: xr::FrameStream<G>,
    event_buffer: xr::EventDataBuffer,
    swapchains: HashMap<SwapchainHandle, xr::Swapchain<G>>,
    spaces: HashMap<SpaceHandle, xr::Space>,
}

impl<G: NativeGraphics> OpenXrRuntime<G> {
    /// Takes ownership of the objects returned by `Instance::create_session`.
    pub fn new(
        instance: xr::Instance,
        system: xr::SystemId,
        session: xr::Session<G>,
        frame_waiter: xr::FrameWaiter,
        frame_stream: xr::FrameStream<G>,
    ) -> Self {
        info!("XR: OpenXR adapter bound to session {:#x}", session.as_raw().into_raw());
        Self {
            instance,
            system,
            session,
            frame_waiter,
            frame_stream,
            event_buffer: xr::EventDataBuffer::new(),
            swapchains: HashMap::new(),
            spaces: HashMap::new(),
        }
    }

    pub fn instance(&self) -> &xr::Instance {
        &self.instance
    }
}

// ── Enum conversion ─────────────────────────────────────────

fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn space_type_to_xr(ty: ReferenceSpaceType) -> xr::ReferenceSpaceType {
    match ty {
        ReferenceSpaceType::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceType::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceType::Stage => xr::ReferenceSpaceType::STAGE,
    }
}

fn space_type_from_xr(ty: xr::ReferenceSpaceType) -> Option<ReferenceSpaceType> {
    match ty {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceType::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceType::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceType::Stage),
        _ => None,
    }
}

fn view_configuration_to_xr(ty: ViewConfigurationType) -> xr::ViewConfigurationType {
    match ty {
        ViewConfigurationType::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

fn view_configuration_from_xr(ty: xr::ViewConfigurationType) -> Option<ViewConfigurationType> {
    match ty {
        xr::ViewConfigurationType::PRIMARY_MONO => Some(ViewConfigurationType::PrimaryMono),
        xr::ViewConfigurationType::PRIMARY_STEREO => Some(ViewConfigurationType::PrimaryStereo),
        _ => None,
    }
}

fn blend_mode_to_xr(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn blend_mode_from_xr(mode: xr::EnvironmentBlendMode) -> Option<EnvironmentBlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(EnvironmentBlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(EnvironmentBlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(EnvironmentBlendMode::AlphaBlend),
        _ => None,
    }
}

fn pose_to_xr(pose: Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: xr::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

fn pose_from_xr(pose: xr::Posef) -> Pose {
    Pose::new(
        glam::Vec3::new(pose.position.x, pose.position.y, pose.position.z),
        glam::Quat::from_xyzw(
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ),
    )
}

fn fov_to_xr(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn fov_from_xr(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn timeout_to_xr(timeout: Duration) -> xr::Duration {
    if timeout == INFINITE_TIMEOUT {
        xr::Duration::INFINITE
    } else {
        xr::Duration::from_nanos(i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX))
    }
}

// ── Runtime ─────────────────────────────────────────────────

impl<G: NativeGraphics> XrRuntime for OpenXrRuntime<G> {
    fn session(&self) -> SessionHandle {
        SessionHandle(self.session.as_raw().into_raw())
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>> {
        loop {
            let event = self
                .instance
                .poll_event(&mut self.event_buffer)
                .map_err(call_failed("xrPollEvent"))?;
            let Some(event) = event else {
                return Ok(None);
            };

            use xr::Event;
            let converted = match event {
                Event::EventsLost(e) => RuntimeEvent::EventsLost {
                    lost_event_count: e.lost_event_count(),
                },
                Event::InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
                    loss_time: XrTime::from_nanos(e.loss_time().as_nanos()),
                },
                Event::InteractionProfileChanged(e) => RuntimeEvent::InteractionProfileChanged {
                    session: SessionHandle(e.session().into_raw()),
                },
                Event::ReferenceSpaceChangePending(e) => {
                    let Some(space_type) = space_type_from_xr(e.reference_space_type()) else {
                        debug!("XR: ignoring change of unsupported reference space type");
                        continue;
                    };
                    RuntimeEvent::ReferenceSpaceChangePending {
                        session: SessionHandle(e.session().into_raw()),
                        space_type,
                        change_time: XrTime::from_nanos(e.change_time().as_nanos()),
                    }
                }
                Event::SessionStateChanged(e) => RuntimeEvent::SessionStateChanged {
                    session: SessionHandle(e.session().into_raw()),
                    state: session_state(e.state()),
                    time: XrTime::from_nanos(e.time().as_nanos()),
                },
                _ => {
                    debug!("XR: ignoring unhandled runtime event");
                    continue;
                }
            };
            return Ok(Some(converted));
        }
    }

    fn enumerate_view_configurations(&self) -> Result<Vec<ViewConfigurationType>> {
        let types = self
            .instance
            .enumerate_view_configurations(self.system)
            .map_err(call_failed("xrEnumerateViewConfigurations"))?;
        Ok(types.into_iter().filter_map(view_configuration_from_xr).collect())
    }

    fn enumerate_view_configuration_views(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> Result<Vec<ViewConfigurationView>> {
        let views = self
            .instance
            .enumerate_view_configuration_views(
                self.system,
                view_configuration_to_xr(view_configuration),
            )
            .map_err(call_failed("xrEnumerateViewConfigurationViews"))?;
        Ok(views
            .into_iter()
            .map(|v| ViewConfigurationView {
                recommended_width: v.recommended_image_rect_width,
                recommended_height: v.recommended_image_rect_height,
                recommended_sample_count: v.recommended_swapchain_sample_count,
                max_width: v.max_image_rect_width,
                max_height: v.max_image_rect_height,
                max_sample_count: v.max_swapchain_sample_count,
            })
            .collect())
    }

    fn enumerate_environment_blend_modes(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> Result<Vec<EnvironmentBlendMode>> {
        let modes = self
            .instance
            .enumerate_environment_blend_modes(
                self.system,
                view_configuration_to_xr(view_configuration),
            )
            .map_err(call_failed("xrEnumerateEnvironmentBlendModes"))?;
        Ok(modes.into_iter().filter_map(blend_mode_from_xr).collect())
    }

    fn begin_session(&mut self, view_configuration: ViewConfigurationType) -> Result<()> {
        self.session
            .begin(view_configuration_to_xr(view_configuration))
            .map_err(call_failed("xrBeginSession"))?;
        Ok(())
    }

    fn end_session(&mut self) -> Result<()> {
        self.session.end().map_err(call_failed("xrEndSession"))?;
        Ok(())
    }

    fn create_reference_space(
        &mut self,
        space_type: ReferenceSpaceType,
        pose_in_space: Pose,
    ) -> Result<SpaceHandle> {
        let space = self
            .session
            .create_reference_space(space_type_to_xr(space_type), pose_to_xr(pose_in_space))
            .map_err(call_failed("xrCreateReferenceSpace"))?;
        let handle = SpaceHandle(space.as_raw().into_raw());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> Result<()> {
        match self.spaces.remove(&space) {
            Some(_) => Ok(()),
            None => Err(unknown_handle("xrDestroySpace", "space")),
        }
    }

    fn enumerate_swapchain_formats(&self) -> Result<Vec<i64>> {
        let formats = self
            .session
            .enumerate_swapchain_formats()
            .map_err(call_failed("xrEnumerateSwapchainFormats"))?;
        Ok(formats.into_iter().map(G::format_code).collect())
    }

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle> {
        let Some(format) = G::format_from_code(info.format) else {
            return Err(XrError::runtime_call(
                "xrCreateSwapchain",
                codes::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED,
                format!("format code {} out of range", info.format),
            ));
        };
        let usage_flags = match info.usage {
            SwapchainUsage::Color => {
                xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::SAMPLED
            }
            SwapchainUsage::DepthStencil => {
                xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | xr::SwapchainUsageFlags::SAMPLED
            }
        };
        let swapchain = self
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags,
                format,
                sample_count: info.sample_count,
                width: info.width,
                height: info.height,
                face_count: info.face_count,
                array_size: info.array_size,
                mip_count: info.mip_count,
            })
            .map_err(call_failed("xrCreateSwapchain"))?;
        let handle = SwapchainHandle(swapchain.as_raw().into_raw());
        self.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> Result<Vec<NativeImage>> {
        let chain = self
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| unknown_handle("xrEnumerateSwapchainImages", "swapchain"))?;
        let images = chain
            .enumerate_images()
            .map_err(call_failed("xrEnumerateSwapchainImages"))?;
        Ok(images.iter().map(G::image).collect())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<()> {
        match self.swapchains.remove(&swapchain) {
            Some(_) => Ok(()),
            None => Err(unknown_handle("xrDestroySwapchain", "swapchain")),
        }
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<u32> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| unknown_handle("xrAcquireSwapchainImage", "swapchain"))?
            .acquire_image()
            .map_err(call_failed("xrAcquireSwapchainImage"))
    }

    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout: Duration) -> Result<()> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| unknown_handle("xrWaitSwapchainImage", "swapchain"))?
            .wait_image(timeout_to_xr(timeout))
            .map_err(call_failed("xrWaitSwapchainImage"))
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> Result<()> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| unknown_handle("xrReleaseSwapchainImage", "swapchain"))?
            .release_image()
            .map_err(call_failed("xrReleaseSwapchainImage"))
    }

    fn wait_frame(&mut self) -> Result<FrameState> {
        let state = self.frame_waiter.wait().map_err(call_failed("xrWaitFrame"))?;
        Ok(FrameState {
            predicted_display_time: XrTime::from_nanos(state.predicted_display_time.as_nanos()),
            predicted_display_period_ns: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.frame_stream.begin().map_err(call_failed("xrBeginFrame"))
    }

    fn end_frame(&mut self, info: &FrameEndInfo<'_>) -> Result<()> {
        let display_time = xr::Time::from_nanos(info.display_time.as_nanos());
        let blend_mode = blend_mode_to_xr(info.blend_mode);

        // Projection views borrow swapchains and spaces, so build them all
        // before assembling the layer list.
        let mut layer_views = Vec::with_capacity(info.layers.len());
        for layer in info.layers {
            let CompositionLayer::Projection(projection) = layer;
            let mut views = Vec::with_capacity(projection.views.len());
            for view in &projection.views {
                let swapchain = self
                    .swapchains
                    .get(&view.swapchain)
                    .ok_or_else(|| unknown_handle("xrEndFrame", "swapchain"))?;
                let rect = xr::Rect2Di {
                    offset: xr::Offset2Di {
                        x: view.image_rect.x,
                        y: view.image_rect.y,
                    },
                    extent: xr::Extent2Di {
                        width: view.image_rect.width as i32,
                        height: view.image_rect.height as i32,
                    },
                };
                views.push(
                    xr::CompositionLayerProjectionView::new()
                        .pose(pose_to_xr(view.pose))
                        .fov(fov_to_xr(view.fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(swapchain)
                                .image_rect(rect)
                                .image_array_index(view.image_array_index),
                        ),
                );
            }
            let space = self
                .spaces
                .get(&projection.space)
                .ok_or_else(|| unknown_handle("xrEndFrame", "space"))?;
            layer_views.push((space, projection.flags, views));
        }

        let layers: Vec<xr::CompositionLayerProjection<'_, G>> = layer_views
            .iter()
            .map(|(space, flags, views)| {
                xr::CompositionLayerProjection::new()
                    .space(space)
                    .layer_flags(xr::CompositionLayerFlags::from_raw(u64::from(flags.bits())))
                    .views(views)
            })
            .collect();
        let refs: Vec<&xr::CompositionLayerBase<'_, G>> = layers.iter().map(|l| &**l).collect();

        if refs.is_empty() {
            debug!("XR: ending frame without layers");
        }
        self.frame_stream
            .end(display_time, blend_mode, &refs)
            .map_err(call_failed("xrEndFrame"))
    }

    fn locate_views(
        &mut self,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> Result<LocatedViews> {
        let space = self
            .spaces
            .get(&space)
            .ok_or_else(|| unknown_handle("xrLocateViews", "space"))?;
        let (flags, views) = self
            .session
            .locate_views(
                view_configuration_to_xr(view_configuration),
                xr::Time::from_nanos(display_time.as_nanos()),
                space,
            )
            .map_err(call_failed("xrLocateViews"))?;
        let flags = ViewStateFlags::from_bits_truncate(flags.into_raw() as u32);
        if !flags.contains(ViewStateFlags::POSITION_TRACKED) {
            warn!("XR: view positions are not tracked");
        }
        Ok(LocatedViews {
            flags,
            views: views
                .into_iter()
                .map(|v| LocatedView {
                    pose: pose_from_xr(v.pose),
                    fov: fov_from_xr(v.fov),
                })
                .collect(),
        })
    }
}

impl<G: NativeGraphics> Drop for OpenXrRuntime<G> {
    fn drop(&mut self) {
        if !self.swapchains.is_empty() || !self.spaces.is_empty() {
            debug!(
                "XR: dropping adapter with {} swapchain(s) and {} space(s)",
                self.swapchains.len(),
                self.spaces.len()
            );
        }
    }
}
