//! Per-view image protocol: acquire, wait, bind, draw, release.
//!
//! Each view goes Idle -> Acquired -> Waited -> Bound -> Drawn -> Released
//! once per frame. Steps issued out of order fail with
//! [`XrError::ViewProtocol`] before touching the runtime. Acquired images are
//! already writable and are handed back in a compositor-usable layout, so no
//! layout transitions are recorded around bind or release.

use tracing::{trace, warn};

use crate::error::{Result, XrError};
use crate::vr::graphics::{CameraParams, GraphicsApi, GraphicsBackend, TextureViewId};
use crate::vr::math::{projection_fov, view_from_pose};
use crate::vr::runtime::{ProjectionView, XrRuntime, INFINITE_TIMEOUT};
use crate::vr::scene::Scene;
use crate::vr::swapchain::ViewSwapchains;
use crate::vr::types::LocatedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Idle,
    Acquired,
    Waited,
    Bound,
    Drawn,
    Released,
}

impl ViewPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquired => "acquired",
            Self::Waited => "waited",
            Self::Bound => "bound",
            Self::Drawn => "drawn",
            Self::Released => "released",
        }
    }
}

/// Per-view draw settings fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRenderSettings {
    pub api: GraphicsApi,
    pub near_z: f32,
    pub far_z: f32,
    pub clear_color: [f32; 4],
}

pub fn camera_for_view(settings: &ViewRenderSettings, located: &LocatedView) -> CameraParams {
    let view = view_from_pose(&located.pose);
    let proj = projection_fov(settings.api, &located.fov, settings.near_z, settings.far_z);
    CameraParams {
        view,
        proj,
        view_proj: proj * view,
        position: located.pose.position,
        near_z: settings.near_z,
        far_z: settings.far_z,
    }
}

#[derive(Debug)]
pub struct ViewRenderer {
    view: usize,
    phase: ViewPhase,
    color_index: Option<u32>,
    depth_index: Option<u32>,
    color_waited: bool,
    depth_waited: bool,
}

impl ViewRenderer {
    pub fn new(view: usize) -> Self {
        Self {
            view,
            phase: ViewPhase::Idle,
            color_index: None,
            depth_index: None,
            color_waited: false,
            depth_waited: false,
        }
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    /// Image indices acquired this frame, color and depth.
    pub fn acquired_indices(&self) -> (Option<u32>, Option<u32>) {
        (self.color_index, self.depth_index)
    }

    fn check_phase(&self, op: &'static str, allowed: &[ViewPhase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(XrError::ViewProtocol {
                view: self.view,
                op,
                phase: self.phase.as_str(),
            })
        }
    }

    pub fn acquire(&mut self, runtime: &mut dyn XrRuntime, chains: &ViewSwapchains) -> Result<()> {
        self.check_phase("acquire", &[ViewPhase::Idle, ViewPhase::Released])?;
        self.color_index = None;
        self.depth_index = None;
        self.color_waited = false;
        self.depth_waited = false;

        self.color_index = Some(runtime.acquire_swapchain_image(chains.color.handle)?);
        self.depth_index = Some(runtime.acquire_swapchain_image(chains.depth.handle)?);
        self.phase = ViewPhase::Acquired;
        trace!(
            "XR: view {} acquired color {:?} depth {:?}",
            self.view,
            self.color_index,
            self.depth_index
        );
        Ok(())
    }

    /// The one blocking step of the view protocol.
    pub fn wait(&mut self, runtime: &mut dyn XrRuntime, chains: &ViewSwapchains) -> Result<()> {
        self.check_phase("wait", &[ViewPhase::Acquired])?;
        runtime.wait_swapchain_image(chains.color.handle, INFINITE_TIMEOUT)?;
        self.color_waited = true;
        runtime.wait_swapchain_image(chains.depth.handle, INFINITE_TIMEOUT)?;
        self.depth_waited = true;
        self.phase = ViewPhase::Waited;
        Ok(())
    }

    pub fn bind(
        &mut self,
        graphics: &mut dyn GraphicsBackend,
        chains: &ViewSwapchains,
        clear_color: [f32; 4],
    ) -> Result<()> {
        self.check_phase("bind", &[ViewPhase::Waited])?;
        let (color_view, depth_view) = self.target_views(chains)?;

        graphics.set_render_targets(color_view, depth_view)?;
        graphics.clear_render_target(color_view, clear_color);
        graphics.clear_depth_stencil(depth_view, 1.0);
        graphics.set_viewport(chains.color.rect());
        self.phase = ViewPhase::Bound;
        Ok(())
    }

    pub fn draw(
        &mut self,
        graphics: &mut dyn GraphicsBackend,
        scene: &mut Scene,
        camera: &CameraParams,
        frame_index: u64,
    ) -> Result<()> {
        self.check_phase("draw", &[ViewPhase::Bound])?;
        scene.draw(graphics, camera, frame_index);
        self.phase = ViewPhase::Drawn;
        Ok(())
    }

    pub fn release(&mut self, runtime: &mut dyn XrRuntime, chains: &ViewSwapchains) -> Result<()> {
        self.check_phase("release", &[ViewPhase::Drawn])?;
        runtime.release_swapchain_image(chains.color.handle)?;
        self.color_index = None;
        runtime.release_swapchain_image(chains.depth.handle)?;
        self.depth_index = None;
        self.phase = ViewPhase::Released;
        Ok(())
    }

    /// Hand back whatever is still held after a failed step. Best effort.
    pub fn abort(&mut self, runtime: &mut dyn XrRuntime, chains: &ViewSwapchains) {
        let held = [
            (self.color_index.take(), self.color_waited, chains.color.handle),
            (self.depth_index.take(), self.depth_waited, chains.depth.handle),
        ];
        for (index, waited, handle) in held {
            if index.is_none() {
                continue;
            }
            if !waited {
                if let Err(e) = runtime.wait_swapchain_image(handle, INFINITE_TIMEOUT) {
                    warn!("XR: view {}: wait during abort failed: {}", self.view, e);
                    continue;
                }
            }
            if let Err(e) = runtime.release_swapchain_image(handle) {
                warn!("XR: view {}: release during abort failed: {}", self.view, e);
            }
        }
        self.color_waited = false;
        self.depth_waited = false;
        self.phase = ViewPhase::Released;
    }

    fn target_views(
        &self,
        chains: &ViewSwapchains,
    ) -> Result<(TextureViewId, TextureViewId)> {
        let missing = |op| XrError::ViewProtocol {
            view: self.view,
            op,
            phase: self.phase.as_str(),
        };
        let color = self
            .color_index
            .and_then(|i| chains.color.view(i))
            .ok_or_else(|| missing("bind color image"))?;
        let depth = self
            .depth_index
            .and_then(|i| chains.depth.view(i))
            .ok_or_else(|| missing("bind depth image"))?;
        Ok((color, depth))
    }

    /// Run the whole per-view protocol and return this view's layer entry.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        scene: &mut Scene,
        chains: &ViewSwapchains,
        located: &LocatedView,
        settings: &ViewRenderSettings,
        frame_index: u64,
    ) -> Result<ProjectionView> {
        let result = self.run_steps(runtime, graphics, scene, chains, located, settings, frame_index);
        if result.is_err() && self.phase != ViewPhase::Released {
            self.abort(runtime, chains);
        }
        result?;

        Ok(ProjectionView {
            pose: located.pose,
            fov: located.fov,
            swapchain: chains.color.handle,
            image_rect: chains.color.rect(),
            image_array_index: 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_steps(
        &mut self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        scene: &mut Scene,
        chains: &ViewSwapchains,
        located: &LocatedView,
        settings: &ViewRenderSettings,
        frame_index: u64,
    ) -> Result<()> {
        self.acquire(runtime, chains)?;
        self.wait(runtime, chains)?;
        self.bind(graphics, chains, settings.clear_color)?;
        let camera = camera_for_view(settings, located);
        self.draw(graphics, scene, &camera, frame_index)?;
        self.release(runtime, chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{
        GraphicsCommand, RecordingGraphics, RuntimeCall, SimulatedRuntime, SimulatedRuntimeConfig,
    };
    use crate::vr::scene::SceneConfig;
    use crate::vr::swapchain::SwapchainSet;
    use crate::vr::types::{Fov, Pose, Rect2D};

    struct Fixture {
        runtime: SimulatedRuntime,
        graphics: RecordingGraphics,
        set: SwapchainSet,
        scene: Scene,
    }

    fn fixture() -> Fixture {
        let mut runtime = SimulatedRuntime::new(SimulatedRuntimeConfig::default());
        let mut graphics = RecordingGraphics::new(GraphicsApi::Vulkan);
        let layout = runtime.config().views.clone();
        let set = SwapchainSet::create(&mut runtime, &mut graphics, &layout).unwrap();
        let scene = Scene::new(&mut graphics, &SceneConfig::default(), None).unwrap();
        Fixture {
            runtime,
            graphics,
            set,
            scene,
        }
    }

    fn settings() -> ViewRenderSettings {
        ViewRenderSettings {
            api: GraphicsApi::Vulkan,
            near_z: 0.05,
            far_z: 100.0,
            clear_color: [0.17, 0.17, 0.17, 1.0],
        }
    }

    fn located() -> LocatedView {
        LocatedView {
            pose: Pose::IDENTITY,
            fov: Fov::symmetric(0.8),
        }
    }

    #[test]
    fn test_full_protocol_order() {
        let mut f = fixture();
        let chains = f.set.view(0).unwrap();
        let mut view = ViewRenderer::new(0);
        f.runtime.clear_calls();
        f.graphics.clear_log();

        let entry = view
            .render(&mut f.runtime, &mut f.graphics, &mut f.scene, chains, &located(), &settings(), 0)
            .unwrap();
        assert_eq!(view.phase(), ViewPhase::Released);
        assert_eq!(entry.swapchain, chains.color.handle);
        assert_eq!(entry.image_rect, Rect2D::from_extent(1024, 1024));
        assert_eq!(entry.image_array_index, 0);

        let (c, d) = (chains.color.handle, chains.depth.handle);
        assert_eq!(
            f.runtime.calls(),
            &[
                RuntimeCall::AcquireSwapchainImage(c),
                RuntimeCall::AcquireSwapchainImage(d),
                RuntimeCall::WaitSwapchainImage(c),
                RuntimeCall::WaitSwapchainImage(d),
                RuntimeCall::ReleaseSwapchainImage(c),
                RuntimeCall::ReleaseSwapchainImage(d),
            ]
        );

        let log = f.graphics.log();
        assert!(matches!(log[0], GraphicsCommand::SetRenderTargets { .. }));
        assert!(matches!(log[1], GraphicsCommand::ClearColor { color, .. } if color == [0.17, 0.17, 0.17, 1.0]));
        assert!(matches!(log[2], GraphicsCommand::ClearDepth { depth, .. } if depth == 1.0));
        assert_eq!(log[3], GraphicsCommand::SetViewport(Rect2D::from_extent(1024, 1024)));
        f.set.destroy(&mut f.runtime, &mut f.graphics);
    }

    #[test]
    fn test_out_of_order_steps_rejected() {
        let mut f = fixture();
        let chains = f.set.view(0).unwrap();
        let mut view = ViewRenderer::new(0);

        let err = view.wait(&mut f.runtime, chains).unwrap_err();
        assert!(matches!(err, XrError::ViewProtocol { op: "wait", phase: "idle", .. }));

        assert_eq!(view.acquired_indices(), (None, None));
        view.acquire(&mut f.runtime, chains).unwrap();
        assert_eq!(
            view.acquired_indices(),
            (
                f.runtime.last_acquired(chains.color.handle),
                f.runtime.last_acquired(chains.depth.handle)
            )
        );
        let err = view.acquire(&mut f.runtime, chains).unwrap_err();
        assert!(matches!(err, XrError::ViewProtocol { op: "acquire", .. }));
        let err = view.release(&mut f.runtime, chains).unwrap_err();
        assert!(matches!(err, XrError::ViewProtocol { op: "release", phase: "acquired", .. }));

        view.abort(&mut f.runtime, chains);
        assert_eq!(view.phase(), ViewPhase::Released);
        assert_eq!(view.acquired_indices(), (None, None));
        assert_eq!(f.runtime.held_image_count(), 0);
        f.set.destroy(&mut f.runtime, &mut f.graphics);
    }

    #[test]
    fn test_indices_tracked_independently() {
        let mut f = fixture();
        let chains = f.set.view(0).unwrap();
        let mut view = ViewRenderer::new(0);

        let mut seen = Vec::new();
        for frame in 0..6 {
            view.render(&mut f.runtime, &mut f.graphics, &mut f.scene, chains, &located(), &settings(), frame)
                .unwrap();
            seen.push(f.runtime.last_acquired(chains.color.handle).zip(f.runtime.last_acquired(chains.depth.handle)));
        }
        let seen: Vec<(u32, u32)> = seen.into_iter().flatten().collect();
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 0), (0, 1), (1, 0), (2, 1)]);
        f.set.destroy(&mut f.runtime, &mut f.graphics);
    }

    #[test]
    fn test_failed_bind_releases_images() {
        let mut f = fixture();
        let chains = f.set.view(1).unwrap();
        let mut view = ViewRenderer::new(1);
        f.graphics.fail_next_bind();

        let err = view
            .render(&mut f.runtime, &mut f.graphics, &mut f.scene, chains, &located(), &settings(), 0)
            .unwrap_err();
        assert!(matches!(err, XrError::Graphics(_)));
        assert_eq!(f.runtime.held_image_count(), 0);
        assert_eq!(view.phase(), ViewPhase::Released);
        f.set.destroy(&mut f.runtime, &mut f.graphics);
    }

    #[test]
    fn test_camera_uses_pose_inverse() {
        let located = LocatedView {
            pose: Pose::from_position(glam::Vec3::new(0.0, 1.6, 0.0)),
            fov: Fov::symmetric(0.8),
        };
        let camera = camera_for_view(&settings(), &located);
        let eye_in_view = camera.view.transform_point3(located.pose.position);
        assert!(eye_in_view.abs_diff_eq(glam::Vec3::ZERO, 1e-6));
        assert_eq!(camera.view_proj, camera.proj * camera.view);
    }
}
