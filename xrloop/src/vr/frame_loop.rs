//! Per-tick frame protocol: wait, begin, render views, end.
//!
//! Every `begin_frame` that succeeds is matched by exactly one `end_frame`,
//! whatever happens in between. A frame that cannot be rendered (session not
//! visible, `should_render` unset, poses unavailable, or a failing view) is
//! ended with an empty layer list.

use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::error::{Result, XrError};
use crate::vr::frame_timing::{FrameSample, FrameTiming};
use crate::vr::graphics::{GraphicsApi, GraphicsBackend};
use crate::vr::negotiation::SystemSelection;
use crate::vr::reference_space::ReferenceSpaceTracker;
use crate::vr::runtime::{
    CompositionLayer, FrameEndInfo, LayerFlags, ProjectionLayer, XrRuntime,
};
use crate::vr::scene::Scene;
use crate::vr::session::SessionContext;
use crate::vr::swapchain::SwapchainSet;
use crate::vr::types::{EnvironmentBlendMode, FrameState, ViewConfigurationType, XrTime};
use crate::vr::view_renderer::{ViewRenderSettings, ViewRenderer};

pub const PROJECTION_LAYER_FLAGS: LayerFlags =
    LayerFlags::BLEND_TEXTURE_SOURCE_ALPHA.union(LayerFlags::CORRECT_CHROMATIC_ABERRATION);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub near_z: f32,
    pub far_z: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            near_z: 0.05,
            far_z: 100.0,
        }
    }
}

/// Gray over an opaque display, black where the world shows through.
pub fn clear_color_for(blend_mode: EnvironmentBlendMode) -> [f32; 4] {
    match blend_mode {
        EnvironmentBlendMode::Opaque => [0.17, 0.17, 0.17, 1.0],
        EnvironmentBlendMode::Additive | EnvironmentBlendMode::AlphaBlend => [0.0, 0.0, 0.0, 0.0],
    }
}

/// State of one frame between `wait_frame` and `end_frame`.
#[derive(Debug)]
pub struct FrameContext {
    pub display_time: XrTime,
    pub should_render: bool,
    pub layers: Vec<CompositionLayer>,
}

impl FrameContext {
    fn new(state: &FrameState) -> Self {
        Self {
            display_time: state.predicted_display_time,
            should_render: state.should_render,
            layers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered { views: usize },
    /// Session not in a visible state or the runtime asked not to render.
    Skipped,
    PoseUnavailable,
    /// A runtime or graphics call failed; the frame was still ended.
    Failed,
}

impl FrameOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rendered { .. } => "rendered",
            Self::Skipped => "skipped",
            Self::PoseUnavailable => "pose-unavailable",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub display_time: XrTime,
    pub outcome: FrameOutcome,
    pub layer_count: usize,
}

/// Resources a tick renders with. All owned outside the controller.
pub struct FrameResources<'a> {
    pub swapchains: &'a SwapchainSet,
    pub space: &'a mut ReferenceSpaceTracker,
    pub scene: &'a mut Scene,
}

pub struct FrameLoopController {
    view_configuration: ViewConfigurationType,
    blend_mode: EnvironmentBlendMode,
    settings: ViewRenderSettings,
    renderers: Vec<ViewRenderer>,
    timing: FrameTiming,
    frames_begun: u64,
    frames_ended: u64,
    frame_index: u64,
}

impl FrameLoopController {
    pub fn new(selection: &SystemSelection, api: GraphicsApi, render: &RenderConfig) -> Self {
        Self {
            view_configuration: selection.view_configuration,
            blend_mode: selection.blend_mode,
            settings: ViewRenderSettings {
                api,
                near_z: render.near_z,
                far_z: render.far_z,
                clear_color: clear_color_for(selection.blend_mode),
            },
            renderers: (0..selection.views.len()).map(ViewRenderer::new).collect(),
            timing: FrameTiming::default(),
            frames_begun: 0,
            frames_ended: 0,
            frame_index: 0,
        }
    }

    pub fn blend_mode(&self) -> EnvironmentBlendMode {
        self.blend_mode
    }

    pub fn frames_begun(&self) -> u64 {
        self.frames_begun
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    pub fn timing(&self) -> &FrameTiming {
        &self.timing
    }

    /// Run one frame. Blocks in `wait_frame` and in the per-image waits.
    ///
    /// Errors before `begin_frame` succeeds leave no frame open. Errors after
    /// it are returned only once the frame has been ended.
    pub fn tick(
        &mut self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        ctx: &SessionContext,
        res: FrameResources<'_>,
    ) -> Result<FrameReport> {
        let wait_start = Instant::now();
        let state = runtime.wait_frame()?;
        let wait = wait_start.elapsed();
        self.timing.set_display_period(state.predicted_display_period_ns);

        let render_start = Instant::now();
        runtime.begin_frame()?;
        self.frames_begun += 1;

        let mut frame = FrameContext::new(&state);
        let mut fatal = None;
        let outcome = if ctx.state().is_active() && frame.should_render {
            match self.render_layers(runtime, graphics, &frame, res) {
                Ok(layer) => {
                    let views = layer.views.len();
                    frame.layers.push(CompositionLayer::Projection(layer));
                    FrameOutcome::Rendered { views }
                }
                Err(e) if e.is_transient() => {
                    warn!("XR: frame {} submitted without layers: {}", self.frame_index, e);
                    FrameOutcome::PoseUnavailable
                }
                Err(e) => {
                    error!("XR: frame {} failed: {}", self.frame_index, e);
                    fatal = Some(e);
                    FrameOutcome::Failed
                }
            }
        } else {
            trace!(
                "XR: frame {} not rendered (state {}, should_render {})",
                self.frame_index,
                ctx.state().as_str(),
                frame.should_render
            );
            FrameOutcome::Skipped
        };
        let render = render_start.elapsed();

        let submit_start = Instant::now();
        let ended = runtime.end_frame(&FrameEndInfo {
            display_time: frame.display_time,
            blend_mode: self.blend_mode,
            layers: &frame.layers,
        });
        self.frames_ended += 1;
        let submit = submit_start.elapsed();

        self.timing.record(FrameSample {
            wait,
            render,
            submit,
            rendered: !frame.layers.is_empty(),
        });

        let report = FrameReport {
            frame_index: self.frame_index,
            display_time: frame.display_time,
            outcome,
            layer_count: frame.layers.len(),
        };
        self.frame_index += 1;

        if let Some(e) = fatal {
            if let Err(end_err) = ended {
                warn!("XR: end_frame after failed frame also failed: {}", end_err);
            }
            return Err(e);
        }
        ended?;
        debug!(
            "XR: frame {} {} at {}",
            report.frame_index,
            report.outcome.as_str(),
            report.display_time
        );
        Ok(report)
    }

    fn render_layers(
        &mut self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        frame: &FrameContext,
        res: FrameResources<'_>,
    ) -> Result<ProjectionLayer> {
        let view_count = res.swapchains.view_count();
        let located = res
            .space
            .locate(runtime, self.view_configuration, frame.display_time, view_count)?;
        let space = res.space.handle().ok_or_else(|| XrError::PoseLocation {
            time: frame.display_time,
            reason: "reference space vanished".into(),
        })?;

        let frame_index = self.frame_index;
        let mut views = Vec::with_capacity(view_count);
        for ((renderer, chains), pose) in self
            .renderers
            .iter_mut()
            .zip(res.swapchains.iter())
            .zip(located.iter())
        {
            let view = renderer.render(
                runtime,
                graphics,
                res.scene,
                chains,
                pose,
                &self.settings,
                frame_index,
            )?;
            views.push(view);
        }
        graphics.flush();
        graphics.finish_frame();

        Ok(ProjectionLayer {
            space,
            flags: PROJECTION_LAYER_FLAGS,
            views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{
        RecordingGraphics, RuntimeCall, SimulatedRuntime, SimulatedRuntimeConfig,
    };
    use crate::vr::negotiation::{negotiate_system, SystemPreferences};
    use crate::vr::scene::SceneConfig;
    use crate::vr::session::{SessionState, SessionStateMachine};
    use crate::vr::types::ReferenceSpaceType;

    struct Rig {
        runtime: SimulatedRuntime,
        graphics: RecordingGraphics,
        ctx: SessionContext,
        machine: SessionStateMachine,
        set: SwapchainSet,
        space: ReferenceSpaceTracker,
        scene: Scene,
        frames: FrameLoopController,
    }

    impl Rig {
        fn new(config: SimulatedRuntimeConfig) -> Self {
            let mut runtime = SimulatedRuntime::new(config);
            let mut graphics = RecordingGraphics::new(GraphicsApi::Vulkan);
            let selection = negotiate_system(&runtime, &SystemPreferences::default()).unwrap();
            let set = SwapchainSet::create(&mut runtime, &mut graphics, &selection.views).unwrap();
            let space =
                ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();
            let scene = Scene::new(&mut graphics, &SceneConfig::default(), None).unwrap();
            let machine = SessionStateMachine::new(runtime.session(), selection.view_configuration);
            let frames = FrameLoopController::new(&selection, GraphicsApi::Vulkan, &RenderConfig::default());
            Self {
                runtime,
                graphics,
                ctx: SessionContext::new(),
                machine,
                set,
                space,
                scene,
                frames,
            }
        }

        /// Session begun but not yet synchronized.
        fn ready(&mut self) {
            let session = self.runtime.session();
            self.runtime.push_state(session, SessionState::Ready);
            self.poll();
            assert!(self.ctx.is_session_running());
        }

        fn poll(&mut self) {
            self.machine.poll_events(&mut self.runtime, &mut self.ctx).unwrap();
        }

        fn tick(&mut self) -> Result<FrameReport> {
            self.frames.tick(
                &mut self.runtime,
                &mut self.graphics,
                &self.ctx,
                FrameResources {
                    swapchains: &self.set,
                    space: &mut self.space,
                    scene: &mut self.scene,
                },
            )
        }

        fn teardown(mut self) {
            self.set.destroy(&mut self.runtime, &mut self.graphics);
            self.space.destroy(&mut self.runtime);
            self.scene.release(&mut self.graphics);
        }
    }

    fn begin_pairs(runtime: &SimulatedRuntime) -> (usize, usize) {
        (
            runtime.count_calls(|c| matches!(c, RuntimeCall::BeginFrame)),
            runtime.count_calls(|c| matches!(c, RuntimeCall::EndFrame { .. })),
        )
    }

    #[test]
    fn test_clear_color_by_blend_mode() {
        assert_eq!(clear_color_for(EnvironmentBlendMode::Opaque), [0.17, 0.17, 0.17, 1.0]);
        assert_eq!(clear_color_for(EnvironmentBlendMode::Additive)[..3], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_skipped_frames_still_paired() {
        let mut rig = Rig::new(SimulatedRuntimeConfig::manual());
        rig.ready();
        for _ in 0..4 {
            let report = rig.tick().unwrap();
            assert_eq!(report.outcome, FrameOutcome::Skipped);
            assert_eq!(report.layer_count, 0);
        }
        assert_eq!(begin_pairs(&rig.runtime), (4, 4));
        assert_eq!(rig.frames.frames_begun(), rig.frames.frames_ended());
        rig.teardown();
    }

    #[test]
    fn test_focused_frame_submits_projection_layer() {
        let mut rig = Rig::new(SimulatedRuntimeConfig::default());
        rig.poll();
        rig.poll();
        assert_eq!(rig.ctx.state(), SessionState::Focused);

        let report = rig.tick().unwrap();
        assert_eq!(report.outcome, FrameOutcome::Rendered { views: 2 });

        let layers = rig.runtime.last_submitted_layers().unwrap();
        assert_eq!(layers.len(), 1);
        let CompositionLayer::Projection(layer) = &layers[0];
        assert_eq!(layer.flags, PROJECTION_LAYER_FLAGS);
        assert_eq!(Some(layer.space), rig.space.handle());
        assert_eq!(layer.views.len(), 2);
        assert_eq!(layer.views[1].swapchain, rig.set.view(1).unwrap().color.handle);

        let (display_time, blend) = rig.runtime.last_end_frame().unwrap();
        assert_eq!(display_time, report.display_time);
        assert_eq!(blend, EnvironmentBlendMode::Opaque);
        rig.teardown();
    }

    #[test]
    fn test_pose_failure_yields_empty_frame() {
        let mut config = SimulatedRuntimeConfig::default();
        config.fail_locate_on_frames = vec![2];
        let mut rig = Rig::new(config);
        rig.poll();
        rig.poll();

        let outcomes: Vec<_> = (0..4).map(|_| rig.tick().unwrap().outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::Rendered { views: 2 },
                FrameOutcome::PoseUnavailable,
                FrameOutcome::Rendered { views: 2 },
                FrameOutcome::Rendered { views: 2 },
            ]
        );
        assert!(rig.ctx.is_session_running());
        assert!(rig.ctx.is_application_running());
        assert_eq!(begin_pairs(&rig.runtime), (4, 4));
        assert_eq!(rig.runtime.held_image_count(), 0);
        rig.teardown();
    }

    #[test]
    fn test_invalid_pose_reuses_last_valid() {
        let mut config = SimulatedRuntimeConfig::default();
        config.invalid_pose_on_frames = vec![2];
        let mut rig = Rig::new(config);
        rig.poll();
        rig.poll();

        for _ in 0..3 {
            assert_eq!(rig.tick().unwrap().outcome, FrameOutcome::Rendered { views: 2 });
        }
        assert_eq!(rig.space.fallback_frames(), 1);
        assert_eq!(begin_pairs(&rig.runtime), (3, 3));
        rig.teardown();
    }

    #[test]
    fn test_invalid_first_pose_skips_layers() {
        let mut config = SimulatedRuntimeConfig::default();
        config.invalid_pose_on_frames = vec![1];
        let mut rig = Rig::new(config);
        rig.poll();
        rig.poll();

        assert_eq!(rig.tick().unwrap().outcome, FrameOutcome::PoseUnavailable);
        assert_eq!(rig.tick().unwrap().outcome, FrameOutcome::Rendered { views: 2 });
        assert_eq!(rig.space.fallback_frames(), 0);
        assert_eq!(rig.runtime.held_image_count(), 0);
        rig.teardown();
    }

    #[test]
    fn test_fatal_view_failure_still_ends_frame() {
        let mut rig = Rig::new(SimulatedRuntimeConfig::default());
        rig.poll();
        rig.poll();
        rig.graphics.fail_next_bind();

        let err = rig.tick().unwrap_err();
        assert!(matches!(err, XrError::Graphics(_)));
        assert_eq!(begin_pairs(&rig.runtime), (1, 1));
        assert_eq!(rig.runtime.last_submitted_layers().map(|l| l.len()), Some(0));
        assert_eq!(rig.runtime.held_image_count(), 0);
        rig.teardown();
    }

    #[test]
    fn test_should_render_false_skips() {
        let mut config = SimulatedRuntimeConfig::default();
        config.auto_lifecycle = false;
        let mut rig = Rig::new(config);
        let session = rig.runtime.session();
        rig.runtime.push_state(session, SessionState::Ready);
        rig.runtime.push_state(session, SessionState::Synchronized);
        rig.poll();

        // Synchronized is active, but the runtime withholds should_render.
        let report = rig.tick().unwrap();
        assert_eq!(report.outcome, FrameOutcome::Skipped);
        assert_eq!(begin_pairs(&rig.runtime), (1, 1));
        rig.teardown();
    }

    #[test]
    fn test_timing_follows_display_period() {
        let mut rig = Rig::new(SimulatedRuntimeConfig::manual());
        rig.ready();
        rig.tick().unwrap();
        assert_eq!(rig.frames.timing().total_frames(), 1);
        assert_eq!(rig.frames.timing().empty_frames(), 1);
        assert_eq!(
            rig.frames.timing().budget(),
            std::time::Duration::from_nanos(rig.runtime.config().display_period_ns as u64)
        );
        rig.teardown();
    }
}
