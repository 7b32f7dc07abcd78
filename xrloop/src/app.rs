//! Application driver: setup, tick until the application stops, teardown.
//!
//! One tick is: pump platform events, drain runtime events, check the
//! session gate, apply a pending reference space change, run one frame.
//! The gate is re-checked every tick because the event queue can stop the
//! session at any point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::{GraphicsError, Result};
use crate::vr::frame_loop::{FrameLoopController, FrameOutcome, FrameResources, RenderConfig};
use crate::vr::graphics::{GraphicsApi, GraphicsBackend, ModelRenderer};
use crate::vr::negotiation::{negotiate_system, SystemPreferences};
use crate::vr::reference_space::ReferenceSpaceTracker;
use crate::vr::runtime::XrRuntime;
use crate::vr::scene::{Scene, SceneConfig};
use crate::vr::session::{SessionContext, SessionState, SessionStateMachine};
use crate::vr::swapchain::SwapchainSet;
use crate::vr::types::ReferenceSpaceType;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Ask every running [`SignalPump`] to stop at its next tick.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

// ── Platform events ─────────────────────────────────────────

/// Once-per-tick "keep running" signal from the host platform.
pub trait PlatformEvents {
    fn keep_running(&mut self) -> bool;
}

impl<F: FnMut() -> bool> PlatformEvents for F {
    fn keep_running(&mut self) -> bool {
        self()
    }
}

/// Desktop pump: SIGINT/SIGTERM and an optional wall-clock limit.
pub struct SignalPump {
    started: Instant,
    exit_after: Option<Duration>,
}

impl SignalPump {
    /// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
    pub fn install(exit_after: Option<Duration>) -> Self {
        unsafe {
            libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
        }
        Self {
            started: Instant::now(),
            exit_after,
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

impl PlatformEvents for SignalPump {
    fn keep_running(&mut self) -> bool {
        if shutdown_requested() {
            info!("Shutdown signal received, exiting");
            return false;
        }
        if let Some(limit) = self.exit_after {
            if self.started.elapsed() >= limit {
                info!("Exit timer fired after {}s", limit.as_secs());
                return false;
            }
        }
        true
    }
}

// ── Configuration ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Must match the API of the graphics backend handed to [`App::new`].
    pub graphics_api: GraphicsApi,
    pub reference_space: ReferenceSpaceType,
    /// Recreate the reference space after a runtime change notice.
    pub recreate_space_on_change: bool,
    pub preferences: SystemPreferences,
    pub render: RenderConfig,
    pub scene: SceneConfig,
    /// Stop the application after this many frames.
    pub max_frames: Option<u64>,
    /// Sleep between event polls while no session is running.
    pub idle_poll_interval: Duration,
    pub stats_interval: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            graphics_api: GraphicsApi::Vulkan,
            reference_space: ReferenceSpaceType::Local,
            recreate_space_on_change: true,
            preferences: SystemPreferences::default(),
            render: RenderConfig::default(),
            scene: SceneConfig::default(),
            max_frames: None,
            idle_poll_interval: Duration::from_millis(100),
            stats_interval: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub rendered_frames: u64,
    pub final_state: SessionState,
    pub session_running: bool,
    pub application_running: bool,
    pub stale_events: u64,
    pub lost_events: u64,
}

impl RunSummary {
    pub fn to_sexp(&self) -> String {
        format!(
            "(:frames {} :rendered {} :state :{} :session-running {} :application-running {} :stale-events {} :lost-events {})",
            self.frames,
            self.rendered_frames,
            self.final_state.as_str(),
            if self.session_running { "t" } else { "nil" },
            if self.application_running { "t" } else { "nil" },
            self.stale_events,
            self.lost_events,
        )
    }
}

// ── App ─────────────────────────────────────────────────────

pub struct App<R: XrRuntime, G: GraphicsBackend> {
    config: AppConfig,
    runtime: R,
    graphics: G,
    model_renderer: Option<Box<dyn ModelRenderer>>,
    ctx: SessionContext,
}

impl<R: XrRuntime, G: GraphicsBackend> App<R, G> {
    pub fn new(config: AppConfig, runtime: R, graphics: G) -> Self {
        Self {
            config,
            runtime,
            graphics,
            model_renderer: None,
            ctx: SessionContext::new(),
        }
    }

    pub fn with_model_renderer(mut self, renderer: Box<dyn ModelRenderer>) -> Self {
        self.model_renderer = Some(renderer);
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn graphics(&self) -> &G {
        &self.graphics
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// `sessionRunning` as last left by the state machine.
    pub fn is_session_running(&self) -> bool {
        self.ctx.is_session_running()
    }

    pub fn is_application_running(&self) -> bool {
        self.ctx.is_application_running()
    }

    /// Setup, tick until the application stops running, teardown.
    ///
    /// Setup failures are returned after releasing whatever was created.
    /// Teardown runs whether the loop ends normally or with an error.
    pub fn run(&mut self, platform: &mut dyn PlatformEvents) -> Result<RunSummary> {
        let Self {
            config,
            runtime,
            graphics,
            model_renderer,
            ctx,
        } = self;
        let runtime: &mut dyn XrRuntime = runtime;
        let graphics: &mut dyn GraphicsBackend = graphics;

        if graphics.api() != config.graphics_api {
            return Err(GraphicsError::ApiMismatch {
                configured: config.graphics_api,
                backend: graphics.api(),
            }
            .into());
        }
        info!(
            "XR: starting on {} ({} reference space)",
            graphics.api().as_str(),
            config.reference_space.as_str()
        );

        let selection = negotiate_system(runtime, &config.preferences)?;
        let mut machine = SessionStateMachine::new(runtime.session(), selection.view_configuration);

        let mut swapchains = SwapchainSet::create(runtime, graphics, &selection.views)?;
        let mut space = match ReferenceSpaceTracker::create(
            runtime,
            config.reference_space,
            config.recreate_space_on_change,
        ) {
            Ok(space) => space,
            Err(e) => {
                swapchains.destroy(runtime, graphics);
                return Err(e);
            }
        };
        let mut scene = match Scene::new(graphics, &config.scene, model_renderer.take()) {
            Ok(scene) => scene,
            Err(e) => {
                swapchains.destroy(runtime, graphics);
                space.destroy(runtime);
                return Err(e);
            }
        };

        let mut frames = FrameLoopController::new(&selection, graphics.api(), &config.render);
        let mut rendered_frames = 0;

        let mut loop_state = LoopState {
            config: &*config,
            ctx: &mut *ctx,
            machine: &mut machine,
            frames: &mut frames,
            rendered_frames: &mut rendered_frames,
        };
        let result = loop_state.run(runtime, graphics, platform, &swapchains, &mut space, &mut scene);

        // Teardown: drain the GPU, then swapchains (views first), space, scene.
        graphics.flush();
        graphics.wait_idle();
        swapchains.destroy(runtime, graphics);
        space.destroy(runtime);
        scene.release(graphics);

        if let Err(e) = &result {
            error!("XR: run aborted: {}", e);
        }
        result?;

        let summary = RunSummary {
            frames: frames.frames_ended(),
            rendered_frames,
            final_state: ctx.state(),
            session_running: ctx.is_session_running(),
            application_running: ctx.is_application_running(),
            stale_events: machine.stale_events(),
            lost_events: machine.lost_events(),
        };
        info!("XR: shutting down {}", summary.to_sexp());
        Ok(summary)
    }
}

struct LoopState<'a> {
    config: &'a AppConfig,
    ctx: &'a mut SessionContext,
    machine: &'a mut SessionStateMachine,
    frames: &'a mut FrameLoopController,
    rendered_frames: &'a mut u64,
}

impl LoopState<'_> {
    fn run(
        &mut self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        platform: &mut dyn PlatformEvents,
        swapchains: &SwapchainSet,
        space: &mut ReferenceSpaceTracker,
        scene: &mut Scene,
    ) -> Result<()> {
        let mut last_status_log = Instant::now();

        while self.ctx.is_application_running() {
            if !platform.keep_running() {
                self.ctx.request_exit();
                break;
            }

            let polled = self.machine.poll_events(runtime, self.ctx)?;
            if polled.reference_space_change_pending {
                space.mark_change_pending();
            }
            if !self.ctx.is_application_running() {
                break;
            }
            if !self.ctx.is_session_running() {
                std::thread::sleep(self.config.idle_poll_interval);
                continue;
            }

            space.refresh_if_pending(runtime)?;

            let report = self.frames.tick(
                runtime,
                graphics,
                self.ctx,
                FrameResources {
                    swapchains,
                    space: &mut *space,
                    scene: &mut *scene,
                },
            )?;
            if matches!(report.outcome, FrameOutcome::Rendered { .. }) {
                *self.rendered_frames += 1;
            }

            if let Some(limit) = self.config.max_frames {
                if self.frames.frames_ended() >= limit {
                    info!("XR: frame limit {} reached", limit);
                    self.ctx.request_exit();
                }
            }

            if let Some(interval) = self.config.stats_interval {
                if last_status_log.elapsed() >= interval {
                    info!(
                        "XR status: {} {}",
                        self.ctx.status_sexp(),
                        self.frames.timing().stats_sexp()
                    );
                    last_status_log = Instant::now();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XrError;
    use crate::backend::headless::{
        GraphicsCommand, RecordingGraphics, RuntimeCall, SimulatedRuntime, SimulatedRuntimeConfig,
    };

    fn quick_config() -> AppConfig {
        AppConfig {
            idle_poll_interval: Duration::ZERO,
            stats_interval: None,
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_full_session_runs_to_exit() {
        let mut runtime_config = SimulatedRuntimeConfig::default();
        runtime_config.exit_after_frames = Some(5);
        let mut app = App::new(
            quick_config(),
            SimulatedRuntime::new(runtime_config),
            RecordingGraphics::new(GraphicsApi::Vulkan),
        );

        let summary = app.run(&mut || true).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.rendered_frames, 5);
        assert_eq!(summary.final_state, SessionState::Exiting);
        assert!(!summary.session_running);
        assert!(!summary.application_running);

        let runtime = app.runtime();
        assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::BeginSession(_))), 1);
        assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::EndSession)), 1);
        assert_eq!(runtime.live_swapchain_count(), 0);
        assert_eq!(runtime.live_space_count(), 0);
        assert_eq!(app.graphics().live_view_count(), 0);
    }

    #[test]
    fn test_platform_exit_stops_loop() {
        let config = AppConfig {
            graphics_api: GraphicsApi::D3D12,
            ..quick_config()
        };
        let mut app = App::new(
            config,
            SimulatedRuntime::new(SimulatedRuntimeConfig::for_api(GraphicsApi::D3D12)),
            RecordingGraphics::new(GraphicsApi::D3D12),
        );
        let mut ticks = 0;
        let summary = app
            .run(&mut || {
                ticks += 1;
                ticks <= 3
            })
            .unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.rendered_frames, 3);
        assert!(!summary.application_running);
        assert!(summary.session_running);
    }

    #[test]
    fn test_frame_limit() {
        let config = AppConfig {
            max_frames: Some(4),
            graphics_api: GraphicsApi::OpenGl,
            ..quick_config()
        };
        let mut app = App::new(
            config,
            SimulatedRuntime::new(SimulatedRuntimeConfig::for_api(GraphicsApi::OpenGl)),
            RecordingGraphics::new(GraphicsApi::OpenGl),
        );
        let summary = app.run(&mut || true).unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.final_state, SessionState::Focused);
    }

    #[test]
    fn test_teardown_order() {
        let config = AppConfig {
            max_frames: Some(1),
            ..quick_config()
        };
        let mut app = App::new(
            config,
            SimulatedRuntime::new(SimulatedRuntimeConfig::default()),
            RecordingGraphics::new(GraphicsApi::Vulkan),
        );
        app.run(&mut || true).unwrap();

        let log = app.graphics().log();
        let finish = log.iter().rposition(|c| *c == GraphicsCommand::FinishFrame).unwrap();
        let idle = log.iter().position(|c| *c == GraphicsCommand::WaitIdle).unwrap();
        let first_release = log
            .iter()
            .position(|c| matches!(c, GraphicsCommand::ReleaseView(_)))
            .unwrap();
        let mesh_release = log
            .iter()
            .position(|c| matches!(c, GraphicsCommand::ReleaseMesh(_)))
            .unwrap();
        assert!(finish < idle && idle < first_release && first_release < mesh_release);

        let calls = app.runtime().calls();
        let last_swapchain = calls
            .iter()
            .rposition(|c| matches!(c, RuntimeCall::DestroySwapchain(_)))
            .unwrap();
        let space = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::DestroySpace(_)))
            .unwrap();
        assert!(last_swapchain < space);
    }

    #[test]
    fn test_setup_failure_releases_resources() {
        let mut runtime_config = SimulatedRuntimeConfig::default();
        runtime_config.swapchain_formats = vec![124];
        let mut app = App::new(
            quick_config(),
            SimulatedRuntime::new(runtime_config),
            RecordingGraphics::new(GraphicsApi::Vulkan),
        );
        assert!(app.run(&mut || true).is_err());
        assert_eq!(app.runtime().live_swapchain_count(), 0);
        assert_eq!(app.runtime().live_space_count(), 0);
    }

    #[test]
    fn test_api_mismatch_rejected_before_setup() {
        let mut app = App::new(
            quick_config(),
            SimulatedRuntime::new(SimulatedRuntimeConfig::for_api(GraphicsApi::D3D11)),
            RecordingGraphics::new(GraphicsApi::D3D11),
        );
        let err = app.run(&mut || true).unwrap_err();
        assert!(matches!(
            err,
            XrError::Graphics(GraphicsError::ApiMismatch {
                configured: GraphicsApi::Vulkan,
                backend: GraphicsApi::D3D11,
            })
        ));
        assert_eq!(
            app.runtime()
                .count_calls(|c| matches!(c, RuntimeCall::CreateSwapchain(_))),
            0
        );
    }

    #[test]
    fn test_signal_pump_stops_on_request() {
        // No handlers installed; only this test touches the shutdown flag.
        let mut pump = SignalPump {
            started: Instant::now(),
            exit_after: None,
        };
        assert!(pump.keep_running());
        request_shutdown();
        assert!(shutdown_requested());
        assert!(!pump.keep_running());
    }

    /// Plist lookup over a parsed status line.
    fn plist_get(value: &lexpr::Value, key: &str) -> Option<String> {
        let prefixed = format!(":{key}");
        let mut items = value.list_iter()?;
        while let Some(k) = items.next() {
            let is_key = match k {
                lexpr::Value::Keyword(k) => k.as_ref() == key,
                lexpr::Value::Symbol(s) => s.as_ref() == prefixed,
                _ => false,
            };
            let v = items.next()?;
            if is_key {
                return Some(match v {
                    lexpr::Value::Keyword(v) => v.to_string(),
                    lexpr::Value::Symbol(v) => v.trim_start_matches(':').to_string(),
                    other => other.to_string(),
                });
            }
        }
        None
    }

    #[test]
    fn test_summary_sexp_is_plist() {
        let summary = RunSummary {
            frames: 12,
            rendered_frames: 10,
            final_state: SessionState::Exiting,
            session_running: false,
            application_running: false,
            stale_events: 1,
            lost_events: 0,
        };
        let value = lexpr::from_str(&summary.to_sexp()).unwrap();
        assert_eq!(plist_get(&value, "frames").as_deref(), Some("12"));
        assert_eq!(plist_get(&value, "rendered").as_deref(), Some("10"));
        assert_eq!(plist_get(&value, "state").as_deref(), Some("exiting"));
        assert_eq!(plist_get(&value, "stale-events").as_deref(), Some("1"));
    }

    #[test]
    fn test_status_sexp_parses() {
        let ctx = SessionContext::new();
        let value = lexpr::from_str(&ctx.status_sexp()).unwrap();
        assert_eq!(plist_get(&value, "state").as_deref(), Some("unknown"));
    }
}
