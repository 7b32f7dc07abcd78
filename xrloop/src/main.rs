//! xrloop - XR session lifecycle and stereo frame loop
//!
//! Runs the presentation core against the simulated runtime and the
//! recording graphics device. Embedders with a real OpenXR session use the
//! library directly (`backend::openxr`, feature `vr`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use xrloop::backend::headless::{HeadlessConfig, SimulatedRuntime};
use xrloop::backend::recording::{RecordingGraphics, RecordingModelRenderer};
use xrloop::vr::graphics::GraphicsApi;
use xrloop::vr::types::ReferenceSpaceType;
use xrloop::{App, AppConfig, SignalPump};

#[derive(Parser, Debug)]
#[command(name = "xrloop", about = "XR session lifecycle and stereo frame loop")]
struct Cli {
    /// Graphics API: vulkan, opengl, opengles, d3d11, or d3d12
    #[arg(long, default_value = "vulkan")]
    graphics_api: String,

    /// Reference space: view, local, or stage
    #[arg(long, default_value = "local")]
    reference_space: String,

    /// Have the runtime request exit after N frames (0 exits once the session begins)
    #[arg(long)]
    frames: Option<u64>,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Number of views (1 = mono, 2 = stereo)
    #[arg(long, default_value_t = 2)]
    view_count: u32,

    /// Per-view resolution as WxH
    #[arg(long, default_value = "1024x1024")]
    resolution: String,

    /// Images per color swapchain
    #[arg(long, default_value_t = 3)]
    color_images: u32,

    /// Images per depth swapchain
    #[arg(long, default_value_t = 2)]
    depth_images: u32,

    /// Model to draw on the table
    #[arg(long)]
    model: Option<PathBuf>,

    /// Eye height above the floor in meters
    #[arg(long, default_value_t = 1.5)]
    view_height: f32,

    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("xrloop {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xrloop=info".into()),
        )
        .init();

    info!("xrloop v{} starting", env!("CARGO_PKG_VERSION"));

    let Some(api) = GraphicsApi::parse(&cli.graphics_api) else {
        bail!(
            "unknown graphics API: {}. Use: vulkan, opengl, opengles, d3d11, or d3d12",
            cli.graphics_api
        );
    };
    let Some(reference_space) = ReferenceSpaceType::parse(&cli.reference_space) else {
        bail!(
            "unknown reference space: {}. Use: view, local, or stage",
            cli.reference_space
        );
    };
    let (width, height) = HeadlessConfig::parse_resolution(&cli.resolution)
        .with_context(|| format!("invalid resolution {:?}, expected WxH", cli.resolution))?;
    if !(1..=2).contains(&cli.view_count) {
        bail!("view count must be 1 or 2, got {}", cli.view_count);
    }

    let headless = HeadlessConfig {
        view_count: cli.view_count,
        width,
        height,
        color_image_count: cli.color_images,
        depth_image_count: cli.depth_images,
        exit_after_frames: cli.frames,
    };
    info!(
        "headless: {} view(s) at {}x{}, {} on {}",
        headless.view_count,
        width,
        height,
        reference_space.as_str(),
        api.as_str()
    );

    let mut config = AppConfig {
        graphics_api: api,
        reference_space,
        stats_interval: (cli.stats_interval > 0).then(|| Duration::from_secs(cli.stats_interval)),
        ..AppConfig::default()
    };
    config.scene.view_height = cli.view_height;
    config.scene.model_path = cli.model;

    let runtime = SimulatedRuntime::new(headless.runtime_config(api));
    let graphics = RecordingGraphics::new(config.graphics_api);
    let models = config
        .scene
        .model_path
        .is_some()
        .then(|| RecordingModelRenderer::new(graphics.shared_log()));

    let mut app = App::new(config, runtime, graphics);
    if let Some(models) = models {
        app = app.with_model_renderer(Box::new(models));
    }

    let mut pump = SignalPump::install(cli.exit_after.map(Duration::from_secs));
    let summary = app.run(&mut pump).context("XR run failed")?;

    println!("{}", summary.to_sexp());
    Ok(())
}
