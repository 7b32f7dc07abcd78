//! XR presentation core: session lifecycle, swapchains and the frame loop.
//!
//! Provides:
//! - `session`: runtime event handling and the begin/end lifecycle
//! - `swapchain`: per-view color/depth swapchains and format negotiation
//! - `reference_space`: the space poses are located in
//! - `frame_loop` / `view_renderer`: the per-frame and per-view protocols
//! - `runtime` / `graphics`: the capabilities the core is driven through
//!
//! Nothing here depends on openxrs; the real runtime adapter lives in
//! `backend::openxr` behind the `vr` feature.

pub mod format;
pub mod frame_loop;
pub mod frame_timing;
pub mod graphics;
pub mod math;
pub mod negotiation;
pub mod reference_space;
pub mod runtime;
pub mod scene;
pub mod session;
pub mod swapchain;
pub mod types;
pub mod view_renderer;

pub use frame_loop::{FrameLoopController, FrameOutcome, FrameReport, RenderConfig};
pub use graphics::{GraphicsApi, GraphicsBackend, ModelRenderer};
pub use reference_space::ReferenceSpaceTracker;
pub use runtime::{RuntimeEvent, XrRuntime};
pub use session::{SessionContext, SessionState, SessionStateMachine};
pub use swapchain::SwapchainSet;
pub use types::ReferenceSpaceType;
