//! xrloop: XR session lifecycle and stereo frame presentation.
//!
//! The core (`vr`) drives an XR runtime and a graphics device through two
//! capability traits. `backend` provides a simulated runtime and a recording
//! graphics device, plus the OpenXR adapter behind the `vr` feature. `app`
//! ties setup, the frame loop and teardown together.

pub mod app;
pub mod backend;
pub mod error;
pub mod vr;

pub use app::{App, AppConfig, PlatformEvents, RunSummary, SignalPump};
pub use error::{GraphicsError, NegotiationError, Result, XrError};
