//! Runtime and graphics implementations the core can be driven with.
//!
//! - `headless`: simulated runtime for CI and the default run mode
//! - `recording`: graphics capability that logs commands instead of drawing
//! - `openxr`: adapter over a real OpenXR session (feature `vr`)

pub mod headless;
#[cfg(feature = "vr")]
pub mod openxr;
pub mod recording;
