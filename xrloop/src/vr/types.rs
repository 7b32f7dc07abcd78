//! Plain data exchanged between the runtime, the graphics capability and the
//! frame loop. Compiled unconditionally (no openxrs dependency).

use std::fmt;

use bitflags::bitflags;
use glam::{Quat, Vec3};

// ── Handles ─────────────────────────────────────────────────

/// Session identity as reported by the runtime. Events carry it so that
/// messages addressed to an older session can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceHandle(pub u64);

/// Native image enumerated from a swapchain (VkImage, GL texture name, ID3D texture pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeImage(pub u64);

/// Runtime clock value in nanoseconds. Only ever echoed back to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct XrTime(i64);

impl XrTime {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for XrTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// ── Spatial ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as four half-angles in radians. Left and down are negative
/// for a symmetric frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

/// Reference space type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSpaceType {
    View,
    Local,
    Stage,
}

impl ReferenceSpaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Local => "local",
            Self::Stage => "stage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "local" => Some(Self::Local),
            "stage" => Some(Self::Stage),
            _ => None,
        }
    }
}

// ── System configuration ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

impl ViewConfigurationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryMono => "primary-mono",
            Self::PrimaryStereo => "primary-stereo",
        }
    }
}

impl fmt::Display for ViewConfigurationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

impl EnvironmentBlendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opaque => "opaque",
            Self::Additive => "additive",
            Self::AlphaBlend => "alpha-blend",
        }
    }
}

/// Per-view recommendations and limits from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub recommended_sample_count: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub max_sample_count: u32,
}

impl ViewConfigurationView {
    pub fn recommended(width: u32, height: u32, sample_count: u32) -> Self {
        Self {
            recommended_width: width,
            recommended_height: height,
            recommended_sample_count: sample_count,
            max_width: width,
            max_height: height,
            max_sample_count: sample_count,
        }
    }
}

// ── Per-frame ───────────────────────────────────────────────

bitflags! {
    /// Validity of the poses returned by a view location query.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ViewStateFlags: u32 {
        const ORIENTATION_VALID = 0x1;
        const POSITION_VALID = 0x2;
        const ORIENTATION_TRACKED = 0x4;
        const POSITION_TRACKED = 0x8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedView {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedViews {
    pub flags: ViewStateFlags,
    pub views: Vec<LocatedView>,
}

/// Result of waiting for the next frame slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub predicted_display_time: XrTime,
    pub predicted_display_period_ns: i64,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}
