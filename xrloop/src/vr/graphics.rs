//! Graphics capability consumed by the presentation core.
//!
//! Device and context creation for a concrete API live outside this crate.
//! The core only needs to wrap compositor-owned images as render targets,
//! record clears, viewports and draws, and flush. One backend is selected at
//! startup; [`GraphicsApi`] tells the core which projection and format
//! conventions that backend follows.

use std::path::Path;

use glam::{Mat4, Vec3, Vec4};

use crate::error::GraphicsError;
use crate::vr::format::{self, FormatClass, TextureFormat};
use crate::vr::types::{NativeImage, Rect2D};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    Vulkan,
    D3D11,
    D3D12,
    OpenGl,
    OpenGlEs,
}

impl GraphicsApi {
    pub const ALL: [GraphicsApi; 5] = [
        Self::Vulkan,
        Self::D3D11,
        Self::D3D12,
        Self::OpenGl,
        Self::OpenGlEs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vulkan => "vulkan",
            Self::D3D11 => "d3d11",
            Self::D3D12 => "d3d12",
            Self::OpenGl => "opengl",
            Self::OpenGlEs => "opengles",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|api| api.as_str() == s)
    }

    /// Clip space y points down (Vulkan).
    pub fn flips_y(&self) -> bool {
        matches!(self, Self::Vulkan)
    }

    /// NDC depth spans [-1, 1] instead of [0, 1] (GL family).
    pub fn has_negative_one_to_one_depth(&self) -> bool {
        matches!(self, Self::OpenGl | Self::OpenGlEs)
    }
}

/// Locally owned view into a compositor-owned swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
}

/// Description used when wrapping a swapchain image.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainImageDesc {
    pub name: String,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub kind: ViewKind,
}

/// Constants for one draw of the unit cuboid mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectConstants {
    pub view_proj: Mat4,
    pub model_view_proj: Mat4,
    pub model: Mat4,
    pub color: Vec4,
}

/// Camera portion of the per-frame shading parameter block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub position: Vec3,
    pub near_z: f32,
    pub far_z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneMapping {
    pub average_log_lum: f32,
    pub middle_gray: f32,
    pub white_point: f32,
}

impl Default for ToneMapping {
    fn default() -> Self {
        Self {
            average_log_lum: 0.3,
            middle_gray: 0.18,
            white_point: 3.0,
        }
    }
}

/// Per-frame parameter block handed to the shading layer for model draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbrFrameParams {
    pub camera: CameraParams,
    pub near_plane_depth: f32,
    pub far_plane_depth: f32,
    pub handedness: f32,
    pub frame_index: u64,
    pub light_count: u32,
    pub occlusion_strength: f32,
    pub emission_scale: f32,
    pub ibl_scale: f32,
    pub tone_mapping: ToneMapping,
}

impl PbrFrameParams {
    pub fn new(camera: CameraParams) -> Self {
        Self {
            camera,
            near_plane_depth: 0.0,
            far_plane_depth: 1.0,
            handedness: 1.0,
            frame_index: 0,
            light_count: 0,
            occlusion_strength: 1.0,
            emission_scale: 1.0,
            ibl_scale: 1.0,
            tone_mapping: ToneMapping::default(),
        }
    }
}

/// Instance/device layer.
pub trait GraphicsBackend {
    fn api(&self) -> GraphicsApi;

    /// Decide whether a runtime-advertised format can back a color or depth swapchain.
    fn classify_format(&self, native: i64) -> FormatClass {
        format::classify(self.api(), native)
    }

    fn wrap_swapchain_image(
        &mut self,
        image: NativeImage,
        desc: &SwapchainImageDesc,
    ) -> Result<TextureViewId, GraphicsError>;

    fn release_texture_view(&mut self, view: TextureViewId);

    /// Bind targets as they are. Acquired swapchain images are already in a
    /// writable layout, so no transition is recorded.
    fn set_render_targets(
        &mut self,
        color: TextureViewId,
        depth: TextureViewId,
    ) -> Result<(), GraphicsError>;

    fn clear_render_target(&mut self, view: TextureViewId, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, view: TextureViewId, depth: f32);

    /// Sets both viewport and scissor.
    fn set_viewport(&mut self, rect: Rect2D);

    fn create_cuboid_mesh(&mut self) -> Result<MeshHandle, GraphicsError>;

    fn release_mesh(&mut self, mesh: MeshHandle);

    fn draw_mesh(&mut self, mesh: MeshHandle, constants: &ObjectConstants);

    fn flush(&mut self);

    fn finish_frame(&mut self);

    /// Block until the GPU has consumed everything submitted so far.
    fn wait_idle(&mut self);
}

/// Asset/shading layer (model loader plus PBR renderer).
pub trait ModelRenderer {
    fn load_model(&mut self, path: &Path) -> Result<ModelHandle, GraphicsError>;

    fn render_model(&mut self, model: ModelHandle, transform: Mat4, frame: &PbrFrameParams);

    fn release_model(&mut self, model: ModelHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_parse() {
        assert_eq!(GraphicsApi::parse("vulkan"), Some(GraphicsApi::Vulkan));
        assert_eq!(GraphicsApi::parse("opengles"), Some(GraphicsApi::OpenGlEs));
        assert_eq!(GraphicsApi::parse("metal"), None);
    }

    #[test]
    fn test_api_conventions() {
        assert!(GraphicsApi::Vulkan.flips_y());
        assert!(!GraphicsApi::D3D12.flips_y());
        assert!(GraphicsApi::OpenGl.has_negative_one_to_one_depth());
        assert!(!GraphicsApi::Vulkan.has_negative_one_to_one_depth());
    }

    #[test]
    fn test_pbr_defaults() {
        let camera = CameraParams {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            position: Vec3::ZERO,
            near_z: 0.05,
            far_z: 100.0,
        };
        let params = PbrFrameParams::new(camera);
        assert_eq!(params.light_count, 0);
        assert_eq!(params.tone_mapping.white_point, 3.0);
        assert_eq!(params.far_plane_depth, 1.0);
    }
}
