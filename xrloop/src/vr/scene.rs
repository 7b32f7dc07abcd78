//! What each eye sees: a floor, a table and an optional model on top.

use std::path::PathBuf;

use glam::{Mat4, Quat, Vec3};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::vr::graphics::{
    CameraParams, GraphicsBackend, MeshHandle, ModelHandle, ModelRenderer, ObjectConstants,
    PbrFrameParams,
};
use crate::vr::math::pose_to_world;
use crate::vr::types::Pose;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    /// Height of the viewer's eyes above the floor, in meters.
    pub view_height: f32,
    pub model_path: Option<PathBuf>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            view_height: 1.5,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cuboid {
    pub pose: Pose,
    pub scale: Vec3,
    pub color: Vec3,
}

impl Cuboid {
    fn constants(&self, camera: &CameraParams) -> ObjectConstants {
        let model = pose_to_world(&self.pose, self.scale);
        ObjectConstants {
            view_proj: camera.view_proj,
            model_view_proj: camera.view_proj * model,
            model,
            color: self.color.extend(1.0),
        }
    }
}

/// Floor and table, placed relative to the viewer's eye height.
pub fn room_cuboids(view_height: f32) -> [Cuboid; 2] {
    [
        Cuboid {
            pose: Pose::from_position(Vec3::new(0.0, -view_height, 0.0)),
            scale: Vec3::new(2.0, 0.1, 2.0),
            color: Vec3::new(0.4, 0.5, 0.5),
        },
        Cuboid {
            pose: Pose::from_position(Vec3::new(0.0, -view_height + 0.9, -0.7)),
            scale: Vec3::new(1.0, 0.2, 1.0),
            color: Vec3::new(0.6, 0.6, 0.4),
        },
    ]
}

pub fn model_transform(view_height: f32) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        Vec3::splat(0.25),
        Quat::IDENTITY,
        Vec3::new(0.0, -view_height + 1.2, -0.7),
    )
}

struct LoadedModel {
    renderer: Box<dyn ModelRenderer>,
    handle: ModelHandle,
}

pub struct Scene {
    mesh: Option<MeshHandle>,
    cuboids: [Cuboid; 2],
    model: Option<LoadedModel>,
    model_transform: Mat4,
}

impl Scene {
    pub fn new(
        graphics: &mut dyn GraphicsBackend,
        config: &SceneConfig,
        model_renderer: Option<Box<dyn ModelRenderer>>,
    ) -> Result<Self> {
        let mesh = graphics.create_cuboid_mesh()?;

        let model = match (&config.model_path, model_renderer) {
            (Some(path), Some(mut renderer)) => {
                let handle = match renderer.load_model(path) {
                    Ok(handle) => handle,
                    Err(e) => {
                        graphics.release_mesh(mesh);
                        return Err(e.into());
                    }
                };
                info!("XR: loaded model {}", path.display());
                Some(LoadedModel { renderer, handle })
            }
            (Some(path), None) => {
                warn!("XR: no model renderer available, skipping {}", path.display());
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            mesh: Some(mesh),
            cuboids: room_cuboids(config.view_height),
            model,
            model_transform: model_transform(config.view_height),
        })
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Record the draws for one view into the currently bound targets.
    pub fn draw(&mut self, graphics: &mut dyn GraphicsBackend, camera: &CameraParams, frame_index: u64) {
        let Some(mesh) = self.mesh else {
            return;
        };
        for cuboid in &self.cuboids {
            graphics.draw_mesh(mesh, &cuboid.constants(camera));
        }

        if let Some(model) = self.model.as_mut() {
            let mut params = PbrFrameParams::new(*camera);
            params.frame_index = frame_index;
            model
                .renderer
                .render_model(model.handle, self.model_transform, &params);
        }
    }

    /// Safe to call more than once.
    pub fn release(&mut self, graphics: &mut dyn GraphicsBackend) {
        if let Some(mut model) = self.model.take() {
            model.renderer.release_model(model.handle);
        }
        if let Some(mesh) = self.mesh.take() {
            graphics.release_mesh(mesh);
            debug!("XR: scene resources released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{GraphicsCommand, RecordingGraphics, RecordingModelRenderer};
    use crate::vr::graphics::GraphicsApi;
    use glam::Vec4;

    fn camera() -> CameraParams {
        CameraParams {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            position: Vec3::ZERO,
            near_z: 0.05,
            far_z: 100.0,
        }
    }

    #[test]
    fn test_room_layout() {
        let [floor, table] = room_cuboids(1.5);
        assert_eq!(floor.pose.position, Vec3::new(0.0, -1.5, 0.0));
        assert_eq!(table.scale, Vec3::new(1.0, 0.2, 1.0));
        assert!((table.pose.position.y - (-0.6)).abs() < 1e-6);
        let m = model_transform(1.5);
        assert!((m.w_axis.y - (-0.3)).abs() < 1e-6);
        assert_eq!(m.x_axis.x, 0.25);
    }

    #[test]
    fn test_draws_two_cuboids_without_model() {
        let mut graphics = RecordingGraphics::new(GraphicsApi::D3D11);
        let mut scene = Scene::new(&mut graphics, &SceneConfig::default(), None).unwrap();
        graphics.clear_log();

        scene.draw(&mut graphics, &camera(), 0);
        let colors: Vec<Vec4> = graphics
            .log()
            .iter()
            .filter_map(|c| match c {
                GraphicsCommand::DrawMesh { color, .. } => Some(*color),
                _ => None,
            })
            .collect();
        assert_eq!(
            colors,
            vec![Vec4::new(0.4, 0.5, 0.5, 1.0), Vec4::new(0.6, 0.6, 0.4, 1.0)]
        );
    }

    #[test]
    fn test_model_gets_frame_params() {
        let mut graphics = RecordingGraphics::new(GraphicsApi::Vulkan);
        let renderer = RecordingModelRenderer::new(graphics.shared_log());
        let config = SceneConfig {
            model_path: Some(PathBuf::from("DamagedHelmet.glb")),
            ..SceneConfig::default()
        };
        let mut scene = Scene::new(&mut graphics, &config, Some(Box::new(renderer))).unwrap();
        assert!(scene.has_model());

        // Long sessions run past u32 frames.
        let frame = u64::from(u32::MAX) + 7;
        scene.draw(&mut graphics, &camera(), frame);
        let params = graphics
            .log()
            .iter()
            .find_map(|c| match c {
                GraphicsCommand::RenderModel { params, .. } => Some(*params),
                _ => None,
            })
            .unwrap();
        assert_eq!(params.frame_index, frame);
        assert_eq!(params.light_count, 0);
        assert_eq!(params.tone_mapping.middle_gray, 0.18);
        assert_eq!(params.camera.near_z, 0.05);

        scene.release(&mut graphics);
        scene.release(&mut graphics);
        let releases = graphics
            .log()
            .iter()
            .filter(|c| matches!(c, GraphicsCommand::ReleaseModel(_) | GraphicsCommand::ReleaseMesh(_)))
            .count();
        assert_eq!(releases, 2);
    }

    #[test]
    fn test_model_without_renderer_is_skipped() {
        let mut graphics = RecordingGraphics::new(GraphicsApi::Vulkan);
        let config = SceneConfig {
            model_path: Some(PathBuf::from("missing.glb")),
            ..SceneConfig::default()
        };
        let scene = Scene::new(&mut graphics, &config, None).unwrap();
        assert!(!scene.has_model());
    }
}
