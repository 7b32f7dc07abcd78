//! Recording graphics backend. No GPU, every command goes into a log.
//!
//! Used by the headless run mode and by tests to check what the frame loop
//! asked the device and shading layers to do.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Vec4};
use tracing::debug;

use crate::error::GraphicsError;
use crate::vr::graphics::{
    GraphicsApi, GraphicsBackend, MeshHandle, ModelHandle, ModelRenderer, ObjectConstants,
    PbrFrameParams, SwapchainImageDesc, TextureViewId, ViewKind,
};
use crate::vr::types::{NativeImage, Rect2D};

#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsCommand {
    WrapImage {
        view: TextureViewId,
        image: NativeImage,
        kind: ViewKind,
    },
    ReleaseView(TextureViewId),
    SetRenderTargets {
        color: TextureViewId,
        depth: TextureViewId,
    },
    ClearColor {
        view: TextureViewId,
        color: [f32; 4],
    },
    ClearDepth {
        view: TextureViewId,
        depth: f32,
    },
    SetViewport(Rect2D),
    CreateMesh(MeshHandle),
    ReleaseMesh(MeshHandle),
    DrawMesh {
        mesh: MeshHandle,
        model_view_proj: Mat4,
        color: Vec4,
    },
    LoadModel(ModelHandle),
    RenderModel {
        model: ModelHandle,
        transform: Mat4,
        params: PbrFrameParams,
    },
    ReleaseModel(ModelHandle),
    Flush,
    FinishFrame,
    WaitIdle,
}

/// Shared between a [`RecordingGraphics`] and its [`RecordingModelRenderer`]
/// so both layers land in one ordered log.
pub type CommandLog = Rc<RefCell<Vec<GraphicsCommand>>>;

pub struct RecordingGraphics {
    api: GraphicsApi,
    log: CommandLog,
    next_view: u32,
    next_mesh: u32,
    live_views: HashSet<TextureViewId>,
    wrap_calls: usize,
    fail_wrap_on: Option<usize>,
    fail_next_bind: bool,
    frames_finished: u64,
}

impl RecordingGraphics {
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            log: Rc::new(RefCell::new(Vec::new())),
            next_view: 1,
            next_mesh: 1,
            live_views: HashSet::new(),
            wrap_calls: 0,
            fail_wrap_on: None,
            fail_next_bind: false,
            frames_finished: 0,
        }
    }

    pub fn shared_log(&self) -> CommandLog {
        Rc::clone(&self.log)
    }

    pub fn log(&self) -> Vec<GraphicsCommand> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&mut self) {
        self.log.borrow_mut().clear();
    }

    /// Texture views wrapped and not yet released.
    pub fn live_view_count(&self) -> usize {
        self.live_views.len()
    }

    pub fn frames_finished(&self) -> u64 {
        self.frames_finished
    }

    /// Make the n-th wrap call (counting from 1) fail.
    pub fn fail_wrap_on(&mut self, n: usize) {
        self.fail_wrap_on = Some(n);
    }

    pub fn fail_next_bind(&mut self) {
        self.fail_next_bind = true;
    }

    fn push(&self, command: GraphicsCommand) {
        self.log.borrow_mut().push(command);
    }
}

impl GraphicsBackend for RecordingGraphics {
    fn api(&self) -> GraphicsApi {
        self.api
    }

    fn wrap_swapchain_image(
        &mut self,
        image: NativeImage,
        desc: &SwapchainImageDesc,
    ) -> Result<TextureViewId, GraphicsError> {
        self.wrap_calls += 1;
        if self.fail_wrap_on == Some(self.wrap_calls) {
            return Err(GraphicsError::Backend(format!("cannot wrap {}", desc.name)));
        }
        let view = TextureViewId(self.next_view);
        self.next_view += 1;
        self.live_views.insert(view);
        self.push(GraphicsCommand::WrapImage {
            view,
            image,
            kind: desc.kind,
        });
        debug!("recording: wrapped {} as {:?}", desc.name, view);
        Ok(view)
    }

    fn release_texture_view(&mut self, view: TextureViewId) {
        self.live_views.remove(&view);
        self.push(GraphicsCommand::ReleaseView(view));
    }

    fn set_render_targets(
        &mut self,
        color: TextureViewId,
        depth: TextureViewId,
    ) -> Result<(), GraphicsError> {
        if std::mem::take(&mut self.fail_next_bind) {
            return Err(GraphicsError::Backend("device removed".into()));
        }
        for view in [color, depth] {
            if !self.live_views.contains(&view) {
                return Err(GraphicsError::UnknownView(view));
            }
        }
        self.push(GraphicsCommand::SetRenderTargets { color, depth });
        Ok(())
    }

    fn clear_render_target(&mut self, view: TextureViewId, color: [f32; 4]) {
        self.push(GraphicsCommand::ClearColor { view, color });
    }

    fn clear_depth_stencil(&mut self, view: TextureViewId, depth: f32) {
        self.push(GraphicsCommand::ClearDepth { view, depth });
    }

    fn set_viewport(&mut self, rect: Rect2D) {
        self.push(GraphicsCommand::SetViewport(rect));
    }

    fn create_cuboid_mesh(&mut self) -> Result<MeshHandle, GraphicsError> {
        let mesh = MeshHandle(self.next_mesh);
        self.next_mesh += 1;
        self.push(GraphicsCommand::CreateMesh(mesh));
        Ok(mesh)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.push(GraphicsCommand::ReleaseMesh(mesh));
    }

    fn draw_mesh(&mut self, mesh: MeshHandle, constants: &ObjectConstants) {
        self.push(GraphicsCommand::DrawMesh {
            mesh,
            model_view_proj: constants.model_view_proj,
            color: constants.color,
        });
    }

    fn flush(&mut self) {
        self.push(GraphicsCommand::Flush);
    }

    fn finish_frame(&mut self) {
        self.frames_finished += 1;
        self.push(GraphicsCommand::FinishFrame);
    }

    fn wait_idle(&mut self) {
        self.push(GraphicsCommand::WaitIdle);
    }
}

/// Model layer stand-in that accepts any path.
pub struct RecordingModelRenderer {
    log: CommandLog,
    next_model: u32,
}

impl RecordingModelRenderer {
    pub fn new(log: CommandLog) -> Self {
        Self { log, next_model: 1 }
    }
}

impl ModelRenderer for RecordingModelRenderer {
    fn load_model(&mut self, path: &Path) -> Result<ModelHandle, GraphicsError> {
        if path.as_os_str().is_empty() {
            return Err(GraphicsError::Backend("empty model path".into()));
        }
        let model = ModelHandle(self.next_model);
        self.next_model += 1;
        self.log.borrow_mut().push(GraphicsCommand::LoadModel(model));
        Ok(model)
    }

    fn render_model(&mut self, model: ModelHandle, transform: Mat4, frame: &PbrFrameParams) {
        self.log.borrow_mut().push(GraphicsCommand::RenderModel {
            model,
            transform,
            params: *frame,
        });
    }

    fn release_model(&mut self, model: ModelHandle) {
        self.log.borrow_mut().push(GraphicsCommand::ReleaseModel(model));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::format::TextureFormat;

    fn desc(kind: ViewKind) -> SwapchainImageDesc {
        SwapchainImageDesc {
            name: "view0-color[0]".into(),
            format: TextureFormat::Rgba8Unorm,
            width: 64,
            height: 64,
            sample_count: 1,
            kind,
        }
    }

    #[test]
    fn test_bind_requires_live_views() {
        let mut gfx = RecordingGraphics::new(GraphicsApi::D3D12);
        let color = gfx.wrap_swapchain_image(NativeImage(1), &desc(ViewKind::RenderTarget)).unwrap();
        let depth = gfx.wrap_swapchain_image(NativeImage(2), &desc(ViewKind::DepthStencil)).unwrap();
        assert!(gfx.set_render_targets(color, depth).is_ok());

        gfx.release_texture_view(depth);
        assert_eq!(
            gfx.set_render_targets(color, depth),
            Err(GraphicsError::UnknownView(depth))
        );
        assert_eq!(gfx.live_view_count(), 1);
    }

    #[test]
    fn test_injected_failures_fire_once() {
        let mut gfx = RecordingGraphics::new(GraphicsApi::Vulkan);
        gfx.fail_wrap_on(2);
        assert!(gfx.wrap_swapchain_image(NativeImage(1), &desc(ViewKind::RenderTarget)).is_ok());
        assert!(gfx.wrap_swapchain_image(NativeImage(2), &desc(ViewKind::RenderTarget)).is_err());
        assert!(gfx.wrap_swapchain_image(NativeImage(3), &desc(ViewKind::RenderTarget)).is_ok());

        let views: Vec<_> = gfx
            .log()
            .iter()
            .filter_map(|c| match c {
                GraphicsCommand::WrapImage { view, .. } => Some(*view),
                _ => None,
            })
            .collect();
        gfx.fail_next_bind();
        assert!(gfx.set_render_targets(views[0], views[1]).is_err());
        assert!(gfx.set_render_targets(views[0], views[1]).is_ok());
    }

    #[test]
    fn test_model_renderer_shares_log() {
        let gfx = RecordingGraphics::new(GraphicsApi::OpenGl);
        let mut models = RecordingModelRenderer::new(gfx.shared_log());
        let model = models.load_model(Path::new("helmet.glb")).unwrap();
        models.release_model(model);
        assert_eq!(
            gfx.log(),
            vec![GraphicsCommand::LoadModel(model), GraphicsCommand::ReleaseModel(model)]
        );
        assert!(models.load_model(Path::new("")).is_err());
    }
}
