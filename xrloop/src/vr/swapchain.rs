//! Per-view color and depth swapchains.
//!
//! The runtime allocates and owns every backing image. This set owns the
//! texture views wrapped around them and hands out borrowed
//! [`ViewSwapchains`] by view index. Image counts are whatever the runtime
//! reports and may differ between the color and depth chain of one view.

use tracing::{debug, info, warn};

use crate::error::{NegotiationError, Result};
use crate::vr::format::{FormatClass, TextureFormat};
use crate::vr::graphics::{GraphicsBackend, SwapchainImageDesc, TextureViewId, ViewKind};
use crate::vr::runtime::{SwapchainCreateInfo, SwapchainUsage, XrRuntime};
use crate::vr::types::{NativeImage, Rect2D, SwapchainHandle, ViewConfigurationView};

// ── Format negotiation ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Code as advertised by the runtime.
    pub native: i64,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormats {
    pub color: NegotiatedFormat,
    pub depth: NegotiatedFormat,
}

/// Pick the first color and the first depth entry of `offered` in one pass.
///
/// Runtime order is preference order. Entries `classify` rejects are skipped.
pub fn negotiate_formats(
    offered: &[i64],
    classify: impl Fn(i64) -> FormatClass,
) -> std::result::Result<NegotiatedFormats, NegotiationError> {
    let mut color = None;
    let mut depth = None;

    for &native in offered {
        match classify(native) {
            FormatClass::Color(format) if color.is_none() => {
                color = Some(NegotiatedFormat { native, format })
            }
            FormatClass::Depth(format) if depth.is_none() => {
                depth = Some(NegotiatedFormat { native, format })
            }
            _ => {}
        }
        if color.is_some() && depth.is_some() {
            break;
        }
    }

    let offered = offered.len();
    Ok(NegotiatedFormats {
        color: color.ok_or(NegotiationError::NoColorFormat { offered })?,
        depth: depth.ok_or(NegotiationError::NoDepthFormat { offered })?,
    })
}

// ── Swapchains ──────────────────────────────────────────────

#[derive(Debug)]
pub struct Swapchain {
    pub handle: SwapchainHandle,
    pub native_format: i64,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    images: Vec<NativeImage>,
    views: Vec<TextureViewId>,
}

impl Swapchain {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[NativeImage] {
        &self.images
    }

    /// View wrapping the image at an index returned by acquisition.
    pub fn view(&self, image_index: u32) -> Option<TextureViewId> {
        self.views.get(image_index as usize).copied()
    }

    pub fn rect(&self) -> Rect2D {
        Rect2D::from_extent(self.width, self.height)
    }

    fn release(self, runtime: &mut dyn XrRuntime, graphics: &mut dyn GraphicsBackend) {
        for view in self.views {
            graphics.release_texture_view(view);
        }
        if let Err(e) = runtime.destroy_swapchain(self.handle) {
            warn!("XR: failed to destroy swapchain {:?}: {}", self.handle, e);
        }
    }
}

#[derive(Debug)]
pub struct ViewSwapchains {
    pub color: Swapchain,
    pub depth: Swapchain,
}

struct SwapchainRequest<'a> {
    name: String,
    usage: SwapchainUsage,
    format: &'a NegotiatedFormat,
    view: &'a ViewConfigurationView,
}

fn create_swapchain(
    runtime: &mut dyn XrRuntime,
    graphics: &mut dyn GraphicsBackend,
    req: SwapchainRequest<'_>,
) -> Result<Swapchain> {
    let info = SwapchainCreateInfo::new(
        req.usage,
        req.format.native,
        req.view.recommended_width,
        req.view.recommended_height,
        req.view.recommended_sample_count,
    );
    let handle = runtime.create_swapchain(&info)?;

    let mut swapchain = Swapchain {
        handle,
        native_format: req.format.native,
        format: req.format.format,
        width: info.width,
        height: info.height,
        sample_count: info.sample_count,
        images: Vec::new(),
        views: Vec::new(),
    };

    match wrap_images(runtime, graphics, &mut swapchain, &req) {
        Ok(()) => {
            debug!(
                "XR: {} swapchain {:?}: {}x{} {} with {} image(s)",
                req.name,
                handle,
                info.width,
                info.height,
                req.format.format.as_str(),
                swapchain.image_count()
            );
            Ok(swapchain)
        }
        Err(e) => {
            swapchain.release(runtime, graphics);
            Err(e)
        }
    }
}

fn wrap_images(
    runtime: &mut dyn XrRuntime,
    graphics: &mut dyn GraphicsBackend,
    swapchain: &mut Swapchain,
    req: &SwapchainRequest<'_>,
) -> Result<()> {
    swapchain.images = runtime.enumerate_swapchain_images(swapchain.handle)?;
    let kind = match req.usage {
        SwapchainUsage::Color => ViewKind::RenderTarget,
        SwapchainUsage::DepthStencil => ViewKind::DepthStencil,
    };
    for (i, image) in swapchain.images.iter().enumerate() {
        let desc = SwapchainImageDesc {
            name: format!("{}[{}]", req.name, i),
            format: swapchain.format,
            width: swapchain.width,
            height: swapchain.height,
            sample_count: swapchain.sample_count,
            kind,
        };
        let view = graphics.wrap_swapchain_image(*image, &desc)?;
        swapchain.views.push(view);
    }
    Ok(())
}

/// Arena of per-view swapchains for one session.
#[derive(Debug)]
pub struct SwapchainSet {
    formats: NegotiatedFormats,
    views: Vec<ViewSwapchains>,
    destroyed: bool,
}

impl SwapchainSet {
    /// Negotiate formats and create a color and a depth swapchain per view,
    /// each sized to that view's recommendation.
    ///
    /// On failure everything created so far is released again.
    pub fn create(
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        view_layout: &[ViewConfigurationView],
    ) -> Result<Self> {
        let offered = runtime.enumerate_swapchain_formats()?;
        let formats = negotiate_formats(&offered, |code| graphics.classify_format(code))?;
        info!(
            "XR: swapchain formats: color {} ({}), depth {} ({})",
            formats.color.format.as_str(),
            formats.color.native,
            formats.depth.format.as_str(),
            formats.depth.native
        );

        let mut set = Self {
            formats,
            views: Vec::with_capacity(view_layout.len()),
            destroyed: false,
        };

        for (index, view) in view_layout.iter().enumerate() {
            match set.create_view(runtime, graphics, index, view) {
                Ok(pair) => set.views.push(pair),
                Err(e) => {
                    set.destroy(runtime, graphics);
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    fn create_view(
        &self,
        runtime: &mut dyn XrRuntime,
        graphics: &mut dyn GraphicsBackend,
        index: usize,
        view: &ViewConfigurationView,
    ) -> Result<ViewSwapchains> {
        let color = create_swapchain(
            runtime,
            graphics,
            SwapchainRequest {
                name: format!("view{}-color", index),
                usage: SwapchainUsage::Color,
                format: &self.formats.color,
                view,
            },
        )?;
        let depth = create_swapchain(
            runtime,
            graphics,
            SwapchainRequest {
                name: format!("view{}-depth", index),
                usage: SwapchainUsage::DepthStencil,
                format: &self.formats.depth,
                view,
            },
        );
        match depth {
            Ok(depth) => Ok(ViewSwapchains { color, depth }),
            Err(e) => {
                color.release(runtime, graphics);
                Err(e)
            }
        }
    }

    pub fn formats(&self) -> &NegotiatedFormats {
        &self.formats
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, index: usize) -> Option<&ViewSwapchains> {
        self.views.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewSwapchains> {
        self.views.iter()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Release texture views, then destroy their swapchains, last view first.
    /// Safe to call more than once.
    pub fn destroy(&mut self, runtime: &mut dyn XrRuntime, graphics: &mut dyn GraphicsBackend) {
        if self.destroyed {
            return;
        }
        while let Some(ViewSwapchains { color, depth }) = self.views.pop() {
            depth.release(runtime, graphics);
            color.release(runtime, graphics);
        }
        self.destroyed = true;
        debug!("XR: swapchains destroyed");
    }
}

impl Drop for SwapchainSet {
    fn drop(&mut self) {
        if !self.destroyed && !self.views.is_empty() {
            warn!(
                "XR: swapchain set dropped with {} live view(s) still attached",
                self.views.len()
            );
        }
    }
}
