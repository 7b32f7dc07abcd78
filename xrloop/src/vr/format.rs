//! Texture formats and their native codes per graphics API.
//!
//! Runtimes advertise swapchain formats as raw integers in the native
//! vocabulary of the bound graphics API (VkFormat, DXGI_FORMAT, GL internal
//! format). This table maps them onto a small API-neutral set.

use crate::vr::graphics::GraphicsApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgb10A2Unorm,
    Rg11B10Float,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,
}

impl TextureFormat {
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D24UnormS8Uint | Self::D32Float | Self::D32FloatS8X24Uint
        )
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgba8Unorm => "rgba8-unorm",
            Self::Rgba8UnormSrgb => "rgba8-unorm-srgb",
            Self::Bgra8Unorm => "bgra8-unorm",
            Self::Bgra8UnormSrgb => "bgra8-unorm-srgb",
            Self::Rgba16Float => "rgba16-float",
            Self::Rgb10A2Unorm => "rgb10a2-unorm",
            Self::Rg11B10Float => "rg11b10-float",
            Self::D16Unorm => "d16-unorm",
            Self::D24UnormS8Uint => "d24-unorm-s8-uint",
            Self::D32Float => "d32-float",
            Self::D32FloatS8X24Uint => "d32-float-s8x24-uint",
        }
    }
}

/// How a native format code can be used for a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Color(TextureFormat),
    Depth(TextureFormat),
    /// Not representable by the graphics backend; never selected.
    Unsupported,
}

impl FormatClass {
    pub fn of(format: Option<TextureFormat>) -> Self {
        match format {
            Some(f) if f.is_depth_stencil() => Self::Depth(f),
            Some(f) => Self::Color(f),
            None => Self::Unsupported,
        }
    }
}

// VkFormat
const VULKAN: &[(i64, TextureFormat)] = &[
    (37, TextureFormat::Rgba8Unorm),
    (43, TextureFormat::Rgba8UnormSrgb),
    (44, TextureFormat::Bgra8Unorm),
    (50, TextureFormat::Bgra8UnormSrgb),
    (64, TextureFormat::Rgb10A2Unorm),
    (97, TextureFormat::Rgba16Float),
    (122, TextureFormat::Rg11B10Float),
    (124, TextureFormat::D16Unorm),
    (126, TextureFormat::D32Float),
    (129, TextureFormat::D24UnormS8Uint),
    (130, TextureFormat::D32FloatS8X24Uint),
];

// DXGI_FORMAT, shared by D3D11 and D3D12
const DXGI: &[(i64, TextureFormat)] = &[
    (10, TextureFormat::Rgba16Float),
    (20, TextureFormat::D32FloatS8X24Uint),
    (24, TextureFormat::Rgb10A2Unorm),
    (26, TextureFormat::Rg11B10Float),
    (28, TextureFormat::Rgba8Unorm),
    (29, TextureFormat::Rgba8UnormSrgb),
    (40, TextureFormat::D32Float),
    (45, TextureFormat::D24UnormS8Uint),
    (55, TextureFormat::D16Unorm),
    (87, TextureFormat::Bgra8Unorm),
    (91, TextureFormat::Bgra8UnormSrgb),
];

// GL sized internal formats. GL has no sized BGRA8.
const GL: &[(i64, TextureFormat)] = &[
    (0x8058, TextureFormat::Rgba8Unorm),
    (0x8C43, TextureFormat::Rgba8UnormSrgb),
    (0x8059, TextureFormat::Rgb10A2Unorm),
    (0x881A, TextureFormat::Rgba16Float),
    (0x8C3A, TextureFormat::Rg11B10Float),
    (0x81A5, TextureFormat::D16Unorm),
    (0x88F0, TextureFormat::D24UnormS8Uint),
    (0x8CAC, TextureFormat::D32Float),
    (0x8CAD, TextureFormat::D32FloatS8X24Uint),
];

fn table(api: GraphicsApi) -> &'static [(i64, TextureFormat)] {
    match api {
        GraphicsApi::Vulkan => VULKAN,
        GraphicsApi::D3D11 | GraphicsApi::D3D12 => DXGI,
        GraphicsApi::OpenGl | GraphicsApi::OpenGlEs => GL,
    }
}

pub fn from_native(api: GraphicsApi, code: i64) -> Option<TextureFormat> {
    table(api)
        .iter()
        .find(|(native, _)| *native == code)
        .map(|(_, format)| *format)
}

pub fn to_native(api: GraphicsApi, format: TextureFormat) -> Option<i64> {
    table(api)
        .iter()
        .find(|(_, f)| *f == format)
        .map(|(native, _)| *native)
}

pub fn classify(api: GraphicsApi, code: i64) -> FormatClass {
    FormatClass::of(from_native(api, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_codes() {
        assert_eq!(from_native(GraphicsApi::Vulkan, 37), Some(TextureFormat::Rgba8Unorm));
        assert_eq!(from_native(GraphicsApi::Vulkan, 124), Some(TextureFormat::D16Unorm));
        assert_eq!(from_native(GraphicsApi::Vulkan, 9999), None);
    }

    #[test]
    fn test_classify_depth_and_color() {
        assert_eq!(
            classify(GraphicsApi::D3D11, 55),
            FormatClass::Depth(TextureFormat::D16Unorm)
        );
        assert_eq!(
            classify(GraphicsApi::D3D12, 87),
            FormatClass::Color(TextureFormat::Bgra8Unorm)
        );
        assert_eq!(classify(GraphicsApi::OpenGl, 37), FormatClass::Unsupported);
    }

    #[test]
    fn test_gl_has_no_bgra() {
        assert_eq!(to_native(GraphicsApi::OpenGlEs, TextureFormat::Bgra8Unorm), None);
        assert_eq!(
            to_native(GraphicsApi::OpenGl, TextureFormat::D32Float),
            Some(0x8CAC)
        );
    }

    #[test]
    fn test_tables_are_bijective() {
        for api in GraphicsApi::ALL {
            for (code, format) in table(api) {
                assert_eq!(to_native(api, *format), Some(*code), "{api:?} {format:?}");
            }
        }
    }
}
