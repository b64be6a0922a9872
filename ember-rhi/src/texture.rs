use enumflags2::{bitflags, BitFlags};

/// Two-dimensional texture extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba16Float,
    Rg16Float,
    R32Float,
    Depth32Float,
    Depth24Stencil8,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8)
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureUsage {
    RenderTarget = 1 << 0,
    DepthStencil = 1 << 1,
    Sampled = 1 << 2,
    Storage = 1 << 3,
    CopySrc = 1 << 4,
    CopyDst = 1 << 5,
}

pub type TextureUsages = BitFlags<TextureUsage>;

/// Texture descriptor for requesting backend textures.
///
/// Descriptors are used directly as pool keys, so everything here is part of
/// the compatibility hash. Debug names live on the graph resource, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub format: TextureFormat,
    pub extent: Extent2d,
    pub usage: TextureUsages,
    pub mip_levels: u32,
    pub samples: u32,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            extent: Extent2d::new(1, 1),
            usage: TextureUsage::Sampled.into(),
            mip_levels: 1,
            samples: 1,
        }
    }
}

impl TextureDesc {
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            format,
            extent: Extent2d::new(width, height),
            usage: TextureUsage::RenderTarget | TextureUsage::Sampled,
            ..Default::default()
        }
    }

    pub fn depth_target(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Depth32Float,
            extent: Extent2d::new(width, height),
            usage: TextureUsage::DepthStencil | TextureUsage::Sampled,
            ..Default::default()
        }
    }
}
