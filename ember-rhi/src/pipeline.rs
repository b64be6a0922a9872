use enumflags2::{bitflags, BitFlags};

use crate::device::ShaderModuleId;
use crate::texture::TextureFormat;

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex = 1 << 0,
    Fragment = 1 << 1,
    Compute = 1 << 2,
}

pub type ShaderStages = BitFlags<ShaderStage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Non-programmable pipeline state.
///
/// Part of the program-cache key, so it must stay cheap to hash and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub cull_mode: CullMode,
    pub blend: BlendMode,
    pub topology: PrimitiveTopology,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareOp::Less,
            cull_mode: CullMode::Back,
            blend: BlendMode::Opaque,
            topology: PrimitiveTopology::TriangleList,
        }
    }
}

impl FixedFunctionState {
    pub fn opaque() -> Self {
        Self::default()
    }

    pub fn transparent() -> Self {
        Self {
            depth_write: false,
            blend: BlendMode::Alpha,
            ..Self::default()
        }
    }
}

/// Everything the backend needs to build one pipeline-state object.
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_module: Option<ShaderModuleId>,
    pub fragment_module: Option<ShaderModuleId>,
    pub compute_module: Option<ShaderModuleId>,
    /// Structural hashes of the descriptor-set layouts, outermost first.
    pub set_layouts: Vec<u64>,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub state: FixedFunctionState,
}

impl PipelineDesc {
    pub fn is_compute(&self) -> bool {
        self.compute_module.is_some()
    }
}
