use derive_builder::Builder;
use ember_rhi::{LoadOp, StoreOp};

use crate::queue::{ComputeQueue, RenderQueue};
use crate::resource::{GraphResourceId, ResourceAccessStorage};

#[derive(Clone, Debug, Builder)]
#[builder(setter(into))]
pub struct ColorInfo {
    #[builder(default = "LoadOp::Clear")]
    pub load_op: LoadOp,
    #[builder(default = "StoreOp::Store")]
    pub store_op: StoreOp,
    #[builder(default)]
    pub clear_value: [f32; 4],
}

impl Default for ColorInfo {
    fn default() -> Self {
        Self {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Clone, Debug, Builder)]
#[builder(setter(into))]
pub struct DepthStencilInfo {
    #[builder(default = "LoadOp::Clear")]
    pub depth_load_op: LoadOp,
    #[builder(default = "StoreOp::Store")]
    pub depth_store_op: StoreOp,
    #[builder(default = "1.0")]
    pub depth_clear_value: f32,
    #[builder(default)]
    pub stencil_clear_value: u32,
}

impl Default for DepthStencilInfo {
    fn default() -> Self {
        Self {
            depth_load_op: LoadOp::Clear,
            depth_store_op: StoreOp::Store,
            depth_clear_value: 1.0,
            stencil_clear_value: 0,
        }
    }
}

pub(crate) struct RasterPassData {
    pub(crate) color_attachments: Vec<(GraphResourceId, ColorInfo)>,
    pub(crate) depth_stencil: Option<(GraphResourceId, DepthStencilInfo)>,
    pub(crate) queues: Vec<RenderQueue>,
}

pub(crate) struct ComputePassData {
    pub(crate) queues: Vec<ComputeQueue>,
}

pub(crate) struct TransferPassData {
    pub(crate) src: GraphResourceId,
    pub(crate) dst: GraphResourceId,
}

pub(crate) enum PassKind {
    Raster(RasterPassData),
    Compute(ComputePassData),
    /// Transfers ownership of the src backing to dst; no GPU work.
    Move(TransferPassData),
    /// A real GPU copy between two live resources.
    Copy(TransferPassData),
}

impl PassKind {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            PassKind::Raster(_) => "raster",
            PassKind::Compute(_) => "compute",
            PassKind::Move(_) => "move",
            PassKind::Copy(_) => "copy",
        }
    }
}

pub struct Pass {
    pub(crate) name: String,
    pub(crate) reads: Vec<ResourceAccessStorage>,
    pub(crate) writes: Vec<ResourceAccessStorage>,
    pub(crate) kind: PassKind,
}

impl Pass {
    pub fn name(&self) -> &str {
        &self.name
    }
}
