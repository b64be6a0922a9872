mod builder;
mod execute;
mod graph;
mod interface;
mod pass;
mod queue;
mod resource;

pub use builder::{
    ComputePassBuilder, ComputeQueueBuilder, RasterPassBuilder, RasterQueueBuilder,
    RenderGraphBuilder,
};
pub use execute::{ExecuteParams, FrameStats};
pub use graph::{CompiledRenderGraph, GraphValidationError, RenderGraph};
pub use interface::{Buffer, Texture};
pub use pass::{
    ColorInfo, ColorInfoBuilder, ColorInfoBuilderError, DepthStencilInfo, DepthStencilInfoBuilder,
    DepthStencilInfoBuilderError, Pass,
};
pub use queue::{
    BatchKey, ComputeQueue, DispatchItem, DrawItem, DrawOrder, InstanceData, InstancingBatch,
    RenderQueue, MAX_DRAW_LIGHTS, NO_LIGHT,
};
pub use resource::{
    GraphImportResource, GraphResource, GraphResourceDescriptor, GraphResourceState,
    GraphResourceView, RenderGraphResource, RenderGraphResourceAccess, Rt, Srv, Uav,
};
pub use ember_rhi::{
    BufferDesc, BufferState, FixedFunctionState, LoadOp, StoreOp, TextureDesc, TextureFormat,
    TextureState,
};
