//! Ember RHI - interface to the GPU backend collaborator.
//!
//! This crate owns the vocabulary the graph core exchanges with the backend:
//! resource descriptors and access states, the ordered command stream, the
//! device trait, fences, and the pooled resource group. No real GPU work
//! happens here; a [`NullDevice`] and [`RecordingSink`] stand in for the
//! backend in tests and headless runs.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod resource_group;
pub mod texture;
pub mod upload;
mod barrier;
mod synchronization;

/// Number of frames that may be in flight on the backend at once.
pub const NUM_FRAMES_IN_FLIGHT: usize = 3;

pub use buffer::{BufferDesc, BufferUsage, BufferUsages};
pub use command::{
    ColorAttachment, CommandSink, DepthAttachment, LoadOp, RecordingSink, RenderCommand, StoreOp,
};
pub use device::{
    BufferId, DeviceBackend, DeviceError, MaterialHandle, MeshHandle, NullDevice, PassObjectId,
    PipelineId, ShaderModuleId, TextureId,
};
pub use pipeline::{
    BlendMode, CompareOp, CullMode, FixedFunctionState, PipelineDesc, PrimitiveTopology,
    ShaderStage, ShaderStages,
};
pub use resource_group::{PassObjectDesc, ResourceGroup, ResourceGroupConfig, ResourceGroupStats};
pub use texture::{Extent2d, TextureDesc, TextureFormat, TextureUsage, TextureUsages};
pub use barrier::{BufferState, ResourceDescriptor, ResourceState, TextureState};
pub use synchronization::FenceId;
pub use upload::UploadPool;
