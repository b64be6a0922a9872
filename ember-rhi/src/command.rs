//! The ordered command stream handed to the backend.

use crate::barrier::{BufferState, TextureState};
use crate::device::{BufferId, MaterialHandle, MeshHandle, PassObjectId, PipelineId, TextureId};
use crate::texture::Extent2d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    #[default]
    Clear,
    Load,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub texture: TextureId,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureId,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

/// One backend command.
///
/// Commands arrive at the sink already ordered: barriers before the pass
/// they guard, draws inside a `BeginRasterPass`/`EndRasterPass` bracket.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    TextureBarrier {
        texture: TextureId,
        prev: TextureState,
        next: TextureState,
    },
    BufferBarrier {
        buffer: BufferId,
        prev: BufferState,
        next: BufferState,
    },
    BeginRasterPass {
        name: String,
        pass_object: PassObjectId,
        colors: Vec<ColorAttachment>,
        depth: Option<DepthAttachment>,
        extent: Extent2d,
    },
    EndRasterPass,
    BindPipeline {
        pipeline: PipelineId,
    },
    DrawInstanced {
        mesh: MeshHandle,
        material: MaterialHandle,
        instance_buffer: BufferId,
        instance_offset: u64,
        instance_count: u32,
    },
    Dispatch {
        group_count: [u32; 3],
    },
    CopyTexture {
        src: TextureId,
        dst: TextureId,
        extent: Extent2d,
    },
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
}

/// Ordered sink for backend commands; the backend owns queue submission.
pub trait CommandSink {
    fn submit(&mut self, command: RenderCommand);
}

/// Sink that records every command, for tests and headless runs.
#[derive(Default)]
pub struct RecordingSink {
    commands: Vec<RenderCommand>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn count_matching(&self, predicate: impl Fn(&RenderCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }
}

impl CommandSink for RecordingSink {
    fn submit(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }
}
