use ember_rendergraph::{
    ComputePassBuilder, ExecuteParams, FrameStats, GraphImportResource, GraphResource,
    GraphResourceDescriptor, GraphValidationError, RasterPassBuilder, RenderGraphBuilder,
    RenderGraphResource,
};
use ember_rhi::CommandSink;
use log::error;

use crate::context::RenderContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The graph failed validation; the frame was dropped whole.
    #[error(transparent)]
    Validation(#[from] GraphValidationError),
    /// The device is gone; the context must be rebuilt.
    #[error("device lost")]
    DeviceLost,
}

/// One frame's builder surface, handed out by [`Pipeline::begin_frame`].
///
/// Owns the graph builder by value: one frame-building context at a time,
/// never shared across threads.
pub struct FrameBuilder {
    builder: RenderGraphBuilder,
}

impl FrameBuilder {
    #[inline]
    pub fn builder(&mut self) -> &mut RenderGraphBuilder {
        &mut self.builder
    }

    #[must_use]
    #[inline]
    pub fn create<D: GraphResourceDescriptor>(
        &mut self,
        name: &str,
        desc: D,
    ) -> RenderGraphResource<D::Resource> {
        self.builder.create(name, desc)
    }

    #[must_use]
    #[inline]
    pub fn import<R: GraphImportResource>(
        &mut self,
        name: &str,
        backing: R::Backing,
        desc: R::Descriptor,
        state: R::State,
    ) -> RenderGraphResource<R> {
        self.builder.import(name, backing, desc, state)
    }

    #[must_use]
    #[inline]
    pub fn add_raster_pass(&mut self, name: &str) -> RasterPassBuilder<'_, '_> {
        self.builder.add_raster_pass(name)
    }

    #[must_use]
    #[inline]
    pub fn add_compute_pass(&mut self, name: &str) -> ComputePassBuilder<'_, '_> {
        self.builder.add_compute_pass(name)
    }

    #[inline]
    pub fn add_move_pass<R: GraphResource>(
        &mut self,
        name: &str,
        src: RenderGraphResource<R>,
        dst: &mut RenderGraphResource<R>,
    ) {
        self.builder.add_move_pass(name, src, dst);
    }

    #[inline]
    pub fn add_copy_pass<R: GraphResource>(
        &mut self,
        name: &str,
        src: &RenderGraphResource<R>,
        dst: &mut RenderGraphResource<R>,
    ) {
        self.builder.add_copy_pass(name, src, dst);
    }
}

/// Top-level orchestrator: builders in, compiled and executed frame out.
pub struct Pipeline {
    context: RenderContext,
}

impl Pipeline {
    pub fn new(context: RenderContext) -> Self {
        Self { context }
    }

    #[inline]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    /// Open the builder surface for the next frame.
    #[must_use]
    pub fn begin_frame(&mut self) -> FrameBuilder {
        FrameBuilder {
            builder: RenderGraphBuilder::new(),
        }
    }

    /// Compile the frame's graph and run it against the command sink.
    ///
    /// A validation failure drops the frame whole: nothing was acquired,
    /// nothing is submitted. Device loss poisons the context.
    #[profiling::function]
    pub fn compile_and_execute(
        &mut self,
        frame: FrameBuilder,
        sink: &mut dyn CommandSink,
    ) -> Result<FrameStats, FrameError> {
        let frame_fence = match self.context.begin_frame() {
            Ok(fence) => fence,
            Err(_) => {
                self.context.notify_device_lost();
                return Err(FrameError::DeviceLost);
            }
        };

        let compiled = match frame.builder.build().compile() {
            Ok(compiled) => compiled,
            Err(err) => {
                error!("Frame {} dropped: {err}", self.context.frame_index());
                self.context.end_frame();
                return Err(err.into());
            }
        };

        let mut params = ExecuteParams {
            device: self.context.device.as_ref(),
            resource_group: &self.context.resource_group,
            programs: &self.context.programs,
            layout_graph: &self.context.layout_graph,
            upload: &mut self.context.upload,
            frame_fence,
        };

        match compiled.execute(&mut params, sink) {
            Ok(stats) => {
                self.context.end_frame();
                Ok(stats)
            }
            // The executor only escalates unrecoverable device errors.
            Err(_) => {
                self.context.notify_device_lost();
                Err(FrameError::DeviceLost)
            }
        }
    }
}
