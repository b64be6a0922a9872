use std::marker::PhantomData;

use ember_render::LayoutNodeId;
use ember_rhi::{FixedFunctionState, ResourceDescriptor, ResourceState, TextureState};
use log::warn;

use crate::graph::RenderGraph;
use crate::interface::Texture;
use crate::pass::{
    ColorInfo, ComputePassData, DepthStencilInfo, Pass, PassKind, RasterPassData, TransferPassData,
};
use crate::queue::{ComputeQueue, DispatchItem, DrawItem, RenderQueue};
use crate::resource::{
    GraphImportResource, GraphResource, GraphResourceDescriptor, GraphResourceId,
    GraphResourceView, RenderGraphResource, RenderGraphResourceAccess, ResourceDeclaration,
    ResourceInit, Rt, Srv, Uav,
};

/// Append-only accumulator for one frame's graph.
///
/// Owned by a single frame-building context; builders hand out short-lived
/// mutable borrows, so no graph state is shared once `build` runs.
#[derive(Default)]
pub struct RenderGraphBuilder {
    passes: Vec<Pass>,
    pub(crate) resources: Vec<ResourceDeclaration>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn declare(&mut self, name: &str, init: ResourceInit) -> GraphResourceId {
        let id = self.resources.len() as GraphResourceId;
        self.resources.push(ResourceDeclaration {
            name: name.to_owned(),
            init,
        });
        id
    }

    /// Declare a transient resource, backed by the resource group for the
    /// span of its graph lifetime.
    #[must_use]
    pub fn create<D: GraphResourceDescriptor>(
        &mut self,
        name: &str,
        desc: D,
    ) -> RenderGraphResource<D::Resource> {
        let init = match desc.into() {
            ResourceDescriptor::Texture(desc) => ResourceInit::Texture(desc),
            ResourceDescriptor::Buffer(desc) => ResourceInit::Buffer(desc),
        };
        let id = self.declare(name, init);

        RenderGraphResource {
            id,
            _marker: PhantomData,
        }
    }

    /// Declare an externally owned resource with a known current state.
    #[must_use]
    pub fn import<R: GraphImportResource>(
        &mut self,
        name: &str,
        backing: R::Backing,
        desc: R::Descriptor,
        state: R::State,
    ) -> RenderGraphResource<R> {
        GraphImportResource::import(self, name, backing, desc, state)
    }

    #[must_use]
    pub fn add_raster_pass(&mut self, name: &str) -> RasterPassBuilder<'_, '_> {
        let index = self.passes.len();

        self.passes.push(Pass {
            name: name.to_string(),
            reads: vec![],
            writes: vec![],
            kind: PassKind::Raster(RasterPassData {
                color_attachments: vec![],
                depth_stencil: None,
                queues: vec![],
            }),
        });

        RasterPassBuilder {
            common: CommonPassBuilder {
                pass: &mut self.passes[index],
                resources: &self.resources,
            },
        }
    }

    #[must_use]
    pub fn add_compute_pass(&mut self, name: &str) -> ComputePassBuilder<'_, '_> {
        let index = self.passes.len();

        self.passes.push(Pass {
            name: name.to_string(),
            reads: vec![],
            writes: vec![],
            kind: PassKind::Compute(ComputePassData { queues: vec![] }),
        });

        ComputePassBuilder {
            common: CommonPassBuilder {
                pass: &mut self.passes[index],
                resources: &self.resources,
            },
        }
    }

    /// Transfer ownership of `src`'s backing to `dst` without GPU work.
    ///
    /// Consumes the source handle; the compiler rejects any access to it
    /// scheduled after the move.
    pub fn add_move_pass<R: GraphResource>(
        &mut self,
        name: &str,
        src: RenderGraphResource<R>,
        dst: &mut RenderGraphResource<R>,
    ) {
        self.passes.push(Pass {
            name: name.to_string(),
            reads: vec![untyped_access::<R>(src.id, R::transfer_src_state())],
            writes: vec![untyped_access::<R>(dst.id, R::transfer_dst_state())],
            kind: PassKind::Move(TransferPassData {
                src: src.id,
                dst: dst.id,
            }),
        });
    }

    /// Copy `src` into `dst` on the GPU.
    pub fn add_copy_pass<R: GraphResource>(
        &mut self,
        name: &str,
        src: &RenderGraphResource<R>,
        dst: &mut RenderGraphResource<R>,
    ) {
        self.passes.push(Pass {
            name: name.to_string(),
            reads: vec![untyped_access::<R>(src.id, R::transfer_src_state())],
            writes: vec![untyped_access::<R>(dst.id, R::transfer_dst_state())],
            kind: PassKind::Copy(TransferPassData {
                src: src.id,
                dst: dst.id,
            }),
        });
    }

    #[profiling::function]
    pub fn build(self) -> RenderGraph {
        RenderGraph {
            passes: self.passes,
            resources: self.resources,
        }
    }
}

fn untyped_access<R: GraphResource>(
    id: GraphResourceId,
    state: R::State,
) -> crate::resource::ResourceAccessStorage {
    crate::resource::ResourceAccessStorage {
        id,
        access: state.into(),
    }
}

pub struct CommonPassBuilder<'pass, 'res> {
    pass: &'pass mut Pass,
    resources: &'res Vec<ResourceDeclaration>,
}

impl CommonPassBuilder<'_, '_> {
    #[must_use]
    fn read<R: GraphResource, V: GraphResourceView>(
        &mut self,
        resource: &RenderGraphResource<R>,
        access: impl Into<ResourceState>,
    ) -> RenderGraphResourceAccess<R, V> {
        let access = RenderGraphResourceAccess {
            id: resource.id,
            access: access.into(),
            _marker: PhantomData,
        };

        if self.pass.reads.iter().all(|h| h.id != resource.id) {
            self.pass.reads.push(access.as_untyped());
        } else {
            let name = self
                .resources
                .get(resource.id as usize)
                .map(|r| r.name())
                .unwrap_or("<undeclared>");

            warn!("Resource [{name}] read declared twice on pass {}!", self.pass.name());
        }

        access
    }

    #[must_use]
    fn write<R: GraphResource, V: GraphResourceView>(
        &mut self,
        resource: &mut RenderGraphResource<R>,
        access: impl Into<ResourceState>,
    ) -> RenderGraphResourceAccess<R, V> {
        let access = RenderGraphResourceAccess {
            id: resource.id,
            access: access.into(),
            _marker: PhantomData,
        };

        if self.pass.writes.iter().all(|h| h.id != resource.id) {
            self.pass.writes.push(access.as_untyped());
        } else {
            let name = self
                .resources
                .get(resource.id as usize)
                .map(|r| r.name())
                .unwrap_or("<undeclared>");

            warn!("Resource [{name}] write declared twice on pass {}!", self.pass.name());
        }

        access
    }
}

macro_rules! inject_common_pass_builder_methods {
    ($read_view:ty, $write_view:ty) => {
        #[must_use]
        #[inline]
        pub fn read<R: GraphResource>(
            &mut self,
            resource: &RenderGraphResource<R>,
            access: <R as GraphResource>::State,
        ) -> RenderGraphResourceAccess<R, $read_view> {
            self.common.read(resource, access)
        }

        #[must_use]
        #[inline]
        pub fn write<R: GraphResource>(
            &mut self,
            resource: &mut RenderGraphResource<R>,
            access: <R as GraphResource>::State,
        ) -> RenderGraphResourceAccess<R, $write_view> {
            self.common.write(resource, access)
        }
    };
}

pub struct RasterPassBuilder<'pass, 'res> {
    common: CommonPassBuilder<'pass, 'res>,
}

impl<'pass, 'res> RasterPassBuilder<'pass, 'res> {
    inject_common_pass_builder_methods!(Srv, Rt);

    fn raster_data(&mut self) -> &mut RasterPassData {
        match &mut self.common.pass.kind {
            PassKind::Raster(data) => data,
            _ => unreachable!("raster builder bound to non-raster pass"),
        }
    }

    /// Declare a render-target color attachment.
    ///
    /// Takes the access produced by a prior `write` with
    /// [`TextureState::RenderTarget`].
    pub fn with_color(
        &mut self,
        color: RenderGraphResourceAccess<Texture, Rt>,
        color_info: ColorInfo,
    ) -> &mut Self {
        self.raster_data().color_attachments.push((color.id, color_info));
        self
    }

    pub fn with_depth_stencil(
        &mut self,
        depth_stencil: RenderGraphResourceAccess<Texture, Rt>,
        depth_stencil_info: DepthStencilInfo,
    ) -> &mut Self {
        self.raster_data().depth_stencil = Some((depth_stencil.id, depth_stencil_info));
        self
    }

    /// Shorthand: write the resource as a render target and attach it.
    pub fn write_color(
        &mut self,
        resource: &mut RenderGraphResource<Texture>,
        color_info: ColorInfo,
    ) -> &mut Self {
        let access = self.common.write(resource, TextureState::RenderTarget);
        self.with_color(access, color_info)
    }

    /// Open a draw queue scoped to this pass.
    #[must_use]
    pub fn add_queue(
        &mut self,
        layout: LayoutNodeId,
        state: FixedFunctionState,
    ) -> RasterQueueBuilder<'_> {
        let data = self.raster_data();
        data.queues.push(RenderQueue::new(layout, state));
        let queue = data.queues.last_mut().expect("queue just pushed");

        RasterQueueBuilder { queue }
    }
}

pub struct ComputePassBuilder<'pass, 'res> {
    common: CommonPassBuilder<'pass, 'res>,
}

impl<'pass, 'res> ComputePassBuilder<'pass, 'res> {
    inject_common_pass_builder_methods!(Srv, Uav);

    /// Open a dispatch queue scoped to this pass.
    #[must_use]
    pub fn add_queue(&mut self, layout: LayoutNodeId) -> ComputeQueueBuilder<'_> {
        let data = match &mut self.common.pass.kind {
            PassKind::Compute(data) => data,
            _ => unreachable!("compute builder bound to non-compute pass"),
        };
        data.queues.push(ComputeQueue::new(layout));
        let queue = data.queues.last_mut().expect("queue just pushed");

        ComputeQueueBuilder { queue }
    }
}

/// Accepts draw submissions for one queue.
pub struct RasterQueueBuilder<'queue> {
    queue: &'queue mut RenderQueue,
}

impl RasterQueueBuilder<'_> {
    #[inline]
    pub fn add_draw(&mut self, item: DrawItem) {
        self.queue.add_draw(item);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub struct ComputeQueueBuilder<'queue> {
    queue: &'queue mut ComputeQueue,
}

impl ComputeQueueBuilder<'_> {
    #[inline]
    pub fn add_dispatch(&mut self, item: DispatchItem) {
        self.queue.add_dispatch(item);
    }
}
