//! Binds the backend's texture/buffer vocabulary to the graph's typed
//! resource machinery.

use std::marker::PhantomData;

use ember_rhi::{BufferDesc, BufferId, BufferState, TextureDesc, TextureId, TextureState};

use crate::builder::RenderGraphBuilder;
use crate::resource::{
    sealed, GraphImportResource, GraphResource, GraphResourceDescriptor, GraphResourceState,
    RenderGraphResource, ResourceInit,
};

/// Marker for texture-typed graph resources.
#[derive(Debug, Clone, Copy)]
pub struct Texture;

/// Marker for buffer-typed graph resources.
#[derive(Debug, Clone, Copy)]
pub struct Buffer;

impl sealed::Sealed for Texture {}

impl GraphResource for Texture {
    type Descriptor = TextureDesc;
    type State = TextureState;
    type Backing = TextureId;

    fn transfer_src_state() -> TextureState {
        TextureState::CopySrc
    }

    fn transfer_dst_state() -> TextureState {
        TextureState::CopyDst
    }
}

impl GraphResourceDescriptor for TextureDesc {
    type Resource = Texture;
}

impl GraphResourceState for TextureState {
    type Resource = Texture;
}

impl GraphImportResource for Texture {
    fn import(
        builder: &mut RenderGraphBuilder,
        name: &str,
        backing: TextureId,
        desc: TextureDesc,
        state: TextureState,
    ) -> RenderGraphResource<Self> {
        let id = builder.declare(name, ResourceInit::ImportedTexture(backing, desc, state));
        RenderGraphResource {
            id,
            _marker: PhantomData,
        }
    }
}

impl sealed::Sealed for Buffer {}

impl GraphResource for Buffer {
    type Descriptor = BufferDesc;
    type State = BufferState;
    type Backing = BufferId;

    fn transfer_src_state() -> BufferState {
        BufferState::CopySrc
    }

    fn transfer_dst_state() -> BufferState {
        BufferState::CopyDst
    }
}

impl GraphResourceDescriptor for BufferDesc {
    type Resource = Buffer;
}

impl GraphResourceState for BufferState {
    type Resource = Buffer;
}

impl GraphImportResource for Buffer {
    fn import(
        builder: &mut RenderGraphBuilder,
        name: &str,
        backing: BufferId,
        desc: BufferDesc,
        state: BufferState,
    ) -> RenderGraphResource<Self> {
        let id = builder.declare(name, ResourceInit::ImportedBuffer(backing, desc, state));
        RenderGraphResource {
            id,
            _marker: PhantomData,
        }
    }
}
