use std::fmt::Debug;
use std::marker::PhantomData;

use derive_more::From;
use ember_rhi::{
    BufferDesc, BufferId, BufferState, ResourceDescriptor, ResourceState, TextureDesc, TextureId,
    TextureState,
};

pub(crate) mod sealed {
    pub trait Sealed {}
}

pub trait GraphResource: Sized + sealed::Sealed {
    type Descriptor: GraphResourceDescriptor;
    type State: GraphResourceState;
    /// Backend handle type supplied when importing.
    type Backing: Copy + Debug;

    fn transfer_src_state() -> Self::State;
    fn transfer_dst_state() -> Self::State;
}

pub trait GraphResourceDescriptor: Clone + Into<ResourceDescriptor> {
    type Resource: GraphResource;
}

pub trait GraphResourceState: Copy + Into<ResourceState> {
    type Resource: GraphResource;
}

pub trait GraphResourceView: Copy {}

#[derive(Clone, Copy, Debug)]
pub struct Srv;

#[derive(Clone, Copy, Debug)]
pub struct Uav;

#[derive(Clone, Copy, Debug)]
pub struct Rt;

impl GraphResourceView for Srv {}
impl GraphResourceView for Uav {}
impl GraphResourceView for Rt {}

/// Identifier of a resource owned by one frame's render graph.
///
/// ## Safety
/// Only meaningful within the graph that issued it. Should NOT be used
/// across multiple render graphs.
pub(crate) type GraphResourceId = u32;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RenderGraphResource<R: GraphResource> {
    pub(crate) id: GraphResourceId,
    pub(crate) _marker: PhantomData<R>,
}

impl<R: GraphResource> RenderGraphResource<R> {
    pub fn valid(&self) -> bool {
        self.id != u32::MAX
    }
}

/// A declared access of one resource by one pass, typed by resource and view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphResourceAccess<R: GraphResource, V: GraphResourceView> {
    pub(crate) id: GraphResourceId,
    pub(crate) access: ResourceState,
    pub(crate) _marker: PhantomData<(R, V)>,
}

impl<R: GraphResource, V: GraphResourceView> RenderGraphResourceAccess<R, V> {
    pub fn valid(&self) -> bool {
        self.id != u32::MAX
    }

    pub(crate) fn as_untyped(&self) -> ResourceAccessStorage {
        ResourceAccessStorage {
            id: self.id,
            access: self.access,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResourceAccessStorage {
    pub(crate) id: GraphResourceId,
    pub(crate) access: ResourceState,
}

/// How a declared resource comes into existence for the frame.
#[derive(Debug, Clone, From)]
pub(crate) enum ResourceInit {
    Texture(TextureDesc),
    Buffer(BufferDesc),
    ImportedTexture(TextureId, TextureDesc, TextureState),
    ImportedBuffer(BufferId, BufferDesc, BufferState),
}

impl ResourceInit {
    pub(crate) fn is_imported(&self) -> bool {
        matches!(
            self,
            ResourceInit::ImportedTexture(..) | ResourceInit::ImportedBuffer(..)
        )
    }

    pub(crate) fn is_texture(&self) -> bool {
        matches!(
            self,
            ResourceInit::Texture(_) | ResourceInit::ImportedTexture(..)
        )
    }

    /// The access state the resource holds before its first graph use.
    pub(crate) fn initial_state(&self) -> ResourceState {
        match self {
            ResourceInit::Texture(_) => TextureState::Undefined.into(),
            ResourceInit::Buffer(_) => BufferState::Undefined.into(),
            ResourceInit::ImportedTexture(_, _, state) => (*state).into(),
            ResourceInit::ImportedBuffer(_, _, state) => (*state).into(),
        }
    }

    pub(crate) fn texture_desc(&self) -> Option<&TextureDesc> {
        match self {
            ResourceInit::Texture(desc) => Some(desc),
            ResourceInit::ImportedTexture(_, desc, _) => Some(desc),
            _ => None,
        }
    }

    pub(crate) fn buffer_desc(&self) -> Option<&BufferDesc> {
        match self {
            ResourceInit::Buffer(desc) => Some(desc),
            ResourceInit::ImportedBuffer(_, desc, _) => Some(desc),
            _ => None,
        }
    }
}

/// Resources that can be imported from outside the graph with a known
/// initial state.
pub trait GraphImportResource: GraphResource {
    fn import(
        builder: &mut crate::builder::RenderGraphBuilder,
        name: &str,
        backing: Self::Backing,
        desc: Self::Descriptor,
        state: Self::State,
    ) -> RenderGraphResource<Self>;
}

#[derive(Debug, Clone)]
pub(crate) struct ResourceDeclaration {
    pub(crate) name: String,
    pub(crate) init: ResourceInit,
}

impl ResourceDeclaration {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}
