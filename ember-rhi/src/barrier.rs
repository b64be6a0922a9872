use derive_more::{From, TryInto};

use crate::buffer::BufferDesc;
use crate::texture::TextureDesc;

/// Access state of a texture as seen by the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureState {
    /// Freshly allocated, contents undefined.
    Undefined,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderRead,
    StorageWrite,
    CopySrc,
    CopyDst,
    Present,
}

/// Access state of a buffer as seen by the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    Undefined,
    Vertex,
    Index,
    Uniform,
    ShaderRead,
    StorageWrite,
    Indirect,
    CopySrc,
    CopyDst,
}

impl TextureState {
    /// Whether commands in this state may write the texture.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            TextureState::RenderTarget
                | TextureState::DepthWrite
                | TextureState::StorageWrite
                | TextureState::CopyDst
        )
    }
}

impl BufferState {
    pub fn is_write(self) -> bool {
        matches!(self, BufferState::StorageWrite | BufferState::CopyDst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, TryInto)]
pub enum ResourceState {
    Texture(TextureState),
    Buffer(BufferState),
}

impl ResourceState {
    pub fn is_write(self) -> bool {
        match self {
            ResourceState::Texture(state) => state.is_write(),
            ResourceState::Buffer(state) => state.is_write(),
        }
    }
}

#[derive(Debug, Clone, From)]
pub enum ResourceDescriptor {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}
