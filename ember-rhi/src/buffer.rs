use enumflags2::{bitflags, BitFlags};

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex = 1 << 0,
    Index = 1 << 1,
    Uniform = 1 << 2,
    Storage = 1 << 3,
    Indirect = 1 << 4,
    CopySrc = 1 << 5,
    CopyDst = 1 << 6,
}

pub type BufferUsages = BitFlags<BufferUsage>;

/// Buffer descriptor for requesting backend buffers.
///
/// Used directly as a pool key, same as [`TextureDesc`](crate::TextureDesc).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Size of the buffer in bytes.
    pub size: u64,
    pub usage: BufferUsages,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            usage: BitFlags::empty(),
        }
    }
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsages) -> Self {
        Self { size, usage }
    }

    pub fn storage(size: u64) -> Self {
        Self::new(size, BufferUsage::Storage | BufferUsage::CopyDst)
    }

    pub fn instance(size: u64) -> Self {
        Self::new(size, BufferUsage::Vertex | BufferUsage::CopyDst)
    }
}
