//! Per-frame instance-data upload pool.

use crate::buffer::BufferDesc;
use crate::device::{BufferId, DeviceBackend, DeviceError};
use crate::NUM_FRAMES_IN_FLIGHT;

const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;
const UPLOAD_ALIGNMENT: u64 = 256;

struct Chunk {
    buffer: BufferId,
    size: u64,
    write_head: u64,
}

#[derive(Default)]
struct FrameSlot {
    chunks: Vec<Chunk>,
}

/// Bump allocator over per-frame host-visible buffers.
///
/// Each in-flight frame owns a slot; `begin_frame` rewinds the slot whose
/// turn has come around again. Callers must only rotate into a slot once the
/// fence of the frame that last used it has signaled.
pub struct UploadPool {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl UploadPool {
    pub fn new() -> Self {
        Self {
            slots: (0..NUM_FRAMES_IN_FLIGHT).map(|_| FrameSlot::default()).collect(),
            current: 0,
        }
    }

    /// Rewind the slot for `frame_index` and make it current.
    pub fn begin_frame(&mut self, frame_index: u64) {
        self.current = (frame_index as usize) % self.slots.len();
        for chunk in &mut self.slots[self.current].chunks {
            chunk.write_head = 0;
        }
    }

    /// Copy `data` into the current frame's upload memory.
    ///
    /// Returns the backing buffer and the aligned offset of the copy.
    #[profiling::function]
    pub fn upload(
        &mut self,
        device: &dyn DeviceBackend,
        data: &[u8],
    ) -> Result<(BufferId, u64), DeviceError> {
        let size = data.len() as u64;
        let slot = &mut self.slots[self.current];

        let chunk_index = slot
            .chunks
            .iter()
            .position(|c| align_up(c.write_head, UPLOAD_ALIGNMENT) + size <= c.size);

        let chunk_index = match chunk_index {
            Some(index) => index,
            None => {
                let chunk_size = DEFAULT_CHUNK_SIZE.max(size.next_power_of_two());
                let buffer = device.create_buffer(&BufferDesc::instance(chunk_size))?;
                slot.chunks.push(Chunk {
                    buffer,
                    size: chunk_size,
                    write_head: 0,
                });
                slot.chunks.len() - 1
            }
        };

        let chunk = &mut slot.chunks[chunk_index];
        let offset = align_up(chunk.write_head, UPLOAD_ALIGNMENT);
        device.write_buffer(chunk.buffer, offset, data)?;
        chunk.write_head = offset + size;

        Ok((chunk.buffer, offset))
    }

    /// Destroy all upload buffers. For shutdown or device loss rebuilds.
    pub fn clear(&mut self, device: &dyn DeviceBackend) {
        for slot in &mut self.slots {
            for chunk in slot.chunks.drain(..) {
                device.destroy_buffer(chunk.buffer);
            }
        }
    }

    /// Drop all upload buffers without touching the device.
    pub fn invalidate(&mut self) {
        for slot in &mut self.slots {
            slot.chunks.clear();
        }
    }
}

impl Default for UploadPool {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
