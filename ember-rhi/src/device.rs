use ember_core::collections::hashmap::HashSet;
use parking_lot::Mutex;

use crate::buffer::BufferDesc;
use crate::pipeline::PipelineDesc;
use crate::resource_group::PassObjectDesc;
use crate::synchronization::FenceId;
use crate::texture::TextureDesc;

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

backend_handle!(TextureId);
backend_handle!(BufferId);
backend_handle!(PipelineId);
backend_handle!(ShaderModuleId);
backend_handle!(
    /// A backend render-pass/framebuffer object held by the resource group.
    PassObjectId
);
backend_handle!(
    /// Opaque mesh reference supplied by the asset collaborator.
    MeshHandle
);
backend_handle!(
    /// Opaque material reference supplied by the asset collaborator.
    MaterialHandle
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device is gone; every pool and cache built on it is invalid.
    #[error("device lost")]
    Lost,
    /// The backend ran out of a resource kind; the current pass can be
    /// skipped while independent work continues.
    #[error("backend out of {kind}")]
    OutOfResources { kind: &'static str },
}

/// The GPU device collaborator.
///
/// The graph core only ever creates, destroys and polls through this trait;
/// submission goes through [`CommandSink`](crate::CommandSink). Implementations
/// must be safe to call from concurrent pass execution.
pub trait DeviceBackend: Send + Sync {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;
    fn destroy_texture(&self, texture: TextureId);

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, DeviceError>;
    fn destroy_buffer(&self, buffer: BufferId);

    /// Write CPU data into a host-visible buffer region.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError>;

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId, DeviceError>;
    fn destroy_pipeline(&self, pipeline: PipelineId);

    fn create_pass_object(&self, desc: &PassObjectDesc) -> Result<PassObjectId, DeviceError>;
    fn destroy_pass_object(&self, pass_object: PassObjectId);

    /// A fence the backend will signal once all previously submitted work
    /// has completed.
    fn create_fence(&self) -> Result<FenceId, DeviceError>;
    fn is_fence_signaled(&self, fence: FenceId) -> bool;
}

#[derive(Default)]
struct NullDeviceState {
    next_id: u64,
    created_fences: Vec<u64>,
    signaled_fences: HashSet<u64>,
    live_textures: HashSet<u64>,
    live_buffers: HashSet<u64>,
    buffer_writes: u64,
    pipelines_created: u64,
    pass_objects_created: u64,
    lost: bool,
}

/// Headless stand-in for a real device backend.
///
/// Hands out monotonically increasing ids and never talks to a GPU. Fences
/// start unsignaled and are signaled explicitly by the test/sandbox driver.
pub struct NullDevice {
    state: Mutex<NullDeviceState>,
    texture_budget: Option<usize>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullDeviceState::default()),
            texture_budget: None,
        }
    }

    /// Fail `create_texture` once more than `budget` textures are alive.
    pub fn with_texture_budget(budget: usize) -> Self {
        Self {
            state: Mutex::new(NullDeviceState::default()),
            texture_budget: Some(budget),
        }
    }

    /// Mark a fence as signaled, emulating GPU completion.
    pub fn signal_fence(&self, fence: FenceId) {
        self.state.lock().signaled_fences.insert(fence.0);
    }

    /// Signal every fence created so far, emulating a full GPU drain.
    pub fn signal_all_fences(&self) {
        let mut state = self.state.lock();
        let fences: Vec<u64> = state.created_fences.clone();
        state.signaled_fences.extend(fences);
    }

    /// Emulate device loss; every subsequent create call fails.
    pub fn mark_lost(&self) {
        self.state.lock().lost = true;
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.lock().live_textures.len()
    }

    pub fn pipelines_created(&self) -> u64 {
        self.state.lock().pipelines_created
    }

    pub fn buffer_writes(&self) -> u64 {
        self.state.lock().buffer_writes
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDeviceState {
    fn bump(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::Lost)
        } else {
            Ok(())
        }
    }
}

impl DeviceBackend for NullDevice {
    fn create_texture(&self, _desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if let Some(budget) = self.texture_budget {
            if state.live_textures.len() >= budget {
                return Err(DeviceError::OutOfResources { kind: "texture memory" });
            }
        }
        let id = state.bump();
        state.live_textures.insert(id);
        Ok(TextureId(id))
    }

    fn destroy_texture(&self, texture: TextureId) {
        self.state.lock().live_textures.remove(&texture.0);
    }

    fn create_buffer(&self, _desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let id = state.bump();
        state.live_buffers.insert(id);
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.state.lock().live_buffers.remove(&buffer.0);
    }

    fn write_buffer(&self, _buffer: BufferId, _offset: u64, _data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.buffer_writes += 1;
        Ok(())
    }

    fn create_pipeline(&self, _desc: &PipelineDesc) -> Result<PipelineId, DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.pipelines_created += 1;
        let id = state.bump();
        Ok(PipelineId(id))
    }

    fn destroy_pipeline(&self, _pipeline: PipelineId) {}

    fn create_pass_object(&self, _desc: &PassObjectDesc) -> Result<PassObjectId, DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.pass_objects_created += 1;
        let id = state.bump();
        Ok(PassObjectId(id))
    }

    fn destroy_pass_object(&self, _pass_object: PassObjectId) {}

    fn create_fence(&self) -> Result<FenceId, DeviceError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let id = state.bump();
        state.created_fences.push(id);
        Ok(FenceId(id))
    }

    fn is_fence_signaled(&self, fence: FenceId) -> bool {
        self.state.lock().signaled_fences.contains(&fence.0)
    }
}
