use std::sync::Arc;

use ember_render::{LayoutGraph, ProgramLibrary, ProgramLibraryStats, ShaderVariantResolver};
use ember_rhi::{
    DeviceBackend, DeviceError, FenceId, ResourceGroup, ResourceGroupConfig, ResourceGroupStats,
    UploadPool, NUM_FRAMES_IN_FLIGHT,
};
use log::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextConfig {
    pub resource_group: ResourceGroupConfig,
}

/// Process-scoped execution state: device handle, pools and caches.
///
/// Lives from device-ready to device-lost/shutdown and is passed explicitly
/// to pipeline operations; nothing here is ambient global state.
pub struct RenderContext {
    pub(crate) device: Arc<dyn DeviceBackend>,
    pub(crate) layout_graph: LayoutGraph,
    pub(crate) programs: ProgramLibrary,
    pub(crate) resource_group: ResourceGroup,
    pub(crate) upload: UploadPool,
    frame_index: u64,
    frame_fences: [Option<FenceId>; NUM_FRAMES_IN_FLIGHT],
    device_lost: bool,
}

impl RenderContext {
    pub fn new(
        device: Arc<dyn DeviceBackend>,
        layout_graph: LayoutGraph,
        shader_resolver: Arc<dyn ShaderVariantResolver>,
        config: ContextConfig,
    ) -> Self {
        Self {
            device,
            layout_graph,
            programs: ProgramLibrary::new(shader_resolver),
            resource_group: ResourceGroup::new(config.resource_group),
            upload: UploadPool::new(),
            frame_index: 0,
            frame_fences: [None; NUM_FRAMES_IN_FLIGHT],
            device_lost: false,
        }
    }

    #[inline]
    pub fn device(&self) -> &dyn DeviceBackend {
        self.device.as_ref()
    }

    #[inline]
    pub fn layout_graph(&self) -> &LayoutGraph {
        &self.layout_graph
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    pub fn program_stats(&self) -> ProgramLibraryStats {
        self.programs.stats()
    }

    pub fn resource_stats(&self) -> ResourceGroupStats {
        self.resource_group.stats()
    }

    /// Rotate the in-flight frame ring and mint this frame's fence.
    pub(crate) fn begin_frame(&mut self) -> Result<FenceId, DeviceError> {
        if self.device_lost {
            return Err(DeviceError::Lost);
        }

        let slot = (self.frame_index as usize) % NUM_FRAMES_IN_FLIGHT;
        if let Some(fence) = self.frame_fences[slot] {
            if !self.device.is_fence_signaled(fence) {
                warn!(
                    "Frame {} reuses an in-flight slot before its fence signaled.",
                    self.frame_index
                );
            }
        }

        self.upload.begin_frame(self.frame_index);
        let fence = self.device.create_fence()?;
        self.frame_fences[slot] = Some(fence);
        Ok(fence)
    }

    pub(crate) fn end_frame(&mut self) {
        self.frame_index += 1;
    }

    /// Drop every pool and cache built on the lost device.
    ///
    /// The context is unusable afterwards; the owning application rebuilds a
    /// fresh one once the backend recovers.
    pub fn notify_device_lost(&mut self) {
        self.device_lost = true;
        self.programs.invalidate_all();
        self.resource_group.invalidate();
        self.upload.invalidate();
    }

    /// Orderly shutdown: hand pooled objects back to the backend.
    pub fn shutdown(&mut self) {
        self.resource_group.clear(self.device.as_ref());
        self.upload.clear(self.device.as_ref());
        self.programs.invalidate_all();
    }
}
