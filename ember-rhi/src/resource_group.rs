//! Pooled GPU-side resources, reused across frames.

use ember_core::collections::hashmap::HashMap;
use parking_lot::Mutex;

use crate::buffer::BufferDesc;
use crate::device::{BufferId, DeviceBackend, DeviceError, PassObjectId, TextureId};
use crate::synchronization::FenceId;
use crate::texture::{Extent2d, TextureDesc, TextureFormat};

/// Attachment layout of a persistent render-pass/framebuffer object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PassObjectDesc {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub extent: Extent2d,
    pub samples: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceGroupConfig {
    /// Idle textures + buffers kept before LRU eviction kicks in.
    pub max_idle_resources: usize,
    pub max_pass_objects: usize,
}

impl Default for ResourceGroupConfig {
    fn default() -> Self {
        Self {
            max_idle_resources: 64,
            max_pass_objects: 32,
        }
    }
}

struct IdleEntry<I> {
    id: I,
    /// Fence guarding the entry's last GPU use. `None` means never submitted.
    fence: Option<FenceId>,
    last_used: u64,
}

struct PassEntry {
    id: PassObjectId,
    last_used: u64,
}

#[derive(Default)]
struct Pools {
    tick: u64,
    textures: HashMap<TextureDesc, Vec<IdleEntry<TextureId>>>,
    buffers: HashMap<BufferDesc, Vec<IdleEntry<BufferId>>>,
    pass_objects: HashMap<PassObjectDesc, PassEntry>,
}

impl Pools {
    fn idle_resource_count(&self) -> usize {
        let textures: usize = self.textures.values().map(|v| v.len()).sum();
        let buffers: usize = self.buffers.values().map(|v| v.len()).sum();
        textures + buffers
    }
}

/// Pool of render targets, buffers and persistent pass objects, keyed by
/// their descriptors.
///
/// An entry is only handed back out once the fence tagged at release has
/// signaled; overflow beyond the configured bound evicts the least recently
/// used reusable entry. All access is mutually exclusive.
pub struct ResourceGroup {
    config: ResourceGroupConfig,
    pools: Mutex<Pools>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGroupStats {
    pub idle_textures: usize,
    pub idle_buffers: usize,
    pub pass_objects: usize,
}

impl ResourceGroup {
    pub fn new(config: ResourceGroupConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(Pools::default()),
        }
    }

    /// Return an idle, fence-complete texture matching `desc`, or allocate one.
    #[profiling::function]
    pub fn acquire_texture(
        &self,
        device: &dyn DeviceBackend,
        desc: &TextureDesc,
    ) -> Result<TextureId, DeviceError> {
        let mut pools = self.pools.lock();
        pools.tick += 1;

        if let Some(list) = pools.textures.get_mut(desc) {
            if let Some(index) = list
                .iter()
                .position(|e| e.fence.is_none_or(|f| device.is_fence_signaled(f)))
            {
                return Ok(list.swap_remove(index).id);
            }
        }

        device.create_texture(desc)
    }

    /// Return `texture` to the idle pool, tagged with the fence of its last use.
    pub fn release_texture(
        &self,
        device: &dyn DeviceBackend,
        desc: &TextureDesc,
        texture: TextureId,
        fence: Option<FenceId>,
    ) {
        let mut pools = self.pools.lock();
        pools.tick += 1;
        let last_used = pools.tick;
        pools.textures.entry(desc.clone()).or_default().push(IdleEntry {
            id: texture,
            fence,
            last_used,
        });
        Self::evict_overflow(&mut pools, device, self.config.max_idle_resources);
    }

    #[profiling::function]
    pub fn acquire_buffer(
        &self,
        device: &dyn DeviceBackend,
        desc: &BufferDesc,
    ) -> Result<BufferId, DeviceError> {
        let mut pools = self.pools.lock();
        pools.tick += 1;

        if let Some(list) = pools.buffers.get_mut(desc) {
            if let Some(index) = list
                .iter()
                .position(|e| e.fence.is_none_or(|f| device.is_fence_signaled(f)))
            {
                return Ok(list.swap_remove(index).id);
            }
        }

        device.create_buffer(desc)
    }

    pub fn release_buffer(
        &self,
        device: &dyn DeviceBackend,
        desc: &BufferDesc,
        buffer: BufferId,
        fence: Option<FenceId>,
    ) {
        let mut pools = self.pools.lock();
        pools.tick += 1;
        let last_used = pools.tick;
        pools.buffers.entry(desc.clone()).or_default().push(IdleEntry {
            id: buffer,
            fence,
            last_used,
        });
        Self::evict_overflow(&mut pools, device, self.config.max_idle_resources);
    }

    /// Get or create the persistent pass object for an attachment layout.
    pub fn pass_object(
        &self,
        device: &dyn DeviceBackend,
        desc: &PassObjectDesc,
    ) -> Result<PassObjectId, DeviceError> {
        let mut pools = self.pools.lock();
        pools.tick += 1;
        let tick = pools.tick;

        if let Some(entry) = pools.pass_objects.get_mut(desc) {
            entry.last_used = tick;
            return Ok(entry.id);
        }

        let id = device.create_pass_object(desc)?;
        pools.pass_objects.insert(desc.clone(), PassEntry { id, last_used: tick });

        while pools.pass_objects.len() > self.config.max_pass_objects {
            let victim = pools
                .pass_objects
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(d, _)| d.clone());
            match victim {
                Some(key) => {
                    let entry = pools.pass_objects.remove(&key).unwrap();
                    device.destroy_pass_object(entry.id);
                }
                None => break,
            }
        }

        Ok(id)
    }

    /// Evict least-recently-used idle entries until back under the bound.
    ///
    /// Entries still guarded by an unsignaled fence are not eligible; the
    /// pool may transiently exceed the bound while frames are in flight.
    fn evict_overflow(pools: &mut Pools, device: &dyn DeviceBackend, max_idle: usize) {
        while pools.idle_resource_count() > max_idle {
            let texture_victim = pools
                .textures
                .iter()
                .flat_map(|(desc, list)| list.iter().map(move |e| (desc, e)))
                .filter(|(_, e)| e.fence.is_none_or(|f| device.is_fence_signaled(f)))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(desc, e)| (desc.clone(), e.last_used));
            let buffer_victim = pools
                .buffers
                .iter()
                .flat_map(|(desc, list)| list.iter().map(move |e| (desc, e)))
                .filter(|(_, e)| e.fence.is_none_or(|f| device.is_fence_signaled(f)))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(desc, e)| (desc.clone(), e.last_used));

            match (texture_victim, buffer_victim) {
                (Some((desc, tick)), Some((_, buffer_tick))) if tick <= buffer_tick => {
                    Self::evict_texture(pools, device, &desc, tick);
                }
                (Some(_), Some((desc, tick))) => {
                    Self::evict_buffer(pools, device, &desc, tick);
                }
                (Some((desc, tick)), None) => {
                    Self::evict_texture(pools, device, &desc, tick);
                }
                (None, Some((desc, tick))) => {
                    Self::evict_buffer(pools, device, &desc, tick);
                }
                (None, None) => break,
            }
        }
    }

    fn evict_texture(pools: &mut Pools, device: &dyn DeviceBackend, desc: &TextureDesc, tick: u64) {
        if let Some(list) = pools.textures.get_mut(desc) {
            if let Some(index) = list.iter().position(|e| e.last_used == tick) {
                let entry = list.swap_remove(index);
                log::trace!("Evicting idle texture {:?} ({:?})", entry.id, desc.format);
                device.destroy_texture(entry.id);
            }
            if list.is_empty() {
                pools.textures.remove(desc);
            }
        }
    }

    fn evict_buffer(pools: &mut Pools, device: &dyn DeviceBackend, desc: &BufferDesc, tick: u64) {
        if let Some(list) = pools.buffers.get_mut(desc) {
            if let Some(index) = list.iter().position(|e| e.last_used == tick) {
                let entry = list.swap_remove(index);
                device.destroy_buffer(entry.id);
            }
            if list.is_empty() {
                pools.buffers.remove(desc);
            }
        }
    }

    /// Destroy every pooled object. For orderly shutdown.
    pub fn clear(&self, device: &dyn DeviceBackend) {
        let mut pools = self.pools.lock();
        for (_, list) in pools.textures.drain() {
            for entry in list {
                device.destroy_texture(entry.id);
            }
        }
        for (_, list) in pools.buffers.drain() {
            for entry in list {
                device.destroy_buffer(entry.id);
            }
        }
        for (_, entry) in pools.pass_objects.drain() {
            device.destroy_pass_object(entry.id);
        }
    }

    /// Drop every pooled entry without touching the device.
    ///
    /// For device loss, where the backend objects are already gone.
    pub fn invalidate(&self) {
        let mut pools = self.pools.lock();
        pools.textures.clear();
        pools.buffers.clear();
        pools.pass_objects.clear();
    }

    pub fn stats(&self) -> ResourceGroupStats {
        let pools = self.pools.lock();
        ResourceGroupStats {
            idle_textures: pools.textures.values().map(|v| v.len()).sum(),
            idle_buffers: pools.buffers.values().map(|v| v.len()).sum(),
            pass_objects: pools.pass_objects.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;

    fn target_desc() -> TextureDesc {
        TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn reuses_idle_texture_after_fence_signals() {
        let device = NullDevice::new();
        let group = ResourceGroup::new(ResourceGroupConfig::default());
        let desc = target_desc();

        let first = group.acquire_texture(&device, &desc).unwrap();
        let fence = device.create_fence().unwrap();
        group.release_texture(&device, &desc, first, Some(fence));

        // Fence pending: the pooled entry may not be reused yet.
        let second = group.acquire_texture(&device, &desc).unwrap();
        assert_ne!(first, second);

        device.signal_fence(fence);
        let third = group.acquire_texture(&device, &desc).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn never_returns_unsignaled_entry() {
        let device = NullDevice::new();
        let group = ResourceGroup::new(ResourceGroupConfig::default());
        let desc = target_desc();

        let id = group.acquire_texture(&device, &desc).unwrap();
        let fence = device.create_fence().unwrap();
        group.release_texture(&device, &desc, id, Some(fence));

        for _ in 0..4 {
            let fresh = group.acquire_texture(&device, &desc).unwrap();
            assert_ne!(fresh, id);
            group.release_texture(&device, &desc, fresh, None);
        }
    }

    #[test]
    fn evicts_least_recently_used_when_over_capacity() {
        let device = NullDevice::new();
        let group = ResourceGroup::new(ResourceGroupConfig {
            max_idle_resources: 2,
            max_pass_objects: 32,
        });
        let desc = target_desc();

        let a = group.acquire_texture(&device, &desc).unwrap();
        let b = group.acquire_texture(&device, &desc).unwrap();
        let c = group.acquire_texture(&device, &desc).unwrap();
        assert_eq!(device.live_texture_count(), 3);

        group.release_texture(&device, &desc, a, None);
        group.release_texture(&device, &desc, b, None);
        group.release_texture(&device, &desc, c, None);

        // Capacity 2: the first-released entry is gone.
        assert_eq!(group.stats().idle_textures, 2);
        assert_eq!(device.live_texture_count(), 2);
    }

    #[test]
    fn pass_objects_are_cached_by_layout() {
        let device = NullDevice::new();
        let group = ResourceGroup::new(ResourceGroupConfig::default());
        let desc = PassObjectDesc {
            color_formats: vec![TextureFormat::Rgba16Float],
            depth_format: Some(TextureFormat::Depth32Float),
            extent: Extent2d::new(128, 128),
            samples: 1,
        };

        let first = group.pass_object(&device, &desc).unwrap();
        let second = group.pass_object(&device, &desc).unwrap();
        assert_eq!(first, second);
        assert_eq!(group.stats().pass_objects, 1);
    }
}
