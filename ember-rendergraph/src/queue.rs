//! Draw-queue accumulation and the instancing engine.

use bytemuck::{Pod, Zeroable};
use ember_core::collections::hashmap::HashMap;
use ember_render::{LayoutNodeId, ShaderVariantKey};
use ember_rhi::{FixedFunctionState, MaterialHandle, MeshHandle};
use glam::Mat4;

/// Light slots carried per draw instance.
pub const MAX_DRAW_LIGHTS: usize = 4;

/// Slot value meaning "no light bound".
pub const NO_LIGHT: u32 = u32::MAX;

/// Per-instance payload, laid out for direct GPU upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub transform: Mat4,
    pub tint: [f32; 4],
    pub lights: [u32; MAX_DRAW_LIGHTS],
}

impl Default for InstanceData {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            tint: [1.0; 4],
            lights: [NO_LIGHT; MAX_DRAW_LIGHTS],
        }
    }
}

impl InstanceData {
    pub fn from_transform(transform: Mat4) -> Self {
        Self {
            transform,
            ..Default::default()
        }
    }
}

/// Whether the queue engine may move an item relative to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawOrder {
    /// Free to reorder for batching.
    #[default]
    Unordered,
    /// Submission order relative to other `Preserved` items is kept exactly.
    Preserved,
}

#[derive(Debug, Clone)]
pub struct DrawItem {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub variant: ShaderVariantKey,
    pub instance: InstanceData,
    pub sort_key: u64,
    pub order: DrawOrder,
}

/// Items merge into one instanced draw when all three of these match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub mesh: MeshHandle,
    pub variant: ShaderVariantKey,
    pub material: MaterialHandle,
}

impl BatchKey {
    fn of(item: &DrawItem) -> Self {
        Self {
            mesh: item.mesh,
            variant: item.variant.clone(),
            material: item.material,
        }
    }
}

/// One GPU draw call covering `instance_count` logically identical items.
#[derive(Debug, Clone)]
pub struct InstancingBatch {
    pub key: BatchKey,
    pub instance_data: Vec<u8>,
    pub instance_count: u32,
    sort_key: u64,
}

impl InstancingBatch {
    fn new(key: BatchKey, sort_key: u64) -> Self {
        Self {
            key,
            instance_data: Vec::new(),
            instance_count: 0,
            sort_key,
        }
    }

    fn push(&mut self, instance: &InstanceData) {
        self.instance_data.extend_from_slice(bytemuck::bytes_of(instance));
        self.instance_count += 1;
    }
}

/// Draw items accumulated for one pass under one layout node.
pub struct RenderQueue {
    pub(crate) layout: LayoutNodeId,
    pub(crate) state: FixedFunctionState,
    pub(crate) items: Vec<DrawItem>,
}

impl RenderQueue {
    pub(crate) fn new(layout: LayoutNodeId, state: FixedFunctionState) -> Self {
        Self {
            layout,
            state,
            items: Vec::new(),
        }
    }

    pub fn add_draw(&mut self, item: DrawItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A compute dispatch submission.
#[derive(Debug, Clone)]
pub struct DispatchItem {
    pub variant: ShaderVariantKey,
    pub group_count: [u32; 3],
}

pub struct ComputeQueue {
    pub(crate) layout: LayoutNodeId,
    pub(crate) items: Vec<DispatchItem>,
}

impl ComputeQueue {
    pub(crate) fn new(layout: LayoutNodeId) -> Self {
        Self {
            layout,
            items: Vec::new(),
        }
    }

    pub fn add_dispatch(&mut self, item: DispatchItem) {
        self.items.push(item);
    }
}

/// Merge a queue's items into instanced batches.
///
/// Unordered items are grouped by [`BatchKey`]; instance data inside a group
/// keeps submission order, groups are emitted by ascending `sort_key` of
/// their first item. Preserved items follow afterwards in exact submission
/// order, merging only adjacent same-key runs so their relative order never
/// changes.
#[profiling::function]
pub(crate) fn build_batches(items: &[DrawItem]) -> Vec<InstancingBatch> {
    let mut grouped: Vec<InstancingBatch> = Vec::new();
    let mut group_index: HashMap<BatchKey, usize> = HashMap::new();

    for item in items.iter().filter(|i| i.order == DrawOrder::Unordered) {
        let key = BatchKey::of(item);
        let index = *group_index.entry(key.clone()).or_insert_with(|| {
            grouped.push(InstancingBatch::new(key, item.sort_key));
            grouped.len() - 1
        });
        grouped[index].push(&item.instance);
    }

    // Stable: equal sort keys keep first-seen group order.
    grouped.sort_by_key(|batch| batch.sort_key);

    let mut ordered: Vec<InstancingBatch> = Vec::new();
    for item in items.iter().filter(|i| i.order == DrawOrder::Preserved) {
        let key = BatchKey::of(item);
        match ordered.last_mut() {
            Some(run) if run.key == key => run.push(&item.instance),
            _ => {
                let mut run = InstancingBatch::new(key, item.sort_key);
                run.push(&item.instance);
                ordered.push(run);
            }
        }
    }

    grouped.extend(ordered);
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(mesh: u64, variant: &str, x: f32, order: DrawOrder, sort_key: u64) -> DrawItem {
        DrawItem {
            mesh: MeshHandle(mesh),
            material: MaterialHandle(1),
            variant: ShaderVariantKey::new(variant),
            instance: InstanceData::from_transform(Mat4::from_translation(glam::Vec3::new(
                x, 0.0, 0.0,
            ))),
            sort_key,
            order,
        }
    }

    fn instances_of(batch: &InstancingBatch) -> Vec<InstanceData> {
        batch
            .instance_data
            .chunks_exact(std::mem::size_of::<InstanceData>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    #[test]
    fn identical_keys_collapse_to_one_batch() {
        let items: Vec<DrawItem> = (0..1000)
            .map(|i| item(1, "forward", (i % 3) as f32, DrawOrder::Unordered, 0))
            .collect();

        let batches = build_batches(&items);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].instance_count, 1000);
        assert_eq!(instances_of(&batches[0]).len(), 1000);
    }

    #[test]
    fn batching_is_observationally_transparent() {
        let items = vec![
            item(1, "forward", 0.0, DrawOrder::Unordered, 0),
            item(2, "forward", 1.0, DrawOrder::Unordered, 0),
            item(1, "forward", 2.0, DrawOrder::Unordered, 0),
            item(2, "unlit", 3.0, DrawOrder::Unordered, 0),
            item(1, "forward", 4.0, DrawOrder::Unordered, 0),
        ];

        let batches = build_batches(&items);

        // Union of emitted instances equals the submitted set.
        let mut emitted: Vec<(u64, String, InstanceData)> = batches
            .iter()
            .flat_map(|b| {
                instances_of(b)
                    .into_iter()
                    .map(|i| (b.key.mesh.0, b.key.variant.shader().to_owned(), i))
            })
            .collect();
        let mut submitted: Vec<(u64, String, InstanceData)> = items
            .iter()
            .map(|i| (i.mesh.0, i.variant.shader().to_owned(), i.instance))
            .collect();

        let key_of = |e: &(u64, String, InstanceData)| {
            (e.0, e.1.clone(), e.2.transform.to_cols_array().map(f32::to_bits))
        };
        emitted.sort_by_key(key_of);
        submitted.sort_by_key(key_of);
        assert_eq!(emitted.len(), submitted.len());
        for (a, b) in emitted.iter().zip(&submitted) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn group_instance_data_keeps_submission_order() {
        let items = vec![
            item(1, "forward", 0.0, DrawOrder::Unordered, 0),
            item(2, "forward", 10.0, DrawOrder::Unordered, 0),
            item(1, "forward", 1.0, DrawOrder::Unordered, 0),
            item(1, "forward", 2.0, DrawOrder::Unordered, 0),
        ];

        let batches = build_batches(&items);
        let mesh1 = batches.iter().find(|b| b.key.mesh.0 == 1).unwrap();
        let xs: Vec<f32> = instances_of(mesh1)
            .iter()
            .map(|i| i.transform.w_axis.x)
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn preserved_items_keep_relative_order() {
        let items = vec![
            item(1, "blend", 0.0, DrawOrder::Preserved, 5),
            item(9, "forward", 100.0, DrawOrder::Unordered, 0),
            item(2, "blend", 1.0, DrawOrder::Preserved, 3),
            item(1, "blend", 2.0, DrawOrder::Preserved, 9),
            item(9, "forward", 101.0, DrawOrder::Unordered, 0),
        ];

        let batches = build_batches(&items);
        let tail: Vec<u64> = batches
            .iter()
            .skip_while(|b| b.key.mesh.0 == 9)
            .map(|b| b.key.mesh.0)
            .collect();
        // Submission order 1, 2, 1 survives regardless of sort keys.
        assert_eq!(tail, vec![1, 2, 1]);
    }

    #[test]
    fn preserved_runs_merge_only_when_adjacent() {
        let items = vec![
            item(1, "blend", 0.0, DrawOrder::Preserved, 0),
            item(1, "blend", 1.0, DrawOrder::Preserved, 0),
            item(2, "blend", 2.0, DrawOrder::Preserved, 0),
            item(1, "blend", 3.0, DrawOrder::Preserved, 0),
        ];

        let batches = build_batches(&items);
        let shape: Vec<(u64, u32)> = batches.iter().map(|b| (b.key.mesh.0, b.instance_count)).collect();
        assert_eq!(shape, vec![(1, 2), (2, 1), (1, 1)]);
    }

    #[test]
    fn unordered_groups_emit_by_sort_key() {
        let items = vec![
            item(3, "forward", 0.0, DrawOrder::Unordered, 30),
            item(1, "forward", 1.0, DrawOrder::Unordered, 10),
            item(2, "forward", 2.0, DrawOrder::Unordered, 20),
        ];

        let batches = build_batches(&items);
        let meshes: Vec<u64> = batches.iter().map(|b| b.key.mesh.0).collect();
        assert_eq!(meshes, vec![1, 2, 3]);
    }
}
