//! The layout graph: shader-resource binding layouts grouped by update
//! frequency, from per-frame globals down to per-draw data.

use std::hash::{Hash, Hasher};

use ember_core::collections::DefaultHasher;
use ember_rhi::ShaderStages;

/// How often the bindings of a set are expected to change.
///
/// Tiers are ordered; a child node may never update less frequently than its
/// parent. The tier also selects the descriptor-set index of the node's
/// layout in the effective chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateFrequency {
    PerFrame,
    PerPass,
    PerMaterial,
    PerDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub slot: u32,
    pub kind: BindingKind,
    pub count: u32,
    pub visibility: ShaderStages,
}

impl LayoutBinding {
    pub fn new(slot: u32, kind: BindingKind, visibility: ShaderStages) -> Self {
        Self {
            slot,
            kind,
            count: 1,
            visibility,
        }
    }
}

/// One descriptor-set layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SetLayout {
    pub bindings: Vec<LayoutBinding>,
}

impl SetLayout {
    /// Stable structural hash, used in backend pipeline descriptors.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutNodeId(pub u32);

pub struct LayoutNode {
    name: String,
    frequency: UpdateFrequency,
    parent: Option<LayoutNodeId>,
    set_layout: SetLayout,
}

impl LayoutNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> UpdateFrequency {
        self.frequency
    }

    pub fn parent(&self) -> Option<LayoutNodeId> {
        self.parent
    }

    pub fn set_layout(&self) -> &SetLayout {
        &self.set_layout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("unknown parent layout node {0:?}")]
    UnknownParent(LayoutNodeId),
    #[error("layout node '{child}' updates less often than its parent '{parent}'")]
    FrequencyInversion { parent: String, child: String },
    #[error("duplicate binding slot {slot} in layout node '{node}'")]
    DuplicateSlot { node: String, slot: u32 },
}

/// Builds the per-configuration layout graph.
///
/// Parents must be added before children, which keeps the graph acyclic by
/// construction.
#[derive(Default)]
pub struct LayoutGraphBuilder {
    nodes: Vec<LayoutNode>,
}

impl LayoutGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: &str,
        frequency: UpdateFrequency,
        parent: Option<LayoutNodeId>,
        bindings: Vec<LayoutBinding>,
    ) -> Result<LayoutNodeId, LayoutError> {
        if let Some(parent_id) = parent {
            let parent_node = self
                .nodes
                .get(parent_id.0 as usize)
                .ok_or(LayoutError::UnknownParent(parent_id))?;
            if frequency < parent_node.frequency {
                return Err(LayoutError::FrequencyInversion {
                    parent: parent_node.name.clone(),
                    child: name.to_owned(),
                });
            }
        }

        for (index, binding) in bindings.iter().enumerate() {
            if bindings[..index].iter().any(|b| b.slot == binding.slot) {
                return Err(LayoutError::DuplicateSlot {
                    node: name.to_owned(),
                    slot: binding.slot,
                });
            }
        }

        let id = LayoutNodeId(self.nodes.len() as u32);
        self.nodes.push(LayoutNode {
            name: name.to_owned(),
            frequency,
            parent,
            set_layout: SetLayout { bindings },
        });
        Ok(id)
    }

    pub fn build(self) -> LayoutGraph {
        LayoutGraph { nodes: self.nodes }
    }
}

/// DAG of binding layouts, built once per configuration and shared read-only.
pub struct LayoutGraph {
    nodes: Vec<LayoutNode>,
}

impl LayoutGraph {
    pub fn node(&self, id: LayoutNodeId) -> Option<&LayoutNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn find(&self, name: &str) -> Option<LayoutNodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| LayoutNodeId(i as u32))
    }

    /// The chain of set layouts from the root down to `id`, outermost first.
    pub fn effective_sets(&self, id: LayoutNodeId) -> Vec<&SetLayout> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            let node = &self.nodes[node_id.0 as usize];
            chain.push(&node.set_layout);
            cursor = node.parent;
        }
        chain.reverse();
        chain
    }

    /// Structural hashes of the effective chain, for backend descriptors.
    pub fn set_layout_hashes(&self, id: LayoutNodeId) -> Vec<u64> {
        self.effective_sets(id)
            .iter()
            .map(|set| set.structural_hash())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
