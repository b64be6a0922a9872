//! Frame graph compilation: validation, dependency resolution, scheduling.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ember_core::collections::hashmap::HashSet;
use ember_rhi::ResourceState;

use crate::pass::{Pass, PassKind};
use crate::resource::{GraphResourceId, ResourceDeclaration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphValidationError {
    #[error("pass '{pass}' references undeclared resource {id}")]
    DanglingResource { pass: String, id: u32 },
    #[error("resource '{name}' is read by pass '{pass}' but never written")]
    ReadBeforeWrite { name: String, pass: String },
    #[error("pass '{pass}' both reads and writes resource '{name}'")]
    AccessConflict { pass: String, name: String },
    #[error("moved resource '{name}' is still accessed by pass '{pass}'")]
    MoveHazard { pass: String, name: String },
    #[error("dependency cycle between passes: {passes:?}")]
    Cycle { passes: Vec<String> },
}

/// The frame's declared graph, produced by
/// [`RenderGraphBuilder::build`](crate::RenderGraphBuilder::build).
pub struct RenderGraph {
    pub(crate) passes: Vec<Pass>,
    pub(crate) resources: Vec<ResourceDeclaration>,
}

/// A state transition required before a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledBarrier {
    pub(crate) resource: GraphResourceId,
    pub(crate) prev: ResourceState,
    pub(crate) next: ResourceState,
}

pub(crate) struct CompiledPass {
    pub(crate) pass: Pass,
    pub(crate) barriers: Vec<CompiledBarrier>,
}

pub(crate) struct CompiledResource {
    pub(crate) declaration: ResourceDeclaration,
    /// First and last execution index touching the resource.
    pub(crate) lifetime: Option<(usize, usize)>,
}

/// Immutable, scheduled form of the graph: passes in execution order with
/// their pre-pass barriers and per-resource lifetime spans.
pub struct CompiledRenderGraph {
    pub(crate) passes: Vec<CompiledPass>,
    pub(crate) resources: Vec<CompiledResource>,
}

impl std::fmt::Debug for CompiledRenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRenderGraph")
            .field("passes", &self.passes.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl RenderGraph {
    /// Validate and schedule the graph.
    ///
    /// Any error here drops the whole frame; no partial schedule escapes.
    #[profiling::function]
    pub fn compile(self) -> Result<CompiledRenderGraph, GraphValidationError> {
        let RenderGraph { passes, resources } = self;

        Self::validate_accesses(&passes, &resources)?;
        let edges = Self::derive_dependencies(&passes, &resources)?;
        let order = Self::topo_sort(&passes, &edges)?;
        Self::validate_moves(&passes, &resources, &order)?;

        let lifetimes = Self::resource_lifetimes(&passes, &resources, &order);
        let barriers = Self::plan_barriers(&passes, &resources, &order);

        let mut slots: Vec<Option<Pass>> = passes.into_iter().map(Some).collect();
        let compiled_passes = order
            .iter()
            .zip(barriers)
            .map(|(&index, barriers)| CompiledPass {
                pass: slots[index].take().expect("pass scheduled twice"),
                barriers,
            })
            .collect();

        let compiled_resources = resources
            .into_iter()
            .zip(lifetimes)
            .map(|(declaration, lifetime)| CompiledResource {
                declaration,
                lifetime,
            })
            .collect();

        Ok(CompiledRenderGraph {
            passes: compiled_passes,
            resources: compiled_resources,
        })
    }

    fn validate_accesses(
        passes: &[Pass],
        resources: &[ResourceDeclaration],
    ) -> Result<(), GraphValidationError> {
        for pass in passes {
            for access in pass.reads.iter().chain(&pass.writes) {
                if access.id as usize >= resources.len() {
                    return Err(GraphValidationError::DanglingResource {
                        pass: pass.name.clone(),
                        id: access.id,
                    });
                }
            }

            if let PassKind::Raster(data) = &pass.kind {
                let attachments = data
                    .color_attachments
                    .iter()
                    .map(|(id, _)| *id)
                    .chain(data.depth_stencil.iter().map(|(id, _)| *id));
                for id in attachments {
                    if pass.writes.iter().all(|w| w.id != id) {
                        return Err(GraphValidationError::DanglingResource {
                            pass: pass.name.clone(),
                            id,
                        });
                    }
                }
            }

            // A self read/write hazard cannot be fixed by reordering.
            for read in &pass.reads {
                if pass.writes.iter().any(|w| w.id == read.id) {
                    return Err(GraphValidationError::AccessConflict {
                        pass: pass.name.clone(),
                        name: resources[read.id as usize].name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Derive pass-ordering edges from per-resource read/write sets.
    ///
    /// Writers of one resource are versioned by declaration order; a read
    /// binds to the latest preceding version (or, for a forward reference,
    /// the first writer) and must settle before the version is overwritten.
    fn derive_dependencies(
        passes: &[Pass],
        resources: &[ResourceDeclaration],
    ) -> Result<Vec<(usize, usize)>, GraphValidationError> {
        let mut edges: HashSet<(usize, usize)> = HashSet::new();

        for (resource_id, declaration) in resources.iter().enumerate() {
            let resource_id = resource_id as GraphResourceId;
            let writers: Vec<usize> = passes
                .iter()
                .enumerate()
                .filter(|(_, p)| p.writes.iter().any(|w| w.id == resource_id))
                .map(|(i, _)| i)
                .collect();
            let readers: Vec<usize> = passes
                .iter()
                .enumerate()
                .filter(|(_, p)| p.reads.iter().any(|r| r.id == resource_id))
                .map(|(i, _)| i)
                .collect();

            if writers.is_empty() {
                if !declaration.init.is_imported() {
                    if let Some(&reader) = readers.first() {
                        return Err(GraphValidationError::ReadBeforeWrite {
                            name: declaration.name().to_owned(),
                            pass: passes[reader].name.clone(),
                        });
                    }
                }
                continue;
            }

            for &reader in &readers {
                let version = writers
                    .iter()
                    .rev()
                    .find(|&&w| w < reader)
                    .copied()
                    .unwrap_or(writers[0]);
                edges.insert((version, reader));

                // The read must settle before the version is overwritten.
                let version_slot = writers.iter().position(|&w| w == version).unwrap();
                if let Some(&next_writer) = writers.get(version_slot + 1) {
                    if next_writer != reader {
                        edges.insert((reader, next_writer));
                    }
                }
            }

            for pair in writers.windows(2) {
                edges.insert((pair[0], pair[1]));
            }
        }

        Ok(edges.into_iter().collect())
    }

    /// Kahn's algorithm with a min-index heap: among ready passes, the one
    /// declared first runs first, keeping identical graphs deterministic.
    fn topo_sort(
        passes: &[Pass],
        edges: &[(usize, usize)],
    ) -> Result<Vec<usize>, GraphValidationError> {
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); passes.len()];
        let mut in_degree: Vec<usize> = vec![0; passes.len()];
        for &(from, to) in edges {
            adjacency[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..passes.len())
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(passes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &next in &adjacency[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != passes.len() {
            let stuck: Vec<String> = (0..passes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| passes[i].name.clone())
                .collect();
            return Err(GraphValidationError::Cycle { passes: stuck });
        }

        Ok(order)
    }

    /// Move passes transfer ownership: the source must be dead afterwards
    /// and the destination untouched before.
    fn validate_moves(
        passes: &[Pass],
        resources: &[ResourceDeclaration],
        order: &[usize],
    ) -> Result<(), GraphValidationError> {
        let mut position = vec![0usize; passes.len()];
        for (pos, &index) in order.iter().enumerate() {
            position[index] = pos;
        }

        for (index, pass) in passes.iter().enumerate() {
            let PassKind::Move(data) = &pass.kind else {
                continue;
            };
            let move_pos = position[index];

            for (other_index, other) in passes.iter().enumerate() {
                if other_index == index {
                    continue;
                }
                let touches_src = other
                    .reads
                    .iter()
                    .chain(&other.writes)
                    .any(|a| a.id == data.src);
                if touches_src && position[other_index] > move_pos {
                    return Err(GraphValidationError::MoveHazard {
                        pass: other.name.clone(),
                        name: resources[data.src as usize].name().to_owned(),
                    });
                }
                let touches_dst = other
                    .reads
                    .iter()
                    .chain(&other.writes)
                    .any(|a| a.id == data.dst);
                if touches_dst && position[other_index] < move_pos {
                    return Err(GraphValidationError::MoveHazard {
                        pass: other.name.clone(),
                        name: resources[data.dst as usize].name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resource_lifetimes(
        passes: &[Pass],
        resources: &[ResourceDeclaration],
        order: &[usize],
    ) -> Vec<Option<(usize, usize)>> {
        let mut lifetimes: Vec<Option<(usize, usize)>> = vec![None; resources.len()];
        for (pos, &index) in order.iter().enumerate() {
            let pass = &passes[index];
            for access in pass.reads.iter().chain(&pass.writes) {
                let span = &mut lifetimes[access.id as usize];
                *span = Some(match span {
                    None => (pos, pos),
                    Some((first, last)) => ((*first).min(pos), (*last).max(pos)),
                });
            }
        }
        lifetimes
    }

    /// Walk passes in execution order and record a transition wherever a
    /// resource's access state changes.
    ///
    /// The transition out of `Undefined` is folded into allocation/load-op
    /// handling by the backend and produces no barrier.
    fn plan_barriers(
        passes: &[Pass],
        resources: &[ResourceDeclaration],
        order: &[usize],
    ) -> Vec<Vec<CompiledBarrier>> {
        let mut states: Vec<ResourceState> = resources
            .iter()
            .map(|r| r.init.initial_state())
            .collect();
        let undefined: Vec<ResourceState> = states.clone();

        let mut per_pass = Vec::with_capacity(order.len());
        for &index in order {
            let pass = &passes[index];
            let mut barriers = Vec::new();

            for access in pass.reads.iter().chain(&pass.writes) {
                let id = access.id as usize;
                let prev = states[id];
                if prev == access.access {
                    continue;
                }
                let first_use =
                    !resources[id].init.is_imported() && prev == undefined[id];
                if !first_use {
                    barriers.push(CompiledBarrier {
                        resource: access.id,
                        prev,
                        next: access.access,
                    });
                }
                states[id] = access.access;
            }

            per_pass.push(barriers);
        }
        per_pass
    }
}

impl CompiledRenderGraph {
    /// Pass names in execution order.
    pub fn pass_order(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.pass.name()).collect()
    }

    pub fn barrier_count(&self) -> usize {
        self.passes.iter().map(|p| p.barriers.len()).sum()
    }

    /// Execution-index span of a resource, by name.
    pub fn resource_lifetime(&self, name: &str) -> Option<(usize, usize)> {
        self.resources
            .iter()
            .find(|r| r.declaration.name() == name)
            .and_then(|r| r.lifetime)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}
