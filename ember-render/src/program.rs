//! Program library: the pipeline-state cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ember_core::collections::hashmap::{Entry, HashMap};
use ember_rhi::{
    DeviceBackend, DeviceError, FixedFunctionState, PipelineDesc, PipelineId, TextureFormat,
};
use parking_lot::{Condvar, Mutex};

use crate::layout::{LayoutGraph, LayoutNodeId};
use crate::shader::{ShaderVariantKey, ShaderVariantResolver};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown shader variant '{0}'")]
    UnknownVariant(String),
    #[error("unknown layout node {0:?}")]
    UnknownLayout(LayoutNodeId),
    #[error("variant '{shader}' is missing a {stage} stage")]
    MissingStage { shader: String, stage: &'static str },
    #[error("backend rejected pipeline: {0}")]
    Backend(String),
    #[error("device lost")]
    DeviceLost,
}

impl From<DeviceError> for CompileError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Lost => CompileError::DeviceLost,
            DeviceError::OutOfResources { kind } => CompileError::Backend(kind.to_owned()),
        }
    }
}

/// Render-target formats a raster program is compiled against.
///
/// Folded into the fixed-function part of the cache key; empty for compute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TargetLayout {
    pub colors: Vec<TextureFormat>,
    pub depth: Option<TextureFormat>,
}

/// Composite cache key: layout node, shader variant, fixed-function state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub layout: LayoutNodeId,
    pub variant: ShaderVariantKey,
    pub state: FixedFunctionState,
    pub targets: TargetLayout,
}

/// A compiled pipeline-state object. Cached for the context's lifetime.
#[derive(Debug)]
pub struct ProgramVariant {
    pub pipeline: PipelineId,
    pub layout: LayoutNodeId,
}

enum SlotState {
    InFlight,
    Ready(Arc<ProgramVariant>),
    Failed(CompileError),
}

struct ProgramSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ProgramSlot {
    fn in_flight() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::InFlight),
            ready: Condvar::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramLibraryStats {
    pub cached: usize,
    pub compiled_total: u64,
}

/// Compiles and caches program variants.
///
/// `resolve` is cache-before-compile: concurrent requests for one key share
/// a single in-flight compilation, and a failed compilation never leaves an
/// entry behind.
pub struct ProgramLibrary {
    resolver: Arc<dyn ShaderVariantResolver>,
    slots: Mutex<HashMap<ProgramKey, Arc<ProgramSlot>>>,
    compiled_total: AtomicU64,
}

impl ProgramLibrary {
    pub fn new(resolver: Arc<dyn ShaderVariantResolver>) -> Self {
        Self {
            resolver,
            slots: Mutex::new(HashMap::new()),
            compiled_total: AtomicU64::new(0),
        }
    }

    /// Return the cached variant for `key`, compiling it on first request.
    #[profiling::function]
    pub fn resolve(
        &self,
        device: &dyn DeviceBackend,
        layout_graph: &LayoutGraph,
        key: &ProgramKey,
    ) -> Result<Arc<ProgramVariant>, CompileError> {
        let (slot, owns_compile) = {
            let mut slots = self.slots.lock();
            match slots.entry(key.clone()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let slot = ProgramSlot::in_flight();
                    entry.insert(slot.clone());
                    (slot, true)
                }
            }
        };

        if owns_compile {
            let result = self.compile(device, layout_graph, key);
            let mut state = slot.state.lock();
            match result {
                Ok(variant) => {
                    *state = SlotState::Ready(variant.clone());
                    slot.ready.notify_all();
                    Ok(variant)
                }
                Err(err) => {
                    *state = SlotState::Failed(err.clone());
                    slot.ready.notify_all();
                    drop(state);
                    // Drop the poisoned entry so a later request may retry.
                    self.slots.lock().remove(key);
                    Err(err)
                }
            }
        } else {
            let mut state = slot.state.lock();
            loop {
                match &*state {
                    SlotState::InFlight => slot.ready.wait(&mut state),
                    SlotState::Ready(variant) => return Ok(variant.clone()),
                    SlotState::Failed(err) => return Err(err.clone()),
                }
            }
        }
    }

    #[profiling::function]
    fn compile(
        &self,
        device: &dyn DeviceBackend,
        layout_graph: &LayoutGraph,
        key: &ProgramKey,
    ) -> Result<Arc<ProgramVariant>, CompileError> {
        if layout_graph.node(key.layout).is_none() {
            return Err(CompileError::UnknownLayout(key.layout));
        }

        let modules = self.resolver.resolve(&key.variant)?;
        let compute = modules.compute.is_some();
        if !compute && modules.vertex.is_none() {
            return Err(CompileError::MissingStage {
                shader: key.variant.shader().to_owned(),
                stage: "vertex",
            });
        }

        let desc = PipelineDesc {
            vertex_module: modules.vertex,
            fragment_module: modules.fragment,
            compute_module: modules.compute,
            set_layouts: layout_graph.set_layout_hashes(key.layout),
            color_formats: key.targets.colors.clone(),
            depth_format: key.targets.depth,
            state: key.state,
        };

        let pipeline = device.create_pipeline(&desc)?;
        self.compiled_total.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Compiled program variant '{}' for layout {:?}",
            key.variant.shader(),
            key.layout
        );

        Ok(Arc::new(ProgramVariant {
            pipeline,
            layout: key.layout,
        }))
    }

    /// Drop every cached variant. For device loss and shader reloads.
    pub fn invalidate_all(&self) {
        self.slots.lock().clear();
    }

    pub fn stats(&self) -> ProgramLibraryStats {
        ProgramLibraryStats {
            cached: self.slots.lock().len(),
            compiled_total: self.compiled_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutGraphBuilder, UpdateFrequency};
    use crate::shader::{ShaderModules, StaticShaderCatalog};
    use ember_rhi::{NullDevice, ShaderModuleId};

    fn test_setup() -> (NullDevice, LayoutGraph, Arc<StaticShaderCatalog>) {
        let device = NullDevice::new();
        let mut builder = LayoutGraphBuilder::new();
        builder
            .add_node("global", UpdateFrequency::PerFrame, None, vec![])
            .unwrap();
        let graph = builder.build();

        let catalog = Arc::new(StaticShaderCatalog::new());
        catalog.register(
            ShaderVariantKey::new("forward"),
            ShaderModules::raster(ShaderModuleId(1), ShaderModuleId(2)),
        );
        (device, graph, catalog)
    }

    fn forward_key() -> ProgramKey {
        ProgramKey {
            layout: LayoutNodeId(0),
            variant: ShaderVariantKey::new("forward"),
            state: FixedFunctionState::opaque(),
            targets: TargetLayout {
                colors: vec![TextureFormat::Rgba8Unorm],
                depth: None,
            },
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let (device, graph, catalog) = test_setup();
        let library = ProgramLibrary::new(catalog);

        let first = library.resolve(&device, &graph, &forward_key()).unwrap();
        let second = library.resolve(&device, &graph, &forward_key()).unwrap();

        assert_eq!(first.pipeline, second.pipeline);
        assert_eq!(device.pipelines_created(), 1);
        assert_eq!(library.stats().compiled_total, 1);
    }

    #[test]
    fn concurrent_requests_compile_once() {
        let (device, graph, catalog) = test_setup();
        let library = ProgramLibrary::new(catalog);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let variant = library.resolve(&device, &graph, &forward_key()).unwrap();
                    assert_eq!(variant.layout, LayoutNodeId(0));
                });
            }
        });

        assert_eq!(device.pipelines_created(), 1);
    }

    #[test]
    fn failed_compile_does_not_corrupt_the_cache() {
        let (device, graph, catalog) = test_setup();
        let library = ProgramLibrary::new(catalog.clone());

        let mut missing = forward_key();
        missing.variant = ShaderVariantKey::new("does-not-exist");
        let err = library.resolve(&device, &graph, &missing).unwrap_err();
        assert!(matches!(err, CompileError::UnknownVariant(_)));
        assert_eq!(library.stats().cached, 0);

        // A valid resolve at the same layout still succeeds.
        let variant = library.resolve(&device, &graph, &forward_key()).unwrap();
        assert_eq!(variant.layout, LayoutNodeId(0));

        // And registering the missing variant afterwards makes it compile.
        catalog.register(
            ShaderVariantKey::new("does-not-exist"),
            ShaderModules::raster(ShaderModuleId(7), ShaderModuleId(8)),
        );
        assert!(library.resolve(&device, &graph, &missing).is_ok());
    }

    #[test]
    fn unknown_layout_fails() {
        let (device, graph, catalog) = test_setup();
        let library = ProgramLibrary::new(catalog);

        let mut key = forward_key();
        key.layout = LayoutNodeId(42);
        let err = library.resolve(&device, &graph, &key).unwrap_err();
        assert!(matches!(err, CompileError::UnknownLayout(_)));
    }
}
