//! Shader-resource layouts and the pipeline-state program cache.

mod layout;
mod program;
mod shader;

pub use layout::{
    BindingKind, LayoutBinding, LayoutError, LayoutGraph, LayoutGraphBuilder, LayoutNode,
    LayoutNodeId, SetLayout, UpdateFrequency,
};
pub use program::{
    CompileError, ProgramKey, ProgramLibrary, ProgramLibraryStats, ProgramVariant, TargetLayout,
};
pub use shader::{ShaderModules, ShaderVariantKey, ShaderVariantResolver, StaticShaderCatalog};
