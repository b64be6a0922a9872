use ember_core::collections::hashmap::HashMap;
use ember_rhi::ShaderModuleId;
use parking_lot::RwLock;

use crate::program::CompileError;

/// Identifies one compiled variant of a shader program.
///
/// Defines are kept sorted so that two keys built from the same set in any
/// order hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderVariantKey {
    shader: String,
    defines: Vec<(String, String)>,
}

impl ShaderVariantKey {
    pub fn new(shader: &str) -> Self {
        Self {
            shader: shader.to_owned(),
            defines: Vec::new(),
        }
    }

    pub fn with_define(mut self, key: &str, value: &str) -> Self {
        let entry = (key.to_owned(), value.to_owned());
        match self.defines.binary_search_by(|d| d.0.cmp(&entry.0)) {
            Ok(index) => self.defines[index] = entry,
            Err(index) => self.defines.insert(index, entry),
        }
        self
    }

    pub fn shader(&self) -> &str {
        &self.shader
    }

    pub fn defines(&self) -> &[(String, String)] {
        &self.defines
    }
}

/// Compiled shader module handles for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShaderModules {
    pub vertex: Option<ShaderModuleId>,
    pub fragment: Option<ShaderModuleId>,
    pub compute: Option<ShaderModuleId>,
}

impl ShaderModules {
    pub fn raster(vertex: ShaderModuleId, fragment: ShaderModuleId) -> Self {
        Self {
            vertex: Some(vertex),
            fragment: Some(fragment),
            compute: None,
        }
    }

    pub fn compute(module: ShaderModuleId) -> Self {
        Self {
            vertex: None,
            fragment: None,
            compute: Some(module),
        }
    }
}

/// Collaborator that maps variant keys to compiled shader modules.
///
/// Shader source compilation lives outside this core; the resolver only ever
/// hands back identifiers of already-compiled bytecode.
pub trait ShaderVariantResolver: Send + Sync {
    fn resolve(&self, key: &ShaderVariantKey) -> Result<ShaderModules, CompileError>;
}

/// Fixed table of registered variants, for tests and headless runs.
#[derive(Default)]
pub struct StaticShaderCatalog {
    variants: RwLock<HashMap<ShaderVariantKey, ShaderModules>>,
}

impl StaticShaderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: ShaderVariantKey, modules: ShaderModules) {
        self.variants.write().insert(key, modules);
    }
}

impl ShaderVariantResolver for StaticShaderCatalog {
    fn resolve(&self, key: &ShaderVariantKey) -> Result<ShaderModules, CompileError> {
        self.variants
            .read()
            .get(key)
            .copied()
            .ok_or_else(|| CompileError::UnknownVariant(key.shader.clone()))
    }
}
