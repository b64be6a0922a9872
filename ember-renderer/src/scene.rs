use ember_render::ShaderVariantKey;
use ember_rhi::{MaterialHandle, MeshHandle};
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// One visible object as supplied by the scene collaborator.
#[derive(Debug, Clone)]
pub struct Renderable {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub variant: ShaderVariantKey,
    pub transform: Mat4,
    pub bounds: BoundingSphere,
    /// Blended surfaces are order-sensitive and drawn back to front.
    pub blend: bool,
    pub tint: [f32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub position: Vec3,
    pub radius: f32,
    pub intensity: f32,
}

/// The scene collaborator. Read-only: transversal never mutates it.
pub trait SceneProvider {
    fn renderables(&self) -> &[Renderable];
    fn lights(&self) -> &[Light];
}
