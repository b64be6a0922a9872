use ember_core::collections::SmallVec;
use ember_rendergraph::{DrawItem, DrawOrder, InstanceData, RasterQueueBuilder, MAX_DRAW_LIGHTS, NO_LIGHT};

use crate::scene::{Light, Renderable, SceneProvider};
use crate::view::ViewDescriptor;

/// Granularity of depth-derived sort keys for opaque front-to-back ordering.
const DEPTH_KEY_SCALE: f32 = 64.0;

pub type LightFilter =
    dyn Fn(&Renderable, &[Light]) -> SmallVec<[u32; MAX_DRAW_LIGHTS]> + Send + Sync;

/// Light-assignment policy, fixed at configuration time.
pub enum TransversalPolicy {
    /// Nearest-N lights per renderable, ties broken by distance then by
    /// declaration order.
    DefaultForward { max_lights: usize },
    Custom(Box<LightFilter>),
}

/// Walks a scene collaborator and emits draw items for visible renderables.
pub struct SceneTransversal {
    policy: TransversalPolicy,
}

impl SceneTransversal {
    pub fn forward() -> Self {
        Self {
            policy: TransversalPolicy::DefaultForward {
                max_lights: MAX_DRAW_LIGHTS,
            },
        }
    }

    pub fn with_policy(policy: TransversalPolicy) -> Self {
        Self { policy }
    }

    /// Visible draw items for one view.
    ///
    /// Lazy over opaque renderables; blended renderables are depth-sorted
    /// back to front and appended as order-preserving items. Calling `emit`
    /// again restarts the sequence from scratch.
    #[profiling::function]
    pub fn emit<'a>(
        &'a self,
        scene: &'a dyn SceneProvider,
        view: &ViewDescriptor,
    ) -> impl Iterator<Item = DrawItem> + 'a {
        let frustum = view.frustum();
        let lights = scene.lights();
        let view = *view;

        let opaque = scene
            .renderables()
            .iter()
            .filter(move |r| !r.blend && frustum.contains_sphere(r.bounds.center, r.bounds.radius))
            .map(move |r| self.draw_item(r, lights, &view, DrawOrder::Unordered));

        let mut blended: Vec<(f32, &Renderable)> = scene
            .renderables()
            .iter()
            .filter(|r| r.blend && frustum.contains_sphere(r.bounds.center, r.bounds.radius))
            .map(|r| (view.depth_of(r.bounds.center), r))
            .collect();
        blended.sort_by(|a, b| b.0.total_cmp(&a.0));

        let transparent = blended
            .into_iter()
            .map(move |(_, r)| self.draw_item(r, lights, &view, DrawOrder::Preserved));

        opaque.chain(transparent)
    }

    fn draw_item(
        &self,
        renderable: &Renderable,
        lights: &[Light],
        view: &ViewDescriptor,
        order: DrawOrder,
    ) -> DrawItem {
        let selected = match &self.policy {
            TransversalPolicy::DefaultForward { max_lights } => {
                nearest_lights(renderable, lights, *max_lights)
            }
            TransversalPolicy::Custom(filter) => filter(renderable, lights),
        };

        let mut instance = InstanceData {
            transform: renderable.transform,
            tint: renderable.tint,
            lights: [NO_LIGHT; MAX_DRAW_LIGHTS],
        };
        for (slot, light) in instance.lights.iter_mut().zip(selected.iter()) {
            *slot = *light;
        }

        let depth = view.depth_of(renderable.bounds.center).max(0.0);

        DrawItem {
            mesh: renderable.mesh,
            material: renderable.material,
            variant: renderable.variant.clone(),
            instance,
            sort_key: (depth * DEPTH_KEY_SCALE) as u64,
            order,
        }
    }
}

/// Nearest-N selection with a deterministic tie-break: squared distance via
/// `total_cmp`, then declaration index.
fn nearest_lights(
    renderable: &Renderable,
    lights: &[Light],
    max_lights: usize,
) -> SmallVec<[u32; MAX_DRAW_LIGHTS]> {
    let mut ranked: Vec<(f32, u32)> = lights
        .iter()
        .enumerate()
        .map(|(index, light)| {
            (
                light.position.distance_squared(renderable.bounds.center),
                index as u32,
            )
        })
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    ranked
        .into_iter()
        .take(max_lights.min(MAX_DRAW_LIGHTS))
        .map(|(_, index)| index)
        .collect()
}

/// Lets a queue builder consume a transversal directly.
pub trait QueueTransversalExt {
    fn add_transversal(
        &mut self,
        transversal: &SceneTransversal,
        scene: &dyn SceneProvider,
        view: &ViewDescriptor,
    );
}

impl QueueTransversalExt for RasterQueueBuilder<'_> {
    fn add_transversal(
        &mut self,
        transversal: &SceneTransversal,
        scene: &dyn SceneProvider,
        view: &ViewDescriptor,
    ) {
        for item in transversal.emit(scene, view) {
            self.add_draw(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::BoundingSphere;
    use ember_render::ShaderVariantKey;
    use ember_rhi::{MaterialHandle, MeshHandle};
    use glam::{Mat4, Vec3};

    struct TestScene {
        renderables: Vec<Renderable>,
        lights: Vec<Light>,
    }

    impl SceneProvider for TestScene {
        fn renderables(&self) -> &[Renderable] {
            &self.renderables
        }

        fn lights(&self) -> &[Light] {
            &self.lights
        }
    }

    fn renderable(z: f32, blend: bool) -> Renderable {
        Renderable {
            mesh: MeshHandle(1),
            material: MaterialHandle(1),
            variant: ShaderVariantKey::new("forward"),
            transform: Mat4::from_translation(Vec3::new(0.0, 0.0, z)),
            bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, z), 0.5),
            blend,
            tint: [1.0; 4],
        }
    }

    fn light(x: f32) -> Light {
        Light {
            position: Vec3::new(x, 0.0, -5.0),
            radius: 10.0,
            intensity: 1.0,
        }
    }

    fn test_view() -> ViewDescriptor {
        ViewDescriptor::new(
            Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y),
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0),
        )
    }

    #[test]
    fn culled_renderables_are_not_emitted() {
        let scene = TestScene {
            renderables: vec![renderable(-5.0, false), renderable(50.0, false)],
            lights: vec![],
        };
        let transversal = SceneTransversal::forward();

        let items: Vec<_> = transversal.emit(&scene, &test_view()).collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn emission_is_restartable() {
        let scene = TestScene {
            renderables: vec![renderable(-5.0, false), renderable(-8.0, false)],
            lights: vec![],
        };
        let transversal = SceneTransversal::forward();
        let view = test_view();

        let first: Vec<_> = transversal.emit(&scene, &view).collect();
        let second: Vec<_> = transversal.emit(&scene, &view).collect();
        assert_eq!(first.len(), second.len());
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn nearest_lights_break_ties_by_declaration_order() {
        let scene = TestScene {
            renderables: vec![renderable(-5.0, false)],
            // Two lights at identical distance; the earlier one must win.
            lights: vec![light(3.0), light(-3.0), light(0.1)],
        };
        let transversal = SceneTransversal::with_policy(TransversalPolicy::DefaultForward {
            max_lights: 2,
        });

        let items: Vec<_> = transversal.emit(&scene, &test_view()).collect();
        assert_eq!(items[0].instance.lights[0], 2);
        assert_eq!(items[0].instance.lights[1], 0);
        assert_eq!(items[0].instance.lights[2], NO_LIGHT);
    }

    #[test]
    fn blended_items_come_last_back_to_front() {
        let scene = TestScene {
            renderables: vec![
                renderable(-3.0, true),
                renderable(-20.0, false),
                renderable(-9.0, true),
            ],
            lights: vec![],
        };
        let transversal = SceneTransversal::forward();

        let items: Vec<_> = transversal.emit(&scene, &test_view()).collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].order, DrawOrder::Unordered);
        assert_eq!(items[1].order, DrawOrder::Preserved);
        assert_eq!(items[2].order, DrawOrder::Preserved);
        // Farthest blended surface first.
        let z1 = items[1].instance.transform.w_axis.z;
        let z2 = items[2].instance.transform.w_axis.z;
        assert_eq!(z1, -9.0);
        assert_eq!(z2, -3.0);
    }
}
