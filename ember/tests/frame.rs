//! End-to-end frame scenarios through the pipeline orchestrator.

use std::sync::Arc;

use ember::render::{
    LayoutGraph, LayoutGraphBuilder, LayoutNodeId, ShaderModules, ShaderVariantKey,
    StaticShaderCatalog, UpdateFrequency,
};
use ember::renderer::{
    BoundingSphere, Light, QueueTransversalExt, Renderable, SceneProvider, SceneTransversal,
    ViewDescriptor,
};
use ember::rendergraph::{ColorInfo, FixedFunctionState, TextureDesc, TextureFormat, TextureState};
use ember::rhi::{
    MaterialHandle, MeshHandle, NullDevice, RecordingSink, RenderCommand, ShaderModuleId,
};
use ember::{ContextConfig, FrameError, Pipeline, RenderContext};
use glam::{Mat4, Vec3};

struct GridScene {
    renderables: Vec<Renderable>,
    lights: Vec<Light>,
}

impl SceneProvider for GridScene {
    fn renderables(&self) -> &[Renderable] {
        &self.renderables
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }
}

fn grid_scene(count: usize) -> GridScene {
    let renderables = (0..count)
        .map(|i| {
            let z = -5.0 - (i % 10) as f32;
            let x = (i / 10) as f32 * 0.1;
            Renderable {
                mesh: MeshHandle(1),
                material: MaterialHandle(1),
                variant: ShaderVariantKey::new("forward"),
                transform: Mat4::from_translation(Vec3::new(x, 0.0, z)),
                bounds: BoundingSphere::new(Vec3::new(x, 0.0, z), 0.5),
                blend: false,
                tint: [1.0; 4],
            }
        })
        .collect();

    GridScene {
        renderables,
        lights: vec![
            Light {
                position: Vec3::new(0.0, 4.0, -6.0),
                radius: 20.0,
                intensity: 2.0,
            },
            Light {
                position: Vec3::new(3.0, 1.0, -8.0),
                radius: 15.0,
                intensity: 1.0,
            },
        ],
    }
}

fn layouts() -> (LayoutGraph, LayoutNodeId) {
    let mut builder = LayoutGraphBuilder::new();
    let global = builder
        .add_node("global", UpdateFrequency::PerFrame, None, vec![])
        .unwrap();
    let forward = builder
        .add_node("forward", UpdateFrequency::PerPass, Some(global), vec![])
        .unwrap();
    (builder.build(), forward)
}

fn catalog() -> Arc<StaticShaderCatalog> {
    let catalog = Arc::new(StaticShaderCatalog::new());
    catalog.register(
        ShaderVariantKey::new("forward"),
        ShaderModules::raster(ShaderModuleId(1), ShaderModuleId(2)),
    );
    catalog
}

fn view() -> ViewDescriptor {
    ViewDescriptor::new(
        Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y),
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0),
    )
}

fn forward_frame(
    pipeline: &mut Pipeline,
    layout: LayoutNodeId,
    scene: &GridScene,
    sink: &mut RecordingSink,
) -> ember::rendergraph::FrameStats {
    let mut frame = pipeline.begin_frame();

    let mut color = frame.create("scene-color", TextureDesc::render_target(256, 256, TextureFormat::Rgba16Float));
    let mut depth = frame.create("scene-depth", TextureDesc::depth_target(256, 256));
    let mut present = frame.create("present", TextureDesc::render_target(256, 256, TextureFormat::Rgba16Float));

    {
        let mut forward = frame.add_raster_pass("forward");
        let color_rt = forward.write(&mut color, TextureState::RenderTarget);
        let depth_rt = forward.write(&mut depth, TextureState::DepthWrite);
        forward.with_color(color_rt, ColorInfo::default());
        forward.with_depth_stencil(depth_rt, Default::default());

        let mut queue = forward.add_queue(layout, FixedFunctionState::opaque());
        queue.add_transversal(&SceneTransversal::forward(), scene, &view());
    }

    frame.add_copy_pass("present-copy", &color, &mut present);

    pipeline
        .compile_and_execute(frame, sink)
        .expect("frame should execute")
}

#[test]
fn multi_frame_rendering_reuses_pools_and_programs() {
    let device = Arc::new(NullDevice::new());
    let (layout_graph, forward) = layouts();
    let context = RenderContext::new(device.clone(), layout_graph, catalog(), ContextConfig::default());
    let mut pipeline = Pipeline::new(context);
    let scene = grid_scene(100);

    let mut sink = RecordingSink::new();
    let stats = forward_frame(&mut pipeline, forward, &scene, &mut sink);
    assert!(stats.draw_calls >= 1);
    assert_eq!(stats.passes_executed, 2);

    // All 100 items share one key: a single instanced draw call.
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.instanced_batches, 1);
    let copies = sink.count_matching(|c| matches!(c, RenderCommand::CopyTexture { .. }));
    assert_eq!(copies, 1);

    // Let the "GPU" finish, then render more frames: pooled targets and the
    // cached program mean no new backend objects.
    device.signal_all_fences();
    let textures_after_first = device.live_texture_count();
    let pipelines_after_first = device.pipelines_created();

    for _ in 0..3 {
        let mut sink = RecordingSink::new();
        forward_frame(&mut pipeline, forward, &scene, &mut sink);
        device.signal_all_fences();
    }

    assert_eq!(device.live_texture_count(), textures_after_first);
    assert_eq!(device.pipelines_created(), pipelines_after_first);
}

#[test]
fn transparent_items_are_drawn_after_opaque_in_submission_order() {
    let device = Arc::new(NullDevice::new());
    let (layout_graph, forward) = layouts();
    let context = RenderContext::new(device, layout_graph, catalog(), ContextConfig::default());
    let mut pipeline = Pipeline::new(context);

    let mut scene = grid_scene(10);
    for (i, z) in [-4.0f32, -12.0, -7.0].iter().enumerate() {
        scene.renderables.push(Renderable {
            mesh: MeshHandle(100 + i as u64),
            material: MaterialHandle(2),
            variant: ShaderVariantKey::new("forward"),
            transform: Mat4::from_translation(Vec3::new(0.0, 0.0, *z)),
            bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, *z), 0.5),
            blend: true,
            tint: [1.0, 1.0, 1.0, 0.5],
        });
    }

    let mut sink = RecordingSink::new();
    let stats = forward_frame(&mut pipeline, forward, &scene, &mut sink);

    // One opaque batch plus three singleton transparent draws.
    assert_eq!(stats.draw_calls, 4);

    let meshes: Vec<u64> = sink
        .commands()
        .iter()
        .filter_map(|c| match c {
            RenderCommand::DrawInstanced { mesh, .. } => Some(mesh.0),
            _ => None,
        })
        .collect();
    // Opaque batch first, then blended surfaces back to front.
    assert_eq!(meshes, vec![1, 101, 102, 100]);
}

#[test]
fn invalid_graph_drops_the_frame_with_zero_commands() {
    let device = Arc::new(NullDevice::new());
    let (layout_graph, _) = layouts();
    let context = RenderContext::new(device, layout_graph, catalog(), ContextConfig::default());
    let mut pipeline = Pipeline::new(context);

    let mut frame = pipeline.begin_frame();
    let mut ping = frame.create("ping", TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm));
    let mut pong = frame.create("pong", TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm));
    {
        let mut a = frame.add_raster_pass("a");
        let _ = a.read(&pong, TextureState::ShaderRead);
        let _ = a.write(&mut ping, TextureState::RenderTarget);
    }
    {
        let mut b = frame.add_raster_pass("b");
        let _ = b.read(&ping, TextureState::ShaderRead);
        let _ = b.write(&mut pong, TextureState::RenderTarget);
    }

    let mut sink = RecordingSink::new();
    let err = pipeline.compile_and_execute(frame, &mut sink).unwrap_err();

    assert!(matches!(err, FrameError::Validation(_)));
    assert!(sink.commands().is_empty());

    // The next, valid frame still renders.
    let scene = grid_scene(4);
    let (_, forward) = layouts();
    let mut sink = RecordingSink::new();
    let stats = forward_frame(&mut pipeline, forward, &scene, &mut sink);
    assert_eq!(stats.passes_executed, 2);
}

#[test]
fn device_loss_poisons_the_context() {
    let device = Arc::new(NullDevice::new());
    let (layout_graph, forward) = layouts();
    let context = RenderContext::new(device.clone(), layout_graph, catalog(), ContextConfig::default());
    let mut pipeline = Pipeline::new(context);
    let scene = grid_scene(10);

    let mut sink = RecordingSink::new();
    forward_frame(&mut pipeline, forward, &scene, &mut sink);

    device.mark_lost();

    let frame = pipeline.begin_frame();
    let mut sink = RecordingSink::new();
    let err = pipeline.compile_and_execute(frame, &mut sink).unwrap_err();
    assert_eq!(err, FrameError::DeviceLost);
    assert!(pipeline.context().is_device_lost());

    // Still poisoned on the next attempt; the application must rebuild.
    let frame = pipeline.begin_frame();
    let mut sink = RecordingSink::new();
    let err = pipeline.compile_and_execute(frame, &mut sink).unwrap_err();
    assert_eq!(err, FrameError::DeviceLost);
}
