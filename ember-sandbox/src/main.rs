//! Headless sandbox: drives the full pipeline against the null backend and
//! reports per-frame statistics.

use std::sync::Arc;

use ember::core::cli::EngineArgs;
use ember::render::{
    LayoutBinding, LayoutGraph, LayoutGraphBuilder, LayoutNodeId, BindingKind, ShaderModules,
    ShaderVariantKey, StaticShaderCatalog, UpdateFrequency,
};
use ember::renderer::{
    BoundingSphere, Light, QueueTransversalExt, Renderable, SceneProvider, SceneTransversal,
    ViewDescriptor,
};
use ember::rendergraph::{
    BufferDesc, BufferState, ColorInfo, DispatchItem, FixedFunctionState, TextureDesc,
    TextureFormat, TextureState,
};
use ember::rhi::{
    MaterialHandle, MeshHandle, NullDevice, RecordingSink, ShaderModuleId, ShaderStage,
};
use ember::{ContextConfig, Pipeline, RenderContext};
use glam::{Mat4, Vec3};
use log::info;

const FRAME_COUNT: u64 = 60;
const TARGET_SIZE: u32 = 1280;

struct SandboxScene {
    renderables: Vec<Renderable>,
    lights: Vec<Light>,
}

impl SceneProvider for SandboxScene {
    fn renderables(&self) -> &[Renderable] {
        &self.renderables
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }
}

fn build_scene() -> SandboxScene {
    let mut renderables = Vec::new();

    // A 16x16 grid of instanced rocks plus a sprinkling of glass panes.
    for row in 0..16 {
        for column in 0..16 {
            let position = Vec3::new(
                (column as f32 - 8.0) * 2.0,
                0.0,
                -10.0 - row as f32 * 2.0,
            );
            renderables.push(Renderable {
                mesh: MeshHandle(1),
                material: MaterialHandle(1),
                variant: ShaderVariantKey::new("forward").with_define("SHADING", "pbr"),
                transform: Mat4::from_translation(position),
                bounds: BoundingSphere::new(position, 1.0),
                blend: false,
                tint: [1.0; 4],
            });
        }
    }

    for i in 0..8 {
        let position = Vec3::new(i as f32 - 4.0, 1.0, -12.0 - i as f32 * 3.0);
        renderables.push(Renderable {
            mesh: MeshHandle(2),
            material: MaterialHandle(2),
            variant: ShaderVariantKey::new("glass"),
            transform: Mat4::from_translation(position),
            bounds: BoundingSphere::new(position, 1.0),
            blend: true,
            tint: [0.8, 0.9, 1.0, 0.4],
        });
    }

    let lights = (0..6)
        .map(|i| Light {
            position: Vec3::new((i as f32 - 3.0) * 6.0, 5.0, -15.0),
            radius: 25.0,
            intensity: 3.0,
        })
        .collect();

    SandboxScene { renderables, lights }
}

fn build_layouts() -> anyhow::Result<(LayoutGraph, LayoutNodeId, LayoutNodeId)> {
    let stages = ShaderStage::Vertex | ShaderStage::Fragment;

    let mut builder = LayoutGraphBuilder::new();
    let global = builder.add_node(
        "global",
        UpdateFrequency::PerFrame,
        None,
        vec![LayoutBinding::new(0, BindingKind::UniformBuffer, stages)],
    )?;
    let forward = builder.add_node(
        "forward",
        UpdateFrequency::PerPass,
        Some(global),
        vec![
            LayoutBinding::new(0, BindingKind::UniformBuffer, stages),
            LayoutBinding::new(1, BindingKind::SampledTexture, stages),
        ],
    )?;
    let cull = builder.add_node(
        "cull",
        UpdateFrequency::PerPass,
        Some(global),
        vec![LayoutBinding::new(
            0,
            BindingKind::StorageBuffer,
            ShaderStage::Compute.into(),
        )],
    )?;

    Ok((builder.build(), forward, cull))
}

fn build_catalog() -> Arc<StaticShaderCatalog> {
    let catalog = Arc::new(StaticShaderCatalog::new());
    catalog.register(
        ShaderVariantKey::new("forward").with_define("SHADING", "pbr"),
        ShaderModules::raster(ShaderModuleId(1), ShaderModuleId(2)),
    );
    catalog.register(
        ShaderVariantKey::new("glass"),
        ShaderModules::raster(ShaderModuleId(3), ShaderModuleId(4)),
    );
    catalog.register(
        ShaderVariantKey::new("visibility-cull"),
        ShaderModules::compute(ShaderModuleId(5)),
    );
    catalog
}

fn render_frame(
    pipeline: &mut Pipeline,
    scene: &SandboxScene,
    view: &ViewDescriptor,
    forward_layout: LayoutNodeId,
    cull_layout: LayoutNodeId,
    sink: &mut RecordingSink,
) -> anyhow::Result<ember::rendergraph::FrameStats> {
    let mut frame = pipeline.begin_frame();

    let mut visibility = frame.create("visibility", BufferDesc::storage(64 * 1024));
    let mut color = frame.create(
        "scene-color",
        TextureDesc::render_target(TARGET_SIZE, TARGET_SIZE, TextureFormat::Rgba16Float),
    );
    let mut depth = frame.create("scene-depth", TextureDesc::depth_target(TARGET_SIZE, TARGET_SIZE));
    let mut present = frame.create(
        "present",
        TextureDesc::render_target(TARGET_SIZE, TARGET_SIZE, TextureFormat::Rgba16Float),
    );

    {
        let mut cull = frame.add_compute_pass("visibility-cull");
        let _ = cull.write(&mut visibility, BufferState::StorageWrite);
        let mut queue = cull.add_queue(cull_layout);
        queue.add_dispatch(DispatchItem {
            variant: ShaderVariantKey::new("visibility-cull"),
            group_count: [scene.renderables().len().div_ceil(64) as u32, 1, 1],
        });
    }

    {
        let mut forward = frame.add_raster_pass("forward");
        let _ = forward.read(&visibility, BufferState::ShaderRead);
        let color_rt = forward.write(&mut color, TextureState::RenderTarget);
        let depth_rt = forward.write(&mut depth, TextureState::DepthWrite);
        forward.with_color(color_rt, ColorInfo::default());
        forward.with_depth_stencil(depth_rt, Default::default());

        let mut queue = forward.add_queue(forward_layout, FixedFunctionState::opaque());
        queue.add_transversal(&SceneTransversal::forward(), scene, view);
    }

    frame.add_copy_pass("present-copy", &color, &mut present);

    Ok(pipeline.compile_and_execute(frame, sink)?)
}

fn main() -> anyhow::Result<()> {
    let args = EngineArgs::parse_args();
    ember::core::log::initialize(args.log_level.into())?;
    if args.profile {
        ember::core::profile::initialize()?;
    }

    let device = Arc::new(NullDevice::new());
    let (layout_graph, forward_layout, cull_layout) = build_layouts()?;
    let context = RenderContext::new(
        device.clone(),
        layout_graph,
        build_catalog(),
        ContextConfig::default(),
    );
    let mut pipeline = Pipeline::new(context);

    let scene = build_scene();
    let view = ViewDescriptor::new(
        Mat4::look_at_rh(Vec3::new(0.0, 6.0, 4.0), Vec3::new(0.0, 0.0, -20.0), Vec3::Y),
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 200.0),
    );

    for frame_index in 0..FRAME_COUNT {
        let mut sink = RecordingSink::new();
        let stats = render_frame(
            &mut pipeline,
            &scene,
            &view,
            forward_layout,
            cull_layout,
            &mut sink,
        )?;

        // The null backend completes instantly; retire the frame's fence so
        // the pools may recycle.
        device.signal_all_fences();

        if frame_index % 10 == 0 {
            info!(
                "frame {frame_index}: {} passes, {} draws ({} instanced batches), {} dispatches, {} barriers, {} commands",
                stats.passes_executed,
                stats.draw_calls,
                stats.instanced_batches,
                stats.dispatches,
                stats.barriers,
                sink.commands().len(),
            );
        }

        profiling::finish_frame!();
    }

    let programs = pipeline.context().program_stats();
    let resources = pipeline.context().resource_stats();
    info!(
        "done: {} cached programs ({} compiled), {} idle textures, {} idle buffers, {} pass objects, {} live backend textures",
        programs.cached,
        programs.compiled_total,
        resources.idle_textures,
        resources.idle_buffers,
        resources.pass_objects,
        device.live_texture_count(),
    );

    pipeline.context_mut().shutdown();
    Ok(())
}
