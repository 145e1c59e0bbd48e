// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end frame tests against the null backend: full frames through
//! [`SceneRenderer`], inspected via the commands the device recorded.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strix_core::gfx::null::{NullGraphicsDevice, RecordedCommand};
use strix_core::gfx::{FenceId, ImageDescriptor, ImageFormat, ImageUsage, SamplerDescriptor};
use strix_core::math::{Extent2D, Mat4, Vec3};
use strix_core::GraphicsDevice;
use strix_render::config::FRAMES_IN_FLIGHT;
use strix_render::material::Material;
use strix_render::scene::types::{DirectionalLight, MeshAsset, MeshDraw, MeshVertex};
use strix_render::tasks::CameraData;
use strix_render::{RenderManager, SceneRenderer};
use uuid::Uuid;

fn renderer() -> (Arc<NullGraphicsDevice>, SceneRenderer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Arc::new(NullGraphicsDevice::with_surface_extent(Extent2D::new(
        64, 64,
    )));
    let renderer = SceneRenderer::new(device.clone() as Arc<dyn GraphicsDevice>).unwrap();
    (device, renderer)
}

fn test_image_descriptor(label: &'static str) -> ImageDescriptor<'static> {
    ImageDescriptor::d2(label, ImageFormat::R8G8B8A8Unorm, 4, 4, ImageUsage::SAMPLED)
}

fn triangle_mesh() -> Arc<MeshAsset> {
    let vertex = |x: f32, y: f32| MeshVertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        tangent: [1.0, 0.0, 0.0],
        uv: [x, y],
    };
    Arc::new(MeshAsset {
        guid: Uuid::new_v4(),
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2],
    })
}

fn lit_scene(renderer: &mut SceneRenderer) {
    renderer.set_meshes(vec![MeshDraw {
        mesh: Some(triangle_mesh()),
        material: Some(Material::new()),
        transform: Mat4::IDENTITY,
        entity_id: 1,
        casts_shadows: true,
    }]);
    renderer.set_directional_light(Some(DirectionalLight {
        direction: Vec3::NEG_Y,
        color: Vec3::ONE,
        intensity: 3.0,
        ambient: Vec3::splat(0.05),
        casts_shadows: true,
        volumetric_intensity: 0.0,
        is_volumetric: false,
    }));
}

fn run_frame(renderer: &mut SceneRenderer) {
    renderer.begin_frame();
    renderer.render(CameraData::default());
    renderer.end_frame();
}

fn is_swapchain_image(device: &NullGraphicsDevice, image: strix_core::gfx::ImageId) -> bool {
    device
        .image_record(image)
        .and_then(|record| record.label)
        .is_some_and(|label| label.starts_with("swapchain"))
}

#[test]
fn a_lit_mesh_runs_the_whole_pipeline() {
    let (device, mut renderer) = renderer();

    // Warm up with an empty frame so swapchain, bloom chain and resolve
    // kernel exist before the scene arrives.
    run_frame(&mut renderer);
    renderer.finish().unwrap();
    let images_before = device.live_image_count();

    renderer.begin_frame();
    lit_scene(&mut renderer);
    renderer.render(CameraData::default());
    renderer.end_frame();
    renderer.finish().unwrap();

    let commands = device.last_submitted_commands();
    // The mesh reached the G-Buffer (and the shadow maps).
    assert!(commands
        .iter()
        .any(|cmd| matches!(cmd, RecordedCommand::DrawIndexed { indices: 3, .. })));
    // The tiled resolve covered the 64x64 viewport in 8x8 tiles, with the
    // directional light baked into the kernel.
    assert!(commands
        .iter()
        .any(|cmd| matches!(cmd, RecordedCommand::Dispatch { x: 8, y: 8, z: 1 })));
    let resolve = commands
        .iter()
        .find_map(|cmd| match cmd {
            RecordedCommand::BeginComputePass { pipeline } => {
                device.compute_pipeline_record(*pipeline)
            }
            _ => None,
        })
        .expect("the resolve pass should have run");
    assert!(resolve
        .specialization
        .iter()
        .any(|constant| constant.id == 2 && constant.value == 1));
    // Tonemapping wrote the final target with a fullscreen triangle.
    assert!(commands.iter().any(|cmd| matches!(
        cmd,
        RecordedCommand::Draw {
            vertices: 3,
            instances: 1
        }
    )));
    // The shadow-casting light allocated real cascade maps.
    assert!(device.live_image_count() >= images_before + 4);
}

#[test]
fn every_frame_ends_with_a_blit_into_the_swapchain() {
    let (device, mut renderer) = renderer();
    for _ in 0..3 {
        run_frame(&mut renderer);
    }
    renderer.finish().unwrap();

    // The last pass of the submission renders into the acquired swapchain
    // image; without it the presented image would never hold the frame.
    let commands = device.last_submitted_commands();
    let swapchain_passes: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter_map(|(position, cmd)| match cmd {
            RecordedCommand::BeginRenderPass { colors, .. }
                if colors.iter().any(|image| is_swapchain_image(&device, *image)) =>
            {
                Some(position)
            }
            _ => None,
        })
        .collect();
    let blit = *swapchain_passes
        .last()
        .expect("no pass rendered into the acquired swapchain image");
    assert_eq!(
        commands[blit + 1],
        RecordedCommand::Draw {
            vertices: 3,
            instances: 1
        }
    );
}

#[test]
fn dropping_mid_frame_flushes_the_pending_work() {
    let (device, mut renderer) = renderer();
    run_frame(&mut renderer);

    renderer.begin_frame();
    lit_scene(&mut renderer);
    renderer.render(CameraData::default());
    // No end_frame: the recorded frame is still queued when the renderer
    // goes away, and must replay before teardown destroys what it captured.
    drop(renderer);

    assert_eq!(device.live_buffer_count(), 0);
    // Only the three device-owned swapchain images survive.
    assert_eq!(device.live_image_count(), 3);
}

#[test]
fn a_steady_scene_allocates_nothing_per_frame() {
    let (device, mut renderer) = renderer();

    renderer.begin_frame();
    lit_scene(&mut renderer);
    renderer.render(CameraData::default());
    renderer.end_frame();
    run_frame(&mut renderer);
    renderer.finish().unwrap();

    let after_warmup = device.live_image_count();
    for _ in 0..3 {
        run_frame(&mut renderer);
    }
    renderer.finish().unwrap();
    assert_eq!(device.live_image_count(), after_warmup);
}

#[test]
fn an_empty_scene_records_no_geometry_draws() {
    let (device, mut renderer) = renderer();
    run_frame(&mut renderer);
    renderer.finish().unwrap();

    let commands = device.last_submitted_commands();
    assert!(!commands
        .iter()
        .any(|cmd| matches!(cmd, RecordedCommand::DrawIndexed { .. })));
    // The resolve still runs; unlit pixels shade from the dummy resources.
    assert!(commands
        .iter()
        .any(|cmd| matches!(cmd, RecordedCommand::Dispatch { .. })));

    // An unchanged empty scene triggers no pipeline rebuilds or allocations.
    let images = device.live_image_count();
    let kernels = device.live_compute_pipeline_count();
    run_frame(&mut renderer);
    run_frame(&mut renderer);
    renderer.finish().unwrap();
    assert_eq!(device.live_image_count(), images);
    assert_eq!(device.live_compute_pipeline_count(), kernels);
}

#[test]
fn viewport_resizes_propagate_to_every_pass() {
    let (device, mut renderer) = renderer();
    run_frame(&mut renderer);
    renderer.finish().unwrap();

    let new_size = Extent2D::new(32, 48);
    renderer.set_viewport_size(new_size).unwrap();
    run_frame(&mut renderer);
    renderer.finish().unwrap();

    // The present blit still targets the swapchain, which keeps the surface
    // size; every scene pass must use the new viewport.
    let commands = device.last_submitted_commands();
    let extents: Vec<Extent2D> = commands
        .iter()
        .filter_map(|cmd| match cmd {
            RecordedCommand::BeginRenderPass { extent, colors, .. } => {
                let to_swapchain = colors.iter().any(|image| is_swapchain_image(&device, *image));
                (!to_swapchain).then_some(*extent)
            }
            _ => None,
        })
        .collect();
    assert!(extents.contains(&new_size));
    assert!(!extents.contains(&Extent2D::new(64, 64)));
}

#[test]
fn texture_guids_intern_to_one_stable_index() {
    let (device, renderer) = renderer();
    let sampler = device
        .create_sampler(&SamplerDescriptor::bilinear("Test"))
        .unwrap();
    let image_a = device.create_image(&test_image_descriptor("A")).unwrap();
    let image_b = device.create_image(&test_image_descriptor("B")).unwrap();

    let guid = Uuid::new_v4();
    let first = renderer.add_texture(guid, image_a, sampler);
    assert_ne!(first, 0, "index 0 is reserved for the dummy texture");
    assert_eq!(renderer.add_texture(guid, image_a, sampler), first);

    renderer.update_texture(guid, image_b, sampler);
    assert_eq!(renderer.add_texture(guid, image_b, sampler), first);

    let other = renderer.add_texture(Uuid::new_v4(), image_b, sampler);
    assert_ne!(other, first);

    assert_eq!(renderer.remove_texture(guid), Some((image_b, sampler)));
}

#[test]
fn frame_slots_block_until_their_fence_retires() {
    let device = Arc::new(NullGraphicsDevice::new());
    let mut manager = RenderManager::new(device.clone() as Arc<dyn GraphicsDevice>).unwrap();
    device.set_auto_signal_fences(false);

    // The per-slot fences start signaled, so the first ring of frames is
    // admitted without the GPU having retired anything.
    for _ in 0..FRAMES_IN_FLIGHT {
        manager.begin_frame();
        manager.end_frame();
    }

    let (entered, entered_rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        manager.begin_frame();
        let _ = entered.send(());
        manager
    });

    // Reusing slot 0 must block: its fence was reset for the in-flight
    // frame and nothing has signaled it.
    assert!(entered_rx.recv_timeout(Duration::from_millis(100)).is_err());

    // Retire everything. Fence ids are opaque, so sweep the low range the
    // scheduler allocated from; unknown ids are ignored.
    for id in 1..64 {
        device.signal_fence(FenceId(id));
    }
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("begin_frame should return once the slot's fence signals");

    let mut manager = waiter.join().unwrap();
    device.set_auto_signal_fences(true);
    manager.end_frame();
    manager.finish().unwrap();
}
