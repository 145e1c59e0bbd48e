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

//! The renderer task stages and the frame blackboard they communicate
//! through.
//!
//! Stages never hold references to each other. A stage publishes what later
//! stages consume (buffer handles, image handles, counts) into [`FrameData`]
//! under the resource names its [`StageDesc`](crate::scene::StageDesc)
//! declares; the pipeline description is validated once so a consumer can
//! never run before its producer.

pub mod billboards;
pub mod bloom;
pub mod geometry;
pub mod lights;
pub mod lines;
pub mod pbr;
pub mod postprocess;
pub mod shadow;
pub mod skybox;
pub mod ssao;

use crate::interner::{MaterialSystem, TextureSystem};
use crate::manager::{DummyResources, ResourceReleaser};
use crate::scene::gbuffer::GBuffer;
use crate::scene::StageDesc;
use crate::settings::SceneRendererSettings;
use crate::config::CASCADES_COUNT;
use std::sync::Arc;
use strix_core::gfx::{BufferId, CommandEncoder, ImageId};
use strix_core::math::{Extent2D, Mat4, Vec3};
use strix_core::GraphicsDevice;

pub use lights::{GpuDirectionalLight, GpuPointLight, GpuSpotLight, LightsManagerTask};
pub use billboards::BillboardsTask;
pub use bloom::BloomTask;
pub use geometry::GeometryManagerTask;
pub use lines::RenderLinesTask;
pub use pbr::PbrPassTask;
pub use postprocess::PostprocessingTask;
pub use shadow::ShadowPassTask;
pub use skybox::SkyboxTask;
pub use ssao::SsaoTask;

/// Per-frame camera state, refreshed by `render`.
#[derive(Debug, Clone, Copy)]
pub struct CameraData {
    /// World-to-view matrix.
    pub view: Mat4,
    /// View-to-clip matrix.
    pub projection: Mat4,
    /// `projection * view`.
    pub view_projection: Mat4,
    /// Last frame's `projection * view`, for motion vectors.
    pub prev_view_projection: Mat4,
    /// Camera world position.
    pub view_position: Vec3,
    /// Per-cascade projection matrices covering the split frusta.
    pub cascade_projections: [Mat4; CASCADES_COUNT],
    /// Far plane of each cascade split.
    pub cascade_far_planes: [f32; CASCADES_COUNT],
    /// Distance beyond which nothing receives shadows; drives shadow LOD.
    pub max_shadow_distance: f32,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            prev_view_projection: Mat4::IDENTITY,
            view_position: Vec3::ZERO,
            cascade_projections: [Mat4::IDENTITY; CASCADES_COUNT],
            cascade_far_planes: [20.0, 50.0, 100.0, 200.0],
            max_shadow_distance: 200.0,
        }
    }
}

/// What the lights stage publishes.
#[derive(Debug, Clone, Default)]
pub struct LightsFrameInfo {
    /// GPU copies of the point lights, shared with the shadow pass.
    pub point_lights: Arc<Vec<GpuPointLight>>,
    /// GPU copies of the spot lights.
    pub spot_lights: Arc<Vec<GpuSpotLight>>,
    /// The directional light, when one exists.
    pub directional: Option<GpuDirectionalLight>,
    /// Storage buffer of point lights.
    pub point_buffer: Option<BufferId>,
    /// Storage buffer of spot lights.
    pub spot_buffer: Option<BufferId>,
    /// Storage buffer holding the directional light.
    pub directional_buffer: Option<BufferId>,
}

/// One instanced mesh draw inside a geometry bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshDrawCommand {
    /// Indices in the shared index buffer.
    pub index_count: u32,
    /// First index.
    pub first_index: u32,
    /// Added to every index.
    pub base_vertex: i32,
    /// Number of instances.
    pub instance_count: u32,
    /// First instance (indexes the instance buffer).
    pub first_instance: u32,
    /// Whether these instances render into shadow maps.
    pub casts_shadows: bool,
}

/// One blend-mode bucket of mesh draws.
#[derive(Debug, Clone, Default)]
pub struct MeshBucketInfo {
    /// Draws in submission order.
    pub draws: Arc<Vec<MeshDrawCommand>>,
}

impl MeshBucketInfo {
    /// Whether the bucket draws anything.
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// Whether any draw in the bucket casts shadows.
    pub fn any_casts_shadows(&self) -> bool {
        self.draws.iter().any(|draw| draw.casts_shadows)
    }
}

/// What the geometry stage publishes.
#[derive(Debug, Clone, Default)]
pub struct GeometryFrameInfo {
    /// Concatenated vertex data of every referenced mesh.
    pub vertex_buffer: Option<BufferId>,
    /// Concatenated index data.
    pub index_buffer: Option<BufferId>,
    /// Per-instance data (transform index, material index, object id).
    pub instance_buffer: Option<BufferId>,
    /// Mesh world transforms.
    pub transforms_buffer: Option<BufferId>,
    /// Last frame's transforms, when motion vectors are on.
    pub prev_transforms_buffer: Option<BufferId>,
    /// Opaque mesh draws.
    pub opaque: MeshBucketInfo,
    /// Alpha-tested mesh draws.
    pub masked: MeshBucketInfo,
    /// Blended mesh draws.
    pub translucent: MeshBucketInfo,
    /// Sprite quads.
    pub sprites: QuadBatchInfo,
    /// Lit SDF text quads.
    pub lit_text: QuadBatchInfo,
    /// Unlit SDF text quads, composited after lighting.
    pub unlit_text: QuadBatchInfo,
}

/// A batch of pre-transformed quads (sprites, glyphs).
#[derive(Debug, Clone, Default)]
pub struct QuadBatchInfo {
    /// Quad vertex buffer.
    pub vertex_buffer: Option<BufferId>,
    /// Shared quad index buffer.
    pub index_buffer: Option<BufferId>,
    /// Number of opaque (or masked) quads at the front of the buffer.
    pub opaque_quads: u32,
    /// Number of translucent quads following them.
    pub translucent_quads: u32,
    /// Whether any of the quads casts shadows.
    pub casts_shadows: bool,
}

impl QuadBatchInfo {
    /// Whether the batch draws anything.
    pub fn is_empty(&self) -> bool {
        self.opaque_quads == 0 && self.translucent_quads == 0
    }
}

/// What the shadow stage publishes: one depth map per shadow-casting light,
/// dummies elsewhere so the resolve can always bind a full array. The
/// transmittance maps exist only while translucent shadows are enabled and
/// fall back to the dummy white image otherwise.
#[derive(Debug, Clone, Default)]
pub struct ShadowFrameInfo {
    /// Directional cascades; dummy depth when the light casts no shadows.
    pub directional_maps: Vec<ImageId>,
    /// Cube depth per point light.
    pub point_maps: Vec<ImageId>,
    /// Depth per spot light.
    pub spot_maps: Vec<ImageId>,
    /// Colored transmittance per directional cascade.
    pub directional_transmittance: Vec<ImageId>,
    /// Colored transmittance per point light (cube).
    pub point_transmittance: Vec<ImageId>,
    /// Colored transmittance per spot light.
    pub spot_transmittance: Vec<ImageId>,
}

/// Everything the stages share for one recorded frame.
#[derive(Debug)]
pub struct FrameData {
    /// Options snapshot the render thread currently runs with.
    pub options: SceneRendererSettings,
    /// Viewport size.
    pub size: Extent2D,
    /// The shared geometry buffer.
    pub gbuffer: GBuffer,
    /// HDR lighting accumulation target.
    pub hdr_target: ImageId,
    /// Final LDR target.
    pub final_target: ImageId,
    /// Persistent dummy resources.
    pub dummy: DummyResources,
    /// This frame's camera.
    pub camera: CameraData,
    /// Environment cubemap, when a skybox is set.
    pub skybox: Option<ImageId>,
    /// Published by the lights stage.
    pub lights: LightsFrameInfo,
    /// Published by the geometry stage.
    pub geometry: GeometryFrameInfo,
    /// Published by the shadow stage.
    pub shadows: ShadowFrameInfo,
    /// Published by the SSAO stage when ambient occlusion is enabled.
    pub ssao_output: Option<ImageId>,
    /// Published by the bloom stage when bloom is enabled.
    pub bloom_output: Option<ImageId>,
}

/// Everything a stage needs while recording.
pub struct RecordContext<'a> {
    /// The GPU backend.
    pub device: &'a dyn GraphicsDevice,
    /// The frame's command encoder.
    pub encoder: &'a mut dyn CommandEncoder,
    /// The shared frame blackboard.
    pub frame: &'a mut FrameData,
    /// The material interner (render-thread-only).
    pub materials: &'a mut MaterialSystem,
    /// The texture interner.
    pub textures: &'a TextureSystem,
    /// Deferred destruction.
    pub releaser: &'a ResourceReleaser,
}

/// The slim context for resize and option changes (no encoder: these run
/// with the GPU idle or between frames).
pub struct TaskContext<'a> {
    /// The GPU backend.
    pub device: &'a dyn GraphicsDevice,
    /// Deferred destruction.
    pub releaser: &'a ResourceReleaser,
    /// Persistent dummy resources.
    pub dummy: &'a DummyResources,
}

/// One stage of the frame pipeline.
///
/// `record` runs strictly serially on the render worker, in the order the
/// validated stage list dictates.
pub trait RendererTask: Send {
    /// The stage's pipeline description.
    fn stage(&self) -> StageDesc;

    /// Records this stage's commands for the current frame.
    fn record(&mut self, ctx: &mut RecordContext<'_>);

    /// Reacts to a viewport resize (GPU guaranteed idle).
    fn on_resize(&mut self, _ctx: &TaskContext<'_>, _size: Extent2D) {}

    /// Reacts to an options change; implementations diff the fields they
    /// care about and rebuild only what those affect.
    fn init_with_options(
        &mut self,
        _ctx: &TaskContext<'_>,
        _old: &SceneRendererSettings,
        _new: &SceneRendererSettings,
    ) {
    }
}

/// GPU object creation inside the frame loop has no recovery path: log and
/// abort the frame thread.
pub(crate) fn fatal<T, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("{what}: {err}");
            panic!("{what}");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::manager::RenderManager;
    use strix_core::gfx::null::{NullGraphicsDevice, RecordedCommand};
    use strix_core::gfx::{ImageDescriptor, ImageFormat, ImageUsage};

    /// A null-backend fixture giving task tests a manager, a blackboard and
    /// both interners.
    pub(crate) struct TaskHarness {
        pub device: Arc<NullGraphicsDevice>,
        pub manager: RenderManager,
        pub frame: FrameData,
        pub materials: MaterialSystem,
        pub textures: TextureSystem,
    }

    pub(crate) fn harness() -> TaskHarness {
        let device = Arc::new(NullGraphicsDevice::new());
        let manager = RenderManager::new(device.clone()).unwrap();
        let dummy = *manager.dummy_resources();
        let options = SceneRendererSettings::default();
        let size = Extent2D::new(64, 64);
        let gbuffer = GBuffer::new(&*device, size, &options.optional_gbuffers).unwrap();
        let hdr_target = device
            .create_image(&ImageDescriptor::d2(
                "HDR",
                ImageFormat::R32G32B32A32Float,
                size.width,
                size.height,
                ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ))
            .unwrap();
        let final_target = device
            .create_image(&ImageDescriptor::d2(
                "Final",
                ImageFormat::R8G8B8A8Unorm,
                size.width,
                size.height,
                ImageUsage::COLOR_ATTACHMENT
                    | ImageUsage::SAMPLED
                    | ImageUsage::STORAGE
                    | ImageUsage::COPY_SRC,
            ))
            .unwrap();
        let textures = TextureSystem::new(dummy.white_image, dummy.bilinear_sampler);
        TaskHarness {
            frame: FrameData {
                options,
                size,
                gbuffer,
                hdr_target,
                final_target,
                dummy,
                camera: CameraData::default(),
                skybox: None,
                lights: LightsFrameInfo::default(),
                geometry: GeometryFrameInfo::default(),
                shadows: ShadowFrameInfo::default(),
                ssao_output: None,
                bloom_output: None,
            },
            materials: MaterialSystem::new(),
            textures,
            manager,
            device,
        }
    }

    impl TaskHarness {
        /// Records one task in isolation and returns what it encoded.
        pub(crate) fn record(&mut self, task: &mut dyn RendererTask) -> Vec<RecordedCommand> {
            let mut encoder = self.device.create_command_encoder(Some("Test")).unwrap();
            let releaser = self.manager.releaser();
            {
                let mut ctx = RecordContext {
                    device: &*self.device,
                    encoder: encoder.as_mut(),
                    frame: &mut self.frame,
                    materials: &mut self.materials,
                    textures: &self.textures,
                    releaser: &releaser,
                };
                task.record(&mut ctx);
            }
            let cmd = encoder.finish();
            self.device.commands(cmd)
        }

        /// Runs a task's option diff against the current blackboard options.
        pub(crate) fn apply_options(
            &mut self,
            task: &mut dyn RendererTask,
            new: SceneRendererSettings,
        ) {
            let releaser = self.manager.releaser();
            let ctx = TaskContext {
                device: &*self.device,
                releaser: &releaser,
                dummy: &self.frame.dummy,
            };
            let old = self.frame.options.clone();
            task.init_with_options(&ctx, &old, &new);
            self.frame.options = new;
        }
    }
}
