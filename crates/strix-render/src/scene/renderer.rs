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

//! The renderer front end the game thread talks to.
//!
//! `SceneRenderer` owns the task pipeline and the shared frame blackboard.
//! Scene setters copy their snapshot and post a closure that moves it into
//! the owning task on the render worker, so the game thread never blocks on
//! recording. [`SceneRenderer::render`] posts one closure that records every
//! stage in the validated order.

use crate::error::FrameError;
use crate::interner::{MaterialSystem, TextureSystem};
use crate::manager::RenderManager;
use crate::scene::gbuffer::GBuffer;
use crate::scene::pipeline::{validate_stages, StageDesc};
use crate::scene::types::{
    BillboardDraw, DebugLine, DirectionalLight, EntityId, MeshDraw, PointLight, SpotLight,
    SpriteDraw, TextDraw,
};
use crate::settings::SceneRendererSettings;
use crate::tasks::{
    fatal, BillboardsTask, BloomTask, CameraData, FrameData, GeometryFrameInfo,
    GeometryManagerTask, LightsFrameInfo, LightsManagerTask, PbrPassTask, PostprocessingTask,
    RecordContext, RenderLinesTask, RendererTask, ShadowFrameInfo, ShadowPassTask, SkyboxTask,
    SsaoTask, TaskContext,
};
use crate::timings::GpuTimingsRegistry;
use std::sync::{Arc, Mutex};
use strix_core::gfx::{
    ImageDescriptor, ImageFormat, ImageId, ImageUsage, SamplerId,
};
use strix_core::math::{Extent2D, Mat4};
use strix_core::{GraphicsDevice, ResourceError};
use uuid::Uuid;

/// Frame resources that exist before any stage runs.
const AMBIENT_RESOURCES: &[&str] = &["camera"];

/// Every stage, in record order.
struct Tasks {
    lights: LightsManagerTask,
    geometry: GeometryManagerTask,
    shadows: ShadowPassTask,
    ssao: SsaoTask,
    pbr: PbrPassTask,
    billboards: BillboardsTask,
    skybox: SkyboxTask,
    bloom: BloomTask,
    postprocess: PostprocessingTask,
    lines: RenderLinesTask,
}

impl Tasks {
    fn new() -> Self {
        Self {
            lights: LightsManagerTask::new(),
            geometry: GeometryManagerTask::new(),
            shadows: ShadowPassTask::new(),
            ssao: SsaoTask::new(),
            pbr: PbrPassTask::new(),
            billboards: BillboardsTask::new(),
            skybox: SkyboxTask::new(),
            bloom: BloomTask::new(),
            postprocess: PostprocessingTask::new(),
            lines: RenderLinesTask::new(),
        }
    }

    /// Visits every stage in record order.
    fn for_each(&mut self, mut f: impl FnMut(&mut dyn RendererTask)) {
        f(&mut self.lights);
        f(&mut self.geometry);
        f(&mut self.shadows);
        f(&mut self.ssao);
        f(&mut self.pbr);
        f(&mut self.billboards);
        f(&mut self.skybox);
        f(&mut self.bloom);
        f(&mut self.postprocess);
        f(&mut self.lines);
    }

    fn stages(&self) -> Vec<StageDesc> {
        vec![
            self.lights.stage(),
            self.geometry.stage(),
            self.shadows.stage(),
            self.ssao.stage(),
            self.pbr.stage(),
            self.billboards.stage(),
            self.skybox.stage(),
            self.bloom.stage(),
            self.postprocess.stage(),
            self.lines.stage(),
        ]
    }
}

/// Everything the render worker mutates while recording.
struct RendererState {
    frame: FrameData,
    materials: MaterialSystem,
    tasks: Tasks,
}

/// The scene-facing renderer: owns the frame scheduler, the stage pipeline
/// and the resource interners.
pub struct SceneRenderer {
    manager: RenderManager,
    state: Arc<Mutex<RendererState>>,
    textures: Arc<TextureSystem>,
}

fn create_hdr_target(device: &dyn GraphicsDevice, size: Extent2D) -> Result<ImageId, ResourceError> {
    device.create_image(&ImageDescriptor::d2(
        "HDR",
        ImageFormat::R32G32B32A32Float,
        size.width,
        size.height,
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE,
    ))
}

fn create_final_target(
    device: &dyn GraphicsDevice,
    size: Extent2D,
) -> Result<ImageId, ResourceError> {
    device.create_image(&ImageDescriptor::d2(
        "Final",
        ImageFormat::R8G8B8A8Unorm,
        size.width,
        size.height,
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE | ImageUsage::COPY_SRC,
    ))
}

impl SceneRenderer {
    /// Builds the full pipeline against the device's current surface size.
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Result<Self, FrameError> {
        let manager = RenderManager::new(Arc::clone(&device))?;
        let tasks = Tasks::new();
        validate_stages(&tasks.stages(), AMBIENT_RESOURCES)?;

        let options = SceneRendererSettings::default();
        let size = device.surface_extent();
        let gbuffer = GBuffer::new(&*device, size, &options.optional_gbuffers)?;
        let hdr_target = create_hdr_target(&*device, size)?;
        let final_target = create_final_target(&*device, size)?;
        manager.set_present_source(Some(final_target));
        let dummy = *manager.dummy_resources();
        let textures = Arc::new(TextureSystem::new(dummy.white_image, dummy.bilinear_sampler));

        let frame = FrameData {
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
        };
        Ok(Self {
            manager,
            state: Arc::new(Mutex::new(RendererState {
                frame,
                materials: MaterialSystem::new(),
                tasks,
            })),
            textures,
        })
    }

    /// The GPU backend the pipeline runs on.
    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        self.manager.device()
    }

    /// Per-stage GPU timings.
    pub fn timings(&self) -> &GpuTimingsRegistry {
        self.manager.timings()
    }

    /// Monotonic frame counter.
    pub fn frame_number(&self) -> u64 {
        self.manager.frame_number()
    }

    /// Opens the next frame slot, blocking if the GPU is too far behind.
    pub fn begin_frame(&mut self) {
        self.manager.begin_frame();
    }

    /// Closes the frame and hands it to the render worker.
    pub fn end_frame(&mut self) {
        self.manager.end_frame();
    }

    /// Drains the worker and waits for every in-flight frame.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        self.manager.finish()
    }

    /// Posts a state mutation to the render worker.
    fn post(&mut self, apply: impl FnOnce(&mut RendererState) + Send + 'static) {
        let state = Arc::clone(&self.state);
        self.manager.submit(Box::new(move |_device, _encoder| {
            let mut state = state.lock().unwrap();
            apply(&mut state);
        }));
    }

    /// Replaces the mesh list for the next recorded frame.
    pub fn set_meshes(&mut self, meshes: Vec<MeshDraw>) {
        self.post(move |state| state.tasks.geometry.set_meshes(meshes, true));
    }

    /// Replaces the sprite list.
    pub fn set_sprites(&mut self, sprites: Vec<SpriteDraw>) {
        self.post(move |state| state.tasks.geometry.set_sprites(sprites, true));
    }

    /// Replaces the text list.
    pub fn set_texts(&mut self, texts: Vec<TextDraw>) {
        self.post(move |state| state.tasks.geometry.set_texts(texts, true));
    }

    /// Patches world transforms of already-submitted meshes.
    pub fn set_transforms(&mut self, updates: Vec<(EntityId, Mat4)>) {
        self.post(move |state| state.tasks.geometry.set_transforms(&updates));
    }

    /// Replaces the point-light list.
    pub fn set_point_lights(&mut self, lights: Vec<PointLight>) {
        self.post(move |state| state.tasks.lights.set_point_lights(&lights));
    }

    /// Replaces the spot-light list.
    pub fn set_spot_lights(&mut self, lights: Vec<SpotLight>) {
        self.post(move |state| state.tasks.lights.set_spot_lights(&lights));
    }

    /// Sets or clears the directional light.
    pub fn set_directional_light(&mut self, light: Option<DirectionalLight>) {
        self.post(move |state| state.tasks.lights.set_directional_light(light));
    }

    /// Replaces the billboard list.
    pub fn set_billboards(&mut self, billboards: Vec<BillboardDraw>) {
        self.post(move |state| state.tasks.billboards.set_billboards(billboards, true));
    }

    /// Replaces the debug line list.
    pub fn set_debug_lines(&mut self, lines: Vec<DebugLine>) {
        self.post(move |state| state.tasks.lines.set_lines(&lines));
    }

    /// Sets or clears the environment cubemap.
    pub fn set_skybox(&mut self, skybox: Option<ImageId>) {
        self.post(move |state| state.frame.skybox = skybox);
    }

    /// Interns a texture; returns its stable table index.
    pub fn add_texture(&self, guid: Uuid, image: ImageId, sampler: SamplerId) -> u32 {
        self.textures.add_texture(guid, image, sampler)
    }

    /// Swaps the GPU resources behind an interned texture.
    pub fn update_texture(&self, guid: Uuid, image: ImageId, sampler: SamplerId) {
        self.textures.update_texture(guid, image, sampler);
    }

    /// Forgets an interned texture, returning its resources for disposal.
    pub fn remove_texture(&self, guid: Uuid) -> Option<(ImageId, SamplerId)> {
        self.textures.remove_texture(guid)
    }

    /// Applies a new options snapshot on the render worker; each task diffs
    /// the fields it cares about.
    pub fn set_options(&mut self, options: SceneRendererSettings) {
        let state = Arc::clone(&self.state);
        let releaser = self.manager.releaser();
        self.manager.submit(Box::new(move |device, _encoder| {
            let mut state = state.lock().unwrap();
            let RendererState { frame, tasks, .. } = &mut *state;
            if frame.options == options {
                return;
            }
            let old = frame.options.clone();
            if old.optional_gbuffers != options.optional_gbuffers {
                // old attachments stay alive in the release ring until no
                // in-flight frame references them
                fatal(
                    frame
                        .gbuffer
                        .resize(device, frame.size, &options.optional_gbuffers, |cmd| {
                            releaser.submit_resource_free(cmd)
                        }),
                    "Failed to resize the G-Buffer",
                );
            }
            let ctx = TaskContext {
                device,
                releaser: &releaser,
                dummy: &frame.dummy,
            };
            tasks.for_each(|task| task.init_with_options(&ctx, &old, &options));
            frame.options = options;
        }));
    }

    /// Resizes every size-dependent resource. Waits for the GPU, so this
    /// stalls the frame loop; callers debounce it.
    pub fn set_viewport_size(&mut self, size: Extent2D) -> Result<(), FrameError> {
        self.manager.device().wait_idle()?;
        let releaser = self.manager.releaser();
        let device = Arc::clone(self.manager.device());
        let mut state = self.state.lock().unwrap();
        let RendererState { frame, tasks, .. } = &mut *state;

        frame.size = size;
        frame.gbuffer.resize(
            &*device,
            size,
            &frame.options.optional_gbuffers,
            |cmd| releaser.submit_resource_free(cmd),
        )?;
        for image in [frame.hdr_target, frame.final_target] {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy render target: {err}");
                }
            }));
        }
        frame.hdr_target = create_hdr_target(&*device, size)?;
        frame.final_target = create_final_target(&*device, size)?;
        self.manager.set_present_source(Some(frame.final_target));

        let ctx = TaskContext {
            device: &*device,
            releaser: &releaser,
            dummy: &frame.dummy,
        };
        tasks.for_each(|task| task.on_resize(&ctx, size));
        Ok(())
    }

    /// Records the whole frame with the given camera. The previous frame's
    /// view-projection is carried over automatically for motion vectors.
    pub fn render(&mut self, camera: CameraData) {
        let state = Arc::clone(&self.state);
        let textures = Arc::clone(&self.textures);
        let releaser = self.manager.releaser();
        self.manager.submit(Box::new(move |device, encoder| {
            let mut guard = state.lock().unwrap();
            let RendererState {
                frame,
                materials,
                tasks,
            } = &mut *guard;

            let previous = frame.camera.view_projection;
            frame.camera = camera;
            frame.camera.prev_view_projection = previous;

            let mut ctx = RecordContext {
                device,
                encoder,
                frame,
                materials,
                textures: &textures,
                releaser: &releaser,
            };
            tasks.for_each(|task| task.record(&mut ctx));
        }));
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        // A frame recorded but never handed to the worker still sits in a
        // queue; it must replay against live resources, so drain everything
        // before anything below is destroyed.
        if let Err(err) = self.manager.finish() {
            log::warn!("Failed to flush pending frames during renderer teardown: {err}");
        }
        self.manager.set_present_source(None);
        self.manager.enter_immediate_deletion_mode();
        let releaser = self.manager.releaser();
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let RendererState {
            frame,
            materials,
            tasks,
        } = &mut *state;

        materials.destroy(|cmd| releaser.submit_resource_free(cmd));
        tasks.lights.destroy(&releaser);
        tasks.geometry.destroy(&releaser);
        tasks
            .shadows
            .destroy(frame.dummy.depth_image, frame.dummy.cube_depth_image, &releaser);
        tasks.ssao.destroy(&releaser);
        tasks.pbr.destroy(&releaser);
        tasks.billboards.destroy(&releaser);
        tasks.skybox.destroy(&releaser);
        tasks.bloom.destroy(&releaser);
        tasks.postprocess.destroy(&releaser);
        tasks.lines.destroy(&releaser);
        frame
            .gbuffer
            .destroy(&mut |cmd| releaser.submit_resource_free(cmd));
        for image in [frame.hdr_target, frame.final_target] {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy render target: {err}");
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_stage_order_validates() {
        let tasks = Tasks::new();
        assert!(validate_stages(&tasks.stages(), AMBIENT_RESOURCES).is_ok());
    }

    #[test]
    fn stages_out_of_order_are_rejected() {
        let tasks = Tasks::new();
        let mut stages = tasks.stages();
        stages.swap(0, 2); // shadows before the lights it consumes
        let err = validate_stages(&stages, AMBIENT_RESOURCES).unwrap_err();
        assert_eq!(err.stage, "shadows");
    }
}
