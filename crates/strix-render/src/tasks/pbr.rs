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

//! The deferred lighting resolve: one full-screen compute dispatch over the
//! G-Buffer into the HDR target.
//!
//! Light counts and flags are baked into the kernel as specialization
//! constants so the driver folds the light loops; the pipeline rebuilds
//! only when that [`PbrKernelInfo`] changes. "Stutterless" mode trades the
//! folding for stability: light counts come from push constants and only an
//! irradiance-presence flip forces a rebuild.

use super::{fatal, RecordContext, RendererTask, TaskContext};
use crate::config::PBR_TILE_SIZE;
use crate::manager::ResourceReleaser;
use crate::scene::StageDesc;
use crate::settings::{AmbientOcclusion, SceneRendererSettings};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    ComputePipelineDescriptor, ComputePipelineId, ImageDescriptor, ImageFormat, ImageId,
    ImageKind, ImageLayout, ImageUsage, ShaderDefine, ShaderModuleDescriptor, ShaderStage,
    SpecializationConstant,
};
use strix_core::math::Extent3D;
use strix_core::GraphicsDevice;

/// Per-cell rotation grid of the soft-shadow offset texture.
const POISSON_WINDOW_SIZE: u32 = 32;
/// Disk samples per PCF filter.
const POISSON_FILTER_SAMPLES: u32 = 64;

/// What the resolve kernel was specialized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PbrKernelInfo {
    /// Point lights in the scene.
    pub point_lights: u32,
    /// Spot lights in the scene.
    pub spot_lights: u32,
    /// Whether a directional light exists.
    pub has_dir_light: bool,
    /// Whether an environment cube provides irradiance.
    pub has_irradiance: bool,
}

impl PbrKernelInfo {
    /// The stutterless variant of this info: everything dynamic except
    /// irradiance presence, which changes sampler bindings.
    fn uber(self) -> Self {
        Self {
            point_lights: 0,
            spot_lights: 0,
            has_dir_light: false,
            has_irradiance: self.has_irradiance,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PbrPushConstants {
    size: [u32; 2],
    point_lights: u32,
    spot_lights: u32,
    has_dir_light: u32,
    has_irradiance: u32,
    _padding: [u32; 2],
}

/// Vogel-disk offsets with a per-cell random rotation, packed as unorm
/// bytes biased around 128. Deterministic so frames and runs agree.
fn poisson_disk_texels() -> Vec<u8> {
    let cells = (POISSON_WINDOW_SIZE * POISSON_WINDOW_SIZE) as usize;
    let samples = POISSON_FILTER_SAMPLES as usize;
    let golden_angle = 2.399_963_2_f32;
    let mut texels = Vec::with_capacity(cells * samples * 4);
    for layer in 0..samples {
        let radius = (((layer as f32) + 0.5) / samples as f32).sqrt();
        let base_angle = layer as f32 * golden_angle;
        for cell in 0..cells {
            // xorshift over the cell index for the rotation jitter
            let mut seed = cell as u32 + 1;
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let rotation = (seed as f32 / u32::MAX as f32) * std::f32::consts::TAU;
            let angle = base_angle + rotation;
            let (sin, cos) = angle.sin_cos();
            let encode = |value: f32| ((value * 0.5 + 0.5) * 255.0).round() as u8;
            texels.extend_from_slice(&[encode(radius * cos), encode(radius * sin), 0, 0]);
        }
    }
    texels
}

/// Resolves the G-Buffer into lit HDR color.
#[derive(Debug)]
pub struct PbrPassTask {
    pipeline: Option<ComputePipelineId>,
    kernel: PbrKernelInfo,
    poisson: Option<ImageId>,
}

impl PbrPassTask {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            kernel: PbrKernelInfo::default(),
            poisson: None,
        }
    }

    /// Releases the kernel and the soft-shadow offset texture.
    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        if let Some(pipeline) = self.pipeline.take() {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_compute_pipeline(pipeline) {
                    log::warn!("Failed to destroy lighting kernel: {err}");
                }
            }));
        }
        if let Some(image) = self.poisson.take() {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy offset texture: {err}");
                }
            }));
        }
    }

    fn build_pipeline(
        device: &dyn GraphicsDevice,
        kernel: PbrKernelInfo,
        options: &SceneRendererSettings,
    ) -> ComputePipelineId {
        let mut desc = ShaderModuleDescriptor::new("shaders/pbr_resolve.comp", ShaderStage::Compute);
        if options.stutterless {
            desc = desc.with_define(ShaderDefine::flag("DYNAMIC_LIGHTS"));
        }
        if options.soft_shadows {
            desc = desc.with_define(ShaderDefine::flag("SOFT_SHADOWS"));
        }
        if options.visualize_cascades {
            desc = desc.with_define(ShaderDefine::flag("VISUALIZE_CASCADES"));
        }
        if options.ao == AmbientOcclusion::Ssao {
            desc = desc.with_define(ShaderDefine::flag("SSAO"));
        }
        if options.shadows.translucent_shadows {
            desc = desc.with_define(ShaderDefine::flag("TRANSLUCENT_SHADOWS"));
        }
        let shader = fatal(
            device.create_shader_module(&desc),
            "Failed to compile the lighting kernel",
        );
        fatal(
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(Cow::Borrowed("PBR resolve")),
                shader,
                specialization: vec![
                    SpecializationConstant {
                        id: 0,
                        value: kernel.point_lights,
                    },
                    SpecializationConstant {
                        id: 1,
                        value: kernel.spot_lights,
                    },
                    SpecializationConstant {
                        id: 2,
                        value: u32::from(kernel.has_dir_light),
                    },
                    SpecializationConstant {
                        id: 3,
                        value: u32::from(kernel.has_irradiance),
                    },
                ],
            }),
            "Failed to create the lighting kernel",
        )
    }

    fn sync_poisson_texture(&mut self, ctx: &mut RecordContext<'_>) {
        if ctx.frame.options.soft_shadows {
            if self.poisson.is_none() {
                let image = fatal(
                    ctx.device.create_image(&ImageDescriptor {
                        label: Some(Cow::Borrowed("Shadow offsets")),
                        kind: ImageKind::D3,
                        format: ImageFormat::R8G8B8A8Unorm,
                        extent: Extent3D::new(
                            POISSON_WINDOW_SIZE,
                            POISSON_WINDOW_SIZE,
                            POISSON_FILTER_SAMPLES,
                        ),
                        mip_levels: 1,
                        usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST,
                    }),
                    "Failed to create the offset texture",
                );
                ctx.encoder.write_image(image, &poisson_disk_texels());
                self.poisson = Some(image);
            }
        } else if let Some(image) = self.poisson.take() {
            ctx.releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy offset texture: {err}");
                }
            }));
        }
    }
}

impl Default for PbrPassTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for PbrPassTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "pbr",
            inputs: &["gbuffer", "lights", "shadow_maps", "ssao"],
            outputs: &["hdr"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        self.sync_poisson_texture(ctx);

        let info = PbrKernelInfo {
            point_lights: ctx.frame.lights.point_lights.len() as u32,
            spot_lights: ctx.frame.lights.spot_lights.len() as u32,
            has_dir_light: ctx.frame.lights.directional.is_some(),
            has_irradiance: ctx.frame.skybox.is_some(),
        };
        let baked = if ctx.frame.options.stutterless {
            info.uber()
        } else {
            info
        };
        let pipeline = match self.pipeline.take() {
            Some(pipeline) if self.kernel == baked => pipeline,
            stale => {
                if let Some(old) = stale {
                    ctx.releaser.submit_resource_free(Box::new(move |device| {
                        if let Err(err) = device.destroy_compute_pipeline(old) {
                            log::warn!("Failed to destroy lighting kernel: {err}");
                        }
                    }));
                }
                log::debug!(
                    "Rebuilding the lighting kernel for {} point / {} spot lights",
                    baked.point_lights,
                    baked.spot_lights
                );
                Self::build_pipeline(ctx.device, baked, &ctx.frame.options)
            }
        };
        self.kernel = baked;

        let size = ctx.frame.size;
        ctx.encoder.transition_image_layout(
            ctx.frame.hdr_target,
            ImageLayout::Undefined,
            ImageLayout::General,
        );
        {
            let constants = PbrPushConstants {
                size: [size.width, size.height],
                point_lights: info.point_lights,
                spot_lights: info.spot_lights,
                has_dir_light: u32::from(info.has_dir_light),
                has_irradiance: u32::from(info.has_irradiance),
                _padding: [0; 2],
            };
            let mut pass = ctx
                .encoder
                .begin_compute_pass(pipeline, Some("PBR resolve"));
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.dispatch(
                size.width.div_ceil(PBR_TILE_SIZE),
                size.height.div_ceil(PBR_TILE_SIZE),
                1,
            );
        }
        // Forward overlays render on top of the resolved color.
        ctx.encoder.transition_image_layout(
            ctx.frame.hdr_target,
            ImageLayout::General,
            ImageLayout::ColorAttachment,
        );
        self.pipeline = Some(pipeline);
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        let stale = old.stutterless != new.stutterless
            || old.soft_shadows != new.soft_shadows
            || old.visualize_cascades != new.visualize_cascades
            || old.ao != new.ao
            || old.shadows.translucent_shadows != new.shadows.translucent_shadows;
        if !stale {
            return;
        }
        if let Some(pipeline) = self.pipeline.take() {
            ctx.releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_compute_pipeline(pipeline) {
                    log::warn!("Failed to destroy lighting kernel: {err}");
                }
            }));
        }
        // The offset texture follows on the next record.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::types::{DirectionalLight, PointLight};
    use crate::tasks::lights::{GpuDirectionalLight, GpuPointLight};
    use crate::tasks::testing;
    use crate::tasks::CameraData;
    use std::sync::Arc;
    use strix_core::gfx::null::RecordedCommand;
    use strix_core::math::Vec3;

    fn point_light() -> GpuPointLight {
        GpuPointLight::new(&PointLight {
            position: Vec3::ZERO,
            radius: 5.0,
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadows: false,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        })
    }

    fn directional_light() -> GpuDirectionalLight {
        GpuDirectionalLight::new(
            &DirectionalLight {
                direction: Vec3::NEG_Y,
                color: Vec3::ONE,
                intensity: 1.0,
                ambient: Vec3::splat(0.1),
                casts_shadows: true,
                volumetric_intensity: 0.0,
                is_volumetric: false,
            },
            &CameraData::default(),
            2048,
        )
    }

    fn resolve_pipeline(commands: &[RecordedCommand]) -> ComputePipelineId {
        commands
            .iter()
            .find_map(|cmd| match cmd {
                RecordedCommand::BeginComputePass { pipeline } => Some(*pipeline),
                _ => None,
            })
            .expect("no compute pass recorded")
    }

    #[test]
    fn light_counts_bake_into_the_kernel() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![point_light(), point_light()]);
        harness.frame.lights.directional = Some(directional_light());

        let mut task = PbrPassTask::new();
        let commands = harness.record(&mut task);
        let pipeline = resolve_pipeline(&commands);
        let record = harness.device.compute_pipeline_record(pipeline).unwrap();
        let values: Vec<u32> = record.specialization.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![2, 0, 1, 0]);

        // 64x64 viewport, 8x8 tiles
        assert!(commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::Dispatch { x: 8, y: 8, z: 1 })));
    }

    #[test]
    fn kernel_rebuilds_only_when_the_scene_shape_changes() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![point_light()]);
        let mut task = PbrPassTask::new();

        let first = resolve_pipeline(&harness.record(&mut task));
        let second = resolve_pipeline(&harness.record(&mut task));
        assert_eq!(first, second);

        harness.frame.lights.point_lights = Arc::new(vec![point_light(), point_light()]);
        let third = resolve_pipeline(&harness.record(&mut task));
        assert_ne!(second, third);
    }

    #[test]
    fn stutterless_mode_survives_light_count_changes() {
        let mut harness = testing::harness();
        let mut task = PbrPassTask::new();
        let mut options = harness.frame.options.clone();
        options.stutterless = true;
        harness.apply_options(&mut task, options);

        harness.frame.lights.point_lights = Arc::new(vec![point_light()]);
        let first = resolve_pipeline(&harness.record(&mut task));
        harness.frame.lights.point_lights = Arc::new(vec![point_light(), point_light()]);
        harness.frame.lights.directional = Some(directional_light());
        let second = resolve_pipeline(&harness.record(&mut task));
        assert_eq!(first, second);

        // irradiance presence still reshapes the kernel bindings
        harness.frame.skybox = Some(harness.frame.dummy.ibl_cube);
        let third = resolve_pipeline(&harness.record(&mut task));
        assert_ne!(second, third);
    }

    #[test]
    fn soft_shadows_create_the_offset_texture_on_the_next_record() {
        let mut harness = testing::harness();
        let mut task = PbrPassTask::new();
        let mut options = harness.frame.options.clone();
        options.soft_shadows = false;
        harness.apply_options(&mut task, options);
        harness.record(&mut task);
        assert!(task.poisson.is_none());

        let mut options = harness.frame.options.clone();
        options.soft_shadows = true;
        harness.apply_options(&mut task, options);
        assert!(task.poisson.is_none(), "creation waits for the next frame");

        let commands = harness.record(&mut task);
        let image = task.poisson.expect("offset texture missing");
        let record = harness.device.image_record(image).unwrap();
        assert_eq!(record.kind, ImageKind::D3);
        assert_eq!(record.extent.depth_or_array_layers, POISSON_FILTER_SAMPLES);
        assert!(commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::WriteImage { image: i, .. } if *i == image)));

        let mut options = harness.frame.options.clone();
        options.soft_shadows = false;
        harness.apply_options(&mut task, options);
        harness.record(&mut task);
        assert!(task.poisson.is_none());
    }

    #[test]
    fn hdr_target_round_trips_through_the_storage_layout() {
        let mut harness = testing::harness();
        let mut task = PbrPassTask::new();
        let commands = harness.record(&mut task);
        let hdr = harness.frame.hdr_target;
        let transitions: Vec<(ImageLayout, ImageLayout)> = commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::Transition { image, from, to } if *image == hdr => {
                    Some((*from, *to))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (ImageLayout::Undefined, ImageLayout::General),
                (ImageLayout::General, ImageLayout::ColorAttachment),
            ]
        );
    }

    #[test]
    fn offset_texels_stay_inside_the_unit_disk() {
        let texels = poisson_disk_texels();
        assert_eq!(
            texels.len(),
            (POISSON_WINDOW_SIZE * POISSON_WINDOW_SIZE * POISSON_FILTER_SAMPLES * 4) as usize
        );
        for texel in texels.chunks_exact(4) {
            let x = texel[0] as f32 / 255.0 * 2.0 - 1.0;
            let y = texel[1] as f32 / 255.0 * 2.0 - 1.0;
            assert!(x * x + y * y <= 1.02);
        }
    }
}
