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

//! Screen-space ambient occlusion at half resolution: one occlusion pass
//! over G-Buffer depth and normals, one blur pass to kill the sampling
//! noise. The blurred image is what the lighting resolve consumes.

use super::{fatal, RecordContext, RendererTask, TaskContext};
use crate::manager::ResourceReleaser;
use crate::scene::StageDesc;
use crate::settings::{AmbientOcclusion, SceneRendererSettings};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    ColorAttachment, GraphicsPipelineDescriptor, ImageDescriptor, ImageFormat, ImageId,
    ImageLayout, ImageUsage, LoadOp, RenderPipelineId, RenderTarget, ShaderDefine,
    ShaderModuleDescriptor, ShaderStage,
};
use strix_core::math::Extent2D;
use strix_core::GraphicsDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoPushConstants {
    projection: [[f32; 4]; 4],
    radius: f32,
    bias: f32,
    /// Reciprocal half-resolution dimensions.
    texel: [f32; 2],
}

#[derive(Debug)]
struct SsaoPipelines {
    /// Occlusion estimation; the sample count is baked into the shader.
    occlusion: RenderPipelineId,
    blur: RenderPipelineId,
    /// Sample count the occlusion shader was built with.
    samples: u32,
}

impl SsaoPipelines {
    fn release(self, releaser: &ResourceReleaser) {
        for pipeline in [self.occlusion, self.blur] {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_render_pipeline(pipeline) {
                    log::warn!("Failed to destroy SSAO pipeline: {err}");
                }
            }));
        }
    }
}

/// Computes the ambient-occlusion term consumed by the lighting resolve.
pub struct SsaoTask {
    pipelines: Option<SsaoPipelines>,
    raw: Option<ImageId>,
    blurred: Option<ImageId>,
}

impl SsaoTask {
    pub fn new() -> Self {
        Self {
            pipelines: None,
            raw: None,
            blurred: None,
        }
    }

    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        if let Some(pipelines) = self.pipelines.take() {
            pipelines.release(releaser);
        }
        self.release_images(releaser);
    }

    fn release_images(&mut self, releaser: &ResourceReleaser) {
        for image in self.raw.take().into_iter().chain(self.blurred.take()) {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy SSAO target: {err}");
                }
            }));
        }
    }

    fn half_resolution(viewport: Extent2D) -> Extent2D {
        Extent2D::new((viewport.width / 2).max(1), (viewport.height / 2).max(1))
    }

    fn build_pipelines(device: &dyn GraphicsDevice, samples: u32) -> SsaoPipelines {
        let vertex = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/fullscreen.vert",
                ShaderStage::Vertex,
            )),
            "Failed to compile SSAO shader",
        );
        let occlusion_frag = fatal(
            device.create_shader_module(
                &ShaderModuleDescriptor::new("shaders/ssao.frag", ShaderStage::Fragment)
                    .with_define(ShaderDefine::value("KERNEL_SIZE", samples.to_string())),
            ),
            "Failed to compile SSAO shader",
        );
        let blur_frag = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/ssao_blur.frag",
                ShaderStage::Fragment,
            )),
            "Failed to compile SSAO shader",
        );
        let pipeline = |label: &'static str, fragment| {
            let desc = GraphicsPipelineDescriptor {
                label: Some(Cow::Borrowed(label)),
                fragment_shader: Some(fragment),
                color_attachments: vec![ColorAttachment {
                    format: ImageFormat::R8Unorm,
                    load_op: LoadOp::DontCare,
                    initial_layout: ImageLayout::Undefined,
                    final_layout: ImageLayout::ShaderReadOnly,
                    clear_color: [1.0; 4],
                    blend: None,
                }],
                ..GraphicsPipelineDescriptor::new("", vertex)
            };
            fatal(
                device.create_render_pipeline(&desc),
                "Failed to create SSAO pipeline",
            )
        };
        SsaoPipelines {
            occlusion: pipeline("SSAO", occlusion_frag),
            blur: pipeline("SSAO blur", blur_frag),
            samples,
        }
    }
}

impl Default for SsaoTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for SsaoTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "ssao",
            inputs: &["gbuffer"],
            outputs: &["ssao"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        if ctx.frame.options.ao != AmbientOcclusion::Ssao {
            ctx.frame.ssao_output = None;
            return;
        }
        let settings = ctx.frame.options.ssao;
        let size = Self::half_resolution(ctx.frame.size);

        if self.raw.is_none() {
            let image = |label: &'static str| {
                fatal(
                    ctx.device.create_image(&ImageDescriptor::d2(
                        label,
                        ImageFormat::R8Unorm,
                        size.width,
                        size.height,
                        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
                    )),
                    "Failed to create SSAO target",
                )
            };
            self.raw = Some(image("SSAO raw"));
            self.blurred = Some(image("SSAO blurred"));
        }
        let (Some(raw), Some(blurred)) = (self.raw, self.blurred) else {
            return;
        };

        let pipelines = match self.pipelines.take() {
            Some(pipelines) if pipelines.samples == settings.samples() => pipelines,
            stale => {
                if let Some(old) = stale {
                    old.release(ctx.releaser);
                }
                Self::build_pipelines(ctx.device, settings.samples())
            }
        };

        let constants = SsaoPushConstants {
            projection: ctx.frame.camera.projection.to_cols_array_2d(),
            radius: settings.radius(),
            bias: settings.bias(),
            texel: [1.0 / size.width as f32, 1.0 / size.height as f32],
        };
        {
            let colors = [raw];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: size,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipelines.occlusion, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.draw(0..3, 0..1);
        }
        {
            let colors = [blurred];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: size,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipelines.blur, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.draw(0..3, 0..1);
        }

        ctx.frame.ssao_output = Some(blurred);
        self.pipelines = Some(pipelines);
    }

    fn on_resize(&mut self, ctx: &TaskContext<'_>, _size: Extent2D) {
        self.release_images(ctx.releaser);
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if old.ao == AmbientOcclusion::Ssao && new.ao != AmbientOcclusion::Ssao {
            self.release_images(ctx.releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    #[test]
    fn disabled_ao_publishes_nothing() {
        let mut harness = testing::harness();
        let mut task = SsaoTask::new();
        let commands = harness.record(&mut task);
        assert!(commands.is_empty());
        assert_eq!(harness.frame.ssao_output, None);
    }

    #[test]
    fn targets_are_half_resolution() {
        let mut harness = testing::harness();
        harness.frame.options.ao = AmbientOcclusion::Ssao;
        let mut task = SsaoTask::new();
        let commands = harness.record(&mut task);

        let output = harness.frame.ssao_output.expect("no AO output");
        let record = harness.device.image_record(output).unwrap();
        assert_eq!((record.extent.width, record.extent.height), (32, 32));

        let passes = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. }))
            .count();
        assert_eq!(passes, 2);
    }

    #[test]
    fn sample_count_changes_rebuild_the_occlusion_pipeline() {
        let mut harness = testing::harness();
        harness.frame.options.ao = AmbientOcclusion::Ssao;
        let mut task = SsaoTask::new();
        harness.record(&mut task);
        let first = task.pipelines.as_ref().unwrap().occlusion;

        harness.frame.options.ssao.set_samples(16);
        harness.record(&mut task);
        let second = task.pipelines.as_ref().unwrap().occlusion;
        assert_ne!(first, second);

        harness.record(&mut task);
        assert_eq!(task.pipelines.as_ref().unwrap().occlusion, second);
    }

    #[test]
    fn turning_ao_off_releases_the_targets() {
        let mut harness = testing::harness();
        harness.frame.options.ao = AmbientOcclusion::Ssao;
        let mut task = SsaoTask::new();
        harness.record(&mut task);
        assert!(task.raw.is_some());

        let mut options = harness.frame.options.clone();
        options.ao = AmbientOcclusion::None;
        harness.apply_options(&mut task, options);
        assert!(task.raw.is_none() && task.blurred.is_none());

        harness.record(&mut task);
        assert_eq!(harness.frame.ssao_output, None);
    }
}
