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

//! The final image pass: tonemapping, bloom composite, distance fog and
//! gamma correction, HDR in, LDR out.
//!
//! The tonemapping operator and fog equation are baked into the shader as
//! defines; everything continuous (exposure, gamma, fog distances, bloom
//! intensity) flows through push constants so tweaking them costs nothing.

use super::{fatal, RecordContext, RendererTask, TaskContext};
use crate::manager::ResourceReleaser;
use crate::scene::StageDesc;
use crate::settings::{FogEquation, SceneRendererSettings, TonemappingMethod};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    ColorAttachment, GraphicsPipelineDescriptor, ImageFormat, ImageLayout, LoadOp,
    RenderPipelineId, RenderTarget, ShaderDefine, ShaderModuleDescriptor, ShaderStage,
};
use strix_core::GraphicsDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PostPushConstants {
    fog_color: [f32; 3],
    fog_density: f32,
    fog_min_distance: f32,
    fog_max_distance: f32,
    exposure: f32,
    gamma: f32,
    /// Linear multiplier of the photographic model; unused by the other
    /// operators.
    tonemap_scale: f32,
    /// White point of the filmic curve.
    white_point: f32,
    bloom_intensity: f32,
    has_bloom: u32,
}

/// The shader variant key: everything baked as a define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PostVariant {
    tonemapping: TonemappingMethod,
    fog_enabled: bool,
    fog_equation: FogEquation,
}

impl PostVariant {
    fn of(options: &SceneRendererSettings) -> Self {
        Self {
            tonemapping: options.tonemapping,
            fog_enabled: options.fog.enabled,
            fog_equation: options.fog.equation,
        }
    }
}

/// Converts the lit HDR frame to display-ready LDR.
pub struct PostprocessingTask {
    pipeline: Option<(RenderPipelineId, PostVariant)>,
}

impl PostprocessingTask {
    pub fn new() -> Self {
        Self { pipeline: None }
    }

    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        if let Some((pipeline, _)) = self.pipeline.take() {
            Self::release_pipeline(pipeline, releaser);
        }
    }

    fn release_pipeline(pipeline: RenderPipelineId, releaser: &ResourceReleaser) {
        releaser.submit_resource_free(Box::new(move |device| {
            if let Err(err) = device.destroy_render_pipeline(pipeline) {
                log::warn!("Failed to destroy post-processing pipeline: {err}");
            }
        }));
    }

    fn build_pipeline(device: &dyn GraphicsDevice, variant: PostVariant) -> RenderPipelineId {
        let vertex = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/fullscreen.vert",
                ShaderStage::Vertex,
            )),
            "Failed to compile post-processing shader",
        );
        let tonemap = match variant.tonemapping {
            TonemappingMethod::None => "TONEMAP_NONE",
            TonemappingMethod::Reinhard => "TONEMAP_REINHARD",
            TonemappingMethod::Filmic => "TONEMAP_FILMIC",
            TonemappingMethod::Aces => "TONEMAP_ACES",
            TonemappingMethod::PhotoLinear => "TONEMAP_PHOTO_LINEAR",
        };
        let mut desc =
            ShaderModuleDescriptor::new("shaders/postprocess.frag", ShaderStage::Fragment)
                .with_define(ShaderDefine::flag(tonemap));
        if variant.fog_enabled {
            let equation = match variant.fog_equation {
                FogEquation::Linear => "0",
                FogEquation::Exp => "1",
                FogEquation::Exp2 => "2",
            };
            desc = desc
                .with_define(ShaderDefine::flag("FOG"))
                .with_define(ShaderDefine::value("FOG_EQUATION", equation));
        }
        let fragment = fatal(
            device.create_shader_module(&desc),
            "Failed to compile post-processing shader",
        );

        let desc = GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("Post-processing")),
            fragment_shader: Some(fragment),
            color_attachments: vec![ColorAttachment {
                format: ImageFormat::R8G8B8A8Unorm,
                load_op: LoadOp::DontCare,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::ColorAttachment,
                clear_color: [0.0; 4],
                blend: None,
            }],
            ..GraphicsPipelineDescriptor::new("", vertex)
        };
        fatal(
            device.create_render_pipeline(&desc),
            "Failed to create post-processing pipeline",
        )
    }
}

impl Default for PostprocessingTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for PostprocessingTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "postprocess",
            inputs: &["hdr", "bloom"],
            outputs: &["ldr"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let options = &ctx.frame.options;
        let variant = PostVariant::of(options);
        let pipeline = match self.pipeline.take() {
            Some((pipeline, built)) if built == variant => pipeline,
            stale => {
                if let Some((old, _)) = stale {
                    Self::release_pipeline(old, ctx.releaser);
                }
                Self::build_pipeline(ctx.device, variant)
            }
        };

        let constants = PostPushConstants {
            fog_color: options.fog.color,
            fog_density: options.fog.density,
            fog_min_distance: options.fog.min_distance,
            fog_max_distance: options.fog.max_distance,
            exposure: options.exposure,
            gamma: options.gamma,
            tonemap_scale: options.photo_linear.scale(options.gamma),
            white_point: options.filmic.white_point,
            bloom_intensity: options.bloom.intensity,
            has_bloom: u32::from(ctx.frame.bloom_output.is_some()),
        };
        let colors = [ctx.frame.final_target];
        let target = RenderTarget {
            colors: &colors,
            depth: None,
            extent: ctx.frame.size,
        };
        {
            let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.draw(0..3, 0..1);
        }
        self.pipeline = Some((pipeline, variant));
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if PostVariant::of(old) == PostVariant::of(new) {
            return;
        }
        if let Some((pipeline, _)) = self.pipeline.take() {
            Self::release_pipeline(pipeline, ctx.releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    #[test]
    fn writes_one_fullscreen_pass_into_the_final_target() {
        let mut harness = testing::harness();
        let mut task = PostprocessingTask::new();
        let commands = harness.record(&mut task);

        let final_target = harness.frame.final_target;
        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::BeginRenderPass { colors, .. } if colors == &vec![final_target]
        )));
        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::Draw {
                vertices: 3,
                instances: 1
            }
        )));
    }

    #[test]
    fn push_constants_carry_the_photographic_scale() {
        let mut harness = testing::harness();
        harness.frame.options.tonemapping = TonemappingMethod::PhotoLinear;
        let mut task = PostprocessingTask::new();
        let commands = harness.record(&mut task);

        let data = commands
            .iter()
            .find_map(|cmd| match cmd {
                RecordedCommand::PushConstants { data } => Some(data.clone()),
                _ => None,
            })
            .expect("no push constants");
        let constants: PostPushConstants = bytemuck::pod_read_unaligned(&data);
        let expected = harness
            .frame
            .options
            .photo_linear
            .scale(harness.frame.options.gamma);
        assert_eq!(constants.tonemap_scale, expected);
    }

    #[test]
    fn operator_changes_rebuild_the_pipeline() {
        let mut harness = testing::harness();
        let mut task = PostprocessingTask::new();
        harness.record(&mut task);
        let first = task.pipeline.unwrap().0;

        let mut options = harness.frame.options.clone();
        options.tonemapping = TonemappingMethod::Reinhard;
        harness.apply_options(&mut task, options);
        assert!(task.pipeline.is_none());

        harness.record(&mut task);
        assert_ne!(task.pipeline.unwrap().0, first);
    }

    #[test]
    fn exposure_changes_do_not_rebuild() {
        let mut harness = testing::harness();
        let mut task = PostprocessingTask::new();
        harness.record(&mut task);
        let first = task.pipeline.unwrap().0;

        let mut options = harness.frame.options.clone();
        options.exposure = 2.0;
        options.fog.max_distance = 100.0;
        harness.apply_options(&mut task, options);
        harness.record(&mut task);
        assert_eq!(task.pipeline.unwrap().0, first);
    }
}
