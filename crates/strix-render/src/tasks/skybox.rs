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

//! Fills the background with the environment cubemap.
//!
//! One fullscreen triangle at the far plane, depth-tested with
//! `LessOrEqual` so only texels the geometry left untouched survive. When no
//! environment is set the shader samples the dummy black cube, which keeps
//! the binding layout stable.

use super::{fatal, RecordContext, RendererTask};
use crate::manager::ResourceReleaser;
use crate::scene::StageDesc;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    ColorAttachment, CompareOp, CullMode, DepthAttachment, GraphicsPipelineDescriptor,
    ImageFormat, ImageLayout, LoadOp, RenderPipelineId, RenderTarget, ShaderModuleDescriptor,
    ShaderStage,
};
use strix_core::GraphicsDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SkyboxPushConstants {
    /// Unprojects the fullscreen triangle into world-space view rays.
    inverse_view_projection: [[f32; 4]; 4],
}

/// Renders the environment where nothing else drew.
pub struct SkyboxTask {
    pipeline: Option<RenderPipelineId>,
}

impl SkyboxTask {
    pub fn new() -> Self {
        Self { pipeline: None }
    }

    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        if let Some(pipeline) = self.pipeline.take() {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_render_pipeline(pipeline) {
                    log::warn!("Failed to destroy skybox pipeline: {err}");
                }
            }));
        }
    }

    fn build_pipeline(device: &dyn GraphicsDevice) -> RenderPipelineId {
        let vertex = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/skybox.vert",
                ShaderStage::Vertex,
            )),
            "Failed to compile skybox shader",
        );
        let fragment = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/skybox.frag",
                ShaderStage::Fragment,
            )),
            "Failed to compile skybox shader",
        );
        let desc = GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("Skybox")),
            fragment_shader: Some(fragment),
            color_attachments: vec![ColorAttachment {
                format: ImageFormat::R32G32B32A32Float,
                load_op: LoadOp::Load,
                initial_layout: ImageLayout::ColorAttachment,
                final_layout: ImageLayout::ColorAttachment,
                clear_color: [0.0; 4],
                blend: None,
            }],
            // The triangle sits exactly at the far plane; untouched depth is
            // still at the clear value, hence LessOrEqual.
            depth_attachment: Some(DepthAttachment {
                format: ImageFormat::D32Float,
                load_op: LoadOp::Load,
                initial_layout: ImageLayout::DepthStencilReadOnly,
                final_layout: ImageLayout::DepthStencilReadOnly,
                clear_depth: 1.0,
                write_enabled: false,
                compare: CompareOp::LessOrEqual,
            }),
            cull_mode: CullMode::None,
            ..GraphicsPipelineDescriptor::new("", vertex)
        };
        fatal(
            device.create_render_pipeline(&desc),
            "Failed to create skybox pipeline",
        )
    }
}

impl Default for SkyboxTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for SkyboxTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "skybox",
            inputs: &["hdr", "gbuffer"],
            outputs: &[],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => Self::build_pipeline(ctx.device),
        };

        let constants = SkyboxPushConstants {
            inverse_view_projection: ctx
                .frame
                .camera
                .view_projection
                .inverse()
                .to_cols_array_2d(),
        };
        let colors = [ctx.frame.hdr_target];
        let target = RenderTarget {
            colors: &colors,
            depth: Some(ctx.frame.gbuffer.depth),
            extent: ctx.frame.size,
        };
        {
            let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.draw(0..3, 0..1);
        }
        self.pipeline = Some(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    #[test]
    fn skybox_draws_one_fullscreen_triangle() {
        let mut harness = testing::harness();
        let mut task = SkyboxTask::new();
        let commands = harness.record(&mut task);

        let hdr = harness.frame.hdr_target;
        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::BeginRenderPass { colors, .. } if colors == &vec![hdr]
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
    fn pipeline_loads_instead_of_clearing() {
        let mut harness = testing::harness();
        let mut task = SkyboxTask::new();
        let commands = harness.record(&mut task);
        let pipeline = commands
            .iter()
            .find_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass { pipeline, .. } => Some(*pipeline),
                _ => None,
            })
            .unwrap();
        let record = harness.device.render_pipeline_record(pipeline).unwrap();
        assert_eq!(record.color_load_ops, vec![LoadOp::Load]);
        assert_eq!(record.depth_load_op, Some(LoadOp::Load));
    }

    #[test]
    fn pipeline_is_reused_across_frames() {
        let mut harness = testing::harness();
        let mut task = SkyboxTask::new();
        harness.record(&mut task);
        let first = task.pipeline;
        harness.record(&mut task);
        assert_eq!(task.pipeline, first);
    }
}
