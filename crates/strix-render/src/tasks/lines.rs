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

//! Debug line overlay, drawn straight into the final LDR image after
//! post-processing so the lines ignore tonemapping and fog.

use super::{fatal, RecordContext, RendererTask, TaskContext};
use crate::manager::ResourceReleaser;
use crate::scene::types::DebugLine;
use crate::scene::StageDesc;
use crate::settings::SceneRendererSettings;
use crate::versioned::VersionedBuffer;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    BlendState, BufferUsage, ColorAttachment, GraphicsPipelineDescriptor, ImageFormat,
    ImageLayout, LoadOp, PrimitiveTopology, RenderPipelineId, RenderTarget,
    ShaderModuleDescriptor, ShaderStage, VertexLayout, VertexStepMode,
};
use strix_core::GraphicsDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct LineVertex {
    position: [f32; 3],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LinePushConstants {
    view_projection: [[f32; 4]; 4],
}

/// Renders the debug line list on top of everything.
pub struct RenderLinesTask {
    vertices: VersionedBuffer<LineVertex>,
    pipeline: Option<RenderPipelineId>,
    /// Width the pipeline was built with.
    line_width: f32,
}

impl RenderLinesTask {
    pub fn new() -> Self {
        Self {
            vertices: VersionedBuffer::new("Debug lines", BufferUsage::VERTEX),
            pipeline: None,
            line_width: 0.0,
        }
    }

    /// Replaces the line list snapshot.
    pub fn set_lines(&mut self, lines: &[DebugLine]) {
        let vertices = lines
            .iter()
            .flat_map(|line| {
                [
                    LineVertex {
                        position: line.start.to_array(),
                        color: line.color.to_array(),
                    },
                    LineVertex {
                        position: line.end.to_array(),
                        color: line.color.to_array(),
                    },
                ]
            })
            .collect();
        self.vertices.set_all(vertices);
    }

    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        let release = |command| releaser.submit_resource_free(command);
        self.vertices.destroy(release);
        if let Some(pipeline) = self.pipeline.take() {
            Self::release_pipeline(pipeline, releaser);
        }
    }

    fn release_pipeline(pipeline: RenderPipelineId, releaser: &ResourceReleaser) {
        releaser.submit_resource_free(Box::new(move |device| {
            if let Err(err) = device.destroy_render_pipeline(pipeline) {
                log::warn!("Failed to destroy line pipeline: {err}");
            }
        }));
    }

    fn build_pipeline(device: &dyn GraphicsDevice, line_width: f32) -> RenderPipelineId {
        let vertex = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/line.vert",
                ShaderStage::Vertex,
            )),
            "Failed to compile line shader",
        );
        let fragment = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/line.frag",
                ShaderStage::Fragment,
            )),
            "Failed to compile line shader",
        );
        let desc = GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("Debug lines")),
            fragment_shader: Some(fragment),
            vertex_layouts: vec![VertexLayout {
                stride: std::mem::size_of::<LineVertex>() as u64,
                step_mode: VertexStepMode::Vertex,
            }],
            color_attachments: vec![ColorAttachment {
                format: ImageFormat::R8G8B8A8Unorm,
                load_op: LoadOp::Load,
                initial_layout: ImageLayout::ColorAttachment,
                final_layout: ImageLayout::ColorAttachment,
                clear_color: [0.0; 4],
                blend: Some(BlendState::ALPHA),
            }],
            topology: PrimitiveTopology::LineList,
            line_width,
            ..GraphicsPipelineDescriptor::new("", vertex)
        };
        fatal(
            device.create_render_pipeline(&desc),
            "Failed to create line pipeline",
        )
    }
}

impl Default for RenderLinesTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for RenderLinesTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "lines",
            inputs: &["ldr"],
            outputs: &[],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let releaser = ctx.releaser;
        self.vertices
            .sync(ctx.device, ctx.encoder, false, |command| {
                releaser.submit_resource_free(command)
            });
        self.vertices
            .drop_previous(|command| releaser.submit_resource_free(command));
        if self.vertices.is_empty() {
            return;
        }

        let line_width = ctx.frame.options.line_width;
        let pipeline = match self.pipeline.take() {
            Some(pipeline) if self.line_width == line_width => pipeline,
            stale => {
                if let Some(old) = stale {
                    Self::release_pipeline(old, releaser);
                }
                Self::build_pipeline(ctx.device, line_width)
            }
        };
        self.line_width = line_width;

        if let Some(buffer) = self.vertices.buffer() {
            let constants = LinePushConstants {
                view_projection: ctx.frame.camera.view_projection.to_cols_array_2d(),
            };
            let colors = [ctx.frame.final_target];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: ctx.frame.size,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants));
            pass.set_vertex_buffer(0, buffer, 0);
            pass.draw(0..self.vertices.len() as u32, 0..1);
        }
        self.pipeline = Some(pipeline);
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if old.line_width != new.line_width {
            if let Some(pipeline) = self.pipeline.take() {
                Self::release_pipeline(pipeline, ctx.releaser);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;
    use strix_core::math::{Vec3, Vec4};

    fn line(from: Vec3, to: Vec3) -> DebugLine {
        DebugLine {
            start: from,
            end: to,
            color: Vec4::new(1.0, 0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn each_line_contributes_two_vertices() {
        let mut harness = testing::harness();
        let mut task = RenderLinesTask::new();
        task.set_lines(&[line(Vec3::ZERO, Vec3::X), line(Vec3::ZERO, Vec3::Y)]);
        let commands = harness.record(&mut task);

        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::Draw {
                vertices: 4,
                instances: 1
            }
        )));
        let final_target = harness.frame.final_target;
        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::BeginRenderPass { colors, .. } if colors == &vec![final_target]
        )));
    }

    #[test]
    fn no_lines_means_no_pass() {
        let mut harness = testing::harness();
        let mut task = RenderLinesTask::new();
        let commands = harness.record(&mut task);
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. })));
    }

    #[test]
    fn width_changes_rebuild_the_pipeline() {
        let mut harness = testing::harness();
        let mut task = RenderLinesTask::new();
        task.set_lines(&[line(Vec3::ZERO, Vec3::X)]);
        harness.record(&mut task);
        let first = task.pipeline;

        let mut options = harness.frame.options.clone();
        options.line_width = 5.0;
        harness.apply_options(&mut task, options);
        assert!(task.pipeline.is_none());

        harness.record(&mut task);
        assert_ne!(task.pipeline, first);
    }
}
