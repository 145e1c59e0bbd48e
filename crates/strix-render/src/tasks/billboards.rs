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

//! The forward overlay stage: everything that renders on top of the
//! resolved HDR color but still tests against the G-Buffer depth.
//!
//! That covers camera-facing billboards, translucent sprite segments,
//! unlit text, and translucent meshes. None of these write depth, so the
//! depth attachment stays in its read-only layout throughout.

use super::geometry::{GpuInstance, QuadVertex};
use super::{fatal, MeshDrawCommand, RecordContext, RendererTask};
use crate::interner::{TextureSystem, DUMMY_TEXTURE_INDEX};
use crate::manager::ResourceReleaser;
use crate::scene::types::{BillboardDraw, MeshVertex};
use crate::scene::StageDesc;
use crate::versioned::VersionedBuffer;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    BlendState, BufferUsage, ColorAttachment, CompareOp, CullMode, DepthAttachment,
    GraphicsPipelineDescriptor, ImageFormat, ImageLayout, IndexFormat, LoadOp, RenderPipelineId,
    RenderTarget, ShaderDefine, ShaderModuleDescriptor, ShaderStage, VertexLayout, VertexStepMode,
};
use strix_core::GraphicsDevice;

/// One camera-facing billboard instance; the vertex stage expands the
/// corners from the center and size.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBillboard {
    /// World-space center.
    pub position: [f32; 3],
    /// Texture table index.
    pub texture_index: u32,
    /// World-space width and height.
    pub size: [f32; 2],
    /// Picking id.
    pub entity_id: i32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct OverlayPushConstants {
    view_projection: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
}

#[derive(Debug)]
struct OverlayPipelines {
    billboards: RenderPipelineId,
    meshes: RenderPipelineId,
    quads: RenderPipelineId,
    text: RenderPipelineId,
}

impl OverlayPipelines {
    fn release(self, releaser: &ResourceReleaser) {
        for pipeline in [self.billboards, self.meshes, self.quads, self.text] {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_render_pipeline(pipeline) {
                    log::warn!("Failed to destroy overlay pipeline: {err}");
                }
            }));
        }
    }
}

/// Renders billboards and every translucent leftover into the HDR target.
pub struct BillboardsTask {
    billboards: Vec<BillboardDraw>,
    billboards_dirty: bool,
    texture_version: u64,
    instances: VersionedBuffer<GpuBillboard>,
    pipelines: Option<OverlayPipelines>,
}

impl BillboardsTask {
    pub fn new() -> Self {
        Self {
            billboards: Vec::new(),
            billboards_dirty: false,
            texture_version: 0,
            instances: VersionedBuffer::new("Billboards", BufferUsage::VERTEX),
            pipelines: None,
        }
    }

    /// Replaces the billboard snapshot.
    pub fn set_billboards(&mut self, billboards: Vec<BillboardDraw>, dirty: bool) {
        if !dirty {
            return;
        }
        self.billboards = billboards;
        self.billboards_dirty = true;
    }

    /// Releases the instance buffer and pipelines.
    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        let release = |command| releaser.submit_resource_free(command);
        self.instances.destroy(release);
        if let Some(pipelines) = self.pipelines.take() {
            pipelines.release(releaser);
        }
    }

    fn rebuild_instances(&mut self, textures: &TextureSystem) {
        let instances = self
            .billboards
            .iter()
            .map(|billboard| {
                let texture_index = billboard
                    .texture
                    .map(|guid| textures.texture_index(guid))
                    .unwrap_or(DUMMY_TEXTURE_INDEX);
                let center = billboard.transform.col(3).truncate();
                let size = [
                    billboard.transform.col(0).truncate().length(),
                    billboard.transform.col(1).truncate().length(),
                ];
                GpuBillboard {
                    position: center.to_array(),
                    texture_index,
                    size,
                    entity_id: billboard.entity_id,
                    _padding: 0,
                }
            })
            .collect();
        self.instances.set_all(instances);
    }

    fn build_pipelines(device: &dyn GraphicsDevice) -> OverlayPipelines {
        let module = |source: &str, stage, defines: &[ShaderDefine]| {
            let mut desc = ShaderModuleDescriptor::new(source, stage);
            desc.defines.extend_from_slice(defines);
            fatal(
                device.create_shader_module(&desc),
                "Failed to compile overlay shader",
            )
        };
        let color = ColorAttachment {
            format: ImageFormat::R32G32B32A32Float,
            load_op: LoadOp::Load,
            initial_layout: ImageLayout::ColorAttachment,
            final_layout: ImageLayout::ColorAttachment,
            clear_color: [0.0; 4],
            blend: Some(BlendState::ALPHA),
        };
        // Tested against the opaque scene, never written.
        let depth = DepthAttachment {
            format: ImageFormat::D32Float,
            load_op: LoadOp::Load,
            initial_layout: ImageLayout::DepthStencilReadOnly,
            final_layout: ImageLayout::DepthStencilReadOnly,
            clear_depth: 1.0,
            write_enabled: false,
            compare: CompareOp::Less,
        };
        let pipeline = |label: &'static str, vertex, fragment, layouts: Vec<VertexLayout>| {
            let desc = GraphicsPipelineDescriptor {
                label: Some(Cow::Borrowed(label)),
                fragment_shader: Some(fragment),
                vertex_layouts: layouts,
                color_attachments: vec![color.clone()],
                depth_attachment: Some(depth.clone()),
                cull_mode: CullMode::None,
                ..GraphicsPipelineDescriptor::new("", vertex)
            };
            fatal(
                device.create_render_pipeline(&desc),
                "Failed to create overlay pipeline",
            )
        };

        let instance_layout = vec![VertexLayout {
            stride: std::mem::size_of::<GpuBillboard>() as u64,
            step_mode: VertexStepMode::Instance,
        }];
        let mesh_layouts = vec![
            VertexLayout {
                stride: std::mem::size_of::<MeshVertex>() as u64,
                step_mode: VertexStepMode::Vertex,
            },
            VertexLayout {
                stride: std::mem::size_of::<GpuInstance>() as u64,
                step_mode: VertexStepMode::Instance,
            },
        ];
        let quad_layout = vec![VertexLayout {
            stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
        }];

        OverlayPipelines {
            billboards: pipeline(
                "Billboards",
                module("shaders/billboard.vert", ShaderStage::Vertex, &[]),
                module("shaders/billboard.frag", ShaderStage::Fragment, &[]),
                instance_layout,
            ),
            meshes: pipeline(
                "Forward translucent meshes",
                module("shaders/forward_mesh.vert", ShaderStage::Vertex, &[]),
                module("shaders/forward_mesh.frag", ShaderStage::Fragment, &[]),
                mesh_layouts,
            ),
            quads: pipeline(
                "Forward translucent quads",
                module("shaders/forward_quad.vert", ShaderStage::Vertex, &[]),
                module("shaders/forward_quad.frag", ShaderStage::Fragment, &[]),
                quad_layout.clone(),
            ),
            text: pipeline(
                "Unlit text",
                module("shaders/forward_quad.vert", ShaderStage::Vertex, &[]),
                module(
                    "shaders/forward_quad.frag",
                    ShaderStage::Fragment,
                    &[ShaderDefine::flag("SDF_TEXT")],
                ),
                quad_layout,
            ),
        }
    }

    /// Draws the translucent tail of a quad batch.
    fn record_quad_range(
        ctx: &mut RecordContext<'_>,
        pipeline: RenderPipelineId,
        batch: &super::QuadBatchInfo,
        first_quad: u32,
        quads: u32,
        constants: &[u8],
        target: &RenderTarget<'_>,
    ) {
        if quads == 0 {
            return;
        }
        let (Some(vertices), Some(indices)) = (batch.vertex_buffer, batch.index_buffer) else {
            return;
        };
        let mut pass = ctx.encoder.begin_render_pass(pipeline, target);
        pass.set_push_constants(constants);
        pass.set_vertex_buffer(0, vertices, 0);
        pass.set_index_buffer(indices, 0, IndexFormat::U32);
        let first = first_quad * 6;
        pass.draw_indexed(first..first + quads * 6, 0, 0..1);
    }
}

impl Default for BillboardsTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for BillboardsTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "billboards",
            inputs: &["hdr", "gbuffer", "geometry"],
            outputs: &[],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let texture_version = ctx.textures.last_updated_at_frame();
        if self.billboards_dirty || texture_version != self.texture_version {
            self.rebuild_instances(ctx.textures);
            self.billboards_dirty = false;
            self.texture_version = texture_version;
        }
        let releaser = ctx.releaser;
        self.instances
            .sync(ctx.device, ctx.encoder, false, |command| {
                releaser.submit_resource_free(command)
            });
        self.instances.drop_previous(|command| {
            releaser.submit_resource_free(command)
        });

        let pipelines = match self.pipelines.take() {
            Some(pipelines) => pipelines,
            None => Self::build_pipelines(ctx.device),
        };

        let constants = OverlayPushConstants {
            view_projection: ctx.frame.camera.view_projection.to_cols_array_2d(),
            view: ctx.frame.camera.view.to_cols_array_2d(),
        };
        let constants = bytemuck::bytes_of(&constants).to_vec();
        let hdr_colors = [ctx.frame.hdr_target];
        let target = RenderTarget {
            colors: &hdr_colors,
            depth: Some(ctx.frame.gbuffer.depth),
            extent: ctx.frame.size,
        };

        // Translucent meshes first so billboards and text blend over them.
        let translucent: Vec<MeshDrawCommand> =
            ctx.frame.geometry.translucent.draws.as_ref().clone();
        if !translucent.is_empty() {
            if let (Some(vertices), Some(indices), Some(instances)) = (
                ctx.frame.geometry.vertex_buffer,
                ctx.frame.geometry.index_buffer,
                ctx.frame.geometry.instance_buffer,
            ) {
                let mut pass = ctx.encoder.begin_render_pass(pipelines.meshes, &target);
                pass.set_push_constants(&constants);
                pass.set_vertex_buffer(0, vertices, 0);
                pass.set_vertex_buffer(1, instances, 0);
                pass.set_index_buffer(indices, 0, IndexFormat::U32);
                for draw in &translucent {
                    pass.draw_indexed(
                        draw.first_index..draw.first_index + draw.index_count,
                        draw.base_vertex,
                        draw.first_instance..draw.first_instance + draw.instance_count,
                    );
                }
            }
        }

        if !self.instances.is_empty() {
            if let Some(buffer) = self.instances.buffer() {
                let mut pass = ctx.encoder.begin_render_pass(pipelines.billboards, &target);
                pass.set_push_constants(&constants);
                pass.set_vertex_buffer(0, buffer, 0);
                pass.draw(0..6, 0..self.instances.len() as u32);
            }
        }

        let sprites = ctx.frame.geometry.sprites.clone();
        Self::record_quad_range(
            ctx,
            pipelines.quads,
            &sprites,
            sprites.opaque_quads,
            sprites.translucent_quads,
            &constants,
            &target,
        );
        let lit_text = ctx.frame.geometry.lit_text.clone();
        Self::record_quad_range(
            ctx,
            pipelines.quads,
            &lit_text,
            lit_text.opaque_quads,
            lit_text.translucent_quads,
            &constants,
            &target,
        );
        // Unlit text skips lighting entirely, opaque glyphs included.
        let unlit_text = ctx.frame.geometry.unlit_text.clone();
        Self::record_quad_range(
            ctx,
            pipelines.text,
            &unlit_text,
            0,
            unlit_text.opaque_quads + unlit_text.translucent_quads,
            &constants,
            &target,
        );

        self.pipelines = Some(pipelines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;
    use strix_core::math::{Mat4, Vec3};
    use uuid::Uuid;

    fn billboard(at: Vec3) -> BillboardDraw {
        BillboardDraw {
            texture: Some(Uuid::new_v4()),
            transform: Mat4::from_translation(at),
            entity_id: 7,
        }
    }

    #[test]
    fn billboards_draw_one_instanced_quad_pass() {
        let mut harness = testing::harness();
        let mut task = BillboardsTask::new();
        task.set_billboards(vec![billboard(Vec3::ZERO), billboard(Vec3::X)], true);
        let commands = harness.record(&mut task);

        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::Draw {
                vertices: 6,
                instances: 2
            }
        )));
        // unknown textures degrade to the dummy slot
        assert_eq!(task.instances.data()[0].texture_index, DUMMY_TEXTURE_INDEX);
    }

    #[test]
    fn billboard_size_comes_from_the_transform_scale() {
        let mut harness = testing::harness();
        let mut task = BillboardsTask::new();
        let transform =
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_scale(Vec3::new(4.0, 2.0, 1.0));
        task.set_billboards(
            vec![BillboardDraw {
                texture: None,
                transform,
                entity_id: 0,
            }],
            true,
        );
        harness.record(&mut task);

        let instance = task.instances.data()[0];
        assert_eq!(instance.position, [1.0, 2.0, 3.0]);
        assert_eq!(instance.size, [4.0, 2.0]);
    }

    #[test]
    fn empty_overlay_records_no_passes() {
        let mut harness = testing::harness();
        let mut task = BillboardsTask::new();
        let commands = harness.record(&mut task);
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. })));
    }

    #[test]
    fn overlay_passes_target_the_hdr_image_read_only_depth() {
        let mut harness = testing::harness();
        let mut task = BillboardsTask::new();
        task.set_billboards(vec![billboard(Vec3::ZERO)], true);
        let commands = harness.record(&mut task);

        let hdr = harness.frame.hdr_target;
        let depth = harness.frame.gbuffer.depth;
        let pass = commands
            .iter()
            .find_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass {
                    pipeline,
                    colors,
                    depth,
                    ..
                } => Some((*pipeline, colors.clone(), *depth)),
                _ => None,
            })
            .expect("no pass recorded");
        assert_eq!(pass.1, vec![hdr]);
        assert_eq!(pass.2, Some(depth));
        let record = harness.device.render_pipeline_record(pass.0).unwrap();
        assert_eq!(record.color_blends, vec![Some(BlendState::ALPHA)]);
    }
}
