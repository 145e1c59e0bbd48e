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

//! Geometry batching and the G-Buffer fill.
//!
//! Collection is lazy: `set_*` only stores the snapshot and raises a dirty
//! flag, and `record` rebuilds the instanced buckets on dirty frames only.
//! Meshes batch on `(asset GUID, casts-shadows)` so identical geometry draws
//! once per bucket with per-instance transform/material/object-id data.
//! Opaque and masked draws rasterize into the G-Buffer here; the translucent
//! buckets are published for the shadow and forward stages.

use super::{
    fatal, GeometryFrameInfo, MeshBucketInfo, MeshDrawCommand, QuadBatchInfo, RecordContext,
    RendererTask, TaskContext,
};
use crate::interner::{MaterialSystem, TextureSystem, DUMMY_MATERIAL_INDEX};
use crate::material::BlendMode;
use crate::scene::types::{EntityId, MeshDraw, SpriteDraw, TextDraw};
use crate::scene::StageDesc;
use crate::settings::SceneRendererSettings;
use crate::versioned::VersionedBuffer;
use ahash::AHashMap;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use strix_core::gfx::{
    BufferUsage, ColorAttachment, CompareOp, DepthAttachment, GraphicsPipelineDescriptor,
    ImageFormat, ImageLayout, IndexFormat, LoadOp, RenderPipelineId, RenderTarget, ShaderDefine,
    ShaderModuleDescriptor, ShaderStage, VertexLayout, VertexStepMode,
};
use strix_core::math::{Mat4, Vec3};
use strix_core::GraphicsDevice;
use uuid::Uuid;

/// Per-instance vertex stream element of the mesh passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuInstance {
    /// Index into the transforms storage buffer.
    pub transform_index: u32,
    /// Index into the material storage buffer.
    pub material_index: u32,
    /// Entity id written into the object-ID attachment.
    pub entity_id: i32,
    /// std430 alignment.
    pub _padding: u32,
}

/// Vertex of the pre-transformed quad batches (sprites, glyphs, billboards).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    /// World-space position.
    pub position: [f32; 3],
    /// Texture coordinates.
    pub uv: [f32; 2],
    /// Vertex color (sprite tint or text fill).
    pub color: [f32; 4],
    /// Material index for sprites, bindless texture index for text.
    pub resource_index: u32,
    /// Entity id for picking.
    pub entity_id: i32,
}

/// Push constants shared by every G-Buffer raster pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GeometryPushConstants {
    view_projection: [[f32; 4]; 4],
    prev_view_projection: [[f32; 4]; 4],
}

/// The `0,1,2, 2,3,0` pattern for `quads` quads.
pub(crate) fn quad_indices(quads: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity(quads * 6);
    for quad in 0..quads as u32 {
        let base = quad * 4;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    indices
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MeshKey {
    guid: Uuid,
    casts_shadows: bool,
}

/// Where one mesh asset landed in the concatenated vertex/index arrays.
#[derive(Debug, Clone, Copy)]
struct MeshRange {
    base_vertex: i32,
    first_index: u32,
    index_count: u32,
}

#[derive(Debug, Default)]
struct QuadBatch {
    vertices: Vec<QuadVertex>,
    opaque_quads: u32,
    translucent_quads: u32,
    casts_shadows: bool,
}

impl QuadBatch {
    fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }
}

#[derive(Debug)]
struct GeometryPipelines {
    mesh_opaque: RenderPipelineId,
    mesh_masked: RenderPipelineId,
    quads: RenderPipelineId,
    text: RenderPipelineId,
    motion: bool,
}

fn release_pipelines(pipelines: &GeometryPipelines, releaser: &crate::manager::ResourceReleaser) {
    for pipeline in [
        pipelines.mesh_opaque,
        pipelines.mesh_masked,
        pipelines.quads,
        pipelines.text,
    ] {
        releaser.submit_resource_free(Box::new(move |device| {
            if let Err(err) = device.destroy_render_pipeline(pipeline) {
                log::warn!("Failed to destroy geometry pipeline: {err}");
            }
        }));
    }
}

/// Lays glyph quads out in em units, wrapping whole words at `max_width`,
/// then transforms them into world space.
fn layout_glyph_quads(
    draw: &TextDraw,
    font: &crate::scene::types::FontAtlas,
    texture_index: u32,
    out: &mut Vec<QuadVertex>,
) {
    let line_advance = font.line_height + draw.line_spacing;
    let color = draw.color.to_array();
    let mut cursor_y = 0.0f32;

    let word_width = |word: &str| -> f32 {
        word.chars()
            .filter_map(|ch| font.glyphs.get(&ch))
            .map(|glyph| glyph.advance + draw.kerning)
            .sum()
    };

    for paragraph in draw.text.split('\n') {
        let mut cursor_x = 0.0f32;
        for word in paragraph.split(' ') {
            if draw.max_width > 0.0 && cursor_x > 0.0 && cursor_x + word_width(word) > draw.max_width
            {
                cursor_x = 0.0;
                cursor_y -= line_advance;
            }
            for ch in word.chars() {
                let Some(glyph) = font.glyphs.get(&ch) else {
                    continue;
                };
                let x0 = cursor_x + glyph.bearing[0];
                let y1 = cursor_y + glyph.bearing[1];
                let x1 = x0 + glyph.size[0];
                let y0 = y1 - glyph.size[1];
                let corners = [
                    ([x0, y0], [glyph.uv_min[0], glyph.uv_min[1]]),
                    ([x1, y0], [glyph.uv_max[0], glyph.uv_min[1]]),
                    ([x1, y1], [glyph.uv_max[0], glyph.uv_max[1]]),
                    ([x0, y1], [glyph.uv_min[0], glyph.uv_max[1]]),
                ];
                for (position, uv) in corners {
                    let world = draw
                        .transform
                        .transform_point3(Vec3::new(position[0], position[1], 0.0));
                    out.push(QuadVertex {
                        position: world.to_array(),
                        uv,
                        color,
                        resource_index: texture_index,
                        entity_id: draw.entity_id,
                    });
                }
                cursor_x += glyph.advance + draw.kerning;
            }
            cursor_x += font.space_advance + draw.kerning;
        }
        cursor_y -= line_advance;
    }
}

/// Collects scene geometry, owns the shared GPU geometry buffers, and fills
/// the G-Buffer.
#[derive(Debug)]
pub struct GeometryManagerTask {
    meshes: Vec<MeshDraw>,
    meshes_dirty: bool,
    sprites: Vec<SpriteDraw>,
    sprites_dirty: bool,
    texts: Vec<TextDraw>,
    texts_dirty: bool,
    texture_version: u64,
    material_generation: u64,

    vertices: VersionedBuffer<crate::scene::types::MeshVertex>,
    indices: VersionedBuffer<u32>,
    instances: VersionedBuffer<GpuInstance>,
    transforms: VersionedBuffer<[[f32; 4]; 4]>,
    sprite_quads: VersionedBuffer<QuadVertex>,
    lit_text_quads: VersionedBuffer<QuadVertex>,
    unlit_text_quads: VersionedBuffer<QuadVertex>,
    quad_index_buffer: VersionedBuffer<u32>,

    entity_transform_index: AHashMap<EntityId, usize>,
    opaque: Arc<Vec<MeshDrawCommand>>,
    masked: Arc<Vec<MeshDrawCommand>>,
    translucent: Arc<Vec<MeshDrawCommand>>,
    sprite_batch: QuadBatch,
    lit_text_batch: QuadBatch,
    unlit_text_batch: QuadBatch,

    pipelines: Option<GeometryPipelines>,
}

impl GeometryManagerTask {
    pub fn new() -> Self {
        Self {
            meshes: Vec::new(),
            meshes_dirty: false,
            sprites: Vec::new(),
            sprites_dirty: false,
            texts: Vec::new(),
            texts_dirty: false,
            texture_version: 0,
            material_generation: 0,
            vertices: VersionedBuffer::new("Mesh vertices", BufferUsage::VERTEX),
            indices: VersionedBuffer::new("Mesh indices", BufferUsage::INDEX),
            instances: VersionedBuffer::new("Mesh instances", BufferUsage::VERTEX),
            transforms: VersionedBuffer::new("Mesh transforms", BufferUsage::STORAGE),
            sprite_quads: VersionedBuffer::new("Sprite quads", BufferUsage::VERTEX),
            lit_text_quads: VersionedBuffer::new("Lit text quads", BufferUsage::VERTEX),
            unlit_text_quads: VersionedBuffer::new("Unlit text quads", BufferUsage::VERTEX),
            quad_index_buffer: VersionedBuffer::new("Quad indices", BufferUsage::INDEX),
            entity_transform_index: AHashMap::new(),
            opaque: Arc::default(),
            masked: Arc::default(),
            translucent: Arc::default(),
            sprite_batch: QuadBatch::default(),
            lit_text_batch: QuadBatch::default(),
            unlit_text_batch: QuadBatch::default(),
            pipelines: None,
        }
    }

    /// Replaces the mesh snapshot. `dirty = false` keeps the current batches.
    pub fn set_meshes(&mut self, meshes: Vec<MeshDraw>, dirty: bool) {
        if !dirty {
            return;
        }
        self.meshes = meshes;
        self.meshes_dirty = true;
    }

    /// Replaces the sprite snapshot.
    pub fn set_sprites(&mut self, sprites: Vec<SpriteDraw>, dirty: bool) {
        if !dirty {
            return;
        }
        self.sprites = sprites;
        self.sprites_dirty = true;
    }

    /// Replaces the text snapshot.
    pub fn set_texts(&mut self, texts: Vec<TextDraw>, dirty: bool) {
        if !dirty {
            return;
        }
        self.texts = texts;
        self.texts_dirty = true;
    }

    /// Moves entities without re-collecting: patches individual transform
    /// slots through the sparse upload path.
    pub fn set_transforms(&mut self, updates: &[(EntityId, Mat4)]) {
        for (entity, transform) in updates {
            if let Some(&slot) = self.entity_transform_index.get(entity) {
                self.transforms
                    .update_index(slot, transform.to_cols_array_2d());
            } else {
                log::warn!("Transform update for unknown entity {entity}");
            }
        }
    }

    /// Releases every GPU buffer and pipeline this task owns.
    pub fn destroy(&mut self, releaser: &crate::manager::ResourceReleaser) {
        self.vertices.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.indices.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.instances.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.transforms.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.sprite_quads.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.lit_text_quads.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.unlit_text_quads.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.quad_index_buffer.destroy(|cmd| releaser.submit_resource_free(cmd));
        if let Some(pipelines) = self.pipelines.take() {
            release_pipelines(&pipelines, releaser);
        }
    }

    fn rebuild_meshes(&mut self, materials: &mut MaterialSystem) {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut transforms = Vec::new();
        self.entity_transform_index.clear();
        let mut ranges: AHashMap<Uuid, MeshRange> = AHashMap::new();

        // bucket -> insertion-ordered (key, instances) groups
        let mut buckets: [Vec<(MeshKey, Vec<GpuInstance>)>; 3] = Default::default();
        let mut group_index: AHashMap<(usize, MeshKey), usize> = AHashMap::new();

        for draw in &self.meshes {
            let Some(mesh) = &draw.mesh else {
                continue;
            };
            let material_index = draw
                .material
                .as_ref()
                .map(|material| materials.add_material(material))
                .unwrap_or(DUMMY_MATERIAL_INDEX);
            let bucket = match draw.material.as_ref().map(|m| m.blend_mode) {
                Some(BlendMode::Translucent) => 2,
                Some(BlendMode::Masked) => 1,
                _ => 0,
            };

            let transform_index = transforms.len();
            transforms.push(draw.transform.to_cols_array_2d());
            if draw.entity_id >= 0 {
                self.entity_transform_index
                    .insert(draw.entity_id, transform_index);
            }

            ranges.entry(mesh.guid).or_insert_with(|| {
                let range = MeshRange {
                    base_vertex: vertices.len() as i32,
                    first_index: indices.len() as u32,
                    index_count: mesh.indices.len() as u32,
                };
                vertices.extend_from_slice(&mesh.vertices);
                indices.extend_from_slice(&mesh.indices);
                range
            });

            let key = MeshKey {
                guid: mesh.guid,
                casts_shadows: draw.casts_shadows,
            };
            let instance = GpuInstance {
                transform_index: transform_index as u32,
                material_index,
                entity_id: draw.entity_id,
                _padding: 0,
            };
            match group_index.get(&(bucket, key)) {
                Some(&slot) => buckets[bucket][slot].1.push(instance),
                None => {
                    group_index.insert((bucket, key), buckets[bucket].len());
                    buckets[bucket].push((key, vec![instance]));
                }
            }
        }

        let mut instances = Vec::new();
        let mut commands: [Vec<MeshDrawCommand>; 3] = Default::default();
        for (bucket, groups) in buckets.into_iter().enumerate() {
            for (key, group) in groups {
                let range = ranges[&key.guid];
                commands[bucket].push(MeshDrawCommand {
                    index_count: range.index_count,
                    first_index: range.first_index,
                    base_vertex: range.base_vertex,
                    instance_count: group.len() as u32,
                    first_instance: instances.len() as u32,
                    casts_shadows: key.casts_shadows,
                });
                instances.extend(group);
            }
        }

        let [opaque, masked, translucent] = commands;
        self.opaque = Arc::new(opaque);
        self.masked = Arc::new(masked);
        self.translucent = Arc::new(translucent);
        self.vertices.set_all(vertices);
        self.indices.set_all(indices);
        self.instances.set_all(instances);
        self.transforms.set_all(transforms);
    }

    fn rebuild_sprites(&mut self, materials: &mut MaterialSystem) {
        let mut opaque = Vec::new();
        let mut translucent = Vec::new();
        let mut casts_shadows = false;
        const CORNERS: [([f32; 3], [f32; 2]); 4] = [
            ([-0.5, -0.5, 0.0], [0.0, 0.0]),
            ([0.5, -0.5, 0.0], [1.0, 0.0]),
            ([0.5, 0.5, 0.0], [1.0, 1.0]),
            ([-0.5, 0.5, 0.0], [0.0, 1.0]),
        ];

        for sprite in &self.sprites {
            let material_index = sprite
                .material
                .as_ref()
                .map(|material| materials.add_material(material))
                .unwrap_or(DUMMY_MATERIAL_INDEX);
            let (color, blend) = sprite
                .material
                .as_ref()
                .map(|m| (m.tint_color.to_array(), m.blend_mode))
                .unwrap_or(([1.0; 4], BlendMode::Opaque));
            let target = if blend == BlendMode::Translucent {
                &mut translucent
            } else {
                &mut opaque
            };
            casts_shadows |= sprite.casts_shadows;
            for (corner, uv) in CORNERS {
                let world = sprite.transform.transform_point3(Vec3::from_array(corner));
                target.push(QuadVertex {
                    position: world.to_array(),
                    uv,
                    color,
                    resource_index: material_index,
                    entity_id: sprite.entity_id,
                });
            }
        }

        self.sprite_batch = QuadBatch {
            opaque_quads: (opaque.len() / 4) as u32,
            translucent_quads: (translucent.len() / 4) as u32,
            casts_shadows,
            vertices: {
                let mut vertices = opaque;
                vertices.extend(translucent);
                vertices
            },
        };
        self.sprite_quads.set_all(self.sprite_batch.vertices.clone());
    }

    fn rebuild_texts(&mut self, textures: &TextureSystem) {
        let mut lit = QuadBatch::default();
        let mut unlit = QuadBatch::default();
        let mut lit_translucent = Vec::new();
        let mut unlit_translucent = Vec::new();

        for text in &self.texts {
            let Some(font) = &text.font else {
                continue;
            };
            let texture_index = textures.texture_index(font.atlas_texture);
            let batch = if text.is_lit { &mut lit } else { &mut unlit };
            batch.casts_shadows |= text.casts_shadows;
            let target = if text.blend_mode == BlendMode::Translucent {
                if text.is_lit {
                    &mut lit_translucent
                } else {
                    &mut unlit_translucent
                }
            } else {
                &mut batch.vertices
            };
            layout_glyph_quads(text, font, texture_index, target);
        }

        lit.opaque_quads = lit.quad_count() as u32;
        lit.vertices.extend(lit_translucent);
        lit.translucent_quads = lit.quad_count() as u32 - lit.opaque_quads;
        unlit.opaque_quads = unlit.quad_count() as u32;
        unlit.vertices.extend(unlit_translucent);
        unlit.translucent_quads = unlit.quad_count() as u32 - unlit.opaque_quads;

        self.lit_text_quads.set_all(lit.vertices.clone());
        self.unlit_text_quads.set_all(unlit.vertices.clone());
        self.lit_text_batch = lit;
        self.unlit_text_batch = unlit;
    }

    fn ensure_quad_indices(&mut self) {
        let quads = self
            .sprite_batch
            .quad_count()
            .max(self.lit_text_batch.quad_count())
            .max(self.unlit_text_batch.quad_count());
        if quads * 6 > self.quad_index_buffer.len() {
            self.quad_index_buffer.set_all(quad_indices(quads));
        }
    }

    fn build_pipelines(
        device: &dyn GraphicsDevice,
        motion: bool,
    ) -> GeometryPipelines {
        let module = |source: &str, stage, defines: &[ShaderDefine]| {
            let mut desc = ShaderModuleDescriptor::new(source, stage);
            desc.defines = defines.to_vec();
            fatal(
                device.create_shader_module(&desc),
                "Failed to compile G-Buffer shader",
            )
        };

        let colors = |clear: bool| -> Vec<ColorAttachment> {
            let (load_op, initial_layout) = if clear {
                (LoadOp::Clear, ImageLayout::Undefined)
            } else {
                (LoadOp::Load, ImageLayout::ColorAttachment)
            };
            let attachment = |format: ImageFormat, clear_color: [f32; 4]| ColorAttachment {
                format,
                load_op,
                initial_layout,
                final_layout: ImageLayout::ColorAttachment,
                clear_color,
                blend: None,
            };
            let mut attachments = vec![
                attachment(ImageFormat::R8G8B8A8Unorm, [0.0; 4]),
                attachment(ImageFormat::R8G8B8A8Unorm, [0.5, 0.5, 1.0, 1.0]),
                attachment(ImageFormat::R32G32B32A32Float, [0.0; 4]),
                attachment(ImageFormat::R8G8B8A8Unorm, [0.0; 4]),
                attachment(ImageFormat::R32Sint, [-1.0, 0.0, 0.0, 0.0]),
            ];
            if motion {
                attachments.push(attachment(ImageFormat::R16G16Float, [0.0; 4]));
            }
            attachments
        };
        let depth = |clear: bool| DepthAttachment {
            format: ImageFormat::D32Float,
            load_op: if clear { LoadOp::Clear } else { LoadOp::Load },
            initial_layout: if clear {
                ImageLayout::Undefined
            } else {
                ImageLayout::DepthStencilAttachment
            },
            final_layout: ImageLayout::DepthStencilAttachment,
            clear_depth: 1.0,
            write_enabled: true,
            compare: CompareOp::Less,
        };

        let mesh_layouts = vec![
            VertexLayout {
                stride: std::mem::size_of::<crate::scene::types::MeshVertex>() as u64,
                step_mode: VertexStepMode::Vertex,
            },
            VertexLayout {
                stride: std::mem::size_of::<GpuInstance>() as u64,
                step_mode: VertexStepMode::Instance,
            },
        ];
        let quad_layouts = vec![VertexLayout {
            stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
        }];

        let mesh_vert = module("shaders/gbuffer_mesh.vert", ShaderStage::Vertex, &[]);
        let mesh_frag = module("shaders/gbuffer_mesh.frag", ShaderStage::Fragment, &[]);
        let mesh_masked_frag = module(
            "shaders/gbuffer_mesh.frag",
            ShaderStage::Fragment,
            &[ShaderDefine::flag("ALPHA_MASKED")],
        );
        let quad_vert = module("shaders/gbuffer_quad.vert", ShaderStage::Vertex, &[]);
        let quad_frag = module("shaders/gbuffer_quad.frag", ShaderStage::Fragment, &[]);
        let text_frag = module(
            "shaders/gbuffer_quad.frag",
            ShaderStage::Fragment,
            &[ShaderDefine::flag("SDF_TEXT")],
        );

        let pipeline = |label: &str,
                        vertex,
                        fragment,
                        layouts: &Vec<VertexLayout>,
                        clear: bool| {
            let desc = GraphicsPipelineDescriptor {
                fragment_shader: Some(fragment),
                vertex_layouts: layouts.clone(),
                color_attachments: colors(clear),
                depth_attachment: Some(depth(clear)),
                ..GraphicsPipelineDescriptor::new(label, vertex)
            };
            fatal(
                device.create_render_pipeline(&desc),
                "Failed to create G-Buffer pipeline",
            )
        };

        GeometryPipelines {
            mesh_opaque: pipeline("GBuffer meshes", mesh_vert, mesh_frag, &mesh_layouts, true),
            mesh_masked: pipeline(
                "GBuffer masked meshes",
                mesh_vert,
                mesh_masked_frag,
                &mesh_layouts,
                false,
            ),
            quads: pipeline("GBuffer sprites", quad_vert, quad_frag, &quad_layouts, false),
            text: pipeline("GBuffer text", quad_vert, text_frag, &quad_layouts, false),
            motion,
        }
    }

    fn record_mesh_pass(
        &self,
        ctx: &mut RecordContext<'_>,
        pipeline: RenderPipelineId,
        draws: &[MeshDrawCommand],
        constants: &GeometryPushConstants,
    ) {
        let gbuffer = &ctx.frame.gbuffer;
        let mut color_images = vec![
            gbuffer.albedo_roughness,
            gbuffer.normals,
            gbuffer.emissive,
            gbuffer.material_data,
            gbuffer.object_id,
        ];
        if let Some(motion) = gbuffer.motion {
            color_images.push(motion);
        }
        let target = RenderTarget {
            colors: &color_images,
            depth: Some(gbuffer.depth),
            extent: ctx.frame.size,
        };
        // An empty pass is still recorded so a clearing pipeline resets the
        // attachments.
        let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
        if let (Some(vertices), Some(indices), Some(instances)) = (
            self.vertices.buffer(),
            self.indices.buffer(),
            self.instances.buffer(),
        ) {
            if !draws.is_empty() {
                pass.set_push_constants(bytemuck::bytes_of(constants));
                pass.set_vertex_buffer(0, vertices, 0);
                pass.set_vertex_buffer(1, instances, 0);
                pass.set_index_buffer(indices, 0, IndexFormat::U32);
                for draw in draws {
                    pass.draw_indexed(
                        draw.first_index..draw.first_index + draw.index_count,
                        draw.base_vertex,
                        draw.first_instance..draw.first_instance + draw.instance_count,
                    );
                }
            }
        }
    }

    fn record_quad_pass(
        &self,
        ctx: &mut RecordContext<'_>,
        pipeline: RenderPipelineId,
        vertex_buffer: Option<strix_core::gfx::BufferId>,
        quads: u32,
        constants: &GeometryPushConstants,
    ) {
        let (Some(vertices), Some(indices)) = (vertex_buffer, self.quad_index_buffer.buffer())
        else {
            return;
        };
        if quads == 0 {
            return;
        }
        let gbuffer = &ctx.frame.gbuffer;
        let mut color_images = vec![
            gbuffer.albedo_roughness,
            gbuffer.normals,
            gbuffer.emissive,
            gbuffer.material_data,
            gbuffer.object_id,
        ];
        if let Some(motion) = gbuffer.motion {
            color_images.push(motion);
        }
        let target = RenderTarget {
            colors: &color_images,
            depth: Some(gbuffer.depth),
            extent: ctx.frame.size,
        };
        let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
        pass.set_push_constants(bytemuck::bytes_of(constants));
        pass.set_vertex_buffer(0, vertices, 0);
        pass.set_index_buffer(indices, 0, IndexFormat::U32);
        pass.draw_indexed(0..quads * 6, 0, 0..1);
    }
}

impl Default for GeometryManagerTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for GeometryManagerTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "geometry",
            inputs: &["camera"],
            outputs: &["geometry", "gbuffer"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        // A repacked material table invalidates the indices baked into the
        // instance data, so an index-shifting repack re-buckets even a clean
        // snapshot. A repack during this frame's `update` is caught here one
        // frame later.
        let generation = ctx.materials.generation();
        if self.meshes_dirty || generation != self.material_generation {
            self.rebuild_meshes(ctx.materials);
            self.meshes_dirty = false;
        }
        if self.sprites_dirty || generation != self.material_generation {
            self.rebuild_sprites(ctx.materials);
            self.sprites_dirty = false;
        }
        self.material_generation = generation;
        let texture_version = ctx.textures.last_updated_at_frame();
        if self.texts_dirty || texture_version != self.texture_version {
            self.rebuild_texts(ctx.textures);
            self.texts_dirty = false;
            self.texture_version = texture_version;
        }
        self.ensure_quad_indices();

        let releaser = ctx.releaser;
        let motion = ctx.frame.options.optional_gbuffers.motion;
        self.vertices.sync(ctx.device, ctx.encoder, false, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        self.indices.sync(ctx.device, ctx.encoder, false, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        self.instances.sync(ctx.device, ctx.encoder, false, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        self.transforms.sync(ctx.device, ctx.encoder, motion, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        if !motion {
            self.transforms
                .drop_previous(|cmd| releaser.submit_resource_free(cmd));
        }
        self.sprite_quads.sync(ctx.device, ctx.encoder, false, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        self.lit_text_quads.sync(ctx.device, ctx.encoder, false, |cmd| {
            releaser.submit_resource_free(cmd)
        });
        self.unlit_text_quads
            .sync(ctx.device, ctx.encoder, false, |cmd| {
                releaser.submit_resource_free(cmd)
            });
        self.quad_index_buffer
            .sync(ctx.device, ctx.encoder, false, |cmd| {
                releaser.submit_resource_free(cmd)
            });

        // Everything still drawn gets re-marked every frame, so a dirty
        // update can only ever prune materials no snapshot references.
        for draw in &self.meshes {
            if let Some(material) = &draw.material {
                ctx.materials.mark_used(material.guid);
            }
        }
        for sprite in &self.sprites {
            if let Some(material) = &sprite.material {
                ctx.materials.mark_used(material.guid);
            }
        }

        // Material table upload happens here: every add_material above must
        // land before anything samples the material buffer.
        ctx.materials
            .update(ctx.device, ctx.encoder, ctx.textures, |cmd| {
                releaser.submit_resource_free(cmd)
            });

        let pipelines = match self.pipelines.take() {
            Some(pipelines) if pipelines.motion == motion => pipelines,
            stale => {
                if let Some(old) = stale {
                    release_pipelines(&old, releaser);
                }
                Self::build_pipelines(ctx.device, motion)
            }
        };
        let mesh_opaque = pipelines.mesh_opaque;
        let mesh_masked = pipelines.mesh_masked;
        let quads = pipelines.quads;
        let text = pipelines.text;
        self.pipelines = Some(pipelines);

        let constants = GeometryPushConstants {
            view_projection: ctx.frame.camera.view_projection.to_cols_array_2d(),
            prev_view_projection: ctx.frame.camera.prev_view_projection.to_cols_array_2d(),
        };

        // The opaque pass always runs: its clearing pipeline resets the
        // G-Buffer even when the scene is empty.
        let opaque = Arc::clone(&self.opaque);
        let masked = Arc::clone(&self.masked);
        self.record_mesh_pass(ctx, mesh_opaque, &opaque, &constants);
        if !masked.is_empty() {
            self.record_mesh_pass(ctx, mesh_masked, &masked, &constants);
        }
        self.record_quad_pass(
            ctx,
            quads,
            self.sprite_quads.buffer(),
            self.sprite_batch.opaque_quads,
            &constants,
        );
        self.record_quad_pass(
            ctx,
            text,
            self.lit_text_quads.buffer(),
            self.lit_text_batch.opaque_quads,
            &constants,
        );

        // Hand the G-Buffer to the compute resolve.
        for image in ctx.frame.gbuffer.all_images() {
            let (from, to) = if image == ctx.frame.gbuffer.depth {
                (
                    ImageLayout::DepthStencilAttachment,
                    ImageLayout::DepthStencilReadOnly,
                )
            } else {
                (ImageLayout::ColorAttachment, ImageLayout::ShaderReadOnly)
            };
            ctx.encoder.transition_image_layout(image, from, to);
        }

        ctx.frame.geometry = GeometryFrameInfo {
            vertex_buffer: self.vertices.buffer(),
            index_buffer: self.indices.buffer(),
            instance_buffer: self.instances.buffer(),
            transforms_buffer: self.transforms.buffer(),
            prev_transforms_buffer: self.transforms.previous_buffer(),
            opaque: MeshBucketInfo {
                draws: Arc::clone(&self.opaque),
            },
            masked: MeshBucketInfo {
                draws: Arc::clone(&self.masked),
            },
            translucent: MeshBucketInfo {
                draws: Arc::clone(&self.translucent),
            },
            sprites: QuadBatchInfo {
                vertex_buffer: self.sprite_quads.buffer(),
                index_buffer: self.quad_index_buffer.buffer(),
                opaque_quads: self.sprite_batch.opaque_quads,
                translucent_quads: self.sprite_batch.translucent_quads,
                casts_shadows: self.sprite_batch.casts_shadows,
            },
            lit_text: QuadBatchInfo {
                vertex_buffer: self.lit_text_quads.buffer(),
                index_buffer: self.quad_index_buffer.buffer(),
                opaque_quads: self.lit_text_batch.opaque_quads,
                translucent_quads: self.lit_text_batch.translucent_quads,
                casts_shadows: self.lit_text_batch.casts_shadows,
            },
            unlit_text: QuadBatchInfo {
                vertex_buffer: self.unlit_text_quads.buffer(),
                index_buffer: self.quad_index_buffer.buffer(),
                opaque_quads: self.unlit_text_batch.opaque_quads,
                translucent_quads: self.unlit_text_batch.translucent_quads,
                casts_shadows: self.unlit_text_batch.casts_shadows,
            },
        };
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if old.optional_gbuffers == new.optional_gbuffers {
            return;
        }
        // Attachment count changed; pipelines rebuild lazily on next record.
        if let Some(pipelines) = self.pipelines.take() {
            release_pipelines(&pipelines, ctx.releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::scene::types::{FontAtlas, GlyphMetrics, MeshAsset, MeshVertex};
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    fn triangle_mesh() -> Arc<MeshAsset> {
        let vertex = MeshVertex {
            position: [0.0; 3],
            normal: [0.0, 1.0, 0.0],
            tangent: [1.0, 0.0, 0.0],
            uv: [0.0; 2],
        };
        Arc::new(MeshAsset {
            guid: Uuid::new_v4(),
            vertices: vec![vertex; 3],
            indices: vec![0, 1, 2],
        })
    }

    fn mesh_draw(mesh: &Arc<MeshAsset>, material: Material) -> MeshDraw {
        MeshDraw {
            mesh: Some(Arc::clone(mesh)),
            material: Some(material),
            transform: Mat4::IDENTITY,
            entity_id: 1,
            casts_shadows: true,
        }
    }

    #[test]
    fn identical_meshes_batch_into_one_instanced_draw() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let mesh = triangle_mesh();
        let material = Material::new();
        let mut second = mesh_draw(&mesh, material.clone());
        second.entity_id = 2;
        task.set_meshes(vec![mesh_draw(&mesh, material), second], true);

        harness.record(&mut task);
        let info = &harness.frame.geometry;
        assert_eq!(info.opaque.draws.len(), 1);
        assert_eq!(info.opaque.draws[0].instance_count, 2);
        assert_eq!(info.opaque.draws[0].index_count, 3);
        // geometry deduplicated: one triangle's worth of vertices
        assert_eq!(task.vertices.len(), 3);
    }

    #[test]
    fn blend_modes_split_into_buckets() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let mesh = triangle_mesh();
        let mut masked = Material::new();
        masked.blend_mode = BlendMode::Masked;
        let mut translucent = Material::new();
        translucent.blend_mode = BlendMode::Translucent;
        task.set_meshes(
            vec![
                mesh_draw(&mesh, Material::new()),
                mesh_draw(&mesh, masked),
                mesh_draw(&mesh, translucent),
            ],
            true,
        );

        let commands = harness.record(&mut task);
        let info = &harness.frame.geometry;
        assert_eq!(info.opaque.draws.len(), 1);
        assert_eq!(info.masked.draws.len(), 1);
        assert_eq!(info.translucent.draws.len(), 1);

        // translucent draws stay out of the G-Buffer: opaque + masked passes
        let passes = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. }))
            .count();
        assert_eq!(passes, 2);
    }

    #[test]
    fn materials_resolve_to_non_dummy_indices() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let mesh = triangle_mesh();
        let material = Material::new();
        let guid = material.guid;
        task.set_meshes(vec![mesh_draw(&mesh, material)], true);

        harness.record(&mut task);
        assert_ne!(harness.materials.material_index(guid), 0);
    }

    #[test]
    fn clean_frames_upload_nothing() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let mesh = triangle_mesh();
        task.set_meshes(vec![mesh_draw(&mesh, Material::new())], true);

        harness.record(&mut task);
        let second = harness.record(&mut task);
        assert!(
            !second
                .iter()
                .any(|cmd| matches!(cmd, RecordedCommand::WriteBuffer { .. })),
            "clean frame re-uploaded geometry"
        );
    }

    #[test]
    fn transform_updates_patch_one_slot() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let mesh = triangle_mesh();
        let mut first = mesh_draw(&mesh, Material::new());
        first.entity_id = 7;
        let mut second = mesh_draw(&mesh, Material::new());
        second.entity_id = 8;
        task.set_meshes(vec![first, second], true);
        harness.record(&mut task);

        task.set_transforms(&[(8, Mat4::from_translation(Vec3::X))]);
        let commands = harness.record(&mut task);
        let writes: Vec<(u64, u64)> = commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::WriteBuffer { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![(64, 64)]);
    }

    #[test]
    fn empty_scene_still_records_the_clearing_pass() {
        let mut harness = testing::harness();
        let mut task = GeometryManagerTask::new();
        let commands = harness.record(&mut task);
        let passes = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. }))
            .count();
        assert_eq!(passes, 1);
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::DrawIndexed { .. })));
        assert!(harness.frame.geometry.opaque.is_empty());
    }

    #[test]
    fn text_wraps_whole_words() {
        let glyph = GlyphMetrics {
            uv_min: [0.0; 2],
            uv_max: [0.1; 2],
            size: [0.5, 1.0],
            bearing: [0.0, 1.0],
            advance: 0.6,
        };
        let mut glyphs = AHashMap::new();
        glyphs.insert('a', glyph);
        let font = FontAtlas {
            guid: Uuid::new_v4(),
            atlas_texture: Uuid::new_v4(),
            line_height: 1.2,
            space_advance: 0.3,
            glyphs,
        };
        let draw = TextDraw {
            font: None,
            text: "aa aa".into(),
            transform: Mat4::IDENTITY,
            color: strix_core::math::Vec4::ONE,
            max_width: 1.5,
            kerning: 0.0,
            line_spacing: 0.0,
            blend_mode: BlendMode::Opaque,
            is_lit: true,
            casts_shadows: false,
            entity_id: -1,
        };

        let mut quads = Vec::new();
        layout_glyph_quads(&draw, &font, 3, &mut quads);
        assert_eq!(quads.len(), 16);
        // second word wrapped: its first vertex starts back at x = 0, one
        // line lower
        let first = quads[0].position;
        let wrapped = quads[8].position;
        assert_eq!(wrapped[0], first[0]);
        assert!(wrapped[1] < first[1]);
    }
}
