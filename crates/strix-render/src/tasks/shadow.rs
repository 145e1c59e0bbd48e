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

//! The shadow pass: one depth map per shadow-casting light, sized by camera
//! distance, rendered in Opaque → Masked → Translucent order per target.
//!
//! The first category drawn into a target uses the clearing pipeline
//! variant, every later one the loading variant; a per-frame [`ClearState`]
//! tracks which attachments have been cleared so the selection is explicit
//! instead of threaded through flags between methods. Targets no category
//! touched are force-cleared at the end of the pass so stale depth never
//! leaks into the resolve. Point lights render all six cube faces in one
//! multiview pass.

use super::geometry::{GpuInstance, QuadVertex};
use super::{
    fatal, MeshDrawCommand, QuadBatchInfo, RecordContext, RendererTask, ShadowFrameInfo,
    TaskContext,
};
use crate::config::{CASCADES_COUNT, MIN_SHADOW_MAP_SIZE};
use crate::manager::ResourceReleaser;
use crate::scene::types::MeshVertex;
use crate::scene::StageDesc;
use crate::settings::{SceneRendererSettings, ShadowSettings};
use ahash::AHashSet;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::sync::Arc;
use strix_core::gfx::{
    BlendState, BufferId, ColorAttachment, CompareOp, CullMode, DepthAttachment,
    GraphicsPipelineDescriptor, ImageDescriptor, ImageFormat, ImageId, ImageKind, ImageLayout,
    ImageUsage, IndexFormat, LoadOp, RenderPipelineId, RenderTarget, ShaderDefine,
    ShaderModuleDescriptor, ShaderModuleId, ShaderStage, VertexLayout, VertexStepMode,
};
use strix_core::math::{Extent2D, Extent3D, Vec3};
use strix_core::GraphicsDevice;

/// Shadow map resolution for a point light at `distance` from the camera:
/// halved for every 10% of `max_distance`, never below
/// [`MIN_SHADOW_MAP_SIZE`].
pub fn point_light_shadow_map_size(base: u32, distance: f32, max_distance: f32) -> u32 {
    shadow_map_lod(base, distance, max_distance, 0.1)
}

/// Spot lights degrade slower: halved per 25% of `max_distance`.
pub fn spot_light_shadow_map_size(base: u32, distance: f32, max_distance: f32) -> u32 {
    shadow_map_lod(base, distance, max_distance, 0.25)
}

fn shadow_map_lod(base: u32, distance: f32, max_distance: f32, step_fraction: f32) -> u32 {
    if max_distance <= 0.0 {
        return base.max(MIN_SHADOW_MAP_SIZE);
    }
    let halvings = (distance.max(0.0) / (max_distance * step_fraction)) as u32;
    (base >> halvings.min(31)).max(MIN_SHADOW_MAP_SIZE)
}

/// Which attachments have been cleared this frame. The first draw category
/// into a target clears it, later ones load.
#[derive(Debug, Default)]
struct ClearState {
    cleared: AHashSet<ImageId>,
}

impl ClearState {
    /// Variant index for the next pass into `image`: 0 clears, 1 loads.
    fn variant(&mut self, image: ImageId) -> usize {
        usize::from(!self.cleared.insert(image))
    }

    fn was_cleared(&self, image: ImageId) -> bool {
        self.cleared.contains(&image)
    }
}

/// Push constants of the single-view (directional cascade / spot) passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShadowViewConstants {
    view_projection: [[f32; 4]; 4],
}

/// Push constants of the multiview point-light pass; the vertex stage reads
/// the six face matrices from the point-light storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PointShadowConstants {
    light_index: u32,
    _padding: [u32; 3],
}

/// What one shadow target should look like this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotSpec {
    size: u32,
    cube: bool,
    transmittance: bool,
    min_depth: bool,
}

/// One light's shadow target. `allocated == false` means `depth` is the
/// shared dummy image.
#[derive(Debug, Clone, Copy)]
struct ShadowSlot {
    depth: ImageId,
    transmittance: Option<ImageId>,
    min_depth: Option<ImageId>,
    size: u32,
    allocated: bool,
}

impl ShadowSlot {
    fn dummy(depth: ImageId) -> Self {
        Self {
            depth,
            transmittance: None,
            min_depth: None,
            size: 0,
            allocated: false,
        }
    }
}

fn release_image(releaser: &ResourceReleaser, image: ImageId) {
    releaser.submit_resource_free(Box::new(move |device| {
        if let Err(err) = device.destroy_image(image) {
            log::warn!("Failed to destroy shadow map: {err}");
        }
    }));
}

/// Swaps the slot back to the dummy first, then queues the old images into
/// the release ring: a consumer holding last frame's handle keeps sampling
/// valid memory until the ring retires.
fn reset_slot(slot: &mut ShadowSlot, dummy: ImageId, releaser: &ResourceReleaser) {
    if slot.allocated {
        release_image(releaser, slot.depth);
    }
    if let Some(image) = slot.transmittance.take() {
        release_image(releaser, image);
    }
    if let Some(image) = slot.min_depth.take() {
        release_image(releaser, image);
    }
    *slot = ShadowSlot::dummy(dummy);
}

fn sync_slot(
    slot: &mut ShadowSlot,
    desired: Option<SlotSpec>,
    dummy: ImageId,
    device: &dyn GraphicsDevice,
    releaser: &ResourceReleaser,
    label: &str,
) {
    let up_to_date = match desired {
        Some(spec) => {
            slot.allocated
                && slot.size == spec.size
                && slot.transmittance.is_some() == spec.transmittance
                && slot.min_depth.is_some() == spec.min_depth
        }
        None => !slot.allocated,
    };
    if up_to_date {
        return;
    }
    reset_slot(slot, dummy, releaser);
    let Some(spec) = desired else {
        return;
    };

    let (kind, layers) = if spec.cube {
        (ImageKind::Cube, 6)
    } else {
        (ImageKind::D2, 1)
    };
    let image = |format: ImageFormat, usage: ImageUsage, suffix: &str| {
        fatal(
            device.create_image(&ImageDescriptor {
                label: Some(Cow::Owned(format!("{label}{suffix}"))),
                kind,
                format,
                extent: Extent3D::new(spec.size, spec.size, layers),
                mip_levels: 1,
                usage,
            }),
            "Failed to create shadow map",
        )
    };
    slot.depth = image(
        ImageFormat::D32Float,
        ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
        "",
    );
    if spec.transmittance {
        slot.transmittance = Some(image(
            ImageFormat::R8G8B8A8Unorm,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            " transmittance",
        ));
    }
    if spec.min_depth {
        slot.min_depth = Some(image(
            ImageFormat::R32Float,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            " min depth",
        ));
    }
    slot.size = spec.size;
    slot.allocated = true;
}

fn resize_slots(
    slots: &mut Vec<ShadowSlot>,
    count: usize,
    dummy: ImageId,
    releaser: &ResourceReleaser,
) {
    while slots.len() > count {
        if let Some(mut slot) = slots.pop() {
            reset_slot(&mut slot, dummy, releaser);
        }
    }
    while slots.len() < count {
        slots.push(ShadowSlot::dummy(dummy));
    }
}

/// Clear/load pipeline variant pairs for one light kind (single-view or
/// six-view multiview).
#[derive(Debug)]
struct ShadowPipelines {
    mesh_opaque: [RenderPipelineId; 2],
    mesh_masked: [RenderPipelineId; 2],
    quad_masked: [RenderPipelineId; 2],
    mesh_translucent: Option<[RenderPipelineId; 2]>,
    quad_translucent: Option<[RenderPipelineId; 2]>,
}

impl ShadowPipelines {
    fn all(&self) -> Vec<RenderPipelineId> {
        let mut ids = Vec::new();
        for pair in [&self.mesh_opaque, &self.mesh_masked, &self.quad_masked] {
            ids.extend_from_slice(pair.as_slice());
        }
        for pair in [&self.mesh_translucent, &self.quad_translucent]
            .into_iter()
            .flatten()
        {
            ids.extend_from_slice(pair.as_slice());
        }
        ids
    }

    /// Releases just the translucent pairs; the depth-only pipelines do not
    /// bake any translucent setting.
    fn release_translucent(&mut self, releaser: &ResourceReleaser) {
        for pair in [self.mesh_translucent.take(), self.quad_translucent.take()]
            .into_iter()
            .flatten()
        {
            for pipeline in pair {
                releaser.submit_resource_free(Box::new(move |device| {
                    if let Err(err) = device.destroy_render_pipeline(pipeline) {
                        log::warn!("Failed to destroy shadow pipeline: {err}");
                    }
                }));
            }
        }
    }
}

#[derive(Debug)]
struct ShadowPipelineSet {
    single: ShadowPipelines,
    point: ShadowPipelines,
}

impl ShadowPipelineSet {
    fn release(self, releaser: &ResourceReleaser) {
        for pipeline in self.single.all().into_iter().chain(self.point.all()) {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_render_pipeline(pipeline) {
                    log::warn!("Failed to destroy shadow pipeline: {err}");
                }
            }));
        }
    }

    /// Swaps in fresh translucent pipelines after the settings they bake
    /// changed, leaving the opaque and masked pipelines untouched.
    fn refresh_translucent(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &ShadowSettings,
        releaser: &ResourceReleaser,
    ) {
        for (pipelines, views) in [(&mut self.single, 1), (&mut self.point, 6)] {
            pipelines.release_translucent(releaser);
            let (mesh, quad) = ShadowPassTask::build_translucent(device, settings, views);
            pipelines.mesh_translucent = mesh;
            pipelines.quad_translucent = quad;
        }
    }
}

/// Renders every shadow map.
#[derive(Debug)]
pub struct ShadowPassTask {
    pipelines: Option<ShadowPipelineSet>,
    settings: ShadowSettings,
    directional: Vec<ShadowSlot>,
    points: Vec<ShadowSlot>,
    spots: Vec<ShadowSlot>,
}

impl ShadowPassTask {
    pub fn new() -> Self {
        Self {
            pipelines: None,
            settings: ShadowSettings::default(),
            directional: Vec::new(),
            points: Vec::new(),
            spots: Vec::new(),
        }
    }

    /// Releases every owned pipeline and shadow map.
    pub fn destroy(&mut self, dummy2d: ImageId, dummy_cube: ImageId, releaser: &ResourceReleaser) {
        if let Some(set) = self.pipelines.take() {
            set.release(releaser);
        }
        for slot in &mut self.directional {
            reset_slot(slot, dummy2d, releaser);
        }
        for slot in &mut self.spots {
            reset_slot(slot, dummy2d, releaser);
        }
        for slot in &mut self.points {
            reset_slot(slot, dummy_cube, releaser);
        }
    }

    fn build_pipelines(device: &dyn GraphicsDevice, settings: &ShadowSettings) -> ShadowPipelineSet {
        ShadowPipelineSet {
            single: Self::build_kind(device, settings, 1),
            point: Self::build_kind(device, settings, 6),
        }
    }

    fn shadow_module(
        device: &dyn GraphicsDevice,
        source: &'static str,
        stage: ShaderStage,
        views: u32,
        extra: &[ShaderDefine],
    ) -> ShaderModuleId {
        let mut desc = ShaderModuleDescriptor::new(source, stage);
        if views > 1 {
            desc = desc.with_define(ShaderDefine::flag("CUBE_FACES"));
        }
        desc.defines.extend_from_slice(extra);
        fatal(
            device.create_shader_module(&desc),
            "Failed to compile shadow shader",
        )
    }

    fn depth_state(clear: bool, write_enabled: bool) -> DepthAttachment {
        DepthAttachment {
            format: ImageFormat::D32Float,
            load_op: if clear { LoadOp::Clear } else { LoadOp::Load },
            initial_layout: if clear {
                ImageLayout::Undefined
            } else {
                ImageLayout::DepthStencilAttachment
            },
            final_layout: ImageLayout::DepthStencilAttachment,
            clear_depth: 1.0,
            write_enabled,
            compare: CompareOp::Less,
        }
    }

    fn mesh_vertex_layouts() -> Vec<VertexLayout> {
        vec![
            VertexLayout {
                stride: std::mem::size_of::<MeshVertex>() as u64,
                step_mode: VertexStepMode::Vertex,
            },
            VertexLayout {
                stride: std::mem::size_of::<GpuInstance>() as u64,
                step_mode: VertexStepMode::Instance,
            },
        ]
    }

    fn quad_vertex_layouts() -> Vec<VertexLayout> {
        vec![VertexLayout {
            stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
        }]
    }

    fn build_kind(
        device: &dyn GraphicsDevice,
        settings: &ShadowSettings,
        views: u32,
    ) -> ShadowPipelines {
        let mesh_vert =
            Self::shadow_module(device, "shaders/shadow_mesh.vert", ShaderStage::Vertex, views, &[]);
        let masked_frag = Self::shadow_module(
            device,
            "shaders/shadow_mesh.frag",
            ShaderStage::Fragment,
            views,
            &[ShaderDefine::flag("ALPHA_MASKED")],
        );
        let quad_vert =
            Self::shadow_module(device, "shaders/shadow_quad.vert", ShaderStage::Vertex, views, &[]);
        let quad_frag =
            Self::shadow_module(device, "shaders/shadow_quad.frag", ShaderStage::Fragment, views, &[]);
        let mesh_layouts = Self::mesh_vertex_layouts();
        let quad_layouts = Self::quad_vertex_layouts();

        let variants = |label: &str, vertex, fragment: Option<_>, layouts: &Vec<VertexLayout>, cull| {
            [false, true].map(|load| {
                let desc = GraphicsPipelineDescriptor {
                    label: Some(Cow::Owned(format!("{label} ({views} views)"))),
                    fragment_shader: fragment,
                    vertex_layouts: layouts.clone(),
                    depth_attachment: Some(Self::depth_state(!load, true)),
                    cull_mode: cull,
                    view_count: views,
                    ..GraphicsPipelineDescriptor::new("", vertex)
                };
                fatal(
                    device.create_render_pipeline(&desc),
                    "Failed to create shadow pipeline",
                )
            })
        };

        let (mesh_translucent, quad_translucent) = Self::build_translucent(device, settings, views);
        ShadowPipelines {
            mesh_opaque: variants("Shadow meshes", mesh_vert, None, &mesh_layouts, CullMode::Front),
            mesh_masked: variants(
                "Shadow masked meshes",
                mesh_vert,
                Some(masked_frag),
                &mesh_layouts,
                CullMode::Front,
            ),
            quad_masked: variants(
                "Shadow quads",
                quad_vert,
                Some(quad_frag),
                &quad_layouts,
                CullMode::None,
            ),
            mesh_translucent,
            quad_translucent,
        }
    }

    /// Builds only the translucent-caster pipelines, the subset keyed off
    /// `translucent_shadows` and `volumetric_light`. Shader modules come from
    /// the device's cache, so requesting the vertex stages again is cheap.
    #[allow(clippy::type_complexity)]
    fn build_translucent(
        device: &dyn GraphicsDevice,
        settings: &ShadowSettings,
        views: u32,
    ) -> (Option<[RenderPipelineId; 2]>, Option<[RenderPipelineId; 2]>) {
        if !settings.translucent_shadows {
            return (None, None);
        }
        let extra: Vec<ShaderDefine> = if settings.volumetric_light {
            vec![ShaderDefine::flag("VOLUMETRIC_MIN_DEPTH")]
        } else {
            Vec::new()
        };
        let frag = Self::shadow_module(
            device,
            "shaders/shadow_translucent.frag",
            ShaderStage::Fragment,
            views,
            &extra,
        );

        // Transmittance starts at full transmission and overlapping casters
        // multiply into it; the optional min-depth attachment keeps the
        // nearest translucent surface for volumetric scattering.
        let colors = |clear: bool| {
            let (load_op, initial_layout) = if clear {
                (LoadOp::Clear, ImageLayout::Undefined)
            } else {
                (LoadOp::Load, ImageLayout::ColorAttachment)
            };
            let mut colors = vec![ColorAttachment {
                format: ImageFormat::R8G8B8A8Unorm,
                load_op,
                initial_layout,
                final_layout: ImageLayout::ColorAttachment,
                clear_color: [1.0; 4],
                blend: Some(BlendState::MULTIPLY),
            }];
            if settings.volumetric_light {
                colors.push(ColorAttachment {
                    format: ImageFormat::R32Float,
                    load_op,
                    initial_layout,
                    final_layout: ImageLayout::ColorAttachment,
                    clear_color: [1.0; 4],
                    blend: Some(BlendState::MIN),
                });
            }
            colors
        };
        let build = |label: &str, vertex, layouts: &Vec<VertexLayout>| {
            [false, true].map(|load| {
                let desc = GraphicsPipelineDescriptor {
                    label: Some(Cow::Owned(format!("{label} ({views} views)"))),
                    fragment_shader: Some(frag),
                    vertex_layouts: layouts.clone(),
                    color_attachments: colors(!load),
                    depth_attachment: Some(Self::depth_state(false, false)),
                    cull_mode: CullMode::None,
                    view_count: views,
                    ..GraphicsPipelineDescriptor::new("", vertex)
                };
                fatal(
                    device.create_render_pipeline(&desc),
                    "Failed to create shadow pipeline",
                )
            })
        };

        let mesh_vert =
            Self::shadow_module(device, "shaders/shadow_mesh.vert", ShaderStage::Vertex, views, &[]);
        let quad_vert =
            Self::shadow_module(device, "shaders/shadow_quad.vert", ShaderStage::Vertex, views, &[]);
        (
            Some(build(
                "Shadow translucent meshes",
                mesh_vert,
                &Self::mesh_vertex_layouts(),
            )),
            Some(build(
                "Shadow translucent quads",
                quad_vert,
                &Self::quad_vertex_layouts(),
            )),
        )
    }

    /// Records every draw category into one shadow target.
    fn record_target(
        ctx: &mut RecordContext<'_>,
        pipelines: &ShadowPipelines,
        slot: &ShadowSlot,
        constants: &[u8],
        clear_state: &mut ClearState,
    ) {
        let extent = Extent2D::new(slot.size, slot.size);
        let mesh_buffers = (
            ctx.frame.geometry.vertex_buffer,
            ctx.frame.geometry.index_buffer,
            ctx.frame.geometry.instance_buffer,
        );

        let opaque: Vec<MeshDrawCommand> = ctx
            .frame
            .geometry
            .opaque
            .draws
            .iter()
            .filter(|draw| draw.casts_shadows)
            .copied()
            .collect();
        let masked: Vec<MeshDrawCommand> = ctx
            .frame
            .geometry
            .masked
            .draws
            .iter()
            .filter(|draw| draw.casts_shadows)
            .copied()
            .collect();
        let translucent: Vec<MeshDrawCommand> = ctx
            .frame
            .geometry
            .translucent
            .draws
            .iter()
            .filter(|draw| draw.casts_shadows)
            .copied()
            .collect();
        let quad_batches = [
            ctx.frame.geometry.sprites.clone(),
            ctx.frame.geometry.lit_text.clone(),
            ctx.frame.geometry.unlit_text.clone(),
        ];

        #[allow(clippy::type_complexity)]
        fn mesh_pass(
            ctx: &mut RecordContext<'_>,
            pipeline: RenderPipelineId,
            draws: &[MeshDrawCommand],
            buffers: (Option<BufferId>, Option<BufferId>, Option<BufferId>),
            depth: ImageId,
            extent: Extent2D,
            constants: &[u8],
        ) {
            let (Some(vertices), Some(indices), Some(instances)) = buffers else {
                return;
            };
            let target = RenderTarget {
                colors: &[],
                depth: Some(depth),
                extent,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
            pass.set_push_constants(constants);
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

        if !opaque.is_empty() {
            let variant = clear_state.variant(slot.depth);
            mesh_pass(
                ctx,
                pipelines.mesh_opaque[variant],
                &opaque,
                mesh_buffers,
                slot.depth,
                extent,
                constants,
            );
        }
        if !masked.is_empty() {
            let variant = clear_state.variant(slot.depth);
            mesh_pass(
                ctx,
                pipelines.mesh_masked[variant],
                &masked,
                mesh_buffers,
                slot.depth,
                extent,
                constants,
            );
        }

        for batch in &quad_batches {
            if !batch.casts_shadows || batch.opaque_quads == 0 {
                continue;
            }
            let (Some(vertices), Some(indices)) = (batch.vertex_buffer, batch.index_buffer)
            else {
                continue;
            };
            let variant = clear_state.variant(slot.depth);
            let target = RenderTarget {
                colors: &[],
                depth: Some(slot.depth),
                extent,
            };
            let mut pass = ctx
                .encoder
                .begin_render_pass(pipelines.quad_masked[variant], &target);
            pass.set_push_constants(constants);
            pass.set_vertex_buffer(0, vertices, 0);
            pass.set_index_buffer(indices, 0, IndexFormat::U32);
            pass.draw_indexed(0..batch.opaque_quads * 6, 0, 0..1);
        }

        // Translucent casters write transmittance, not depth.
        let Some(transmittance) = slot.transmittance else {
            return;
        };
        let translucent_quads: Vec<QuadBatchInfo> = quad_batches
            .iter()
            .filter(|batch| batch.casts_shadows && batch.translucent_quads > 0)
            .cloned()
            .collect();
        if translucent.is_empty() && translucent_quads.is_empty() {
            return;
        }
        // The translucent pipelines load depth, so the target must have been
        // cleared even if no solid caster touched it.
        if !clear_state.was_cleared(slot.depth) {
            let variant = clear_state.variant(slot.depth);
            let target = RenderTarget {
                colors: &[],
                depth: Some(slot.depth),
                extent,
            };
            let _pass = ctx
                .encoder
                .begin_render_pass(pipelines.mesh_opaque[variant], &target);
        }
        let mut colors = vec![transmittance];
        colors.extend(slot.min_depth);
        let target = RenderTarget {
            colors: &colors,
            depth: Some(slot.depth),
            extent,
        };

        if !translucent.is_empty() {
            if let (Some(pair), (Some(vertices), Some(indices), Some(instances))) =
                (&pipelines.mesh_translucent, mesh_buffers)
            {
                let variant = clear_state.variant(transmittance);
                let mut pass = ctx.encoder.begin_render_pass(pair[variant], &target);
                pass.set_push_constants(constants);
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
        for batch in &translucent_quads {
            let (Some(pair), Some(vertices), Some(indices)) = (
                &pipelines.quad_translucent,
                batch.vertex_buffer,
                batch.index_buffer,
            ) else {
                continue;
            };
            let variant = clear_state.variant(transmittance);
            let mut pass = ctx.encoder.begin_render_pass(pair[variant], &target);
            pass.set_push_constants(constants);
            pass.set_vertex_buffer(0, vertices, 0);
            pass.set_index_buffer(indices, 0, IndexFormat::U32);
            let first = batch.opaque_quads * 6;
            pass.draw_indexed(first..first + batch.translucent_quads * 6, 0, 0..1);
        }
    }

    /// Force-clears targets nothing drew into and hands every allocated map
    /// to the resolve stage.
    fn finalize_slot(
        ctx: &mut RecordContext<'_>,
        pipelines: &ShadowPipelineSet,
        slot: &ShadowSlot,
        cube: bool,
        clear_state: &mut ClearState,
    ) {
        if !slot.allocated {
            return;
        }
        let kind = if cube { &pipelines.point } else { &pipelines.single };
        let extent = Extent2D::new(slot.size, slot.size);
        if !clear_state.was_cleared(slot.depth) {
            let variant = clear_state.variant(slot.depth);
            let target = RenderTarget {
                colors: &[],
                depth: Some(slot.depth),
                extent,
            };
            let _pass = ctx
                .encoder
                .begin_render_pass(kind.mesh_opaque[variant], &target);
        }
        if let (Some(transmittance), Some(pair)) = (slot.transmittance, &kind.mesh_translucent) {
            if !clear_state.was_cleared(transmittance) {
                let variant = clear_state.variant(transmittance);
                let mut colors = vec![transmittance];
                colors.extend(slot.min_depth);
                let target = RenderTarget {
                    colors: &colors,
                    depth: Some(slot.depth),
                    extent,
                };
                let _pass = ctx.encoder.begin_render_pass(pair[variant], &target);
            }
        }

        ctx.encoder.transition_image_layout(
            slot.depth,
            ImageLayout::DepthStencilAttachment,
            ImageLayout::DepthStencilReadOnly,
        );
        for image in slot.transmittance.into_iter().chain(slot.min_depth) {
            ctx.encoder.transition_image_layout(
                image,
                ImageLayout::ColorAttachment,
                ImageLayout::ShaderReadOnly,
            );
        }
    }
}

impl Default for ShadowPassTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for ShadowPassTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "shadows",
            inputs: &["lights", "geometry"],
            outputs: &["shadow_maps"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let shadows = ctx.frame.options.shadows;
        let releaser = ctx.releaser;
        let dummy2d = ctx.frame.dummy.depth_image;
        let dummy_cube = ctx.frame.dummy.cube_depth_image;
        let white = ctx.frame.dummy.white_image;

        // Only the translucent settings are baked into pipeline state; size
        // changes re-spec the maps below without touching pipelines.
        let pipelines = match self.pipelines.take() {
            Some(mut set) => {
                if self.settings.translucent_shadows != shadows.translucent_shadows
                    || self.settings.volumetric_light != shadows.volumetric_light
                {
                    log::debug!("Rebuilding the translucent shadow pipelines");
                    set.refresh_translucent(ctx.device, &shadows, releaser);
                }
                set
            }
            None => {
                log::debug!("Building shadow pipelines");
                Self::build_pipelines(ctx.device, &shadows)
            }
        };
        self.settings = shadows;

        let spec = |size: u32, cube: bool| SlotSpec {
            size,
            cube,
            transmittance: shadows.translucent_shadows,
            min_depth: shadows.translucent_shadows && shadows.volumetric_light,
        };

        // Allocate / retire targets.
        let directional_casts = ctx
            .frame
            .lights
            .directional
            .map(|light| light.casts_shadows())
            .unwrap_or(false);
        resize_slots(&mut self.directional, CASCADES_COUNT, dummy2d, releaser);
        for (cascade, slot) in self.directional.iter_mut().enumerate() {
            let size = if cascade == 0 {
                shadows.dir_light_size * 2
            } else {
                shadows.dir_light_size
            };
            let desired = directional_casts.then(|| spec(size, false));
            sync_slot(slot, desired, dummy2d, ctx.device, releaser, "Cascade shadow map");
        }

        let view_position = ctx.frame.camera.view_position;
        let max_distance = ctx.frame.camera.max_shadow_distance;
        let point_lights = Arc::clone(&ctx.frame.lights.point_lights);
        resize_slots(&mut self.points, point_lights.len(), dummy_cube, releaser);
        for (slot, light) in self.points.iter_mut().zip(point_lights.iter()) {
            let desired = light.casts_shadows().then(|| {
                let distance = (light.position() - view_position).length();
                spec(
                    point_light_shadow_map_size(shadows.point_light_size, distance, max_distance),
                    true,
                )
            });
            sync_slot(slot, desired, dummy_cube, ctx.device, releaser, "Point shadow map");
        }

        let spot_lights = Arc::clone(&ctx.frame.lights.spot_lights);
        resize_slots(&mut self.spots, spot_lights.len(), dummy2d, releaser);
        for (slot, light) in self.spots.iter_mut().zip(spot_lights.iter()) {
            let desired = light.casts_shadows().then(|| {
                let distance = (light.position() - view_position).length();
                spec(
                    spot_light_shadow_map_size(shadows.spot_light_size, distance, max_distance),
                    false,
                )
            });
            sync_slot(slot, desired, dummy2d, ctx.device, releaser, "Spot shadow map");
        }

        // Draw.
        let mut clear_state = ClearState::default();
        if let Some(directional) = ctx.frame.lights.directional {
            if directional.casts_shadows() {
                for (cascade, slot) in self.directional.iter().enumerate() {
                    let constants = ShadowViewConstants {
                        view_projection: directional.cascade_view_projections[cascade],
                    };
                    Self::record_target(
                        ctx,
                        &pipelines.single,
                        slot,
                        bytemuck::bytes_of(&constants),
                        &mut clear_state,
                    );
                }
            }
        }
        for (index, slot) in self.points.iter().enumerate() {
            if !point_lights[index].casts_shadows() {
                continue;
            }
            let constants = PointShadowConstants {
                light_index: index as u32,
                _padding: [0; 3],
            };
            Self::record_target(
                ctx,
                &pipelines.point,
                slot,
                bytemuck::bytes_of(&constants),
                &mut clear_state,
            );
        }
        for (index, slot) in self.spots.iter().enumerate() {
            if !spot_lights[index].casts_shadows() {
                continue;
            }
            let constants = ShadowViewConstants {
                view_projection: spot_lights[index].view_projection,
            };
            Self::record_target(
                ctx,
                &pipelines.single,
                slot,
                bytemuck::bytes_of(&constants),
                &mut clear_state,
            );
        }

        for slot in &self.directional {
            Self::finalize_slot(ctx, &pipelines, slot, false, &mut clear_state);
        }
        for slot in &self.points {
            Self::finalize_slot(ctx, &pipelines, slot, true, &mut clear_state);
        }
        for slot in &self.spots {
            Self::finalize_slot(ctx, &pipelines, slot, false, &mut clear_state);
        }
        self.pipelines = Some(pipelines);

        let transmittance_or_dummy =
            |slot: &ShadowSlot| slot.transmittance.unwrap_or(white);
        ctx.frame.shadows = ShadowFrameInfo {
            directional_maps: self.directional.iter().map(|slot| slot.depth).collect(),
            point_maps: self.points.iter().map(|slot| slot.depth).collect(),
            spot_maps: self.spots.iter().map(|slot| slot.depth).collect(),
            directional_transmittance: self
                .directional
                .iter()
                .map(transmittance_or_dummy)
                .collect(),
            point_transmittance: self.points.iter().map(transmittance_or_dummy).collect(),
            spot_transmittance: self.spots.iter().map(transmittance_or_dummy).collect(),
        };
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if old.shadows.translucent_shadows == new.shadows.translucent_shadows
            && old.shadows.volumetric_light == new.shadows.volumetric_light
        {
            return;
        }
        // Release early; the next record rebuilds exactly this subset.
        if let Some(set) = &mut self.pipelines {
            set.single.release_translucent(ctx.releaser);
            set.point.release_translucent(ctx.releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::scene::types::{MeshAsset, MeshDraw, PointLight};
    use crate::tasks::geometry::GeometryManagerTask;
    use crate::tasks::lights::GpuPointLight;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;
    use strix_core::math::Mat4;
    use uuid::Uuid;

    #[test]
    fn lod_is_a_non_increasing_step_function() {
        let base = 2048;
        let max = 100.0;
        assert_eq!(point_light_shadow_map_size(base, 0.0, max), base);
        assert_eq!(spot_light_shadow_map_size(base, 0.0, max), base);

        let mut previous = u32::MAX;
        for step in 0..200 {
            let size = point_light_shadow_map_size(base, step as f32, max);
            assert!(size <= previous);
            assert!(size >= MIN_SHADOW_MAP_SIZE);
            previous = size;
        }
        // one halving per 10% for points, per 25% for spots
        assert_eq!(point_light_shadow_map_size(base, 10.0, max), base / 2);
        assert_eq!(point_light_shadow_map_size(base, 20.0, max), base / 4);
        assert_eq!(spot_light_shadow_map_size(base, 20.0, max), base);
        assert_eq!(spot_light_shadow_map_size(base, 25.0, max), base / 2);
        // deep distances bottom out
        assert_eq!(point_light_shadow_map_size(base, 99.0, max), 64);
    }

    fn caster_scene(task: &mut GeometryManagerTask) {
        let vertex = crate::scene::types::MeshVertex {
            position: [0.0; 3],
            normal: [0.0, 1.0, 0.0],
            tangent: [1.0, 0.0, 0.0],
            uv: [0.0; 2],
        };
        let mesh = Arc::new(MeshAsset {
            guid: Uuid::new_v4(),
            vertices: vec![vertex; 3],
            indices: vec![0, 1, 2],
        });
        let mut masked = Material::new();
        masked.blend_mode = crate::material::BlendMode::Masked;
        task.set_meshes(
            vec![
                MeshDraw {
                    mesh: Some(Arc::clone(&mesh)),
                    material: Some(Material::new()),
                    transform: Mat4::IDENTITY,
                    entity_id: 1,
                    casts_shadows: true,
                },
                MeshDraw {
                    mesh: Some(mesh),
                    material: Some(masked),
                    transform: Mat4::IDENTITY,
                    entity_id: 2,
                    casts_shadows: true,
                },
            ],
            true,
        );
    }

    fn point_light(position: Vec3, casts_shadows: bool) -> GpuPointLight {
        GpuPointLight::new(&PointLight {
            position,
            radius: 10.0,
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadows,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        })
    }

    #[test]
    fn maps_allocate_only_for_shadow_casting_lights() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![
            point_light(Vec3::ZERO, true),
            point_light(Vec3::X, false),
        ]);
        let mut task = ShadowPassTask::new();
        harness.record(&mut task);

        let shadows = &harness.frame.shadows;
        let dummy_cube = harness.frame.dummy.cube_depth_image;
        assert_ne!(shadows.point_maps[0], dummy_cube);
        assert_eq!(shadows.point_maps[1], dummy_cube);

        let record = harness.device.image_record(shadows.point_maps[0]).unwrap();
        assert_eq!(record.kind, ImageKind::Cube);
        assert_eq!(record.extent.depth_or_array_layers, 6);
        assert_eq!(record.extent.width, 2048);
    }

    #[test]
    fn first_category_clears_then_later_categories_load() {
        let mut harness = testing::harness();
        let mut geometry = GeometryManagerTask::new();
        caster_scene(&mut geometry);
        harness.record(&mut geometry);
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);

        let mut task = ShadowPassTask::new();
        let commands = harness.record(&mut task);
        let map = harness.frame.shadows.point_maps[0];
        let load_ops: Vec<LoadOp> = commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass {
                    pipeline, depth, ..
                } if *depth == Some(map) => Some(
                    harness
                        .device
                        .render_pipeline_record(*pipeline)
                        .unwrap()
                        .depth_load_op
                        .unwrap(),
                ),
                _ => None,
            })
            .collect();
        assert_eq!(load_ops, vec![LoadOp::Clear, LoadOp::Load]);
    }

    #[test]
    fn point_pipelines_render_six_views_at_once() {
        let mut harness = testing::harness();
        let mut geometry = GeometryManagerTask::new();
        caster_scene(&mut geometry);
        harness.record(&mut geometry);
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);

        let mut task = ShadowPassTask::new();
        let commands = harness.record(&mut task);
        let map = harness.frame.shadows.point_maps[0];
        let passes = commands.iter().filter_map(|cmd| match cmd {
            RecordedCommand::BeginRenderPass {
                pipeline, depth, ..
            } if *depth == Some(map) => Some(*pipeline),
            _ => None,
        });
        for pipeline in passes {
            let record = harness.device.render_pipeline_record(pipeline).unwrap();
            assert_eq!(record.view_count, 6);
        }
    }

    #[test]
    fn untouched_maps_end_the_pass_cleared() {
        let mut harness = testing::harness();
        // a shadow-casting light with an empty scene
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);
        let mut task = ShadowPassTask::new();
        let commands = harness.record(&mut task);
        let map = harness.frame.shadows.point_maps[0];

        let clears = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { depth, .. } if *depth == Some(map)))
            .count();
        assert_eq!(clears, 1, "expected exactly the force-clear pass");
        assert!(commands.iter().any(|cmd| matches!(
            cmd,
            RecordedCommand::Transition { image, to, .. }
                if *image == map && *to == ImageLayout::DepthStencilReadOnly
        )));
    }

    #[test]
    fn retired_lights_swap_back_to_the_dummy() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);
        let mut task = ShadowPassTask::new();
        harness.record(&mut task);
        let allocated = harness.frame.shadows.point_maps[0];
        assert_ne!(allocated, harness.frame.dummy.cube_depth_image);

        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, false)]);
        harness.record(&mut task);
        assert_eq!(
            harness.frame.shadows.point_maps[0],
            harness.frame.dummy.cube_depth_image
        );
    }

    #[test]
    fn translucent_shadow_options_rebuild_only_the_translucent_pipelines() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);
        let mut task = ShadowPassTask::new();
        harness.record(&mut task);
        let set = task.pipelines.as_ref().unwrap();
        assert!(set.single.mesh_translucent.is_none());
        let opaque_before = set.single.mesh_opaque;
        let masked_before = set.point.mesh_masked;

        let mut options = harness.frame.options.clone();
        options.shadows.translucent_shadows = true;
        options.shadows.volumetric_light = true;
        harness.apply_options(&mut task, options);
        // the depth-only pipelines survive the toggle
        assert!(task.pipelines.is_some());

        harness.record(&mut task);
        let set = task.pipelines.as_ref().unwrap();
        assert_eq!(set.single.mesh_opaque, opaque_before);
        assert_eq!(set.point.mesh_masked, masked_before);
        assert!(set.single.mesh_translucent.is_some());
        // transmittance + min-depth attachments now exist for the map
        let transmittance = harness.frame.shadows.point_transmittance[0];
        assert_ne!(transmittance, harness.frame.dummy.white_image);
    }

    #[test]
    fn map_size_changes_do_not_rebuild_pipelines() {
        let mut harness = testing::harness();
        harness.frame.lights.point_lights = Arc::new(vec![point_light(Vec3::ZERO, true)]);
        let mut task = ShadowPassTask::new();
        harness.record(&mut task);
        let before = task.pipelines.as_ref().unwrap().single.mesh_opaque;

        let mut options = harness.frame.options.clone();
        options.shadows.point_light_size = 512;
        harness.apply_options(&mut task, options);
        harness.record(&mut task);
        assert_eq!(task.pipelines.as_ref().unwrap().single.mesh_opaque, before);

        let record = harness
            .device
            .image_record(harness.frame.shadows.point_maps[0])
            .unwrap();
        assert_eq!(record.extent.width, 512);
    }
}
