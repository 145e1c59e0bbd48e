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

//! Pipeline state descriptors.
//!
//! Attachment load operations and layout transitions are part of the
//! *pipeline* state, not the pass: a pass that must clear its target and a
//! pass that must accumulate into it are two distinct pipeline objects.
//! The shadow pass relies on this to select clearing vs. loading variants
//! per draw category.

use super::image::{ImageFormat, ImageLayout};
use super::shader::ShaderModuleId;
use std::borrow::Cow;

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull front faces (used by directional shadow rendering to reduce acne).
    Front,
    /// Cull back faces.
    #[default]
    Back,
}

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Independent line segments (debug lines).
    LineList,
}

/// What happens to an attachment's previous contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Keep the previous contents.
    #[default]
    Load,
    /// Clear to the descriptor's clear value.
    Clear,
    /// Previous contents are irrelevant.
    DontCare,
}

/// Comparison function for depth tests and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    /// Never passes.
    Never,
    /// Passes when incoming < stored.
    #[default]
    Less,
    /// Passes when incoming <= stored.
    LessOrEqual,
    /// Passes when incoming > stored.
    Greater,
    /// Passes when incoming >= stored.
    GreaterOrEqual,
    /// Always passes.
    Always,
}

/// A blending factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    One,
    /// Source color.
    SrcColor,
    /// `1 - src`
    OneMinusSrcColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - srcAlpha`
    OneMinusSrcAlpha,
    /// Destination alpha.
    DstAlpha,
}

/// A blending operation combining the weighted source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOperation {
    /// `src * sf + dst * df`
    #[default]
    Add,
    /// `min(src, dst)`; factors ignored. Used for nearest-translucent-depth
    /// accumulation in shadow maps.
    Min,
    /// `max(src, dst)`; factors ignored.
    Max,
}

/// Per-attachment blend state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendState {
    /// Source color factor.
    pub src_color: BlendFactor,
    /// Destination color factor.
    pub dst_color: BlendFactor,
    /// Color combine operation.
    pub color_op: BlendOperation,
    /// Source alpha factor.
    pub src_alpha: BlendFactor,
    /// Destination alpha factor.
    pub dst_alpha: BlendFactor,
    /// Alpha combine operation.
    pub alpha_op: BlendOperation,
}

impl BlendState {
    /// Standard premultiplied-style alpha blending.
    pub const ALPHA: Self = Self {
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOperation::Add,
    };

    /// Multiplicative filtering: `dst * src`. Overlapping translucent shadow
    /// casters combine their transmittance with this state.
    pub const MULTIPLY: Self = Self {
        src_color: BlendFactor::Zero,
        dst_color: BlendFactor::SrcColor,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::Zero,
        dst_alpha: BlendFactor::SrcColor,
        alpha_op: BlendOperation::Add,
    };

    /// Keep the minimum of source and destination.
    pub const MIN: Self = Self {
        src_color: BlendFactor::One,
        dst_color: BlendFactor::One,
        color_op: BlendOperation::Min,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::One,
        alpha_op: BlendOperation::Min,
    };
}

/// A color attachment slot in a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    /// Attachment format; must match the bound image.
    pub format: ImageFormat,
    /// Load operation applied when a pass with this pipeline begins.
    pub load_op: LoadOp,
    /// Layout the image is expected in when the pass begins.
    pub initial_layout: ImageLayout,
    /// Layout the image is transitioned to when the pass ends.
    pub final_layout: ImageLayout,
    /// Clear color used with [`LoadOp::Clear`].
    pub clear_color: [f32; 4],
    /// Blend state; `None` disables blending.
    pub blend: Option<BlendState>,
}

impl ColorAttachment {
    /// An attachment that clears to the given color and ends shader-readable.
    pub fn clearing(format: ImageFormat, clear_color: [f32; 4]) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::ShaderReadOnly,
            clear_color,
            blend: None,
        }
    }

    /// An attachment that accumulates into existing contents.
    pub fn loading(format: ImageFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Load,
            initial_layout: ImageLayout::ColorAttachment,
            final_layout: ImageLayout::ShaderReadOnly,
            clear_color: [0.0; 4],
            blend: None,
        }
    }

    /// Sets the blend state.
    #[must_use]
    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }
}

/// The depth attachment slot in a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachment {
    /// Depth format.
    pub format: ImageFormat,
    /// Load operation.
    pub load_op: LoadOp,
    /// Layout the image is expected in when the pass begins.
    pub initial_layout: ImageLayout,
    /// Layout the image is transitioned to when the pass ends.
    pub final_layout: ImageLayout,
    /// Clear depth used with [`LoadOp::Clear`].
    pub clear_depth: f32,
    /// Whether depth writes are enabled.
    pub write_enabled: bool,
    /// Depth test comparison.
    pub compare: CompareOp,
}

impl DepthAttachment {
    /// A write-enabled attachment cleared to the far plane.
    pub fn clearing(format: ImageFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::DepthStencilReadOnly,
            clear_depth: 1.0,
            write_enabled: true,
            compare: CompareOp::Less,
        }
    }

    /// A write-enabled attachment that keeps previous depth.
    pub fn loading(format: ImageFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Load,
            initial_layout: ImageLayout::DepthStencilAttachment,
            final_layout: ImageLayout::DepthStencilReadOnly,
            clear_depth: 1.0,
            write_enabled: true,
            compare: CompareOp::Less,
        }
    }
}

/// Per-vertex-buffer input rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Advance per vertex.
    #[default]
    Vertex,
    /// Advance per instance.
    Instance,
}

/// Layout of one bound vertex buffer; attribute decoding is shader-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    /// Byte stride between consecutive elements.
    pub stride: u64,
    /// Input rate.
    pub step_mode: VertexStepMode,
}

/// A descriptor used to create a [`crate::gfx::RenderPipelineId`].
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Vertex stage module.
    pub vertex_shader: ShaderModuleId,
    /// Fragment stage module; `None` for depth-only rendering.
    pub fragment_shader: Option<ShaderModuleId>,
    /// Vertex buffer layouts, by slot.
    pub vertex_layouts: Vec<VertexLayout>,
    /// Color attachment slots, in order.
    pub color_attachments: Vec<ColorAttachment>,
    /// Optional depth attachment.
    pub depth_attachment: Option<DepthAttachment>,
    /// Face culling.
    pub cull_mode: CullMode,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Line width for [`PrimitiveTopology::LineList`].
    pub line_width: f32,
    /// Number of views for multiview rendering; 1 disables it. Point-light
    /// shadow pipelines render all 6 cube faces with one draw at 6 views.
    pub view_count: u32,
}

impl<'a> GraphicsPipelineDescriptor<'a> {
    /// A descriptor with the defaults the pipeline tasks usually want.
    pub fn new(label: &'a str, vertex_shader: ShaderModuleId) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            vertex_shader,
            fragment_shader: None,
            vertex_layouts: Vec::new(),
            color_attachments: Vec::new(),
            depth_attachment: None,
            cull_mode: CullMode::Back,
            topology: PrimitiveTopology::TriangleList,
            line_width: 1.0,
            view_count: 1,
        }
    }
}

/// A specialization constant baked into a compute shader at pipeline build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    /// Constant ID as declared in the shader.
    pub id: u32,
    /// Constant value.
    pub value: u32,
}

/// A descriptor used to create a [`crate::gfx::ComputePipelineId`].
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Compute stage module.
    pub shader: ShaderModuleId,
    /// Specialization constants, letting the driver fold branches at build
    /// time instead of evaluating them per invocation.
    pub specialization: Vec<SpecializationConstant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_blend_is_zero_src_color() {
        let blend = BlendState::MULTIPLY;
        assert_eq!(blend.src_color, BlendFactor::Zero);
        assert_eq!(blend.dst_color, BlendFactor::SrcColor);
        assert_eq!(blend.color_op, BlendOperation::Add);
    }

    #[test]
    fn attachment_helpers_set_load_ops() {
        let clearing = ColorAttachment::clearing(ImageFormat::R8G8B8A8Unorm, [0.0; 4]);
        assert_eq!(clearing.load_op, LoadOp::Clear);
        assert_eq!(clearing.initial_layout, ImageLayout::Undefined);

        let loading = ColorAttachment::loading(ImageFormat::R8G8B8A8Unorm);
        assert_eq!(loading.load_op, LoadOp::Load);
        assert_eq!(loading.initial_layout, ImageLayout::ColorAttachment);
    }
}
