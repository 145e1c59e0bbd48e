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

//! Command recording traits.

use super::handle::{BufferId, CommandBufferId, ComputePipelineId, ImageId, RenderPipelineId};
use super::image::ImageLayout;
use crate::math::Extent2D;
use std::any::Any;
use std::ops::Range;

/// Index element width for indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    #[default]
    U32,
}

/// The set of images a render pass draws into.
///
/// Attachment formats and load operations come from the pipeline the pass is
/// begun with; the target only names the images and the rendered area.
#[derive(Debug, Clone)]
pub struct RenderTarget<'a> {
    /// Color attachment images, matching the pipeline's color slots.
    pub colors: &'a [ImageId],
    /// Depth attachment image, when the pipeline declares one.
    pub depth: Option<ImageId>,
    /// Rendered area.
    pub extent: Extent2D,
}

/// An active render pass recording draw commands.
///
/// Obtained from [`CommandEncoder::begin_render_pass`]; dropping the pass
/// object ends the pass. Leaving a pass alive while calling any other method
/// on the encoder is a programmer error backends are allowed to assert on.
pub trait RenderPass<'pass> {
    /// Binds a vertex buffer to a slot.
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64);

    /// Binds the index buffer.
    fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat);

    /// Uploads push-constant data visible to all stages.
    fn set_push_constants(&mut self, data: &[u8]);

    /// Records a non-indexed draw.
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Records an indexed draw.
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);
}

/// An active compute pass recording dispatches.
pub trait ComputePass<'pass> {
    /// Uploads push-constant data.
    fn set_push_constants(&mut self, data: &[u8]);

    /// Records a workgroup dispatch.
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
}

/// Records a sequence of GPU commands into a [`CommandBufferId`].
pub trait CommandEncoder {
    /// Begins a render pass with the given pipeline against `target`.
    ///
    /// The returned pass borrows the encoder mutably; only one pass can be
    /// active at a time.
    fn begin_render_pass<'encoder>(
        &'encoder mut self,
        pipeline: RenderPipelineId,
        target: &RenderTarget<'_>,
    ) -> Box<dyn RenderPass<'encoder> + 'encoder>;

    /// Begins a compute pass with the given pipeline.
    fn begin_compute_pass<'encoder>(
        &'encoder mut self,
        pipeline: ComputePipelineId,
        label: Option<&str>,
    ) -> Box<dyn ComputePass<'encoder> + 'encoder>;

    /// Writes CPU data into a buffer at `offset`.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Copies a byte range between buffers.
    fn copy_buffer_to_buffer(
        &mut self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    );

    /// Uploads pixel data into an image (all layers of mip 0).
    fn write_image(&mut self, image: ImageId, data: &[u8]);

    /// Makes prior storage-buffer writes visible to subsequent stages.
    fn storage_buffer_barrier(&mut self, buffer: BufferId);

    /// Transitions an image between layouts.
    fn transition_image_layout(&mut self, image: ImageId, from: ImageLayout, to: ImageLayout);

    /// Finalizes recording, consuming the encoder.
    fn finish(self: Box<Self>) -> CommandBufferId;

    /// Escape hatch for backend-specific downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
