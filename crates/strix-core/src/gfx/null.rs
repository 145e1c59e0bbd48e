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

//! A headless [`GraphicsDevice`] that records instead of rendering.
//!
//! The null backend tracks every live resource, stores the commands recorded
//! into each command buffer, and exposes manually controllable fences. The
//! render pipeline's test suites run entirely against it.

use super::buffer::BufferDescriptor;
use super::device::{AcquiredImage, GraphicsDevice, SubmitInfo};
use super::encoder::{CommandEncoder, ComputePass, IndexFormat, RenderPass, RenderTarget};
use super::error::{PipelineError, RenderError, ResourceError, ShaderError};
use super::handle::{
    BufferId, CommandBufferId, ComputePipelineId, FenceId, ImageId, RenderPipelineId, SamplerId,
    SemaphoreId,
};
use super::image::{ImageDescriptor, ImageFormat, ImageKind, ImageLayout, ImageUsage};
use super::pipeline::{
    BlendState, ComputePipelineDescriptor, CullMode, GraphicsPipelineDescriptor, LoadOp,
    SpecializationConstant,
};
use super::sampler::SamplerDescriptor;
use super::shader::{ShaderModuleDescriptor, ShaderModuleId, ShaderStage};
use crate::math::{Extent2D, Extent3D};
use std::any::Any;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// One command recorded into a null command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// A render pass began.
    BeginRenderPass {
        /// Pipeline the pass was begun with.
        pipeline: RenderPipelineId,
        /// Bound color attachment images.
        colors: Vec<ImageId>,
        /// Bound depth attachment image.
        depth: Option<ImageId>,
        /// Rendered area.
        extent: Extent2D,
    },
    /// A non-indexed draw.
    Draw {
        /// Vertex count.
        vertices: u32,
        /// Instance count.
        instances: u32,
    },
    /// An indexed draw.
    DrawIndexed {
        /// Index count.
        indices: u32,
        /// Instance count.
        instances: u32,
    },
    /// A compute pass began.
    BeginComputePass {
        /// Pipeline the pass was begun with.
        pipeline: ComputePipelineId,
    },
    /// A workgroup dispatch.
    Dispatch {
        /// Workgroups in x.
        x: u32,
        /// Workgroups in y.
        y: u32,
        /// Workgroups in z.
        z: u32,
    },
    /// Push constants were uploaded.
    PushConstants {
        /// The raw bytes.
        data: Vec<u8>,
    },
    /// A CPU write into a buffer.
    WriteBuffer {
        /// Destination buffer.
        buffer: BufferId,
        /// Byte offset.
        offset: u64,
        /// Byte length.
        len: u64,
    },
    /// A buffer-to-buffer copy.
    CopyBuffer {
        /// Source buffer.
        source: BufferId,
        /// Destination buffer.
        destination: BufferId,
        /// Byte length.
        size: u64,
    },
    /// A CPU upload into an image.
    WriteImage {
        /// Destination image.
        image: ImageId,
        /// Byte length.
        len: u64,
    },
    /// A storage-buffer visibility barrier.
    StorageBarrier {
        /// Guarded buffer.
        buffer: BufferId,
    },
    /// An image layout transition.
    Transition {
        /// Transitioned image.
        image: ImageId,
        /// Previous layout.
        from: ImageLayout,
        /// New layout.
        to: ImageLayout,
    },
}

/// What the null backend remembers about a live buffer.
#[derive(Debug, Clone)]
pub struct BufferRecord {
    /// Debug label at creation.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

/// What the null backend remembers about a live image.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// Debug label at creation.
    pub label: Option<String>,
    /// Dimensionality.
    pub kind: ImageKind,
    /// Pixel format.
    pub format: ImageFormat,
    /// Size.
    pub extent: Extent3D,
    /// Usage flags.
    pub usage: ImageUsage,
}

/// What the null backend remembers about a graphics pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipelineRecord {
    /// Debug label at creation.
    pub label: Option<String>,
    /// Load op per color attachment slot.
    pub color_load_ops: Vec<LoadOp>,
    /// Blend state per color attachment slot.
    pub color_blends: Vec<Option<BlendState>>,
    /// Depth attachment load op, if any.
    pub depth_load_op: Option<LoadOp>,
    /// Multiview view count.
    pub view_count: u32,
    /// Face culling.
    pub cull_mode: CullMode,
}

/// What the null backend remembers about a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineRecord {
    /// Debug label at creation.
    pub label: Option<String>,
    /// Specialization constants baked at build time.
    pub specialization: Vec<SpecializationConstant>,
}

/// What the null backend remembers about a shader module.
#[derive(Debug, Clone)]
pub struct ShaderRecord {
    /// Logical source name.
    pub source: String,
    /// Stage.
    pub stage: ShaderStage,
    /// Define names baked into the variant.
    pub defines: Vec<String>,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct NullState {
    buffers: HashMap<BufferId, BufferRecord>,
    images: HashMap<ImageId, ImageRecord>,
    samplers: HashMap<SamplerId, Option<String>>,
    shaders: HashMap<ShaderModuleId, ShaderRecord>,
    render_pipelines: HashMap<RenderPipelineId, RenderPipelineRecord>,
    compute_pipelines: HashMap<ComputePipelineId, ComputePipelineRecord>,
    semaphores: HashMap<SemaphoreId, ()>,
    submissions: Vec<CommandBufferId>,
    swapchain: Vec<ImageId>,
    swapchain_index: usize,
    present_count: usize,
}

/// A headless, fully introspectable graphics device.
#[derive(Debug)]
pub struct NullGraphicsDevice {
    state: Mutex<NullState>,
    recorded: Arc<Mutex<HashMap<CommandBufferId, Vec<RecordedCommand>>>>,
    fences: Mutex<HashMap<FenceId, Arc<FenceState>>>,
    next_id: AtomicUsize,
    /// When `true` (the default), submitting with a fence signals it
    /// immediately, emulating an instantly retiring GPU.
    auto_signal_fences: AtomicBool,
    surface_extent: Mutex<Extent2D>,
}

impl Default for NullGraphicsDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullGraphicsDevice {
    /// Creates a device with a 1280×720 surface.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullState::default()),
            recorded: Arc::new(Mutex::new(HashMap::new())),
            fences: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            auto_signal_fences: AtomicBool::new(true),
            surface_extent: Mutex::new(Extent2D::new(1280, 720)),
        }
    }

    /// Creates a device with the given surface size.
    pub fn with_surface_extent(extent: Extent2D) -> Self {
        let device = Self::new();
        *device.surface_extent.lock().unwrap() = extent;
        device
    }

    fn alloc_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // --- Test controls ---

    /// Disables (or re-enables) automatic fence signaling on submit. With
    /// auto-signaling off, fences signal only via [`Self::signal_fence`].
    pub fn set_auto_signal_fences(&self, enabled: bool) {
        self.auto_signal_fences.store(enabled, Ordering::SeqCst);
    }

    /// Manually signals a fence, waking any waiter.
    pub fn signal_fence(&self, id: FenceId) {
        let fence = self.fences.lock().unwrap().get(&id).cloned();
        if let Some(fence) = fence {
            *fence.signaled.lock().unwrap() = true;
            fence.condvar.notify_all();
        }
    }

    /// Returns whether a fence is currently signaled.
    pub fn fence_signaled(&self, id: FenceId) -> bool {
        self.fences
            .lock()
            .unwrap()
            .get(&id)
            .map(|f| *f.signaled.lock().unwrap())
            .unwrap_or(false)
    }

    // --- Test queries ---

    /// Size of a live buffer, if it exists.
    pub fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.state.lock().unwrap().buffers.get(&id).map(|b| b.size)
    }

    /// Number of live buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// Number of live images.
    pub fn live_image_count(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    /// Record of a live image.
    pub fn image_record(&self, id: ImageId) -> Option<ImageRecord> {
        self.state.lock().unwrap().images.get(&id).cloned()
    }

    /// Record of a live graphics pipeline.
    pub fn render_pipeline_record(&self, id: RenderPipelineId) -> Option<RenderPipelineRecord> {
        self.state
            .lock()
            .unwrap()
            .render_pipelines
            .get(&id)
            .cloned()
    }

    /// Record of a live compute pipeline.
    pub fn compute_pipeline_record(&self, id: ComputePipelineId) -> Option<ComputePipelineRecord> {
        self.state
            .lock()
            .unwrap()
            .compute_pipelines
            .get(&id)
            .cloned()
    }

    /// Number of compute pipelines ever created (live only).
    pub fn live_compute_pipeline_count(&self) -> usize {
        self.state.lock().unwrap().compute_pipelines.len()
    }

    /// Commands recorded into a finished command buffer.
    pub fn commands(&self, cmd: CommandBufferId) -> Vec<RecordedCommand> {
        self.recorded
            .lock()
            .unwrap()
            .get(&cmd)
            .cloned()
            .unwrap_or_default()
    }

    /// Every submission so far, in order.
    pub fn submissions(&self) -> Vec<CommandBufferId> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Commands of the most recent submission.
    pub fn last_submitted_commands(&self) -> Vec<RecordedCommand> {
        let last = self.state.lock().unwrap().submissions.last().copied();
        match last {
            Some(cmd) => self.commands(cmd),
            None => Vec::new(),
        }
    }

    /// Number of presents so far.
    pub fn present_count(&self) -> usize {
        self.state.lock().unwrap().present_count
    }
}

impl GraphicsDevice for NullGraphicsDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = BufferId(self.alloc_id());
        self.state.lock().unwrap().buffers.insert(
            id,
            BufferRecord {
                label: desc.label.as_ref().map(|l| l.to_string()),
                size: desc.size,
            },
        );
        Ok(id)
    }

    fn create_buffer_with_data(
        &self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> Result<BufferId, ResourceError> {
        debug_assert!(data.len() as u64 <= desc.size);
        self.create_buffer(desc)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().buffers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_image(&self, desc: &ImageDescriptor) -> Result<ImageId, ResourceError> {
        let id = ImageId(self.alloc_id());
        self.state.lock().unwrap().images.insert(
            id,
            ImageRecord {
                label: desc.label.as_ref().map(|l| l.to_string()),
                kind: desc.kind,
                format: desc.format,
                extent: desc.extent,
                usage: desc.usage,
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, id: ImageId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().images.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
        let id = SamplerId(self.alloc_id());
        self.state
            .lock()
            .unwrap()
            .samplers
            .insert(id, desc.label.as_ref().map(|l| l.to_string()));
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().samplers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_shader_module(
        &self,
        desc: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ShaderError> {
        let id = ShaderModuleId(self.alloc_id());
        self.state.lock().unwrap().shaders.insert(
            id,
            ShaderRecord {
                source: desc.source.to_string(),
                stage: desc.stage,
                defines: desc.defines.iter().map(|d| d.name.to_string()).collect(),
            },
        );
        Ok(id)
    }

    fn create_render_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<RenderPipelineId, PipelineError> {
        let id = RenderPipelineId(self.alloc_id());
        self.state.lock().unwrap().render_pipelines.insert(
            id,
            RenderPipelineRecord {
                label: desc.label.as_ref().map(|l| l.to_string()),
                color_load_ops: desc.color_attachments.iter().map(|a| a.load_op).collect(),
                color_blends: desc.color_attachments.iter().map(|a| a.blend).collect(),
                depth_load_op: desc.depth_attachment.as_ref().map(|d| d.load_op),
                view_count: desc.view_count,
                cull_mode: desc.cull_mode,
            },
        );
        Ok(id)
    }

    fn destroy_render_pipeline(&self, id: RenderPipelineId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().render_pipelines.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<ComputePipelineId, PipelineError> {
        let id = ComputePipelineId(self.alloc_id());
        self.state.lock().unwrap().compute_pipelines.insert(
            id,
            ComputePipelineRecord {
                label: desc.label.as_ref().map(|l| l.to_string()),
                specialization: desc.specialization.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_compute_pipeline(&self, id: ComputePipelineId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().compute_pipelines.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.alloc_id());
        self.fences.lock().unwrap().insert(
            id,
            Arc::new(FenceState {
                signaled: Mutex::new(signaled),
                condvar: Condvar::new(),
            }),
        );
        Ok(id)
    }

    fn destroy_fence(&self, id: FenceId) -> Result<(), ResourceError> {
        match self.fences.lock().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn wait_fence(&self, id: FenceId) -> Result<(), RenderError> {
        let fence = self
            .fences
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RenderError::Resource(ResourceError::InvalidHandle))?;
        let mut signaled = fence.signaled.lock().unwrap();
        while !*signaled {
            signaled = fence.condvar.wait(signaled).unwrap();
        }
        Ok(())
    }

    fn reset_fence(&self, id: FenceId) -> Result<(), RenderError> {
        let fence = self
            .fences
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RenderError::Resource(ResourceError::InvalidHandle))?;
        *fence.signaled.lock().unwrap() = false;
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreId, ResourceError> {
        let id = SemaphoreId(self.alloc_id());
        self.state.lock().unwrap().semaphores.insert(id, ());
        Ok(id)
    }

    fn destroy_semaphore(&self, id: SemaphoreId) -> Result<(), ResourceError> {
        match self.state.lock().unwrap().semaphores.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::InvalidHandle),
        }
    }

    fn create_command_encoder(
        &self,
        _label: Option<&str>,
    ) -> Result<Box<dyn CommandEncoder>, RenderError> {
        Ok(Box::new(NullCommandEncoder {
            recorded: Arc::clone(&self.recorded),
            id: CommandBufferId(self.alloc_id()),
            ops: Vec::new(),
        }))
    }

    fn submit(&self, cmd: CommandBufferId, info: &SubmitInfo) -> Result<(), RenderError> {
        self.state.lock().unwrap().submissions.push(cmd);
        if let Some(fence) = info.fence {
            if self.auto_signal_fences.load(Ordering::SeqCst) {
                self.signal_fence(fence);
            }
        }
        Ok(())
    }

    fn acquire_next_image(&self) -> Result<AcquiredImage, RenderError> {
        let extent = *self.surface_extent.lock().unwrap();
        let format = self.surface_format();
        let mut state = self.state.lock().unwrap();
        if state.swapchain.is_empty() {
            for i in 0..3 {
                let id = ImageId(self.next_id.fetch_add(1, Ordering::Relaxed));
                state.images.insert(
                    id,
                    ImageRecord {
                        label: Some(format!("swapchain[{i}]")),
                        kind: ImageKind::D2,
                        format,
                        extent: Extent3D::new(extent.width, extent.height, 1),
                        usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::COPY_DST,
                    },
                );
                state.swapchain.push(id);
            }
        }
        let image = state.swapchain[state.swapchain_index];
        state.swapchain_index = (state.swapchain_index + 1) % state.swapchain.len();
        let ready = SemaphoreId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state.semaphores.insert(ready, ());
        Ok(AcquiredImage { image, ready })
    }

    fn present(&self, _wait: SemaphoreId) -> Result<(), RenderError> {
        self.state.lock().unwrap().present_count += 1;
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), RenderError> {
        Ok(())
    }

    fn surface_extent(&self) -> Extent2D {
        *self.surface_extent.lock().unwrap()
    }

    fn surface_format(&self) -> ImageFormat {
        ImageFormat::B8G8R8A8Unorm
    }
}

struct NullCommandEncoder {
    recorded: Arc<Mutex<HashMap<CommandBufferId, Vec<RecordedCommand>>>>,
    id: CommandBufferId,
    ops: Vec<RecordedCommand>,
}

impl std::fmt::Debug for NullCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullCommandEncoder")
            .field("id", &self.id)
            .field("ops", &self.ops.len())
            .finish()
    }
}

struct NullRenderPass<'e> {
    ops: &'e mut Vec<RecordedCommand>,
}

impl<'e> RenderPass<'e> for NullRenderPass<'e> {
    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferId, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferId, _offset: u64, _format: IndexFormat) {}

    fn set_push_constants(&mut self, data: &[u8]) {
        self.ops.push(RecordedCommand::PushConstants {
            data: data.to_vec(),
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.ops.push(RecordedCommand::Draw {
            vertices: vertices.end - vertices.start,
            instances: instances.end - instances.start,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        self.ops.push(RecordedCommand::DrawIndexed {
            indices: indices.end - indices.start,
            instances: instances.end - instances.start,
        });
    }
}

struct NullComputePass<'e> {
    ops: &'e mut Vec<RecordedCommand>,
}

impl<'e> ComputePass<'e> for NullComputePass<'e> {
    fn set_push_constants(&mut self, data: &[u8]) {
        self.ops.push(RecordedCommand::PushConstants {
            data: data.to_vec(),
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.ops.push(RecordedCommand::Dispatch { x, y, z });
    }
}

impl CommandEncoder for NullCommandEncoder {
    fn begin_render_pass<'encoder>(
        &'encoder mut self,
        pipeline: RenderPipelineId,
        target: &RenderTarget<'_>,
    ) -> Box<dyn RenderPass<'encoder> + 'encoder> {
        self.ops.push(RecordedCommand::BeginRenderPass {
            pipeline,
            colors: target.colors.to_vec(),
            depth: target.depth,
            extent: target.extent,
        });
        Box::new(NullRenderPass { ops: &mut self.ops })
    }

    fn begin_compute_pass<'encoder>(
        &'encoder mut self,
        pipeline: ComputePipelineId,
        _label: Option<&str>,
    ) -> Box<dyn ComputePass<'encoder> + 'encoder> {
        self.ops
            .push(RecordedCommand::BeginComputePass { pipeline });
        Box::new(NullComputePass { ops: &mut self.ops })
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        self.ops.push(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            len: data.len() as u64,
        });
    }

    fn copy_buffer_to_buffer(
        &mut self,
        source: BufferId,
        _source_offset: u64,
        destination: BufferId,
        _destination_offset: u64,
        size: u64,
    ) {
        self.ops.push(RecordedCommand::CopyBuffer {
            source,
            destination,
            size,
        });
    }

    fn write_image(&mut self, image: ImageId, data: &[u8]) {
        self.ops.push(RecordedCommand::WriteImage {
            image,
            len: data.len() as u64,
        });
    }

    fn storage_buffer_barrier(&mut self, buffer: BufferId) {
        self.ops.push(RecordedCommand::StorageBarrier { buffer });
    }

    fn transition_image_layout(&mut self, image: ImageId, from: ImageLayout, to: ImageLayout) {
        self.ops.push(RecordedCommand::Transition { image, from, to });
    }

    fn finish(self: Box<Self>) -> CommandBufferId {
        self.recorded.lock().unwrap().insert(self.id, self.ops);
        self.id
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::BufferUsage;

    #[test]
    fn buffers_are_tracked_and_destroyed() {
        let device = NullGraphicsDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor::new("probe", 64, BufferUsage::STORAGE))
            .unwrap();
        assert_eq!(device.buffer_size(buffer), Some(64));
        device.destroy_buffer(buffer).unwrap();
        assert!(device.buffer_size(buffer).is_none());
        assert!(device.destroy_buffer(buffer).is_err());
    }

    #[test]
    fn encoder_records_and_submission_logs() {
        let device = NullGraphicsDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor::new("probe", 64, BufferUsage::COPY_DST))
            .unwrap();
        let mut encoder = device.create_command_encoder(Some("test")).unwrap();
        encoder.write_buffer(buffer, 0, &[0u8; 16]);
        encoder.storage_buffer_barrier(buffer);
        let cmd = encoder.finish();
        device.submit(cmd, &SubmitInfo::default()).unwrap();

        let ops = device.last_submitted_commands();
        assert_eq!(
            ops[0],
            RecordedCommand::WriteBuffer {
                buffer,
                offset: 0,
                len: 16
            }
        );
        assert_eq!(ops[1], RecordedCommand::StorageBarrier { buffer });
    }

    #[test]
    fn manual_fence_control() {
        let device = NullGraphicsDevice::new();
        device.set_auto_signal_fences(false);
        let fence = device.create_fence(false).unwrap();
        assert!(!device.fence_signaled(fence));

        let cmd = {
            let encoder = device.create_command_encoder(None).unwrap();
            encoder.finish()
        };
        device
            .submit(
                cmd,
                &SubmitInfo {
                    fence: Some(fence),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!device.fence_signaled(fence));

        device.signal_fence(fence);
        device.wait_fence(fence).unwrap();
    }

    #[test]
    fn swapchain_cycles_three_images() {
        let device = NullGraphicsDevice::new();
        let first = device.acquire_next_image().unwrap().image;
        let second = device.acquire_next_image().unwrap().image;
        let third = device.acquire_next_image().unwrap().image;
        let fourth = device.acquire_next_image().unwrap().image;
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, fourth);
    }
}
