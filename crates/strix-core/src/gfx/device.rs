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

//! The [`GraphicsDevice`] capability trait.

use super::buffer::BufferDescriptor;
use super::encoder::CommandEncoder;
use super::error::{PipelineError, RenderError, ResourceError, ShaderError};
use super::handle::{
    BufferId, CommandBufferId, ComputePipelineId, FenceId, ImageId, RenderPipelineId, SamplerId,
    SemaphoreId,
};
use super::image::{ImageDescriptor, ImageFormat};
use super::pipeline::{ComputePipelineDescriptor, GraphicsPipelineDescriptor};
use super::sampler::SamplerDescriptor;
use super::shader::{ShaderModuleDescriptor, ShaderModuleId};
use crate::math::Extent2D;
use std::fmt::Debug;

/// Semaphores and fence attached to a command buffer submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitInfo {
    /// Semaphores the GPU waits on before executing.
    pub wait_semaphores: Vec<SemaphoreId>,
    /// Semaphores signaled when execution completes.
    pub signal_semaphores: Vec<SemaphoreId>,
    /// Fence signaled when execution completes.
    pub fence: Option<FenceId>,
}

/// The result of acquiring the next presentable image.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    /// The swapchain image to render the final blit into.
    pub image: ImageId,
    /// Signaled when the image is actually ready to be written.
    pub ready: SemaphoreId,
}

/// The capability surface the frame pipeline consumes from a GPU backend.
///
/// Implementations own every resource table; the pipeline only holds opaque
/// handles. All creation is synchronous. `Send + Sync` is required because
/// resources are created from the game thread, asset-loading threads, and
/// the render worker alike.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    // --- Resources ---

    /// Creates a buffer.
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Creates a buffer with initial contents.
    fn create_buffer_with_data(
        &self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer. The caller must guarantee the GPU no longer
    /// references it (the frame pipeline routes this through its release ring).
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Creates an image.
    fn create_image(&self, desc: &ImageDescriptor) -> Result<ImageId, ResourceError>;

    /// Destroys an image.
    fn destroy_image(&self, id: ImageId) -> Result<(), ResourceError>;

    /// Creates a sampler.
    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerId, ResourceError>;

    /// Destroys a sampler.
    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError>;

    /// Creates (or fetches from cache) a shader module.
    fn create_shader_module(
        &self,
        desc: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ShaderError>;

    /// Creates a graphics pipeline state object.
    fn create_render_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<RenderPipelineId, PipelineError>;

    /// Destroys a graphics pipeline.
    fn destroy_render_pipeline(&self, id: RenderPipelineId) -> Result<(), ResourceError>;

    /// Creates a compute pipeline state object.
    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<ComputePipelineId, PipelineError>;

    /// Destroys a compute pipeline.
    fn destroy_compute_pipeline(&self, id: ComputePipelineId) -> Result<(), ResourceError>;

    // --- Synchronization ---

    /// Creates a fence, optionally pre-signaled. The frame scheduler creates
    /// its per-slot fences signaled so the first frames do not block.
    fn create_fence(&self, signaled: bool) -> Result<FenceId, ResourceError>;

    /// Destroys a fence.
    fn destroy_fence(&self, id: FenceId) -> Result<(), ResourceError>;

    /// Blocks until the fence is signaled.
    fn wait_fence(&self, id: FenceId) -> Result<(), RenderError>;

    /// Resets the fence to unsignaled.
    fn reset_fence(&self, id: FenceId) -> Result<(), RenderError>;

    /// Creates a semaphore.
    fn create_semaphore(&self) -> Result<SemaphoreId, ResourceError>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, id: SemaphoreId) -> Result<(), ResourceError>;

    // --- Recording and submission ---

    /// Creates a command encoder.
    fn create_command_encoder(
        &self,
        label: Option<&str>,
    ) -> Result<Box<dyn CommandEncoder>, RenderError>;

    /// Submits a finished command buffer.
    fn submit(&self, cmd: CommandBufferId, info: &SubmitInfo) -> Result<(), RenderError>;

    /// Acquires the next presentable image.
    fn acquire_next_image(&self) -> Result<AcquiredImage, RenderError>;

    /// Presents the most recently acquired image once `wait` is signaled.
    fn present(&self, wait: SemaphoreId) -> Result<(), RenderError>;

    /// Blocks until the GPU has retired all submitted work.
    fn wait_idle(&self) -> Result<(), RenderError>;

    // --- Surface queries ---

    /// Current surface size.
    fn surface_extent(&self) -> Extent2D;

    /// Surface pixel format.
    fn surface_format(&self) -> ImageFormat;
}
