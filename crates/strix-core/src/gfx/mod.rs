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

//! The graphics device abstraction consumed by the frame pipeline.
//!
//! Everything here is backend-agnostic: resources are referenced through
//! opaque integer handles, created from plain descriptor structs, and
//! recorded through the [`CommandEncoder`] trait object returned by a
//! [`GraphicsDevice`].

pub mod buffer;
pub mod device;
pub mod encoder;
pub mod error;
pub mod handle;
pub mod image;
pub mod null;
pub mod pipeline;
pub mod sampler;
pub mod shader;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use device::{AcquiredImage, GraphicsDevice, SubmitInfo};
pub use encoder::{CommandEncoder, ComputePass, IndexFormat, RenderPass, RenderTarget};
pub use handle::{
    BufferId, CommandBufferId, ComputePipelineId, FenceId, ImageId, RenderPipelineId, SamplerId,
    SemaphoreId,
};
pub use image::{ImageDescriptor, ImageFormat, ImageKind, ImageLayout, ImageUsage};
pub use pipeline::{
    BlendFactor, BlendOperation, BlendState, ColorAttachment, CompareOp, ComputePipelineDescriptor,
    CullMode, DepthAttachment, GraphicsPipelineDescriptor, LoadOp, PrimitiveTopology,
    SpecializationConstant, VertexLayout, VertexStepMode,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use shader::{ShaderDefine, ShaderModuleDescriptor, ShaderModuleId, ShaderStage};
