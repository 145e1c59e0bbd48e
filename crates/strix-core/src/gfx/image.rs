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

//! Descriptors and enums for GPU image resources.

use crate::math::Extent3D;
use crate::strix_bitflags;
use std::borrow::Cow;

/// The pixel format of an image. Only the formats the frame pipeline
/// actually allocates are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// No format; invalid for image creation.
    #[default]
    Unknown,
    /// 8-bit single channel, normalized.
    R8Unorm,
    /// 8-bit RGBA, normalized.
    R8G8B8A8Unorm,
    /// 8-bit BGRA, normalized (common swapchain format).
    B8G8R8A8Unorm,
    /// 16-bit two-channel float (motion vectors).
    R16G16Float,
    /// 16-bit four-channel float.
    R16G16B16A16Float,
    /// 32-bit signed integer (object IDs).
    R32Sint,
    /// 32-bit single-channel float.
    R32Float,
    /// 32-bit four-channel float (HDR targets, emissive).
    R32G32B32A32Float,
    /// 32-bit depth.
    D32Float,
}

impl ImageFormat {
    /// Returns `true` for depth formats.
    pub const fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::D32Float)
    }

    /// Bytes per pixel for non-compressed formats.
    pub const fn bytes_per_pixel(&self) -> u32 {
        match self {
            ImageFormat::Unknown => 0,
            ImageFormat::R8Unorm => 1,
            ImageFormat::R16G16Float | ImageFormat::R32Sint | ImageFormat::R32Float => 4,
            ImageFormat::R8G8B8A8Unorm | ImageFormat::B8G8R8A8Unorm | ImageFormat::D32Float => 4,
            ImageFormat::R16G16B16A16Float => 8,
            ImageFormat::R32G32B32A32Float => 16,
        }
    }
}

/// The dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageKind {
    /// A regular 2D image (or 2D array when `depth_or_array_layers > 1`).
    #[default]
    D2,
    /// A 3D volume image.
    D3,
    /// A cubemap: six 2D faces addressed as array layers.
    Cube,
}

/// The layout an image's memory is in, governing which accesses are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Initial layout; contents undefined.
    #[default]
    Undefined,
    /// Usable for any access, unoptimized. Required for storage images.
    General,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for depth reads in shaders (shadow map sampling).
    DepthStencilReadOnly,
    /// Optimal for sampled reads in shaders.
    ShaderReadOnly,
    /// Source of a transfer.
    TransferSrc,
    /// Destination of a transfer.
    TransferDst,
    /// Presentable to the surface.
    Present,
}

strix_bitflags! {
    /// Allowed usages of an image.
    pub struct ImageUsage: u32 {
        /// Can be sampled in shaders.
        const SAMPLED = 1 << 0;
        /// Can be bound as a storage image.
        const STORAGE = 1 << 1;
        /// Can be rendered to as a color attachment.
        const COLOR_ATTACHMENT = 1 << 2;
        /// Can be rendered to as a depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        /// Can be the source of a copy or blit.
        const COPY_SRC = 1 << 4;
        /// Can be the destination of a copy or a CPU upload.
        const COPY_DST = 1 << 5;
    }
}

/// A descriptor used to create an [`crate::gfx::ImageId`].
#[derive(Debug, Clone)]
pub struct ImageDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Dimensionality.
    pub kind: ImageKind,
    /// Pixel format.
    pub format: ImageFormat,
    /// Size; `depth_or_array_layers` is 6 for cubemaps, depth for 3D.
    pub extent: Extent3D,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// How the image will be used.
    pub usage: ImageUsage,
}

impl<'a> ImageDescriptor<'a> {
    /// Shorthand for a single-mip 2D image.
    pub fn d2(label: &'a str, format: ImageFormat, width: u32, height: u32, usage: ImageUsage) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            kind: ImageKind::D2,
            format,
            extent: Extent3D::new(width, height, 1),
            mip_levels: 1,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats() {
        assert!(ImageFormat::D32Float.is_depth());
        assert!(!ImageFormat::R8G8B8A8Unorm.is_depth());
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(ImageFormat::R32G32B32A32Float.bytes_per_pixel(), 16);
        assert_eq!(ImageFormat::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(ImageFormat::Unknown.bytes_per_pixel(), 0);
    }
}
