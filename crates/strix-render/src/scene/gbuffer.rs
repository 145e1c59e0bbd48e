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

//! The geometry buffer written by the geometry passes and consumed by the
//! deferred resolve.

use crate::command_queue::ReleaseCommand;
use crate::settings::OptionalGBuffers;
use strix_core::gfx::{ImageDescriptor, ImageFormat, ImageId, ImageUsage};
use strix_core::math::Extent2D;
use strix_core::{GraphicsDevice, ResourceError};

/// All G-Buffer attachments, created and resized as one unit.
#[derive(Debug, Clone, Copy)]
pub struct GBuffer {
    /// RGB albedo, A roughness.
    pub albedo_roughness: ImageId,
    /// Packed geometry and shading normals.
    pub normals: ImageId,
    /// HDR emissive contribution.
    pub emissive: ImageId,
    /// R metallness, G ambient occlusion.
    pub material_data: ImageId,
    /// Entity id per pixel, for picking.
    pub object_id: ImageId,
    /// Scene depth.
    pub depth: ImageId,
    /// Screen-space motion vectors; absent when no consumer needs them.
    pub motion: Option<ImageId>,
}

fn color_usage() -> ImageUsage {
    ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE
}

impl GBuffer {
    /// Allocates every attachment at the given size.
    pub fn new(
        device: &dyn GraphicsDevice,
        size: Extent2D,
        optional: &OptionalGBuffers,
    ) -> Result<Self, ResourceError> {
        let (w, h) = (size.width, size.height);
        Ok(Self {
            albedo_roughness: device.create_image(&ImageDescriptor::d2(
                "GBuffer_AlbedoRoughness",
                ImageFormat::R8G8B8A8Unorm,
                w,
                h,
                color_usage(),
            ))?,
            normals: device.create_image(&ImageDescriptor::d2(
                "GBuffer_Normals",
                ImageFormat::R8G8B8A8Unorm,
                w,
                h,
                color_usage(),
            ))?,
            emissive: device.create_image(&ImageDescriptor::d2(
                "GBuffer_Emissive",
                ImageFormat::R32G32B32A32Float,
                w,
                h,
                color_usage(),
            ))?,
            material_data: device.create_image(&ImageDescriptor::d2(
                "GBuffer_MaterialData",
                ImageFormat::R8G8B8A8Unorm,
                w,
                h,
                color_usage(),
            ))?,
            object_id: device.create_image(&ImageDescriptor::d2(
                "GBuffer_ObjectID",
                ImageFormat::R32Sint,
                w,
                h,
                ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::COPY_SRC,
            ))?,
            depth: device.create_image(&ImageDescriptor::d2(
                "GBuffer_Depth",
                ImageFormat::D32Float,
                w,
                h,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
            ))?,
            motion: if optional.motion {
                Some(device.create_image(&ImageDescriptor::d2(
                    "GBuffer_Motion",
                    ImageFormat::R16G16Float,
                    w,
                    h,
                    color_usage(),
                ))?)
            } else {
                None
            },
        })
    }

    /// Replaces every attachment with one of the new size, releasing the
    /// old images through `release`. Only called with the GPU idle.
    pub fn resize(
        &mut self,
        device: &dyn GraphicsDevice,
        size: Extent2D,
        optional: &OptionalGBuffers,
        mut release: impl FnMut(ReleaseCommand),
    ) -> Result<(), ResourceError> {
        let old = *self;
        *self = Self::new(device, size, optional)?;
        old.destroy(&mut release);
        Ok(())
    }

    /// Every attachment that exists, in declaration order.
    pub fn all_images(&self) -> Vec<ImageId> {
        let mut images = vec![
            self.albedo_roughness,
            self.normals,
            self.emissive,
            self.material_data,
            self.object_id,
            self.depth,
        ];
        if let Some(motion) = self.motion {
            images.push(motion);
        }
        images
    }

    /// Releases every attachment.
    pub fn destroy(&self, release: &mut impl FnMut(ReleaseCommand)) {
        for image in self.all_images() {
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_image(image) {
                    log::warn!("Failed to destroy G-Buffer attachment: {err}");
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_core::gfx::null::NullGraphicsDevice;

    #[test]
    fn motion_attachment_is_optional() {
        let device = NullGraphicsDevice::new();
        let size = Extent2D::new(64, 64);
        let with = GBuffer::new(&device, size, &OptionalGBuffers { motion: true }).unwrap();
        assert!(with.motion.is_some());
        assert_eq!(with.all_images().len(), 7);

        let without = GBuffer::new(&device, size, &OptionalGBuffers { motion: false }).unwrap();
        assert!(without.motion.is_none());
        assert_eq!(without.all_images().len(), 6);
    }

    #[test]
    fn resize_releases_the_old_attachments() {
        let device = NullGraphicsDevice::new();
        let size = Extent2D::new(64, 64);
        let mut gbuffer = GBuffer::new(&device, size, &OptionalGBuffers::default()).unwrap();
        let before = device.live_image_count();

        gbuffer
            .resize(
                &device,
                Extent2D::new(128, 128),
                &OptionalGBuffers::default(),
                |cmd| cmd(&device),
            )
            .unwrap();
        assert_eq!(device.live_image_count(), before);
        let record = device.image_record(gbuffer.depth).unwrap();
        assert_eq!(record.extent.width, 128);
    }
}
