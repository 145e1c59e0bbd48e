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

//! Material description and its GPU-visible packed form.
//!
//! A [`Material`] references its textures by asset GUID only; the indices
//! into the bindless texture array are resolved when the material system
//! repacks its storage buffer, so a texture reload never touches material
//! assets.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use strix_core::math::{Vec3, Vec4};
use uuid::Uuid;

/// How a material's fragments blend with what is already in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlendMode {
    /// Fully opaque, depth-written.
    #[default]
    Opaque,
    /// Alpha-blended, drawn back-to-front after opaque geometry.
    Translucent,
    /// Binary alpha test against the opacity mask.
    Masked,
}

/// A surface description referencing textures by asset GUID.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Asset identity; interning dedups on this.
    pub guid: Uuid,
    /// Albedo (base color) texture.
    pub albedo_texture: Option<Uuid>,
    /// Tangent-space normal map.
    pub normal_texture: Option<Uuid>,
    /// Metallness map.
    pub metallness_texture: Option<Uuid>,
    /// Roughness map.
    pub roughness_texture: Option<Uuid>,
    /// Ambient-occlusion map.
    pub ao_texture: Option<Uuid>,
    /// Emissive color map.
    pub emissive_texture: Option<Uuid>,
    /// Opacity map (translucent blend mode).
    pub opacity_texture: Option<Uuid>,
    /// Opacity mask (masked blend mode).
    pub opacity_mask_texture: Option<Uuid>,
    /// Multiplied with the albedo sample.
    pub tint_color: Vec4,
    /// Multiplied with the emissive sample.
    pub emissive_color: Vec3,
    /// Scales the emissive contribution.
    pub emissive_intensity: f32,
    /// UV tiling factor.
    pub tiling_factor: f32,
    /// Constant opacity when no opacity texture is bound.
    pub opacity: f32,
    /// Alpha-test cutoff for the masked blend mode.
    pub opacity_mask: f32,
    /// Blend mode; decides which geometry bucket instances land in.
    pub blend_mode: BlendMode,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            guid: Uuid::nil(),
            albedo_texture: None,
            normal_texture: None,
            metallness_texture: None,
            roughness_texture: None,
            ao_texture: None,
            emissive_texture: None,
            opacity_texture: None,
            opacity_mask_texture: None,
            tint_color: Vec4::ONE,
            emissive_color: Vec3::ONE,
            emissive_intensity: 1.0,
            tiling_factor: 1.0,
            opacity: 1.0,
            opacity_mask: 0.5,
            blend_mode: BlendMode::Opaque,
        }
    }
}

impl Material {
    /// A material with a fresh random GUID and default surface values.
    pub fn new() -> Self {
        Self {
            guid: Uuid::new_v4(),
            ..Self::default()
        }
    }
}

/// Bit width of one texture index; three fit per u32 word.
pub const TEXTURE_INDEX_BITS: u32 = 10;
/// Mask of one packed texture index.
pub const TEXTURE_INDEX_MASK: u32 = 0x3FF;

/// The std430 material record read by the shading kernels.
///
/// Texture slots are packed three-per-word as 10-bit bindless indices:
/// word A holds albedo/metallness/normal, word B roughness/ao/emissive,
/// word C opacity/opacity-mask. Index 0 is the dummy texture, so an unbound
/// slot samples neutral.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    /// Albedo tint (RGBA).
    pub tint_color: [f32; 4],
    /// Emissive tint (RGB).
    pub emissive_color: [f32; 3],
    /// Emissive scale.
    pub emissive_intensity: f32,
    /// UV tiling.
    pub tiling_factor: f32,
    /// Constant opacity.
    pub opacity: f32,
    /// Alpha-test cutoff.
    pub opacity_mask: f32,
    /// albedo | metallness << 10 | normal << 20.
    pub packed_indices_a: u32,
    /// roughness | ao << 10 | emissive << 20.
    pub packed_indices_b: u32,
    /// opacity | opacity_mask << 10.
    pub packed_indices_c: u32,
    /// Keeps the record 16-byte aligned for std430 arrays.
    pub _padding: [u32; 2],
}

/// Packs three 10-bit texture indices into one word.
pub fn pack_texture_indices(first: u32, second: u32, third: u32) -> u32 {
    (first & TEXTURE_INDEX_MASK)
        | ((second & TEXTURE_INDEX_MASK) << TEXTURE_INDEX_BITS)
        | ((third & TEXTURE_INDEX_MASK) << (2 * TEXTURE_INDEX_BITS))
}

/// Unpacks a word produced by [`pack_texture_indices`].
pub fn unpack_texture_indices(word: u32) -> (u32, u32, u32) {
    (
        word & TEXTURE_INDEX_MASK,
        (word >> TEXTURE_INDEX_BITS) & TEXTURE_INDEX_MASK,
        (word >> (2 * TEXTURE_INDEX_BITS)) & TEXTURE_INDEX_MASK,
    )
}

impl GpuMaterial {
    /// Builds the GPU record, resolving each texture GUID to its bindless
    /// index through `resolve` (absent slots resolve to the dummy 0).
    pub fn pack(material: &Material, mut resolve: impl FnMut(Option<Uuid>) -> u32) -> Self {
        let albedo = resolve(material.albedo_texture);
        let metallness = resolve(material.metallness_texture);
        let normal = resolve(material.normal_texture);
        let roughness = resolve(material.roughness_texture);
        let ao = resolve(material.ao_texture);
        let emissive = resolve(material.emissive_texture);
        let opacity = resolve(material.opacity_texture);
        let opacity_mask = resolve(material.opacity_mask_texture);

        Self {
            tint_color: material.tint_color.to_array(),
            emissive_color: material.emissive_color.to_array(),
            emissive_intensity: material.emissive_intensity,
            tiling_factor: material.tiling_factor,
            opacity: material.opacity,
            opacity_mask: material.opacity_mask,
            packed_indices_a: pack_texture_indices(albedo, metallness, normal),
            packed_indices_b: pack_texture_indices(roughness, ao, emissive),
            packed_indices_c: pack_texture_indices(opacity, opacity_mask, 0),
            _padding: [0; 2],
        }
    }

    /// The record written at slot 0 of the materials buffer.
    pub fn dummy() -> Self {
        Self {
            tint_color: [1.0; 4],
            emissive_color: [0.0; 3],
            emissive_intensity: 0.0,
            tiling_factor: 1.0,
            opacity: 1.0,
            opacity_mask: 0.5,
            packed_indices_a: 0,
            packed_indices_b: 0,
            packed_indices_c: 0,
            _padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_indices_round_trip_per_word() {
        let word = pack_texture_indices(1, 512, 1023);
        assert_eq!(unpack_texture_indices(word), (1, 512, 1023));
    }

    #[test]
    fn indices_above_ten_bits_are_masked() {
        let word = pack_texture_indices(0x7FF, 0, 0);
        assert_eq!(unpack_texture_indices(word).0, 0x3FF);
    }

    #[test]
    fn pack_resolves_each_slot_in_declaration_order() {
        let mut material = Material::new();
        material.albedo_texture = Some(Uuid::new_v4());
        material.normal_texture = Some(Uuid::new_v4());
        material.opacity_mask_texture = Some(Uuid::new_v4());

        let mut next = 0u32;
        let gpu = GpuMaterial::pack(&material, |slot| {
            if slot.is_some() {
                next += 1;
                next
            } else {
                0
            }
        });

        let (albedo, metallness, normal) = unpack_texture_indices(gpu.packed_indices_a);
        assert_eq!((albedo, metallness, normal), (1, 0, 2));
        let (opacity, opacity_mask, _) = unpack_texture_indices(gpu.packed_indices_c);
        assert_eq!((opacity, opacity_mask), (0, 3));
    }

    #[test]
    fn record_size_is_std430_aligned() {
        assert_eq!(std::mem::size_of::<GpuMaterial>() % 16, 0);
    }
}
