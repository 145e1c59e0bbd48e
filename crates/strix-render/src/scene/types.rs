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

//! Scene snapshot types.
//!
//! The scene/ECS side hands these to the renderer by value; the renderer
//! copies what it needs and never holds references back into the scene.
//! Optional assets (`None` mesh, `None` material) mark entities that are
//! still loading and are silently skipped during collection.

use crate::material::{BlendMode, Material};
use ahash::AHashMap;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use strix_core::math::{Mat4, Vec3, Vec4};
use uuid::Uuid;

/// Scene entity identity carried into the object-ID G-Buffer for picking.
/// `-1` means "no entity".
pub type EntityId = i32;

/// One static mesh vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Object-space tangent.
    pub tangent: [f32; 3],
    /// Texture coordinates.
    pub uv: [f32; 2],
}

/// An immutable mesh asset shared between entities.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAsset {
    /// Asset identity; instancing batches on this.
    pub guid: Uuid,
    /// Vertex data.
    pub vertices: Vec<MeshVertex>,
    /// Index data.
    pub indices: Vec<u32>,
}

/// Snapshot of one static-mesh component.
#[derive(Debug, Clone)]
pub struct MeshDraw {
    /// The mesh asset; `None` while still loading.
    pub mesh: Option<Arc<MeshAsset>>,
    /// The surface; `None` falls back to the dummy material.
    pub material: Option<Material>,
    /// World transform.
    pub transform: Mat4,
    /// Owning entity.
    pub entity_id: EntityId,
    /// Whether the mesh renders into shadow maps.
    pub casts_shadows: bool,
}

/// Snapshot of one sprite component (a textured world-space quad).
#[derive(Debug, Clone)]
pub struct SpriteDraw {
    /// The surface; `None` falls back to the dummy material.
    pub material: Option<Material>,
    /// World transform.
    pub transform: Mat4,
    /// Owning entity.
    pub entity_id: EntityId,
    /// Whether the sprite renders into shadow maps.
    pub casts_shadows: bool,
}

/// Metrics of one glyph inside a font atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    /// Atlas UV of the glyph's lower-left corner.
    pub uv_min: [f32; 2],
    /// Atlas UV of the glyph's upper-right corner.
    pub uv_max: [f32; 2],
    /// Quad size in em units.
    pub size: [f32; 2],
    /// Offset from the pen position to the quad origin, in em units.
    pub bearing: [f32; 2],
    /// Pen advance after this glyph, in em units.
    pub advance: f32,
}

/// A signed-distance-field font atlas.
#[derive(Debug, Clone)]
pub struct FontAtlas {
    /// Asset identity.
    pub guid: Uuid,
    /// GUID of the atlas texture in the texture system.
    pub atlas_texture: Uuid,
    /// Line advance in em units.
    pub line_height: f32,
    /// Advance of the space character in em units.
    pub space_advance: f32,
    /// Per-character metrics.
    pub glyphs: AHashMap<char, GlyphMetrics>,
}

/// Snapshot of one text component.
#[derive(Debug, Clone)]
pub struct TextDraw {
    /// The font; `None` while still loading.
    pub font: Option<Arc<FontAtlas>>,
    /// The string to lay out. `\n` breaks lines.
    pub text: String,
    /// World transform.
    pub transform: Mat4,
    /// Fill color (albedo for lit text).
    pub color: Vec4,
    /// Maximum line width in em units before wrapping; 0 disables wrapping.
    pub max_width: f32,
    /// Letter spacing added to every advance, in em units.
    pub kerning: f32,
    /// Extra line spacing in em units.
    pub line_spacing: f32,
    /// How the glyphs blend.
    pub blend_mode: BlendMode,
    /// Whether the text is shaded by the deferred lighting.
    pub is_lit: bool,
    /// Whether the glyph quads render into shadow maps.
    pub casts_shadows: bool,
    /// Owning entity.
    pub entity_id: EntityId,
}

/// Snapshot of one billboard component (camera-facing gizmo quad).
#[derive(Debug, Clone)]
pub struct BillboardDraw {
    /// GUID of the billboard texture; `None` while still loading.
    pub texture: Option<Uuid>,
    /// World transform (rotation is replaced by the camera's at record time).
    pub transform: Mat4,
    /// Owning entity.
    pub entity_id: EntityId,
}

/// A world-space debug line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    /// Start point.
    pub start: Vec3,
    /// End point.
    pub end: Vec3,
    /// Line color.
    pub color: Vec4,
}

/// Snapshot of a point-light component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// World position.
    pub position: Vec3,
    /// Attenuation radius.
    pub radius: f32,
    /// Light color, scaled by intensity.
    pub color: Vec3,
    /// Linear intensity multiplier.
    pub intensity: f32,
    /// Whether the light renders a cube shadow map.
    pub casts_shadows: bool,
    /// Scattering contribution when volumetric fog is enabled.
    pub volumetric_intensity: f32,
    /// Whether this light participates in volumetric scattering.
    pub is_volumetric: bool,
}

/// Snapshot of a spot-light component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    /// World position.
    pub position: Vec3,
    /// Normalized direction.
    pub direction: Vec3,
    /// Light color, scaled by intensity.
    pub color: Vec3,
    /// Linear intensity multiplier.
    pub intensity: f32,
    /// Inner cone angle in radians (full intensity inside).
    pub inner_angle: f32,
    /// Outer cone angle in radians (zero intensity outside).
    pub outer_angle: f32,
    /// Attenuation distance.
    pub distance: f32,
    /// Whether the light renders a shadow map.
    pub casts_shadows: bool,
    /// Scattering contribution when volumetric fog is enabled.
    pub volumetric_intensity: f32,
    /// Whether this light participates in volumetric scattering.
    pub is_volumetric: bool,
}

/// Snapshot of the directional-light component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Normalized direction the light travels.
    pub direction: Vec3,
    /// Light color, scaled by intensity.
    pub color: Vec3,
    /// Linear intensity multiplier.
    pub intensity: f32,
    /// Constant ambient term added by the resolve.
    pub ambient: Vec3,
    /// Whether cascaded shadow maps are rendered.
    pub casts_shadows: bool,
    /// Scattering contribution when volumetric fog is enabled.
    pub volumetric_intensity: f32,
    /// Whether this light participates in volumetric scattering.
    pub is_volumetric: bool,
}
