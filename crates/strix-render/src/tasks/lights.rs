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

//! Light collection: builds the GPU light records (including every shadow
//! view-projection matrix) and uploads them into storage buffers.
//!
//! The point and spot records pack their boolean flags into the sign bit of
//! an always-positive float field, keeping the std430 stride free of flag
//! words. The directional record carries explicit flag words since it is a
//! single struct, not an array element.

use super::{CameraData, LightsFrameInfo, RecordContext, RendererTask};
use crate::config::CASCADES_COUNT;
use crate::scene::types::{DirectionalLight, PointLight, SpotLight};
use crate::scene::StageDesc;
use crate::versioned::VersionedBuffer;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use strix_core::gfx::BufferUsage;
use strix_core::math::{Mat4, Vec3, Vec4};

/// Near plane of the six point-light shadow frusta.
const POINT_LIGHT_NEAR: f32 = 0.01;
/// Near plane of the spot-light shadow frustum.
const SPOT_LIGHT_NEAR: f32 = 0.01;
/// Far plane of the spot-light shadow frustum.
const SPOT_LIGHT_FAR: f32 = 50.0;
/// Extra depth range in front of and behind the cascade fit, so casters
/// outside the camera frustum still land in the cascade map.
const CASCADE_DEPTH_PADDING: f32 = 50.0;

/// Cube shadow face order. Must match the face order the point-light shadow
/// shader indexes with `gl_ViewIndex`.
const CUBE_FACE_DIRECTIONS: [Vec3; 6] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];
const CUBE_FACE_UPS: [Vec3; 6] = [
    Vec3::NEG_Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
    Vec3::NEG_Y,
    Vec3::NEG_Y,
];

fn pack_sign_flag(value: f32, flag: bool) -> f32 {
    let bits = value.to_bits() & 0x7FFF_FFFF;
    f32::from_bits(if flag { bits | 0x8000_0000 } else { bits })
}

fn unpack_sign_flag(value: f32) -> (f32, bool) {
    let bits = value.to_bits();
    (f32::from_bits(bits & 0x7FFF_FFFF), bits & 0x8000_0000 != 0)
}

fn light_up_vector(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// World-space corners of the frustum described by `projection * view`,
/// assuming a `[0, 1]` clip depth range.
fn frustum_corners_world(view: Mat4, projection: Mat4) -> [Vec3; 8] {
    let inverse = (projection * view).inverse();
    let mut corners = [Vec3::ZERO; 8];
    let mut index = 0;
    for x in [-1.0, 1.0] {
        for y in [-1.0, 1.0] {
            for z in [0.0, 1.0] {
                let corner = inverse * Vec4::new(x, y, z, 1.0);
                corners[index] = corner.truncate() / corner.w;
                index += 1;
            }
        }
    }
    corners
}

/// Fits an orthographic light frustum around one cascade slice and snaps its
/// origin to the shadow map's texel grid so the shadow edge does not shimmer
/// as the camera translates.
fn cascade_view_projection(
    direction: Vec3,
    camera_view: Mat4,
    cascade_projection: Mat4,
    resolution: u32,
) -> Mat4 {
    let corners = frustum_corners_world(camera_view, cascade_projection);
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let mut radius = 0.0f32;
    for corner in &corners {
        radius = radius.max(corner.distance(center));
    }
    // Quantizing the radius keeps the ortho extent stable while the camera
    // rotates, which the texel snap below depends on.
    radius = (radius * 16.0).ceil() / 16.0;

    let view = Mat4::look_at_rh(center - direction * radius, center, light_up_vector(direction));
    let projection = Mat4::orthographic_rh(
        -radius,
        radius,
        -radius,
        radius,
        -CASCADE_DEPTH_PADDING,
        2.0 * radius + CASCADE_DEPTH_PADDING,
    );

    let view_projection = projection * view;
    let half_texels = resolution as f32 / 2.0;
    let origin = (view_projection * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate() * half_texels;
    let snap = (origin.round() - origin) / half_texels;
    let mut columns = view_projection.to_cols_array_2d();
    columns[3][0] += snap.x;
    columns[3][1] += snap.y;
    Mat4::from_cols_array_2d(&columns)
}

/// GPU record of one point light. One array element of the point-light
/// storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// One shadow view-projection per cube face, in
    /// [`CUBE_FACE_DIRECTIONS`] order.
    pub view_projections: [[[f32; 4]; 4]; 6],
    /// World position.
    pub position: [f32; 3],
    /// Squared attenuation radius; sign bit set when the light casts shadows.
    pub radius_squared: f32,
    /// Color pre-multiplied by intensity.
    pub color: [f32; 3],
    /// Volumetric scattering strength; sign bit set when volumetric.
    pub volumetric_intensity: f32,
}

impl GpuPointLight {
    /// Builds the record, including the six cube-face matrices.
    pub fn new(light: &PointLight) -> Self {
        let far = light.radius.max(POINT_LIGHT_NEAR * 2.0);
        let projection =
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, POINT_LIGHT_NEAR, far);
        let mut view_projections = [[[0.0; 4]; 4]; 6];
        for face in 0..6 {
            let view = Mat4::look_at_rh(
                light.position,
                light.position + CUBE_FACE_DIRECTIONS[face],
                CUBE_FACE_UPS[face],
            );
            view_projections[face] = (projection * view).to_cols_array_2d();
        }
        Self {
            view_projections,
            position: light.position.to_array(),
            radius_squared: pack_sign_flag(light.radius * light.radius, light.casts_shadows),
            color: (light.color * light.intensity).to_array(),
            volumetric_intensity: pack_sign_flag(light.volumetric_intensity, light.is_volumetric),
        }
    }

    /// World position.
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Attenuation radius, flag bit stripped.
    pub fn radius(&self) -> f32 {
        unpack_sign_flag(self.radius_squared).0.sqrt()
    }

    /// Whether the light renders a cube shadow map.
    pub fn casts_shadows(&self) -> bool {
        unpack_sign_flag(self.radius_squared).1
    }

    /// Whether the light participates in volumetric scattering.
    pub fn is_volumetric(&self) -> bool {
        unpack_sign_flag(self.volumetric_intensity).1
    }

    /// Shadow matrix of one cube face.
    pub fn face_matrix(&self, face: usize) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_projections[face])
    }
}

/// GPU record of one spot light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSpotLight {
    /// Shadow view-projection.
    pub view_projection: [[f32; 4]; 4],
    /// World position.
    pub position: [f32; 3],
    /// Cosine of the inner cone angle.
    pub inner_cutoff: f32,
    /// Normalized direction.
    pub direction: [f32; 3],
    /// Cosine of the outer cone angle.
    pub outer_cutoff: f32,
    /// Color pre-multiplied by intensity.
    pub color: [f32; 3],
    /// Squared attenuation distance.
    pub distance_squared: f32,
    /// 1 when the light renders a shadow map.
    pub casts_shadows: u32,
    /// 1 when the light participates in volumetric scattering.
    pub is_volumetric: u32,
    /// Volumetric scattering strength.
    pub volumetric_intensity: f32,
    /// std430 alignment.
    pub _padding: u32,
}

impl GpuSpotLight {
    /// Builds the record. Cone angles are clamped to `[1°, 80°]`: below that
    /// the shadow frustum degenerates, above it a cube map should be used.
    pub fn new(light: &SpotLight) -> Self {
        let min_angle = 1.0f32.to_radians();
        let max_angle = 80.0f32.to_radians();
        let outer = light.outer_angle.clamp(min_angle, max_angle);
        let inner = light.inner_angle.clamp(min_angle, outer);

        let direction = light.direction.normalize_or_zero();
        let view = Mat4::look_at_rh(
            light.position,
            light.position + direction,
            light_up_vector(direction),
        );
        let mut projection =
            Mat4::perspective_rh(outer * 2.0, 1.0, SPOT_LIGHT_NEAR, SPOT_LIGHT_FAR)
                .to_cols_array_2d();
        // Vulkan clip space is y-down; the cube-face matrices get this from
        // their upside-down up vectors instead.
        projection[1][1] = -projection[1][1];
        let view_projection = Mat4::from_cols_array_2d(&projection) * view;

        Self {
            view_projection: view_projection.to_cols_array_2d(),
            position: light.position.to_array(),
            inner_cutoff: inner.cos(),
            direction: direction.to_array(),
            outer_cutoff: outer.cos(),
            color: (light.color * light.intensity).to_array(),
            distance_squared: light.distance * light.distance,
            casts_shadows: u32::from(light.casts_shadows),
            is_volumetric: u32::from(light.is_volumetric),
            volumetric_intensity: light.volumetric_intensity,
            _padding: 0,
        }
    }

    /// World position.
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Attenuation distance.
    pub fn distance(&self) -> f32 {
        self.distance_squared.sqrt()
    }

    /// Whether the light renders a shadow map.
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows != 0
    }

    /// Shadow matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_projection)
    }
}

/// GPU record of the directional light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// One shadow view-projection per cascade.
    pub cascade_view_projections: [[[f32; 4]; 4]; CASCADES_COUNT],
    /// Far plane of each cascade split.
    pub cascade_far_planes: [f32; CASCADES_COUNT],
    /// Normalized direction the light travels.
    pub direction: [f32; 3],
    /// Volumetric scattering strength.
    pub volumetric_intensity: f32,
    /// Color pre-multiplied by intensity.
    pub color: [f32; 3],
    /// 1 when cascaded shadow maps are rendered.
    pub casts_shadows: u32,
    /// Constant ambient term.
    pub ambient: [f32; 3],
    /// 1 when the light participates in volumetric scattering.
    pub is_volumetric: u32,
}

impl GpuDirectionalLight {
    /// Builds the record, fitting one shadow matrix per cascade around the
    /// camera's split frusta. `base_resolution` is the distant-cascade map
    /// size; the nearest cascade renders at twice that.
    pub fn new(light: &DirectionalLight, camera: &CameraData, base_resolution: u32) -> Self {
        let direction = light.direction.normalize_or_zero();
        let mut cascades = [[[0.0; 4]; 4]; CASCADES_COUNT];
        for (index, projection) in camera.cascade_projections.iter().enumerate() {
            let resolution = if index == 0 {
                base_resolution * 2
            } else {
                base_resolution
            };
            cascades[index] =
                cascade_view_projection(direction, camera.view, *projection, resolution)
                    .to_cols_array_2d();
        }
        Self {
            cascade_view_projections: cascades,
            cascade_far_planes: camera.cascade_far_planes,
            direction: direction.to_array(),
            volumetric_intensity: light.volumetric_intensity,
            color: (light.color * light.intensity).to_array(),
            casts_shadows: u32::from(light.casts_shadows),
            ambient: light.ambient.to_array(),
            is_volumetric: u32::from(light.is_volumetric),
        }
    }

    /// Whether cascaded shadow maps are rendered.
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows != 0
    }

    /// Shadow matrix of one cascade.
    pub fn cascade_matrix(&self, cascade: usize) -> Mat4 {
        Mat4::from_cols_array_2d(&self.cascade_view_projections[cascade])
    }
}

/// Builds and uploads the light storage buffers, and publishes the CPU-side
/// light lists the shadow pass iterates.
#[derive(Debug)]
pub struct LightsManagerTask {
    points: VersionedBuffer<GpuPointLight>,
    spots: VersionedBuffer<GpuSpotLight>,
    directional: VersionedBuffer<GpuDirectionalLight>,
    point_cache: Arc<Vec<GpuPointLight>>,
    spot_cache: Arc<Vec<GpuSpotLight>>,
    directional_source: Option<DirectionalLight>,
}

impl LightsManagerTask {
    pub fn new() -> Self {
        Self {
            points: VersionedBuffer::new("Point lights", BufferUsage::STORAGE),
            spots: VersionedBuffer::new("Spot lights", BufferUsage::STORAGE),
            directional: VersionedBuffer::new("Directional light", BufferUsage::STORAGE),
            point_cache: Arc::default(),
            spot_cache: Arc::default(),
            directional_source: None,
        }
    }

    /// Replaces the point-light set.
    pub fn set_point_lights(&mut self, lights: &[PointLight]) {
        let records: Vec<GpuPointLight> = lights.iter().map(GpuPointLight::new).collect();
        self.point_cache = Arc::new(records.clone());
        self.points.set_all(records);
    }

    /// Replaces the spot-light set.
    pub fn set_spot_lights(&mut self, lights: &[SpotLight]) {
        let records: Vec<GpuSpotLight> = lights.iter().map(GpuSpotLight::new).collect();
        self.spot_cache = Arc::new(records.clone());
        self.spots.set_all(records);
    }

    /// Replaces the directional light. Its cascade matrices depend on the
    /// camera, so the GPU record is rebuilt every recorded frame.
    pub fn set_directional_light(&mut self, light: Option<DirectionalLight>) {
        self.directional_source = light;
    }

    /// Releases the storage buffers.
    pub fn destroy(&mut self, releaser: &crate::manager::ResourceReleaser) {
        self.points.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.spots.destroy(|cmd| releaser.submit_resource_free(cmd));
        self.directional
            .destroy(|cmd| releaser.submit_resource_free(cmd));
    }
}

impl Default for LightsManagerTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for LightsManagerTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "lights",
            inputs: &["camera"],
            outputs: &["lights"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let directional = self.directional_source.as_ref().map(|light| {
            GpuDirectionalLight::new(
                light,
                &ctx.frame.camera,
                ctx.frame.options.shadows.dir_light_size,
            )
        });
        match directional {
            Some(record) => self.directional.set_all(vec![record]),
            None => self.directional.set_all(Vec::new()),
        }

        let releaser = ctx.releaser;
        self.points
            .sync(ctx.device, ctx.encoder, false, |cmd| {
                releaser.submit_resource_free(cmd)
            });
        self.spots
            .sync(ctx.device, ctx.encoder, false, |cmd| {
                releaser.submit_resource_free(cmd)
            });
        self.directional
            .sync(ctx.device, ctx.encoder, false, |cmd| {
                releaser.submit_resource_free(cmd)
            });

        ctx.frame.lights = LightsFrameInfo {
            point_lights: Arc::clone(&self.point_cache),
            spot_lights: Arc::clone(&self.spot_cache),
            directional,
            point_buffer: self.points.buffer(),
            spot_buffer: self.spots.buffer(),
            directional_buffer: if directional.is_some() {
                self.directional.buffer()
            } else {
                None
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    fn point_light() -> PointLight {
        PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            radius: 5.0,
            color: Vec3::ONE,
            intensity: 2.0,
            casts_shadows: true,
            volumetric_intensity: 0.5,
            is_volumetric: false,
        }
    }

    #[test]
    fn gpu_light_records_are_std430_sized() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 416);
        assert_eq!(std::mem::size_of::<GpuSpotLight>(), 112);
        assert_eq!(std::mem::size_of::<GpuDirectionalLight>(), 320);
        assert_eq!(std::mem::size_of::<GpuPointLight>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuSpotLight>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuDirectionalLight>() % 16, 0);
    }

    #[test]
    fn sign_bit_carries_the_shadow_flag() {
        let with = GpuPointLight::new(&point_light());
        assert!(with.casts_shadows());
        assert_eq!(with.radius(), 5.0);
        assert!(!with.is_volumetric());
        assert!(with.radius_squared.is_sign_negative());

        let mut source = point_light();
        source.casts_shadows = false;
        source.is_volumetric = true;
        let without = GpuPointLight::new(&source);
        assert!(!without.casts_shadows());
        assert!(without.is_volumetric());
        assert_eq!(without.radius_squared, 25.0);
    }

    #[test]
    fn spot_cone_angles_are_clamped() {
        let light = SpotLight {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            intensity: 1.0,
            inner_angle: 0.0,
            outer_angle: 2.0,
            distance: 10.0,
            casts_shadows: true,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        };
        let record = GpuSpotLight::new(&light);
        let max = 80.0f32.to_radians();
        let min = 1.0f32.to_radians();
        approx::assert_relative_eq!(record.outer_cutoff, max.cos());
        approx::assert_relative_eq!(record.inner_cutoff, min.cos());
        assert_eq!(record.distance_squared, 100.0);
    }

    #[test]
    fn cascade_fit_covers_the_camera_frustum() {
        let mut camera = CameraData {
            view: Mat4::look_at_rh(Vec3::new(3.0, 4.0, 10.0), Vec3::ZERO, Vec3::Y),
            ..CameraData::default()
        };
        let near = 0.1;
        for (index, far) in camera.cascade_far_planes.into_iter().enumerate() {
            camera.cascade_projections[index] =
                Mat4::perspective_rh(1.2, 16.0 / 9.0, near, far);
        }

        let light = DirectionalLight {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            ambient: Vec3::splat(0.1),
            casts_shadows: true,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        };
        let record = GpuDirectionalLight::new(&light, &camera, 2048);

        for cascade in 0..CASCADES_COUNT {
            let matrix = record.cascade_matrix(cascade);
            let corners =
                frustum_corners_world(camera.view, camera.cascade_projections[cascade]);
            for corner in corners {
                let clip = matrix * corner.extend(1.0);
                let ndc = clip.truncate() / clip.w;
                assert!(ndc.x.abs() <= 1.02, "cascade {cascade}: x = {}", ndc.x);
                assert!(ndc.y.abs() <= 1.02, "cascade {cascade}: y = {}", ndc.y);
                assert!(
                    (-0.01..=1.01).contains(&ndc.z),
                    "cascade {cascade}: z = {}",
                    ndc.z
                );
            }
        }
    }

    #[test]
    fn record_publishes_light_buffers() {
        let mut harness = testing::harness();
        let mut task = LightsManagerTask::new();
        task.set_point_lights(&[point_light(), point_light()]);
        task.set_spot_lights(&[SpotLight {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            intensity: 1.0,
            inner_angle: 0.3,
            outer_angle: 0.6,
            distance: 20.0,
            casts_shadows: false,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        }]);
        task.set_directional_light(Some(DirectionalLight {
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            intensity: 1.0,
            ambient: Vec3::ZERO,
            casts_shadows: true,
            volumetric_intensity: 0.0,
            is_volumetric: false,
        }));

        let commands = harness.record(&mut task);
        let lights = &harness.frame.lights;
        assert_eq!(lights.point_lights.len(), 2);
        assert_eq!(lights.spot_lights.len(), 1);
        assert!(lights.directional.is_some());
        assert!(lights.point_buffer.is_some());
        assert!(lights.spot_buffer.is_some());
        assert!(lights.directional_buffer.is_some());

        let uploads = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::WriteBuffer { .. }))
            .count();
        assert_eq!(uploads, 3);
        assert!(commands
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::StorageBarrier { .. })));
    }

    #[test]
    fn empty_scene_publishes_no_buffers() {
        let mut harness = testing::harness();
        let mut task = LightsManagerTask::new();
        let commands = harness.record(&mut task);
        assert!(commands.is_empty());
        let lights = &harness.frame.lights;
        assert!(lights.point_buffer.is_none());
        assert!(lights.spot_buffer.is_none());
        assert!(lights.directional_buffer.is_none());
        assert!(lights.directional.is_none());
    }
}
