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

//! Renderer options, applied as one snapshot via
//! [`crate::SceneRenderer::set_options`]. Every task diffs the fields it
//! cares about against its cached copy and rebuilds only what changed.

use crate::config;
use serde::{Deserialize, Serialize};

/// Tone-mapping operator applied by the post-processing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TonemappingMethod {
    /// Pass HDR through (gamma only).
    None,
    /// Reinhard operator.
    Reinhard,
    /// Filmic curve with a configurable white point.
    Filmic,
    /// ACES approximation.
    #[default]
    Aces,
    /// Photographic exposure model.
    PhotoLinear,
}

/// Parameters of the photographic exposure model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotoLinearSettings {
    /// Scene luminance in candela per m².
    pub sensitivity: f32,
    /// Exposure time in seconds.
    pub exposure_time: f32,
    /// Aperture f-number.
    pub f_stop: f32,
}

impl Default for PhotoLinearSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            exposure_time: 0.12,
            f_stop: 1.0,
        }
    }
}

impl PhotoLinearSettings {
    /// The linear scale the tonemapper multiplies HDR color by.
    ///
    /// `H = q L t / N^2` with `q = 0.65`, remapped so middle gray (118/255)
    /// lands at the expected display value under `gamma`.
    pub fn scale(&self, gamma: f32) -> f32 {
        0.65 * self.exposure_time * self.sensitivity / (self.f_stop * self.f_stop) * 10.0
            / (118.0f32 / 255.0).powf(gamma)
    }
}

/// Parameters of the filmic tonemapper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilmicSettings {
    /// Luminance mapped to pure white.
    pub white_point: f32,
}

impl Default for FilmicSettings {
    fn default() -> Self {
        Self { white_point: 1.0 }
    }
}

/// Bloom pass configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloomSettings {
    /// Luminance threshold below which nothing blooms.
    pub threshold: f32,
    /// Output intensity.
    pub intensity: f32,
    /// Soft-knee width around the threshold.
    pub knee: f32,
    /// Whether the bloom task runs at all.
    pub enabled: bool,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.5,
            intensity: 1.0,
            knee: 0.1,
            enabled: true,
        }
    }
}

/// Ambient-occlusion algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AmbientOcclusion {
    /// No AO pass.
    #[default]
    None,
    /// Screen-space ambient occlusion.
    Ssao,
}

/// SSAO configuration. Sample count is kept even and at least 2, matching
/// what the kernel-generation shader expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SsaoSettings {
    samples: u32,
    radius: f32,
    bias: f32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            samples: 64,
            radius: 0.3,
            bias: 0.025,
        }
    }
}

impl SsaoSettings {
    /// Sets the sample count, clamped to an even number >= 2.
    pub fn set_samples(&mut self, samples: u32) {
        self.samples = samples.max(2) & !1u32;
    }

    /// Current sample count.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Sets the sampling radius, clamped non-negative.
    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius.max(0.0);
    }

    /// Current sampling radius.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Sets the depth bias, clamped non-negative.
    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias.max(0.0);
    }

    /// Current depth bias.
    pub fn bias(&self) -> f32 {
        self.bias
    }
}

/// Distance-fog falloff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FogEquation {
    /// Linear between min and max distance.
    #[default]
    Linear,
    /// Exponential in density.
    Exp,
    /// Exponential squared.
    Exp2,
}

/// Distance fog applied during post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FogSettings {
    /// Fog color (linear RGB).
    pub color: [f32; 3],
    /// Anything closer gets no fog.
    pub min_distance: f32,
    /// Everything beyond is fully fogged.
    pub max_distance: f32,
    /// Density for the exponential equations.
    pub density: f32,
    /// Falloff equation.
    pub equation: FogEquation,
    /// Whether fog is applied.
    pub enabled: bool,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            color: [1.0; 3],
            min_distance: 5.0,
            max_distance: 50.0,
            density: 0.05,
            equation: FogEquation::Linear,
            enabled: false,
        }
    }
}

/// Shadow-affecting options, diffed by the shadow pass to rebuild only the
/// pipeline subset whose inputs changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowSettings {
    /// Base directional shadow map resolution.
    pub dir_light_size: u32,
    /// Base point-light shadow map resolution (per face).
    pub point_light_size: u32,
    /// Base spot-light shadow map resolution.
    pub spot_light_size: u32,
    /// Render translucent casters into transmittance maps.
    pub translucent_shadows: bool,
    /// Keep a min-depth attachment for volumetric scattering.
    pub volumetric_light: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            dir_light_size: config::DIR_LIGHT_SHADOW_MAP_SIZE,
            point_light_size: config::POINT_LIGHT_SHADOW_MAP_SIZE,
            spot_light_size: config::SPOT_LIGHT_SHADOW_MAP_SIZE,
            translucent_shadows: false,
            volumetric_light: false,
        }
    }
}

/// G-Buffer attachments that exist only when a consumer needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalGBuffers {
    /// Per-pixel motion vectors (TAA, motion blur).
    pub motion: bool,
}

impl Default for OptionalGBuffers {
    fn default() -> Self {
        Self { motion: true }
    }
}

/// The complete renderer options snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRendererSettings {
    /// Bloom pass options.
    pub bloom: BloomSettings,
    /// SSAO options.
    pub ssao: SsaoSettings,
    /// Fog options.
    pub fog: FogSettings,
    /// Shadow options.
    pub shadows: ShadowSettings,
    /// Photographic tonemapper parameters.
    pub photo_linear: PhotoLinearSettings,
    /// Filmic tonemapper parameters.
    pub filmic: FilmicSettings,
    /// Display gamma.
    pub gamma: f32,
    /// Exposure multiplier.
    pub exposure: f32,
    /// Debug line width in pixels.
    pub line_width: f32,
    /// Tone-mapping operator.
    pub tonemapping: TonemappingMethod,
    /// AO algorithm.
    pub ao: AmbientOcclusion,
    /// Filtered (PCF + Poisson) shadow sampling.
    pub soft_shadows: bool,
    /// Tint cascades for debugging CSM splits.
    pub visualize_cascades: bool,
    /// Avoid lighting-shader rebuilds on light-count changes by using the
    /// uber variant; trades shader speed for zero pipeline-rebuild stalls.
    pub stutterless: bool,
    /// Optional G-Buffer attachments.
    pub optional_gbuffers: OptionalGBuffers,
}

impl Default for SceneRendererSettings {
    fn default() -> Self {
        Self {
            bloom: BloomSettings::default(),
            ssao: SsaoSettings::default(),
            fog: FogSettings::default(),
            shadows: ShadowSettings::default(),
            photo_linear: PhotoLinearSettings::default(),
            filmic: FilmicSettings::default(),
            gamma: 2.2,
            exposure: 1.0,
            line_width: 2.5,
            tonemapping: TonemappingMethod::Aces,
            ao: AmbientOcclusion::None,
            soft_shadows: true,
            visualize_cascades: false,
            stutterless: false,
            optional_gbuffers: OptionalGBuffers::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssao_sample_count_is_clamped_even() {
        let mut ssao = SsaoSettings::default();
        ssao.set_samples(1);
        assert_eq!(ssao.samples(), 2);
        ssao.set_samples(33);
        assert_eq!(ssao.samples(), 32);
    }

    #[test]
    fn photo_linear_scale_grows_with_exposure_time() {
        let base = PhotoLinearSettings::default();
        let mut longer = base;
        longer.exposure_time *= 2.0;
        assert!(longer.scale(2.2) > base.scale(2.2));
    }

    #[test]
    fn settings_diff_by_equality() {
        let a = SceneRendererSettings::default();
        let mut b = a.clone();
        assert_eq!(a, b);
        b.shadows.translucent_shadows = true;
        assert_ne!(a, b);
    }
}
