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

//! Descriptors for texture samplers.

use super::pipeline::CompareOp;
use std::borrow::Cow;

/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbor.
    Nearest,
    /// Linear interpolation.
    #[default]
    Linear,
}

/// Behavior when sampling outside `[0, 1]` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Tile the texture.
    #[default]
    Repeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Clamp to an opaque border.
    ClampToBorder,
}

/// A descriptor used to create a [`crate::gfx::SamplerId`].
#[derive(Debug, Clone)]
pub struct SamplerDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Minification/magnification filter.
    pub filter: FilterMode,
    /// Filter between mip levels.
    pub mip_filter: FilterMode,
    /// Addressing for all three coordinates.
    pub address_mode: AddressMode,
    /// Maximum anisotropy; 1 disables anisotropic filtering.
    pub max_anisotropy: f32,
    /// Depth-comparison mode for shadow samplers.
    pub compare: Option<CompareOp>,
}

impl Default for SamplerDescriptor<'_> {
    fn default() -> Self {
        Self {
            label: None,
            filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
            max_anisotropy: 1.0,
            compare: None,
        }
    }
}

impl<'a> SamplerDescriptor<'a> {
    /// A point (nearest, no mips) sampler.
    pub fn point(label: &'a str) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            filter: FilterMode::Nearest,
            mip_filter: FilterMode::Nearest,
            ..Default::default()
        }
    }

    /// A bilinear sampler without mip interpolation.
    pub fn bilinear(label: &'a str) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            mip_filter: FilterMode::Nearest,
            ..Default::default()
        }
    }

    /// A trilinear sampler.
    pub fn trilinear(label: &'a str) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            ..Default::default()
        }
    }

    /// A comparison sampler for shadow-map PCF reads.
    pub fn shadow(label: &'a str) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            address_mode: AddressMode::ClampToBorder,
            compare: Some(CompareOp::LessOrEqual),
            ..Default::default()
        }
    }
}
