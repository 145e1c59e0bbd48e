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

//! Integer extents and origins for pixel-based coordinates and sizes.

/// A two-dimensional extent, typically a texture or viewport size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// The width component of the extent.
    pub width: u32,
    /// The height component of the extent.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A square extent with the given side length.
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    /// Total pixel count.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either dimension is zero.
    pub const fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A three-dimensional extent for 3D textures, arrays, or cubemaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3D {
    /// The width component of the extent.
    pub width: u32,
    /// The height component of the extent.
    pub height: u32,
    /// The depth or number of array layers.
    pub depth_or_array_layers: u32,
}

impl Extent3D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32, depth_or_array_layers: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers,
        }
    }

    /// A single-layer 3D extent from a 2D one.
    pub const fn from_2d(extent: Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        }
    }

    /// The 2D base of this extent, dropping depth/layers.
    pub const fn base(&self) -> Extent2D {
        Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// A three-dimensional origin, used as an offset into an image or volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Origin3D {
    /// The x-coordinate of the origin.
    pub x: u32,
    /// The y-coordinate of the origin.
    pub y: u32,
    /// The z-coordinate or array layer of the origin.
    pub z: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_2d_helpers() {
        let e = Extent2D::new(1920, 1080);
        assert_eq!(e.area(), 1920 * 1080);
        assert!(!e.is_degenerate());
        assert!(Extent2D::new(0, 4).is_degenerate());
        assert_eq!(Extent2D::square(64), Extent2D::new(64, 64));
    }

    #[test]
    fn extent_3d_round_trip_2d() {
        let base = Extent2D::new(256, 128);
        let e = Extent3D::from_2d(base);
        assert_eq!(e.depth_or_array_layers, 1);
        assert_eq!(e.base(), base);
    }
}
