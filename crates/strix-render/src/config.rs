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

//! Compile-time renderer configuration.

/// Number of logical frames the CPU may run ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Size of the deferred resource-release ring. Twice the frames in flight so
/// a resource queued while a background submission is still running cannot be
/// destroyed before that submission retires.
pub const RELEASE_FRAMES_IN_FLIGHT: usize = FRAMES_IN_FLIGHT * 2;

/// Number of directional-light shadow cascades.
pub const CASCADES_COUNT: usize = 4;

/// Base (distance-zero) directional shadow map resolution. The nearest
/// cascade renders at twice this.
pub const DIR_LIGHT_SHADOW_MAP_SIZE: u32 = 2048;

/// Base point-light shadow map resolution (per cube face).
pub const POINT_LIGHT_SHADOW_MAP_SIZE: u32 = 2048;

/// Base spot-light shadow map resolution.
pub const SPOT_LIGHT_SHADOW_MAP_SIZE: u32 = 2048;

/// Minimum shadow map resolution the distance LOD may shrink to.
pub const MIN_SHADOW_MAP_SIZE: u32 = 64;

/// Capacity of the bindless texture table, including the dummy slot 0.
pub const MAX_TEXTURES: usize = 1024;

/// Side length of the precomputed BRDF lookup table.
pub const BRDF_LUT_SIZE: u32 = 512;

/// Compute tile side for the full-screen PBR resolve dispatch.
pub const PBR_TILE_SIZE: u32 = 8;

/// Growth applied to GPU buffers that overflowed: capacity * 3 / 2.
pub const fn grow_capacity(needed: u64, current: u64) -> u64 {
    let mut capacity = if current == 0 { needed } else { current };
    while capacity < needed {
        capacity = capacity * 3 / 2 + 1;
    }
    capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_ring_covers_inflight_submissions() {
        assert!(RELEASE_FRAMES_IN_FLIGHT >= FRAMES_IN_FLIGHT * 2);
    }

    #[test]
    fn grow_capacity_is_monotonic_and_sufficient() {
        let mut capacity = 0;
        let mut max_requested = 0;
        for needed in [16u64, 100, 40, 1000, 999, 1001] {
            capacity = grow_capacity(needed, capacity);
            max_requested = max_requested.max(needed);
            assert!(capacity >= max_requested);
        }
    }

    #[test]
    fn grow_capacity_never_shrinks() {
        let grown = grow_capacity(10, 100);
        assert_eq!(grown, 100);
    }
}
