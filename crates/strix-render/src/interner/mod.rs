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

//! Resource interners mapping asset GUIDs to stable GPU-facing indices.
//!
//! Both systems reserve index 0 for a dummy resource so shaders can always
//! sample *something*; lookups for unknown assets degrade to that slot with
//! a logged warning instead of failing the frame.

mod materials;
mod textures;

pub use materials::{MaterialSystem, DUMMY_MATERIAL_INDEX};
pub use textures::{TextureSystem, DUMMY_TEXTURE_INDEX};
