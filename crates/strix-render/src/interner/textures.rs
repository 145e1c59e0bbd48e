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

//! The bindless texture slot table.

use crate::config::MAX_TEXTURES;
use ahash::AHashMap;
use std::sync::Mutex;
use strix_core::gfx::{ImageId, SamplerId};
use uuid::Uuid;

/// Index of the dummy texture every unbound slot points at.
pub const DUMMY_TEXTURE_INDEX: u32 = 0;

struct TextureTable {
    images: Vec<ImageId>,
    samplers: Vec<SamplerId>,
    index_map: AHashMap<Uuid, u32>,
    free_indices: Vec<u32>,
    next_index: u32,
    last_updated_at_frame: u64,
    dummy_image: ImageId,
    dummy_sampler: SamplerId,
}

/// Interns textures into a dense slot table sized for one bindless array.
///
/// Asset-loader threads add and remove textures concurrently with the render
/// thread resolving indices, so the whole table sits behind one mutex.
/// Consumers that bake the table into descriptor sets poll
/// [`Self::last_updated_at_frame`] and rebind when it moved.
#[derive(Debug)]
pub struct TextureSystem {
    inner: Mutex<TextureTable>,
}

impl std::fmt::Debug for TextureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureTable")
            .field("live", &self.index_map.len())
            .field("free", &self.free_indices.len())
            .field("last_updated_at_frame", &self.last_updated_at_frame)
            .finish()
    }
}

impl TextureSystem {
    /// Creates the table with every slot pointing at the dummy texture.
    pub fn new(dummy_image: ImageId, dummy_sampler: SamplerId) -> Self {
        Self {
            inner: Mutex::new(TextureTable {
                images: vec![dummy_image; MAX_TEXTURES],
                samplers: vec![dummy_sampler; MAX_TEXTURES],
                index_map: AHashMap::with_capacity(MAX_TEXTURES),
                free_indices: Vec::new(),
                next_index: 1,
                last_updated_at_frame: 0,
                dummy_image,
                dummy_sampler,
            }),
        }
    }

    /// Interns a texture, returning its slot index.
    ///
    /// The same GUID always returns the same index without growing the
    /// table. A full table logs a critical error and returns the dummy
    /// index; rendering continues with the wrong texture rather than
    /// aborting the frame.
    pub fn add_texture(&self, guid: Uuid, image: ImageId, sampler: SamplerId) -> u32 {
        let mut table = self.inner.lock().unwrap();
        if let Some(&index) = table.index_map.get(&guid) {
            return index;
        }

        let index = match table.free_indices.pop() {
            Some(index) => index,
            None => {
                if table.next_index as usize >= MAX_TEXTURES {
                    log::error!(
                        "Texture table is full ({MAX_TEXTURES} slots); `{guid}` falls back to the dummy texture"
                    );
                    return DUMMY_TEXTURE_INDEX;
                }
                let index = table.next_index;
                table.next_index += 1;
                index
            }
        };

        table.images[index as usize] = image;
        table.samplers[index as usize] = sampler;
        table.index_map.insert(guid, index);
        table.last_updated_at_frame += 1;
        index
    }

    /// Replaces the handles of an interned texture in place (hot reload).
    /// Unknown GUIDs are ignored.
    pub fn update_texture(&self, guid: Uuid, image: ImageId, sampler: SamplerId) {
        let mut table = self.inner.lock().unwrap();
        if let Some(&index) = table.index_map.get(&guid) {
            table.images[index as usize] = image;
            table.samplers[index as usize] = sampler;
            table.last_updated_at_frame += 1;
        }
    }

    /// Forgets a texture, pointing its slot back at the dummy so in-flight
    /// frames read stale-but-valid data. Returns the evicted handles so the
    /// caller can route them through the release ring.
    pub fn remove_texture(&self, guid: Uuid) -> Option<(ImageId, SamplerId)> {
        let mut table = self.inner.lock().unwrap();
        let index = table.index_map.remove(&guid)?;
        let evicted = (
            table.images[index as usize],
            table.samplers[index as usize],
        );
        table.images[index as usize] = table.dummy_image;
        table.samplers[index as usize] = table.dummy_sampler;
        table.free_indices.push(index);
        table.last_updated_at_frame += 1;
        Some(evicted)
    }

    /// Resolves a GUID to its slot index; unknown GUIDs resolve to the
    /// dummy with a warning.
    pub fn texture_index(&self, guid: Uuid) -> u32 {
        let table = self.inner.lock().unwrap();
        match table.index_map.get(&guid) {
            Some(&index) => index,
            None => {
                log::warn!("Unknown texture `{guid}`; substituting the dummy texture");
                DUMMY_TEXTURE_INDEX
            }
        }
    }

    /// Monotonic counter bumped on every table mutation.
    pub fn last_updated_at_frame(&self) -> u64 {
        self.inner.lock().unwrap().last_updated_at_frame
    }

    /// Number of live (non-dummy) entries.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().index_map.len()
    }

    /// Snapshot of the full slot table for descriptor binding.
    pub fn bind_tables(&self) -> (Vec<ImageId>, Vec<SamplerId>) {
        let table = self.inner.lock().unwrap();
        (table.images.clone(), table.samplers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> TextureSystem {
        TextureSystem::new(ImageId(0), SamplerId(0))
    }

    #[test]
    fn same_guid_interns_once() {
        let textures = system();
        let guid = Uuid::new_v4();
        let first = textures.add_texture(guid, ImageId(10), SamplerId(1));
        let second = textures.add_texture(guid, ImageId(10), SamplerId(1));
        assert_eq!(first, second);
        assert_eq!(textures.live_count(), 1);
    }

    #[test]
    fn dummy_index_is_never_handed_out() {
        let textures = system();
        for n in 0..8 {
            let index = textures.add_texture(Uuid::new_v4(), ImageId(n), SamplerId(1));
            assert_ne!(index, DUMMY_TEXTURE_INDEX);
        }
    }

    #[test]
    fn removed_slot_points_at_dummy_and_is_reused() {
        let textures = system();
        let guid = Uuid::new_v4();
        let index = textures.add_texture(guid, ImageId(10), SamplerId(1));
        let stamp = textures.last_updated_at_frame();

        let evicted = textures.remove_texture(guid);
        assert_eq!(evicted, Some((ImageId(10), SamplerId(1))));
        assert!(textures.last_updated_at_frame() > stamp);
        let (images, _) = textures.bind_tables();
        assert_eq!(images[index as usize], ImageId(0));

        let reused = textures.add_texture(Uuid::new_v4(), ImageId(11), SamplerId(1));
        assert_eq!(reused, index);
    }

    #[test]
    fn unknown_guid_resolves_to_dummy() {
        let textures = system();
        assert_eq!(textures.texture_index(Uuid::new_v4()), DUMMY_TEXTURE_INDEX);
    }

    #[test]
    fn full_table_degrades_to_dummy() {
        let textures = system();
        for _ in 1..MAX_TEXTURES {
            assert_ne!(
                textures.add_texture(Uuid::new_v4(), ImageId(1), SamplerId(1)),
                DUMMY_TEXTURE_INDEX
            );
        }
        assert_eq!(
            textures.add_texture(Uuid::new_v4(), ImageId(1), SamplerId(1)),
            DUMMY_TEXTURE_INDEX
        );
    }
}
