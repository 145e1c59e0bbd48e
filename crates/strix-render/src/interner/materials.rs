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

//! The material interner and its GPU storage buffer.

use crate::command_queue::ReleaseCommand;
use crate::config::grow_capacity;
use crate::interner::TextureSystem;
use crate::material::{GpuMaterial, Material};
use crate::tasks::fatal;
use ahash::{AHashMap, AHashSet};
use std::borrow::Cow;
use strix_core::gfx::{BufferDescriptor, BufferUsage, CommandEncoder};
use strix_core::{BufferId, GraphicsDevice};
use uuid::Uuid;

/// Index returned for unknown materials; slot 0 of the buffer is a neutral
/// dummy record.
pub const DUMMY_MATERIAL_INDEX: u32 = 0;

/// Interns materials and keeps their packed records in one storage buffer.
///
/// Render-thread-only: geometry tasks add and mark materials while they
/// rebuild, and a single dirty-frame [`Self::update`] prunes, repacks and
/// uploads. Entries not marked since the previous prune are considered
/// unreferenced and dropped; tasks re-mark everything they still draw on
/// every rebuild, so a live material can never age out.
#[derive(Debug)]
pub struct MaterialSystem {
    materials: Vec<Material>,
    index_map: AHashMap<Uuid, u32>,
    live_marks: AHashSet<Uuid>,
    buffer: Option<BufferId>,
    capacity: u64,
    dirty: bool,
    changed: bool,
    generation: u64,
}

impl Default for MaterialSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialSystem {
    /// Creates an empty system; the first `update` allocates the buffer.
    pub fn new() -> Self {
        Self {
            materials: Vec::new(),
            index_map: AHashMap::new(),
            live_marks: AHashSet::new(),
            buffer: None,
            capacity: 0,
            dirty: true,
            changed: true,
            generation: 0,
        }
    }

    /// Interns a material and returns its shading index.
    ///
    /// Re-adding a known GUID refreshes the stored copy (and dirties the
    /// system if the surface values changed). The returned index is the
    /// packed position plus one; 0 stays reserved for the dummy record.
    pub fn add_material(&mut self, material: &Material) -> u32 {
        self.live_marks.insert(material.guid);
        if let Some(&position) = self.index_map.get(&material.guid) {
            if self.materials[position as usize] != *material {
                self.materials[position as usize] = material.clone();
                self.set_dirty();
            }
            return position + 1;
        }

        let position = self.materials.len() as u32;
        self.materials.push(material.clone());
        self.index_map.insert(material.guid, position);
        self.set_dirty();
        position + 1
    }

    /// Erases a material immediately and reindexes the survivors.
    pub fn remove_material(&mut self, guid: Uuid) {
        let Some(position) = self.index_map.remove(&guid) else {
            return;
        };
        self.materials.remove(position as usize);
        self.live_marks.remove(&guid);
        self.reindex();
        self.generation += 1;
        self.set_dirty();
    }

    /// Records that a material is still referenced. Geometry tasks call
    /// this for every material they draw whenever they rebuild.
    pub fn mark_used(&mut self, guid: Uuid) {
        self.live_marks.insert(guid);
    }

    /// Resolves a GUID to its shading index; unknown GUIDs resolve to the
    /// dummy with a warning.
    pub fn material_index(&self, guid: Uuid) -> u32 {
        match self.index_map.get(&guid) {
            Some(&position) => position + 1,
            None => {
                log::warn!("Unknown material `{guid}`; substituting the dummy material");
                DUMMY_MATERIAL_INDEX
            }
        }
    }

    /// Whether the set changed during the frame that last ran `update`.
    /// Stays true until the first clean `update` afterwards, so every task
    /// recording later in the same frame sees the change.
    pub fn has_changed(&self) -> bool {
        self.changed
    }

    /// Count of index-shifting repacks (removals and prunes). Appends keep
    /// existing positions, so consumers holding baked indices only need to
    /// re-resolve when this changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forces a repack on the next `update`.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
        self.changed = true;
    }

    /// The packed materials storage buffer.
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Number of live materials (dummy excluded).
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether no materials are interned.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    fn reindex(&mut self) {
        self.index_map.clear();
        for (position, material) in self.materials.iter().enumerate() {
            self.index_map.insert(material.guid, position as u32);
        }
    }

    /// Prunes unreferenced materials, repacks the records and uploads them.
    ///
    /// No-op on a clean system (this also lowers [`Self::has_changed`]).
    /// Returns `true` if an upload was recorded.
    pub fn update(
        &mut self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        textures: &TextureSystem,
        mut release: impl FnMut(ReleaseCommand),
    ) -> bool {
        if !self.dirty {
            // Keeps the changed flag raised for the whole frame that
            // mutated the set, then lowers it here on the next frame.
            self.changed = false;
            return false;
        }

        let marks = std::mem::take(&mut self.live_marks);
        let before = self.materials.len();
        self.materials
            .retain(|material| marks.contains(&material.guid));
        if self.materials.len() != before {
            self.reindex();
            self.generation += 1;
        }

        let mut records = Vec::with_capacity(self.materials.len() + 1);
        records.push(GpuMaterial::dummy());
        for material in &self.materials {
            records.push(GpuMaterial::pack(material, |slot| {
                slot.map_or(0, |guid| textures.texture_index(guid))
            }));
        }

        let needed = (records.len() * std::mem::size_of::<GpuMaterial>()) as u64;
        if needed > self.capacity {
            let capacity = grow_capacity(needed, self.capacity);
            let buffer = fatal(
                device.create_buffer(&BufferDescriptor {
                    label: Some(Cow::Borrowed("Materials")),
                    size: capacity,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                }),
                "Failed to grow the materials buffer",
            );
            if let Some(old) = self.buffer.replace(buffer) {
                release(Box::new(move |device| {
                    if let Err(err) = device.destroy_buffer(old) {
                        log::warn!("Failed to destroy outgrown materials buffer: {err}");
                    }
                }));
            }
            self.capacity = capacity;
        }

        if let Some(buffer) = self.buffer {
            encoder.write_buffer(buffer, 0, bytemuck::cast_slice(&records));
            encoder.storage_buffer_barrier(buffer);
        }

        self.dirty = false;
        true
    }

    /// Releases the storage buffer.
    pub fn destroy(&mut self, mut release: impl FnMut(ReleaseCommand)) {
        if let Some(buffer) = self.buffer.take() {
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_buffer(buffer) {
                    log::warn!("Failed to destroy materials buffer: {err}");
                }
            }));
        }
        self.capacity = 0;
        self.materials.clear();
        self.index_map.clear();
        self.live_marks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_core::gfx::null::{NullGraphicsDevice, RecordedCommand};

    fn run_update(device: &NullGraphicsDevice, system: &mut MaterialSystem) -> Vec<RecordedCommand> {
        let textures = TextureSystem::new(strix_core::gfx::ImageId(0), strix_core::gfx::SamplerId(0));
        let mut encoder = device.create_command_encoder(None).unwrap();
        system.update(device, encoder.as_mut(), &textures, |cmd| cmd(device));
        let cmd = encoder.finish();
        device.commands(cmd)
    }

    #[test]
    fn indices_start_after_the_dummy_slot() {
        let mut system = MaterialSystem::new();
        let material = Material::new();
        let index = system.add_material(&material);
        assert_eq!(index, 1);
        assert_eq!(system.material_index(material.guid), 1);
    }

    #[test]
    fn adding_twice_is_stable_and_does_not_redirty() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        let material = Material::new();
        let index = system.add_material(&material);
        run_update(&device, &mut system);

        assert_eq!(system.add_material(&material), index);
        let ops = run_update(&device, &mut system);
        assert!(ops.is_empty());
    }

    #[test]
    fn clean_update_lowers_the_changed_flag() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        system.add_material(&Material::new());
        run_update(&device, &mut system);
        assert!(system.has_changed());
        run_update(&device, &mut system);
        assert!(!system.has_changed());
    }

    #[test]
    fn unmarked_materials_are_pruned_on_dirty_update() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        let kept = Material::new();
        let dropped = Material::new();
        system.add_material(&kept);
        system.add_material(&dropped);
        run_update(&device, &mut system);

        system.set_dirty();
        system.mark_used(kept.guid);
        run_update(&device, &mut system);

        assert_eq!(system.len(), 1);
        assert_eq!(system.material_index(kept.guid), 1);
        assert_eq!(system.material_index(dropped.guid), DUMMY_MATERIAL_INDEX);
    }

    #[test]
    fn only_index_shifting_repacks_bump_the_generation() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        let kept = Material::new();
        let dropped = Material::new();
        system.add_material(&kept);
        system.add_material(&dropped);
        assert_eq!(system.generation(), 0);
        run_update(&device, &mut system);
        assert_eq!(system.generation(), 0);

        system.set_dirty();
        system.mark_used(kept.guid);
        run_update(&device, &mut system);
        assert_eq!(system.generation(), 1);

        system.remove_material(kept.guid);
        assert_eq!(system.generation(), 2);
    }

    #[test]
    fn upload_ends_with_a_storage_barrier() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        system.add_material(&Material::new());
        let ops = run_update(&device, &mut system);
        assert!(matches!(
            ops.last(),
            Some(RecordedCommand::StorageBarrier { .. })
        ));
    }

    #[test]
    fn buffer_capacity_never_shrinks() {
        let device = NullGraphicsDevice::new();
        let mut system = MaterialSystem::new();
        let materials: Vec<Material> = (0..64).map(|_| Material::new()).collect();
        for material in &materials {
            system.add_material(material);
        }
        run_update(&device, &mut system);
        let grown = device.buffer_size(system.buffer().unwrap()).unwrap();

        system.set_dirty();
        system.mark_used(materials[0].guid);
        run_update(&device, &mut system);
        assert_eq!(device.buffer_size(system.buffer().unwrap()), Some(grown));
    }
}
