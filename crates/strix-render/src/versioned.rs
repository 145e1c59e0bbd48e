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

//! A CPU-shadowed GPU buffer that uploads only what changed.
//!
//! Every geometry kind (mesh transforms, sprite transforms, text transforms)
//! needs the same tri-state upload logic: skip when nothing changed, upload
//! everything after a rebuild, or patch individual elements after cheap
//! per-object updates. [`VersionedBuffer`] implements all three behind one
//! `sync` call, including the "previous frame" copy used for motion vectors.

use crate::command_queue::ReleaseCommand;
use crate::config::grow_capacity;
use bytemuck::Pod;
use strix_core::gfx::{BufferDescriptor, BufferUsage, CommandEncoder};
use strix_core::{BufferId, GraphicsDevice};
use std::borrow::Cow;

/// A growable GPU buffer shadowing a CPU vector, with change tracking.
///
/// Capacity only ever grows (×1.5). The optional *previous* buffer holds last
/// frame's contents for motion-vector consumers and always matches the main
/// buffer's capacity.
pub struct VersionedBuffer<T: Pod> {
    label: &'static str,
    usage: BufferUsage,
    cpu: Vec<T>,
    gpu: Option<BufferId>,
    capacity: u64,
    previous: Option<BufferId>,
    previous_capacity: u64,
    version: u64,
    last_uploaded: u64,
    full_upload: bool,
    dirty_indices: Vec<usize>,
    just_grown: bool,
}

impl<T: Pod> VersionedBuffer<T> {
    /// Creates an empty buffer. Nothing is allocated until the first `sync`.
    pub fn new(label: &'static str, usage: BufferUsage) -> Self {
        Self {
            label,
            usage: usage | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
            cpu: Vec::new(),
            gpu: None,
            capacity: 0,
            previous: None,
            previous_capacity: 0,
            version: 0,
            last_uploaded: 0,
            full_upload: false,
            dirty_indices: Vec::new(),
            just_grown: false,
        }
    }

    /// Replaces the entire contents; the next `sync` reuploads everything.
    pub fn set_all(&mut self, data: Vec<T>) {
        self.cpu = data;
        self.version += 1;
        self.full_upload = true;
        self.dirty_indices.clear();
    }

    /// Patches one element; the next `sync` uploads only patched elements
    /// (unless a full reupload is already pending).
    pub fn update_index(&mut self, index: usize, value: T) {
        if index >= self.cpu.len() {
            log::warn!(
                "VersionedBuffer({}): update_index {index} out of bounds ({} elements)",
                self.label,
                self.cpu.len()
            );
            return;
        }
        self.cpu[index] = value;
        self.version += 1;
        if !self.full_upload {
            self.dirty_indices.push(index);
        }
    }

    /// The CPU-side contents.
    pub fn data(&self) -> &[T] {
        &self.cpu
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    /// The GPU buffer, once allocated.
    pub fn buffer(&self) -> Option<BufferId> {
        self.gpu
    }

    /// Last frame's contents, when `sync` runs with `copy_to_previous`.
    pub fn previous_buffer(&self) -> Option<BufferId> {
        self.previous
    }

    /// Current GPU capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether an upload is pending.
    pub fn is_dirty(&self) -> bool {
        self.version != self.last_uploaded
    }

    /// Releases the previous-contents buffer (motion vectors were disabled).
    pub fn drop_previous(&mut self, mut release: impl FnMut(ReleaseCommand)) {
        if let Some(previous) = self.previous.take() {
            self.previous_capacity = 0;
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_buffer(previous) {
                    log::warn!("Failed to destroy previous-contents buffer: {err}");
                }
            }));
        }
    }

    fn byte_len(&self) -> u64 {
        std::mem::size_of_val(self.cpu.as_slice()) as u64
    }

    fn ensure_main(&mut self, device: &dyn GraphicsDevice, release: &mut impl FnMut(ReleaseCommand)) {
        let needed = self.byte_len();
        if needed == 0 || needed <= self.capacity {
            return;
        }
        let capacity = grow_capacity(needed, self.capacity);
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: Some(Cow::Borrowed(self.label)),
                size: capacity,
                usage: self.usage,
            })
            .unwrap_or_else(|err| {
                panic!("VersionedBuffer({}): buffer allocation failed: {err}", self.label)
            });
        if let Some(old) = self.gpu.replace(buffer) {
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_buffer(old) {
                    log::warn!("Failed to destroy outgrown buffer: {err}");
                }
            }));
        }
        self.capacity = capacity;
        self.just_grown = true;
    }

    fn ensure_previous(
        &mut self,
        device: &dyn GraphicsDevice,
        release: &mut impl FnMut(ReleaseCommand),
    ) {
        if self.previous_capacity >= self.capacity {
            return;
        }
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: Some(Cow::Owned(format!("{} [previous]", self.label))),
                size: self.capacity,
                usage: self.usage,
            })
            .unwrap_or_else(|err| {
                panic!("VersionedBuffer({}): previous-buffer allocation failed: {err}", self.label)
            });
        if let Some(old) = self.previous.replace(buffer) {
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_buffer(old) {
                    log::warn!("Failed to destroy outgrown previous buffer: {err}");
                }
            }));
        }
        self.previous_capacity = self.capacity;
    }

    /// Brings the GPU buffer up to date with the CPU contents.
    ///
    /// Picks one of three strategies:
    /// 1. nothing changed: no upload; with `copy_to_previous`, still copies
    ///    current contents into the previous buffer so motion vectors see a
    ///    zero delta;
    /// 2. full reupload after [`Self::set_all`] (or forced by a growth
    ///    reallocation): with `copy_to_previous`, the old contents are copied
    ///    to the previous buffer first, except when the buffer was just
    ///    grown, in which case the previous buffer receives the *new* data
    ///    because the old allocation no longer exists;
    /// 3. sparse per-element patches from [`Self::update_index`].
    ///
    /// Returns `true` if any upload was recorded.
    pub fn sync(
        &mut self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        copy_to_previous: bool,
        mut release: impl FnMut(ReleaseCommand),
    ) -> bool {
        if self.cpu.is_empty() {
            self.last_uploaded = self.version;
            self.full_upload = false;
            self.dirty_indices.clear();
            return false;
        }

        self.ensure_main(device, &mut release);
        if copy_to_previous {
            self.ensure_previous(device, &mut release);
        }
        let Some(gpu) = self.gpu else {
            return false;
        };
        let bytes_len = self.byte_len();

        if !self.is_dirty() {
            if copy_to_previous {
                if let Some(previous) = self.previous {
                    encoder.copy_buffer_to_buffer(gpu, 0, previous, 0, bytes_len);
                }
            }
            return false;
        }

        let full = self.full_upload || self.just_grown;
        if full {
            // The old contents become last frame's snapshot, unless the
            // buffer was reallocated and they are gone.
            if copy_to_previous && !self.just_grown {
                if let Some(previous) = self.previous {
                    encoder.copy_buffer_to_buffer(gpu, 0, previous, 0, bytes_len);
                }
            }
            encoder.write_buffer(gpu, 0, bytemuck::cast_slice(&self.cpu));
            if copy_to_previous && self.just_grown {
                if let Some(previous) = self.previous {
                    encoder.copy_buffer_to_buffer(gpu, 0, previous, 0, bytes_len);
                }
            }
        } else {
            if copy_to_previous {
                if let Some(previous) = self.previous {
                    encoder.copy_buffer_to_buffer(gpu, 0, previous, 0, bytes_len);
                }
            }
            let stride = std::mem::size_of::<T>() as u64;
            self.dirty_indices.sort_unstable();
            self.dirty_indices.dedup();
            for &index in &self.dirty_indices {
                encoder.write_buffer(
                    gpu,
                    index as u64 * stride,
                    bytemuck::bytes_of(&self.cpu[index]),
                );
            }
        }

        if self.usage.contains(BufferUsage::STORAGE) {
            encoder.storage_buffer_barrier(gpu);
        }

        self.last_uploaded = self.version;
        self.full_upload = false;
        self.dirty_indices.clear();
        self.just_grown = false;
        true
    }

    /// Releases all GPU allocations.
    pub fn destroy(&mut self, mut release: impl FnMut(ReleaseCommand)) {
        for buffer in [self.gpu.take(), self.previous.take()].into_iter().flatten() {
            release(Box::new(move |device| {
                if let Err(err) = device.destroy_buffer(buffer) {
                    log::warn!("Failed to destroy versioned buffer: {err}");
                }
            }));
        }
        self.capacity = 0;
        self.previous_capacity = 0;
    }
}

impl<T: Pod> std::fmt::Debug for VersionedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedBuffer")
            .field("label", &self.label)
            .field("elements", &self.cpu.len())
            .field("capacity", &self.capacity)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_core::gfx::null::{NullGraphicsDevice, RecordedCommand};

    fn run_sync(
        device: &NullGraphicsDevice,
        buffer: &mut VersionedBuffer<[f32; 4]>,
        copy_to_previous: bool,
    ) -> Vec<RecordedCommand> {
        let mut encoder = device.create_command_encoder(None).unwrap();
        buffer.sync(device, encoder.as_mut(), copy_to_previous, |cmd| {
            cmd(device)
        });
        let cmd = encoder.finish();
        device.commands(cmd)
    }

    #[test]
    fn clean_buffer_uploads_nothing() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::STORAGE);
        buffer.set_all(vec![[1.0; 4]; 8]);
        run_sync(&device, &mut buffer, false);

        let ops = run_sync(&device, &mut buffer, false);
        assert!(ops.is_empty());
    }

    #[test]
    fn capacity_grows_and_never_shrinks() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::VERTEX);
        let mut max_capacity = 0;
        for count in [4usize, 100, 10, 50, 200, 199] {
            buffer.set_all(vec![[0.0; 4]; count]);
            run_sync(&device, &mut buffer, false);
            assert!(buffer.capacity() >= (count * 16) as u64);
            assert!(buffer.capacity() >= max_capacity);
            max_capacity = max_capacity.max(buffer.capacity());
        }
        assert_eq!(device.buffer_size(buffer.buffer().unwrap()), Some(max_capacity));
    }

    #[test]
    fn sparse_updates_patch_individual_elements() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::STORAGE);
        buffer.set_all(vec![[0.0; 4]; 16]);
        run_sync(&device, &mut buffer, false);

        buffer.update_index(3, [1.0; 4]);
        buffer.update_index(7, [2.0; 4]);
        buffer.update_index(3, [3.0; 4]);
        let ops = run_sync(&device, &mut buffer, false);

        let writes: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedCommand::WriteBuffer { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![(48, 16), (112, 16)]);
    }

    #[test]
    fn grown_buffer_populates_previous_with_new_data() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::STORAGE);
        buffer.set_all(vec![[0.0; 4]; 4]);
        run_sync(&device, &mut buffer, true);

        // Force a growth reallocation; the copy to previous must happen
        // after the write, sourcing the new contents.
        buffer.set_all(vec![[1.0; 4]; 64]);
        let ops = run_sync(&device, &mut buffer, true);

        let write_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedCommand::WriteBuffer { .. }))
            .unwrap();
        let copy_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedCommand::CopyBuffer { .. }))
            .unwrap();
        assert!(write_pos < copy_pos);
    }

    #[test]
    fn steady_state_copies_old_contents_to_previous_first() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::STORAGE);
        buffer.set_all(vec![[0.0; 4]; 8]);
        run_sync(&device, &mut buffer, true);

        buffer.set_all(vec![[2.0; 4]; 8]);
        let ops = run_sync(&device, &mut buffer, true);

        let copy_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedCommand::CopyBuffer { .. }))
            .unwrap();
        let write_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedCommand::WriteBuffer { .. }))
            .unwrap();
        assert!(copy_pos < write_pos);
    }

    #[test]
    fn storage_usage_emits_barrier_after_upload() {
        let device = NullGraphicsDevice::new();
        let mut buffer = VersionedBuffer::<[f32; 4]>::new("probe", BufferUsage::STORAGE);
        buffer.set_all(vec![[0.0; 4]; 2]);
        let ops = run_sync(&device, &mut buffer, false);
        assert!(matches!(
            ops.last(),
            Some(RecordedCommand::StorageBarrier { .. })
        ));
    }
}
