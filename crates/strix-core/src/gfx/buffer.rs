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

//! Descriptors for GPU buffer resources.

use crate::strix_bitflags;
use std::borrow::Cow;

strix_bitflags! {
    /// Allowed usages of a buffer, used by the backend for memory placement
    /// and validation.
    pub struct BufferUsage: u32 {
        /// The buffer can be the source of a copy.
        const COPY_SRC = 1 << 0;
        /// The buffer can be the destination of a copy or a CPU write.
        const COPY_DST = 1 << 1;
        /// The buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 2;
        /// The buffer can be bound as an index buffer.
        const INDEX = 1 << 3;
        /// The buffer can be bound as a uniform buffer.
        const UNIFORM = 1 << 4;
        /// The buffer can be bound as a shader storage buffer.
        const STORAGE = 1 << 5;
        /// The buffer can feed indirect draw or dispatch commands.
        const INDIRECT = 1 << 6;
    }
}

/// A descriptor used to create a [`crate::gfx::BufferId`].
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Total size in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

impl<'a> BufferDescriptor<'a> {
    /// Shorthand for a labeled descriptor.
    pub fn new(label: &'a str, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            usage,
        }
    }
}
