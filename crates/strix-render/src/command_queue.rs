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

//! Per-frame queues of deferred renderer work.
//!
//! Work is accumulated, not executed: everything the engine wants done on
//! the GPU for a logical frame is appended here as a boxed closure and
//! replayed in FIFO order when that frame's command buffer is actually
//! recorded on the render worker.

use strix_core::gfx::CommandEncoder;
use strix_core::GraphicsDevice;

/// A deferred command replayed while recording a frame's command buffer.
pub type RenderCommand = Box<dyn FnOnce(&dyn GraphicsDevice, &mut dyn CommandEncoder) + Send>;

/// A deferred resource destruction, executed once the release ring proves
/// no in-flight frame can still reference the resource.
pub type ReleaseCommand = Box<dyn FnOnce(&dyn GraphicsDevice) + Send>;

/// An append-only FIFO of [`RenderCommand`]s for one frame slot.
#[derive(Default)]
pub struct RenderCommandQueue {
    commands: Vec<RenderCommand>,
}

impl RenderCommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command.
    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Takes all pending commands, leaving the queue empty for reuse.
    pub fn drain(&mut self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Executes all pending commands in FIFO order.
    pub fn execute(&mut self, device: &dyn GraphicsDevice, encoder: &mut dyn CommandEncoder) {
        for command in self.commands.drain(..) {
            command(device, encoder);
        }
    }
}

impl std::fmt::Debug for RenderCommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCommandQueue")
            .field("pending", &self.commands.len())
            .finish()
    }
}

/// An append-only FIFO of [`ReleaseCommand`]s for one release-ring slot.
#[derive(Default)]
pub struct ReleaseQueue {
    commands: Vec<ReleaseCommand>,
}

impl ReleaseQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a destruction command.
    pub fn push(&mut self, command: ReleaseCommand) {
        self.commands.push(command);
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Executes all pending destructions in FIFO order.
    pub fn execute(&mut self, device: &dyn GraphicsDevice) {
        for command in self.commands.drain(..) {
            command(device);
        }
    }
}

impl std::fmt::Debug for ReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseQueue")
            .field("pending", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use strix_core::gfx::null::NullGraphicsDevice;

    #[test]
    fn commands_run_in_fifo_order() {
        let device = NullGraphicsDevice::new();
        let order = Arc::new(AtomicUsize::new(0));
        let mut queue = RenderCommandQueue::new();
        for expected in 0..4usize {
            let order = Arc::clone(&order);
            queue.push(Box::new(move |_, _| {
                assert_eq!(order.fetch_add(1, Ordering::SeqCst), expected);
            }));
        }
        let mut encoder = device.create_command_encoder(None).unwrap();
        queue.execute(&device, encoder.as_mut());
        assert_eq!(order.load(Ordering::SeqCst), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn release_queue_drains_on_execute() {
        let device = NullGraphicsDevice::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let mut queue = ReleaseQueue::new();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            queue.push(Box::new(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.execute(&device);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
        queue.execute(&device);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}
