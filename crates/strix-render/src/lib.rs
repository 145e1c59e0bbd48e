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

//! # Strix Render
//!
//! The deferred PBR frame pipeline: a triple-buffered frame scheduler
//! ([`RenderManager`]), the ordered render-task pipeline orchestrated by
//! [`SceneRenderer`], and the resource interners ([`MaterialSystem`],
//! [`TextureSystem`]) that keep GPU-visible material and texture tables
//! addressable by stable integer indices.
//!
//! The game thread feeds the pipeline scene snapshots and closures via
//! [`RenderManager::submit`]; a single dedicated worker thread replays them
//! into a command buffer, submits, and presents, at most
//! [`config::FRAMES_IN_FLIGHT`] frames ahead of the GPU.

pub mod command_queue;
pub mod config;
pub mod error;
pub mod interner;
pub mod manager;
pub mod material;
pub mod scene;
pub mod settings;
pub mod tasks;
pub mod timings;
pub mod versioned;

pub use error::FrameError;
pub use interner::{MaterialSystem, TextureSystem};
pub use manager::RenderManager;
pub use scene::SceneRenderer;
pub use settings::SceneRendererSettings;
