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

//! Errors surfaced by the frame pipeline during setup and shutdown.
//!
//! Inside the steady-state frame loop nothing returns a recoverable error:
//! GPU failures there are treated as fatal (see the manager module). These
//! types cover the phases where a caller can still react, i.e. renderer
//! construction and teardown.

use crate::scene::StageOrderError;
use strix_core::{RenderError, ResourceError};
use thiserror::Error;

/// An error produced while building or tearing down the frame pipeline.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A persistent resource (dummy texture, BRDF LUT, fence ring) could not
    /// be created.
    #[error("failed to create persistent renderer resource: {0}")]
    Setup(#[from] ResourceError),

    /// The device rejected an operation during setup or teardown.
    #[error("graphics device error: {0}")]
    Device(#[from] RenderError),

    /// The stage list consumes a resource no earlier stage produces.
    #[error("invalid frame pipeline: {0}")]
    Pipeline(#[from] StageOrderError),

    /// The render worker thread could not be spawned or joined.
    #[error("render worker error: {0}")]
    Worker(String),
}
