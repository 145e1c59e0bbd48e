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

//! The hierarchy of error types for the graphics layer.

use super::shader::ShaderModuleId;
use std::fmt;

/// An error related to loading or compiling a shader module.
#[derive(Debug)]
pub enum ShaderError {
    /// The shader source could not be resolved or read.
    SourceUnavailable {
        /// Logical source name that failed to resolve.
        source: String,
        /// Backend detail.
        details: String,
    },
    /// The source failed to compile into a backend module.
    Compilation {
        /// Descriptive label for the shader, if available.
        label: String,
        /// Compiler diagnostics.
        details: String,
    },
    /// The referenced shader module does not exist.
    NotFound {
        /// The missing module.
        id: ShaderModuleId,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::SourceUnavailable { source, details } => {
                write!(f, "Shader source '{source}' unavailable: {details}")
            }
            ShaderError::Compilation { label, details } => {
                write!(f, "Shader compilation failed for '{label}': {details}")
            }
            ShaderError::NotFound { id } => {
                write!(f, "Shader module not found: {id:?}")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to building a pipeline state object.
#[derive(Debug)]
pub enum PipelineError {
    /// A shader-stage error occurred while building the pipeline.
    Shader(ShaderError),
    /// The backend rejected the pipeline state.
    Compilation {
        /// Descriptive label for the pipeline, if available.
        label: Option<String>,
        /// Backend diagnostics.
        details: String,
    },
    /// An attachment format is incompatible with the pipeline or device.
    IncompatibleAttachment(String),
    /// A required device feature (e.g. multiview) is unavailable.
    FeatureNotSupported(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Shader(err) => write!(f, "Pipeline shader stage error: {err}"),
            PipelineError::Compilation { label, details } => {
                write!(
                    f,
                    "Pipeline compilation failed for '{}': {}",
                    label.as_deref().unwrap_or("unlabeled"),
                    details
                )
            }
            PipelineError::IncompatibleAttachment(msg) => {
                write!(f, "Incompatible pipeline attachment: {msg}")
            }
            PipelineError::FeatureNotSupported(msg) => {
                write!(f, "Device feature not supported: {msg}")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Shader(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for PipelineError {
    fn from(err: ShaderError) -> Self {
        PipelineError::Shader(err)
    }
}

/// An error related to creating or using a GPU resource.
#[derive(Debug)]
pub enum ResourceError {
    /// A shader-specific error.
    Shader(ShaderError),
    /// A pipeline-specific error.
    Pipeline(PipelineError),
    /// The handle does not reference a live resource.
    InvalidHandle,
    /// The device could not satisfy the allocation.
    OutOfMemory {
        /// What was being allocated.
        what: String,
        /// Requested size in bytes, when known.
        size: u64,
    },
    /// An error surfaced by the backend implementation.
    Backend(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle."),
            ResourceError::OutOfMemory { what, size } => {
                write!(f, "Out of device memory allocating {what} ({size} bytes)")
            }
            ResourceError::Backend(msg) => write!(f, "Backend resource error: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// A high-level error within the rendering device or frame loop.
#[derive(Debug)]
pub enum RenderError {
    /// Graphics backend initialization failed.
    InitializationFailed(String),
    /// The next swapchain image could not be acquired.
    SurfaceAcquisitionFailed(String),
    /// Command buffer submission was rejected.
    SubmissionFailed(String),
    /// A resource operation failed.
    Resource(ResourceError),
    /// The device was lost; requires reinitialization.
    DeviceLost,
    /// An internal invariant was violated.
    Internal(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize graphics backend: {msg}")
            }
            RenderError::SurfaceAcquisitionFailed(msg) => {
                write!(f, "Failed to acquire surface image: {msg}")
            }
            RenderError::SubmissionFailed(msg) => {
                write!(f, "Command buffer submission failed: {msg}")
            }
            RenderError::Resource(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::DeviceLost => {
                write!(f, "The graphics device was lost and must be reinitialized.")
            }
            RenderError::Internal(msg) => write!(f, "Internal rendering error: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::Resource(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn shader_error_display() {
        let err = ShaderError::Compilation {
            label: "pbr_resolve".to_string(),
            details: "unknown identifier at line 12".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Shader compilation failed for 'pbr_resolve': unknown identifier at line 12"
        );
    }

    #[test]
    fn resource_error_wraps_shader_error() {
        let err: ResourceError = ShaderError::NotFound {
            id: ShaderModuleId(7),
        }
        .into();
        assert_eq!(
            format!("{err}"),
            "Shader resource error: Shader module not found: ShaderModuleId(7)"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn render_error_chains_two_levels() {
        let pipeline_err: PipelineError = ShaderError::SourceUnavailable {
            source: "shadow_mesh".to_string(),
            details: "missing".to_string(),
        }
        .into();
        let err: RenderError = ResourceError::from(pipeline_err).into();
        assert!(format!("{err}").starts_with("Graphics resource operation failed:"));
        assert!(err.source().unwrap().source().is_some());
    }

    #[test]
    fn out_of_memory_display() {
        let err = ResourceError::OutOfMemory {
            what: "transform buffer".to_string(),
            size: 4096,
        };
        assert_eq!(
            format!("{err}"),
            "Out of device memory allocating transform buffer (4096 bytes)"
        );
    }
}
