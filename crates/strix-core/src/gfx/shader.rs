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

//! Descriptors for shader modules.
//!
//! Shader source and compilation live entirely in the backend; the frame
//! pipeline only names modules and the preprocessor defines that select
//! their variants.

use std::borrow::Cow;

/// An opaque handle to a compiled shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderModuleId(pub usize);

/// The pipeline stage a shader module runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
    /// Compute stage.
    Compute,
}

/// A preprocessor define baked into a shader variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDefine {
    /// Define name, e.g. `SOFT_SHADOWS`.
    pub name: Cow<'static, str>,
    /// Define value; empty for flag-style defines.
    pub value: Cow<'static, str>,
}

impl ShaderDefine {
    /// A flag-style define with no value.
    pub fn flag(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            value: Cow::Borrowed(""),
        }
    }

    /// A define with a value.
    pub fn value(name: &'static str, value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Cow::Borrowed(name),
            value: value.into(),
        }
    }
}

/// A descriptor used to create a [`ShaderModuleId`].
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Logical source name resolved by the backend (e.g. `"shadow_mesh"`).
    pub source: Cow<'a, str>,
    /// Stage this module runs at.
    pub stage: ShaderStage,
    /// Variant-selecting defines.
    pub defines: Vec<ShaderDefine>,
}

impl<'a> ShaderModuleDescriptor<'a> {
    /// Shorthand for a define-free module.
    pub fn new(source: &'a str, stage: ShaderStage) -> Self {
        Self {
            label: Some(Cow::Borrowed(source)),
            source: Cow::Borrowed(source),
            stage,
            defines: Vec::new(),
        }
    }

    /// Adds a preprocessor define.
    #[must_use]
    pub fn with_define(mut self, define: ShaderDefine) -> Self {
        self.defines.push(define);
        self
    }
}
