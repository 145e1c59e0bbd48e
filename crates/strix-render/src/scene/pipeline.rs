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

//! The data-driven description of the frame pipeline.
//!
//! Each stage declares the frame resources it consumes and produces by
//! name. The description is validated once at renderer construction, so a
//! stage reordered in front of its inputs fails fast instead of reading
//! stale data for the rest of the session.

/// One stage of the frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDesc {
    /// Stage name, used in validation errors and GPU timings.
    pub name: &'static str,
    /// Frame resources this stage reads; each must be produced earlier.
    pub inputs: &'static [&'static str],
    /// Frame resources this stage writes.
    pub outputs: &'static [&'static str],
}

/// A stage ordering error found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOrderError {
    /// The offending stage.
    pub stage: &'static str,
    /// The input no earlier stage produces.
    pub missing_input: &'static str,
}

impl std::fmt::Display for StageOrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stage '{}' consumes '{}' which no earlier stage produces",
            self.stage, self.missing_input
        )
    }
}

impl std::error::Error for StageOrderError {}

/// Checks that every stage's inputs are produced by an earlier stage.
/// `ambient` names resources that exist before the pipeline runs (G-Buffer
/// attachments, camera data, interner buffers).
pub fn validate_stages(
    stages: &[StageDesc],
    ambient: &[&'static str],
) -> Result<(), StageOrderError> {
    let mut produced: Vec<&'static str> = ambient.to_vec();
    for stage in stages {
        for input in stage.inputs {
            if !produced.contains(input) {
                return Err(StageOrderError {
                    stage: stage.name,
                    missing_input: input,
                });
            }
        }
        produced.extend_from_slice(stage.outputs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_stages_validate() {
        let stages = [
            StageDesc {
                name: "lights",
                inputs: &[],
                outputs: &["light_buffers"],
            },
            StageDesc {
                name: "shadows",
                inputs: &["light_buffers", "gbuffer"],
                outputs: &["shadow_maps"],
            },
        ];
        assert!(validate_stages(&stages, &["gbuffer"]).is_ok());
    }

    #[test]
    fn consuming_a_later_output_fails() {
        let stages = [
            StageDesc {
                name: "shadows",
                inputs: &["light_buffers"],
                outputs: &["shadow_maps"],
            },
            StageDesc {
                name: "lights",
                inputs: &[],
                outputs: &["light_buffers"],
            },
        ];
        let err = validate_stages(&stages, &[]).unwrap_err();
        assert_eq!(err.stage, "shadows");
        assert_eq!(err.missing_input, "light_buffers");
    }
}
