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

//! GPU pass timing registry.
//!
//! The render worker records per-pass GPU durations; a UI or metrics thread
//! may read them concurrently, so the registry carries its own mutex rather
//! than relying on the render thread's serialization.

use ahash::AHashMap;
use std::sync::Mutex;

/// One named pass timing.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuTiming {
    /// Pass name, e.g. `"Shadow pass"`.
    pub name: String,
    /// Duration in milliseconds.
    pub milliseconds: f32,
}

/// Thread-safe registry of the latest GPU timings per pass.
#[derive(Debug, Default)]
pub struct GpuTimingsRegistry {
    timings: Mutex<AHashMap<String, f32>>,
}

impl GpuTimingsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or overwrites) the latest duration of a pass.
    pub fn record(&self, name: &str, milliseconds: f32) {
        let mut timings = self.timings.lock().unwrap();
        match timings.get_mut(name) {
            Some(entry) => *entry = milliseconds,
            None => {
                timings.insert(name.to_string(), milliseconds);
            }
        }
    }

    /// Snapshot of all timings, sorted by duration descending so the most
    /// expensive passes list first.
    pub fn snapshot(&self) -> Vec<GpuTiming> {
        let timings = self.timings.lock().unwrap();
        let mut out: Vec<GpuTiming> = timings
            .iter()
            .map(|(name, ms)| GpuTiming {
                name: name.clone(),
                milliseconds: *ms,
            })
            .collect();
        out.sort_by(|a, b| {
            b.milliseconds
                .partial_cmp(&a.milliseconds)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Drops all recorded timings.
    pub fn clear(&self) {
        self.timings.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sorts_descending() {
        let registry = GpuTimingsRegistry::new();
        registry.record("PBR resolve", 1.2);
        registry.record("Shadow pass", 3.4);
        registry.record("Bloom", 0.3);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].name, "Shadow pass");
        assert_eq!(snapshot[2].name, "Bloom");
    }

    #[test]
    fn record_overwrites_existing_pass() {
        let registry = GpuTimingsRegistry::new();
        registry.record("Skybox", 0.5);
        registry.record("Skybox", 0.1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].milliseconds, 0.1);
    }
}
