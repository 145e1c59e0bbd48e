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

//! Progressive bloom: downsample the HDR target through a half-resolution
//! mip chain with a thresholded prefilter, then upsample additively back to
//! the top. The top level is what post-processing composites.

use super::{fatal, RecordContext, RendererTask, TaskContext};
use crate::manager::ResourceReleaser;
use crate::scene::StageDesc;
use crate::settings::SceneRendererSettings;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use strix_core::gfx::{
    BlendFactor, BlendOperation, BlendState, ColorAttachment, GraphicsPipelineDescriptor,
    ImageDescriptor, ImageFormat, ImageId, ImageLayout, ImageUsage, LoadOp, RenderPipelineId,
    RenderTarget, ShaderDefine, ShaderModuleDescriptor, ShaderStage,
};
use strix_core::math::Extent2D;
use strix_core::GraphicsDevice;

/// Levels below this edge length add nothing but sampling artifacts.
const MIN_MIP_SIZE: u32 = 8;
const MAX_MIPS: usize = 6;

const ADDITIVE: BlendState = BlendState {
    src_color: BlendFactor::One,
    dst_color: BlendFactor::One,
    color_op: BlendOperation::Add,
    src_alpha: BlendFactor::One,
    dst_alpha: BlendFactor::One,
    alpha_op: BlendOperation::Add,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BloomPushConstants {
    /// Reciprocal source dimensions, for the sampling footprint.
    source_texel: [f32; 2],
    threshold: f32,
    knee: f32,
    intensity: f32,
    _padding: [f32; 3],
}

#[derive(Debug, Clone, Copy)]
struct MipLevel {
    image: ImageId,
    size: Extent2D,
}

#[derive(Debug)]
struct BloomPipelines {
    prefilter: RenderPipelineId,
    downsample: RenderPipelineId,
    upsample: RenderPipelineId,
}

impl BloomPipelines {
    fn release(self, releaser: &ResourceReleaser) {
        for pipeline in [self.prefilter, self.downsample, self.upsample] {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_render_pipeline(pipeline) {
                    log::warn!("Failed to destroy bloom pipeline: {err}");
                }
            }));
        }
    }
}

/// Blurs bright HDR regions into a glow layer.
pub struct BloomTask {
    pipelines: Option<BloomPipelines>,
    mips: Vec<MipLevel>,
}

impl BloomTask {
    pub fn new() -> Self {
        Self {
            pipelines: None,
            mips: Vec::new(),
        }
    }

    pub fn destroy(&mut self, releaser: &ResourceReleaser) {
        if let Some(pipelines) = self.pipelines.take() {
            pipelines.release(releaser);
        }
        Self::release_mips(&mut self.mips, releaser);
    }

    fn release_mips(mips: &mut Vec<MipLevel>, releaser: &ResourceReleaser) {
        for level in mips.drain(..) {
            releaser.submit_resource_free(Box::new(move |device| {
                if let Err(err) = device.destroy_image(level.image) {
                    log::warn!("Failed to destroy bloom mip: {err}");
                }
            }));
        }
    }

    fn build_mips(device: &dyn GraphicsDevice, viewport: Extent2D) -> Vec<MipLevel> {
        let mut mips = Vec::new();
        let mut size = Extent2D::new(viewport.width / 2, viewport.height / 2);
        while mips.len() < MAX_MIPS && size.width >= MIN_MIP_SIZE && size.height >= MIN_MIP_SIZE {
            let image = fatal(
                device.create_image(&ImageDescriptor::d2(
                    "Bloom mip",
                    ImageFormat::R16G16B16A16Float,
                    size.width,
                    size.height,
                    ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
                )),
                "Failed to create bloom mip",
            );
            mips.push(MipLevel { image, size });
            size = Extent2D::new(size.width / 2, size.height / 2);
        }
        mips
    }

    fn build_pipelines(device: &dyn GraphicsDevice) -> BloomPipelines {
        let vertex = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/fullscreen.vert",
                ShaderStage::Vertex,
            )),
            "Failed to compile bloom shader",
        );
        let downsample_frag = |prefilter: bool| {
            let mut desc =
                ShaderModuleDescriptor::new("shaders/bloom_downsample.frag", ShaderStage::Fragment);
            if prefilter {
                desc = desc.with_define(ShaderDefine::flag("PREFILTER"));
            }
            fatal(
                device.create_shader_module(&desc),
                "Failed to compile bloom shader",
            )
        };
        let upsample_frag = fatal(
            device.create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/bloom_upsample.frag",
                ShaderStage::Fragment,
            )),
            "Failed to compile bloom shader",
        );

        let pipeline = |label: &'static str, fragment, blend: Option<BlendState>| {
            let (load_op, initial_layout) = if blend.is_some() {
                // upsampling accumulates into the already-written level
                (LoadOp::Load, ImageLayout::ShaderReadOnly)
            } else {
                (LoadOp::DontCare, ImageLayout::Undefined)
            };
            let desc = GraphicsPipelineDescriptor {
                label: Some(Cow::Borrowed(label)),
                fragment_shader: Some(fragment),
                color_attachments: vec![ColorAttachment {
                    format: ImageFormat::R16G16B16A16Float,
                    load_op,
                    initial_layout,
                    final_layout: ImageLayout::ShaderReadOnly,
                    clear_color: [0.0; 4],
                    blend,
                }],
                ..GraphicsPipelineDescriptor::new("", vertex)
            };
            fatal(
                device.create_render_pipeline(&desc),
                "Failed to create bloom pipeline",
            )
        };

        BloomPipelines {
            prefilter: pipeline("Bloom prefilter", downsample_frag(true), None),
            downsample: pipeline("Bloom downsample", downsample_frag(false), None),
            upsample: pipeline("Bloom upsample", upsample_frag, Some(ADDITIVE)),
        }
    }
}

impl Default for BloomTask {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererTask for BloomTask {
    fn stage(&self) -> StageDesc {
        StageDesc {
            name: "bloom",
            inputs: &["hdr"],
            outputs: &["bloom"],
        }
    }

    fn record(&mut self, ctx: &mut RecordContext<'_>) {
        let settings = ctx.frame.options.bloom;
        if !settings.enabled {
            ctx.frame.bloom_output = None;
            return;
        }

        if self.mips.is_empty() {
            self.mips = Self::build_mips(ctx.device, ctx.frame.size);
        }
        if self.mips.is_empty() {
            // viewport too small for even one level
            ctx.frame.bloom_output = None;
            return;
        }
        let pipelines = match self.pipelines.take() {
            Some(pipelines) => pipelines,
            None => Self::build_pipelines(ctx.device),
        };

        let constants = |source: Extent2D| BloomPushConstants {
            source_texel: [1.0 / source.width as f32, 1.0 / source.height as f32],
            threshold: settings.threshold,
            knee: settings.knee,
            intensity: settings.intensity,
            _padding: [0.0; 3],
        };

        // Downsample: HDR -> mip 0 (prefilter), then each level into the next.
        let mut source_size = ctx.frame.size;
        for (index, level) in self.mips.iter().enumerate() {
            let pipeline = if index == 0 {
                pipelines.prefilter
            } else {
                pipelines.downsample
            };
            let colors = [level.image];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: level.size,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipeline, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants(source_size)));
            pass.draw(0..3, 0..1);
            source_size = level.size;
        }

        // Upsample additively back to the top.
        for window in (0..self.mips.len()).rev().collect::<Vec<_>>().windows(2) {
            let source = self.mips[window[0]];
            let destination = self.mips[window[1]];
            let colors = [destination.image];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: destination.size,
            };
            let mut pass = ctx.encoder.begin_render_pass(pipelines.upsample, &target);
            pass.set_push_constants(bytemuck::bytes_of(&constants(source.size)));
            pass.draw(0..3, 0..1);
        }

        ctx.frame.bloom_output = Some(self.mips[0].image);
        self.pipelines = Some(pipelines);
    }

    fn on_resize(&mut self, ctx: &TaskContext<'_>, _size: Extent2D) {
        // sized from the blackboard on the next record
        Self::release_mips(&mut self.mips, ctx.releaser);
    }

    fn init_with_options(
        &mut self,
        ctx: &TaskContext<'_>,
        old: &SceneRendererSettings,
        new: &SceneRendererSettings,
    ) {
        if old.bloom.enabled && !new.bloom.enabled {
            Self::release_mips(&mut self.mips, ctx.releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing;
    use strix_core::gfx::null::RecordedCommand;

    #[test]
    fn chain_halves_down_to_the_floor() {
        let mut harness = testing::harness();
        let mut task = BloomTask::new();
        harness.record(&mut task);

        // 64x64 viewport: 32, 16, 8
        let sizes: Vec<(u32, u32)> = task
            .mips
            .iter()
            .map(|level| (level.size.width, level.size.height))
            .collect();
        assert_eq!(sizes, vec![(32, 32), (16, 16), (8, 8)]);
    }

    #[test]
    fn pass_count_matches_the_chain_shape() {
        let mut harness = testing::harness();
        let mut task = BloomTask::new();
        let commands = harness.record(&mut task);
        let passes = commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. }))
            .count();
        // 3 downsamples + 2 upsamples
        assert_eq!(passes, 5);
        assert_eq!(harness.frame.bloom_output, Some(task.mips[0].image));
    }

    #[test]
    fn disabled_bloom_records_nothing() {
        let mut harness = testing::harness();
        harness.frame.options.bloom.enabled = false;
        let mut task = BloomTask::new();
        let commands = harness.record(&mut task);
        assert!(commands.is_empty());
        assert_eq!(harness.frame.bloom_output, None);
    }

    #[test]
    fn resize_rebuilds_the_chain() {
        let mut harness = testing::harness();
        let mut task = BloomTask::new();
        harness.record(&mut task);
        let old_top = task.mips[0].image;

        let releaser = harness.manager.releaser();
        let ctx = TaskContext {
            device: &*harness.device,
            releaser: &releaser,
            dummy: &harness.frame.dummy,
        };
        task.on_resize(&ctx, Extent2D::new(128, 128));
        assert!(task.mips.is_empty());

        harness.frame.size = Extent2D::new(128, 128);
        harness.record(&mut task);
        assert_ne!(task.mips[0].image, old_top);
        assert_eq!(task.mips.len(), 4); // 64, 32, 16, 8
    }
}
