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

//! The frame scheduler: triple buffering, the render worker thread and the
//! deferred release ring.
//!
//! The game thread never talks to the GPU directly. It appends boxed
//! closures into the current frame's command queue and, on `end_frame`,
//! hands the whole queue to a single background worker that records,
//! submits and presents it. `begin_frame` is the only admission control:
//! it blocks until the slot it is about to reuse has fully retired on both
//! the CPU (worker handle) and the GPU (fence).
//!
//! Resource destruction goes through a second, longer ring
//! ([`config::RELEASE_FRAMES_IN_FLIGHT`] slots) so a handle queued for
//! deletion outlives every frame that may still reference it.

use crate::command_queue::{ReleaseCommand, RenderCommand, RenderCommandQueue, ReleaseQueue};
use crate::config::{BRDF_LUT_SIZE, FRAMES_IN_FLIGHT, PBR_TILE_SIZE, RELEASE_FRAMES_IN_FLIGHT};
use crate::error::FrameError;
use crate::timings::GpuTimingsRegistry;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use strix_core::gfx::{
    ColorAttachment, ComputePipelineDescriptor, FenceId, GraphicsPipelineDescriptor,
    ImageDescriptor, ImageFormat, ImageId, ImageKind, ImageLayout, ImageUsage, LoadOp,
    RenderPipelineId, RenderTarget, SamplerDescriptor, SamplerId, SemaphoreId,
    ShaderModuleDescriptor, ShaderStage, SubmitInfo,
};
use strix_core::math::Extent3D;
use strix_core::GraphicsDevice;

/// Persistent images and samplers created once at startup and shared by
/// every task. Unbound slots and not-yet-rendered shadow maps all point at
/// these so descriptor sets are never partially bound.
#[derive(Debug, Clone, Copy)]
pub struct DummyResources {
    /// 1×1 white.
    pub white_image: ImageId,
    /// 1×1 black.
    pub black_image: ImageId,
    /// 1×1 depth, read-only layout.
    pub depth_image: ImageId,
    /// 1×1×6 cube depth for point-light shadow slots.
    pub cube_depth_image: ImageId,
    /// 1×1×1 volume for 3D texture slots.
    pub image_3d: ImageId,
    /// 1×1×6 black cube standing in for the environment IBL.
    pub ibl_cube: ImageId,
    /// Precomputed split-sum BRDF lookup table.
    pub brdf_lut: ImageId,
    /// Nearest filtering.
    pub point_sampler: SamplerId,
    /// Linear filtering, nearest mips.
    pub bilinear_sampler: SamplerId,
    /// Linear filtering across mips.
    pub trilinear_sampler: SamplerId,
    /// Comparison sampler for shadow PCF.
    pub shadow_sampler: SamplerId,
}

/// State shared between the game thread and the render worker.
#[derive(Debug)]
struct RenderShared {
    device: Arc<dyn GraphicsDevice>,
    fences: [FenceId; FRAMES_IN_FLIGHT],
    render_done: [SemaphoreId; FRAMES_IN_FLIGHT],
    current_rendering_frame: AtomicUsize,
    present_pipeline: RenderPipelineId,
    /// Image the worker blits into the acquired swapchain image at the end
    /// of every frame. `None` until the first final target exists.
    present_source: Mutex<Option<ImageId>>,
    release_ring: Mutex<ReleaseRing>,
    immediate_deletion: AtomicBool,
    frame_number: AtomicU64,
    timings: GpuTimingsRegistry,
}

#[derive(Debug)]
struct ReleaseRing {
    queues: [ReleaseQueue; RELEASE_FRAMES_IN_FLIGHT],
    current: usize,
}

impl ReleaseRing {
    /// Runs the slot whose resources are now provably unreferenced, then
    /// moves the write cursor forward. Called once per submitted frame.
    fn retire_due_slot(&mut self, device: &dyn GraphicsDevice) {
        let due = (self.current + FRAMES_IN_FLIGHT) % RELEASE_FRAMES_IN_FLIGHT;
        self.queues[due].execute(device);
        self.current = (self.current + 1) % RELEASE_FRAMES_IN_FLIGHT;
    }

    fn flush_all(&mut self, device: &dyn GraphicsDevice) {
        for queue in &mut self.queues {
            queue.execute(device);
        }
    }
}

struct FrameJob {
    frame_index: usize,
    commands: Vec<RenderCommand>,
    done: Sender<()>,
}

enum WorkerMessage {
    Frame(FrameJob),
    Stop,
}

/// A cloneable handle for queueing deferred resource destruction from
/// anywhere (task record closures, asset threads) without holding the
/// [`RenderManager`] itself.
#[derive(Debug, Clone)]
pub struct ResourceReleaser {
    shared: Arc<RenderShared>,
}

impl ResourceReleaser {
    /// Same contract as [`RenderManager::submit_resource_free`].
    pub fn submit_resource_free(&self, command: ReleaseCommand) {
        if self.shared.immediate_deletion.load(Ordering::Acquire) {
            command(self.shared.device.as_ref());
            return;
        }
        let mut ring = self.shared.release_ring.lock().unwrap();
        let current = ring.current;
        ring.queues[current].push(command);
    }
}

/// The frame scheduler. One per application; owns the render worker.
pub struct RenderManager {
    shared: Arc<RenderShared>,
    dummy: DummyResources,
    sender: Sender<WorkerMessage>,
    worker: Option<JoinHandle<()>>,
    worker_thread_id: ThreadId,
    queues: [RenderCommandQueue; FRAMES_IN_FLIGHT],
    frame_tasks: [Option<Receiver<()>>; FRAMES_IN_FLIGHT],
    current_frame_index: usize,
    finished: bool,
}

impl std::fmt::Debug for RenderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderManager")
            .field("frame_number", &self.frame_number())
            .field("current_frame_index", &self.current_frame_index)
            .finish()
    }
}

impl RenderManager {
    /// Creates the scheduler: per-slot fences (pre-signaled, so the first
    /// frames sail through), semaphores, the persistent dummy resources, the
    /// present blit pipeline and the render worker. Records and synchronously
    /// submits one setup command buffer that initializes dummy contents and
    /// bakes the BRDF lookup table.
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Result<Self, FrameError> {
        let fences = [
            device.create_fence(true)?,
            device.create_fence(true)?,
            device.create_fence(true)?,
        ];
        let render_done = [
            device.create_semaphore()?,
            device.create_semaphore()?,
            device.create_semaphore()?,
        ];

        let dummy = Self::create_dummy_resources(device.as_ref())?;
        let present_pipeline = Self::create_present_pipeline(device.as_ref())?;

        let shared = Arc::new(RenderShared {
            device: Arc::clone(&device),
            fences,
            render_done,
            current_rendering_frame: AtomicUsize::new(0),
            present_pipeline,
            present_source: Mutex::new(None),
            release_ring: Mutex::new(ReleaseRing {
                queues: Default::default(),
                current: 0,
            }),
            immediate_deletion: AtomicBool::new(false),
            frame_number: AtomicU64::new(0),
            timings: GpuTimingsRegistry::new(),
        });

        let (sender, receiver) = unbounded::<WorkerMessage>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("Render Thread".to_string())
            .spawn(move || worker_loop(worker_shared, receiver))
            .map_err(|err| FrameError::Worker(err.to_string()))?;
        let worker_thread_id = worker.thread().id();

        Ok(Self {
            shared,
            dummy,
            sender,
            worker: Some(worker),
            worker_thread_id,
            queues: Default::default(),
            frame_tasks: Default::default(),
            current_frame_index: 0,
            finished: false,
        })
    }

    fn create_dummy_resources(device: &dyn GraphicsDevice) -> Result<DummyResources, FrameError> {
        let sampled = ImageUsage::SAMPLED | ImageUsage::COPY_DST;
        let white_image = device.create_image(&ImageDescriptor::d2(
            "Dummy_White",
            ImageFormat::R8G8B8A8Unorm,
            1,
            1,
            sampled,
        ))?;
        let black_image = device.create_image(&ImageDescriptor::d2(
            "Dummy_Black",
            ImageFormat::R8G8B8A8Unorm,
            1,
            1,
            sampled,
        ))?;
        let depth_image = device.create_image(&ImageDescriptor::d2(
            "Dummy_Depth",
            ImageFormat::D32Float,
            1,
            1,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
        ))?;
        let cube_depth_image = device.create_image(&ImageDescriptor {
            label: Some(Cow::Borrowed("Dummy_CubeDepth")),
            kind: ImageKind::Cube,
            format: ImageFormat::D32Float,
            extent: Extent3D::new(1, 1, 6),
            mip_levels: 1,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
        })?;
        let image_3d = device.create_image(&ImageDescriptor {
            label: Some(Cow::Borrowed("Dummy_3D")),
            kind: ImageKind::D3,
            format: ImageFormat::R8G8B8A8Unorm,
            extent: Extent3D::new(1, 1, 1),
            mip_levels: 1,
            usage: sampled,
        })?;
        let ibl_cube = device.create_image(&ImageDescriptor {
            label: Some(Cow::Borrowed("Dummy_IBL")),
            kind: ImageKind::Cube,
            format: ImageFormat::R16G16B16A16Float,
            extent: Extent3D::new(1, 1, 6),
            mip_levels: 1,
            usage: sampled,
        })?;
        let brdf_lut = device.create_image(&ImageDescriptor::d2(
            "BRDF_LUT",
            ImageFormat::R16G16Float,
            BRDF_LUT_SIZE,
            BRDF_LUT_SIZE,
            ImageUsage::STORAGE | ImageUsage::SAMPLED,
        ))?;

        let point_sampler = device.create_sampler(&SamplerDescriptor::point("Point"))?;
        let bilinear_sampler = device.create_sampler(&SamplerDescriptor::bilinear("Bilinear"))?;
        let trilinear_sampler = device.create_sampler(&SamplerDescriptor::trilinear("Trilinear"))?;
        let shadow_sampler = device.create_sampler(&SamplerDescriptor::shadow("Shadow"))?;

        let brdf_shader = device
            .create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/brdf_lut.comp",
                ShaderStage::Compute,
            ))
            .map_err(strix_core::ResourceError::from)?;
        let brdf_pipeline = device
            .create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(Cow::Borrowed("BRDF_LUT_Bake")),
                shader: brdf_shader,
                specialization: Vec::new(),
            })
            .map_err(strix_core::ResourceError::from)?;

        let mut encoder = device.create_command_encoder(Some("Renderer setup"))?;
        encoder.write_image(white_image, &[255u8; 4]);
        encoder.write_image(black_image, &[0, 0, 0, 255]);
        encoder.write_image(image_3d, &[255u8; 4]);
        encoder.write_image(ibl_cube, &[0u8; 48]);
        encoder.transition_image_layout(
            depth_image,
            ImageLayout::Undefined,
            ImageLayout::DepthStencilReadOnly,
        );
        encoder.transition_image_layout(
            cube_depth_image,
            ImageLayout::Undefined,
            ImageLayout::DepthStencilReadOnly,
        );
        encoder.transition_image_layout(brdf_lut, ImageLayout::Undefined, ImageLayout::General);
        {
            let groups = BRDF_LUT_SIZE.div_ceil(PBR_TILE_SIZE);
            let mut pass = encoder.begin_compute_pass(brdf_pipeline, Some("Bake BRDF LUT"));
            pass.dispatch(groups, groups, 1);
        }
        encoder.transition_image_layout(brdf_lut, ImageLayout::General, ImageLayout::ShaderReadOnly);
        let setup_cmd = encoder.finish();

        let setup_fence = device.create_fence(false)?;
        device.submit(
            setup_cmd,
            &SubmitInfo {
                fence: Some(setup_fence),
                ..Default::default()
            },
        )?;
        device.wait_fence(setup_fence)?;
        device.destroy_fence(setup_fence)?;
        device.destroy_compute_pipeline(brdf_pipeline)?;

        Ok(DummyResources {
            white_image,
            black_image,
            depth_image,
            cube_depth_image,
            image_3d,
            ibl_cube,
            brdf_lut,
            point_sampler,
            bilinear_sampler,
            trilinear_sampler,
            shadow_sampler,
        })
    }

    /// The fullscreen pipeline that blits the final image into the acquired
    /// swapchain image, in the surface's own format.
    fn create_present_pipeline(device: &dyn GraphicsDevice) -> Result<RenderPipelineId, FrameError> {
        let vertex = device
            .create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/fullscreen.vert",
                ShaderStage::Vertex,
            ))
            .map_err(strix_core::ResourceError::from)?;
        let fragment = device
            .create_shader_module(&ShaderModuleDescriptor::new(
                "shaders/present.frag",
                ShaderStage::Fragment,
            ))
            .map_err(strix_core::ResourceError::from)?;
        let desc = GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("Present")),
            fragment_shader: Some(fragment),
            color_attachments: vec![ColorAttachment {
                format: device.surface_format(),
                load_op: LoadOp::DontCare,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::Present,
                clear_color: [0.0; 4],
                blend: None,
            }],
            ..GraphicsPipelineDescriptor::new("", vertex)
        };
        let pipeline = device
            .create_render_pipeline(&desc)
            .map_err(strix_core::ResourceError::from)?;
        Ok(pipeline)
    }

    /// The device the scheduler drives.
    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.shared.device
    }

    /// Registers the image the worker blits into the swapchain at the end of
    /// every frame. `None` skips the blit (startup, teardown).
    pub fn set_present_source(&self, image: Option<ImageId>) {
        *self.shared.present_source.lock().unwrap() = image;
    }

    /// Slot index of the frame the worker most recently started rendering.
    /// Trails [`Self::frame_number`] by the frames still queued to the worker.
    pub fn rendering_frame_index(&self) -> usize {
        self.shared.current_rendering_frame.load(Ordering::Acquire)
    }

    /// The persistent dummy resources.
    pub fn dummy_resources(&self) -> &DummyResources {
        &self.dummy
    }

    /// GPU pass timings recorded by the worker.
    pub fn timings(&self) -> &GpuTimingsRegistry {
        &self.shared.timings
    }

    /// Number of `end_frame`s so far.
    pub fn frame_number(&self) -> u64 {
        self.shared.frame_number.load(Ordering::Relaxed)
    }

    /// Blocks until the frame slot about to be reused has retired: first the
    /// worker handle from the frame submitted N frames ago, then that
    /// frame's GPU fence.
    pub fn begin_frame(&mut self) {
        if let Some(task) = self.frame_tasks[self.current_frame_index].take() {
            if task.recv().is_err() {
                log::error!("The render worker exited mid-frame");
                panic!("render worker thread terminated unexpectedly");
            }
        }
        if let Err(err) = self
            .shared
            .device
            .wait_fence(self.shared.fences[self.current_frame_index])
        {
            log::error!("Frame fence wait failed: {err}");
            panic!("frame fence wait failed: {err}");
        }
    }

    /// Appends a deferred command to the current frame.
    ///
    /// Must never be called from the render worker itself: the worker is
    /// already draining this frame's predecessor, and a closure enqueued
    /// from there could neither run this frame nor be ordered correctly.
    pub fn submit(&mut self, command: RenderCommand) {
        assert!(
            thread::current().id() != self.worker_thread_id,
            "RenderManager::submit called from the render worker thread"
        );
        self.queues[self.current_frame_index].push(command);
    }

    /// A cloneable handle to the release ring.
    pub fn releaser(&self) -> ResourceReleaser {
        ResourceReleaser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Enqueues a resource destruction into the release ring; it runs once
    /// every frame that may reference the resource has retired. During
    /// shutdown the ring is bypassed and the closure runs immediately.
    pub fn submit_resource_free(&self, command: ReleaseCommand) {
        if self.shared.immediate_deletion.load(Ordering::Acquire) {
            command(self.shared.device.as_ref());
            return;
        }
        let mut ring = self.shared.release_ring.lock().unwrap();
        let current = ring.current;
        ring.queues[current].push(command);
    }

    /// Closes the current logical frame.
    ///
    /// The queued commands are handed to the worker (record, submit with
    /// this slot's fence, present, retire one release slot); the calling
    /// thread advances the submission ring and frame number immediately and
    /// returns without blocking.
    pub fn end_frame(&mut self) {
        let frame_index = self.current_frame_index;
        let commands = self.queues[frame_index].drain();
        let (done, handle) = bounded(1);
        self.frame_tasks[frame_index] = Some(handle);
        if self
            .sender
            .send(WorkerMessage::Frame(FrameJob {
                frame_index,
                commands,
                done,
            }))
            .is_err()
        {
            log::error!("The render worker is gone; cannot submit frame");
            panic!("render worker thread terminated unexpectedly");
        }

        self.current_frame_index = (self.current_frame_index + 1) % FRAMES_IN_FLIGHT;
        self.shared.frame_number.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains the worker, replays every leftover frame queue under a fence,
    /// flushes the whole release ring and waits the GPU idle. After this the
    /// scheduler holds no pending work.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        for task in self.frame_tasks.iter_mut() {
            if let Some(task) = task.take() {
                let _ = task.recv();
            }
        }
        let device = self.shared.device.as_ref();
        device.wait_idle()?;

        let leftovers: usize = self.queues.iter().map(RenderCommandQueue::len).sum();
        if leftovers > 0 {
            let mut encoder = device.create_command_encoder(Some("Flush"))?;
            for queue in &mut self.queues {
                queue.execute(device, encoder.as_mut());
            }
            let cmd = encoder.finish();
            let fence = device.create_fence(false)?;
            device.submit(
                cmd,
                &SubmitInfo {
                    fence: Some(fence),
                    ..Default::default()
                },
            )?;
            device.wait_fence(fence)?;
            device.destroy_fence(fence)?;
        }

        self.shared.release_ring.lock().unwrap().flush_all(device);
        device.wait_idle()?;
        self.finished = true;
        Ok(())
    }

    /// Switches to immediate deletion: from now on `submit_resource_free`
    /// destroys on the spot. Only safe once `finish` proved the GPU idle.
    pub fn enter_immediate_deletion_mode(&self) {
        self.shared
            .immediate_deletion
            .store(true, Ordering::Release);
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.finish() {
                log::error!("Failed to flush the frame pipeline during shutdown: {err}");
            }
        }
        self.enter_immediate_deletion_mode();
        let _ = self.sender.send(WorkerMessage::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("The render worker panicked before shutdown");
            }
        }

        let device = self.shared.device.as_ref();
        if let Err(err) = device.destroy_render_pipeline(self.shared.present_pipeline) {
            log::warn!("Failed to destroy the present pipeline: {err}");
        }
        let images = [
            self.dummy.white_image,
            self.dummy.black_image,
            self.dummy.depth_image,
            self.dummy.cube_depth_image,
            self.dummy.image_3d,
            self.dummy.ibl_cube,
            self.dummy.brdf_lut,
        ];
        for image in images {
            if let Err(err) = device.destroy_image(image) {
                log::warn!("Failed to destroy dummy image: {err}");
            }
        }
        let samplers = [
            self.dummy.point_sampler,
            self.dummy.bilinear_sampler,
            self.dummy.trilinear_sampler,
            self.dummy.shadow_sampler,
        ];
        for sampler in samplers {
            if let Err(err) = device.destroy_sampler(sampler) {
                log::warn!("Failed to destroy dummy sampler: {err}");
            }
        }
        for fence in self.shared.fences {
            if let Err(err) = device.destroy_fence(fence) {
                log::warn!("Failed to destroy frame fence: {err}");
            }
        }
        for semaphore in self.shared.render_done {
            if let Err(err) = device.destroy_semaphore(semaphore) {
                log::warn!("Failed to destroy frame semaphore: {err}");
            }
        }
    }
}

/// Records, submits and presents one frame after another: replays the frame
/// queue, appends the present blit into the acquired swapchain image, then
/// submits. Any device error here is fatal: there is no caller left to
/// recover, and continuing would desynchronize the fence ring.
fn worker_loop(shared: Arc<RenderShared>, receiver: Receiver<WorkerMessage>) {
    while let Ok(message) = receiver.recv() {
        let job = match message {
            WorkerMessage::Frame(job) => job,
            WorkerMessage::Stop => break,
        };

        let device = shared.device.as_ref();
        let start = std::time::Instant::now();

        let acquired = match device.acquire_next_image() {
            Ok(acquired) => acquired,
            Err(err) => {
                log::error!("Swapchain image acquisition failed: {err}");
                panic!("swapchain image acquisition failed: {err}");
            }
        };
        shared
            .current_rendering_frame
            .store(job.frame_index, Ordering::Release);

        let fence = shared.fences[job.frame_index];
        if let Err(err) = device.reset_fence(fence) {
            log::error!("Frame fence reset failed: {err}");
            panic!("frame fence reset failed: {err}");
        }

        let mut encoder = match device.create_command_encoder(Some("Frame")) {
            Ok(encoder) => encoder,
            Err(err) => {
                log::error!("Frame command encoder creation failed: {err}");
                panic!("frame command encoder creation failed: {err}");
            }
        };
        for command in job.commands {
            command(device, encoder.as_mut());
        }
        if shared.present_source.lock().unwrap().is_some() {
            let colors = [acquired.image];
            let target = RenderTarget {
                colors: &colors,
                depth: None,
                extent: device.surface_extent(),
            };
            let mut pass = encoder.begin_render_pass(shared.present_pipeline, &target);
            pass.draw(0..3, 0..1);
        }
        let cmd = encoder.finish();

        let render_done = shared.render_done[job.frame_index];
        let info = SubmitInfo {
            wait_semaphores: vec![acquired.ready],
            signal_semaphores: vec![render_done],
            fence: Some(fence),
        };
        if let Err(err) = device.submit(cmd, &info) {
            log::error!("Frame submission failed: {err}");
            panic!("frame submission failed: {err}");
        }
        if let Err(err) = device.present(render_done) {
            log::error!("Present failed: {err}");
            panic!("present failed: {err}");
        }

        shared
            .release_ring
            .lock()
            .unwrap()
            .retire_due_slot(device);

        shared
            .timings
            .record("Whole frame", start.elapsed().as_secs_f32() * 1000.0);

        // The game thread may now reuse this slot.
        let _ = job.done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use strix_core::gfx::null::{NullGraphicsDevice, RecordedCommand};

    fn manager() -> (Arc<NullGraphicsDevice>, RenderManager) {
        let device = Arc::new(NullGraphicsDevice::new());
        let manager = RenderManager::new(device.clone() as Arc<dyn GraphicsDevice>).unwrap();
        (device, manager)
    }

    #[test]
    fn frames_cycle_and_present() {
        let (device, mut manager) = manager();
        for _ in 0..5 {
            manager.begin_frame();
            manager.submit(Box::new(|_, encoder| {
                encoder.write_buffer(strix_core::gfx::BufferId(9999), 0, &[0u8; 4]);
            }));
            manager.end_frame();
        }
        manager.finish().unwrap();
        assert_eq!(device.present_count(), 5);
        assert_eq!(manager.frame_number(), 5);
        // The worker advanced the rendering slot at each acquire; the last
        // of the five frames ran in slot 4 % FRAMES_IN_FLIGHT.
        assert_eq!(manager.rendering_frame_index(), 4 % FRAMES_IN_FLIGHT);
    }

    #[test]
    fn the_present_blit_runs_only_with_a_source() {
        let (device, mut manager) = manager();
        manager.begin_frame();
        manager.end_frame();
        manager.begin_frame();
        // No source registered yet: the frame presented without a blit.
        assert!(!device
            .last_submitted_commands()
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. })));

        let source = device
            .create_image(&ImageDescriptor::d2(
                "Final",
                ImageFormat::R8G8B8A8Unorm,
                4,
                4,
                ImageUsage::SAMPLED,
            ))
            .unwrap();
        manager.set_present_source(Some(source));
        manager.end_frame();
        manager.finish().unwrap();

        let swapchain_pass = device
            .last_submitted_commands()
            .iter()
            .find_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass { colors, .. } => Some(colors.clone()),
                _ => None,
            })
            .expect("the present blit should have recorded a pass");
        let record = device.image_record(swapchain_pass[0]).unwrap();
        assert!(record.label.unwrap().starts_with("swapchain"));
        device.destroy_image(source).unwrap();
    }

    #[test]
    fn commands_replay_in_submission_order() {
        let (_device, mut manager) = manager();
        let order = Arc::new(AtomicUsize::new(0));
        manager.begin_frame();
        for expected in 0..3usize {
            let order = Arc::clone(&order);
            manager.submit(Box::new(move |_, _| {
                assert_eq!(order.fetch_add(1, Ordering::SeqCst), expected);
            }));
        }
        manager.end_frame();
        manager.finish().unwrap();
        assert_eq!(order.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn release_ring_defers_destruction_for_enough_frames() {
        let (_device, mut manager) = manager();
        let freed = Arc::new(AtomicUsize::new(0));
        {
            let freed = Arc::clone(&freed);
            manager.submit_resource_free(Box::new(move |_| {
                freed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // The closure landed in release slot 0, which only becomes due once
        // the worker has retired FRAMES_IN_FLIGHT + 1 frames.
        for _ in 0..FRAMES_IN_FLIGHT {
            manager.begin_frame();
            manager.end_frame();
        }
        // This begin_frame synchronizes with the worker's first frame; only
        // release slots 3..6 can have retired so far.
        manager.begin_frame();
        assert_eq!(freed.load(Ordering::SeqCst), 0, "released too early");
        manager.end_frame();

        for _ in 0..FRAMES_IN_FLIGHT {
            manager.begin_frame();
            manager.end_frame();
        }
        // By now the worker has retired at least FRAMES_IN_FLIGHT + 1
        // frames, so slot 0 ran.
        manager.begin_frame();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        manager.end_frame();

        manager.finish().unwrap();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_flushes_unsubmitted_commands() {
        let (_device, mut manager) = manager();
        let ran = Arc::new(AtomicUsize::new(0));
        manager.begin_frame();
        {
            let ran = Arc::clone(&ran);
            manager.submit(Box::new(move |_, _| {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        // No end_frame: the closure stays queued until finish.
        manager.finish().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dummy_resources_exist_before_the_first_frame() {
        let (device, manager) = manager();
        let record = device
            .image_record(manager.dummy_resources().brdf_lut)
            .unwrap();
        assert_eq!(record.extent.width, BRDF_LUT_SIZE);
        assert_eq!(record.format, ImageFormat::R16G16Float);
        drop(manager);
        // Shutdown destroyed all persistent images (no frame ever ran, so
        // no swapchain images were created either).
        assert_eq!(device.live_image_count(), 0);
    }
}
