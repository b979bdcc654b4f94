// Present cycle controller - acquire -> record -> submit -> present
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────┐
// │ begin_frame: wait slot fence ─> acquire image ─> reset ─> begin cmd  │
// │ recording:   clear / bind / dispatch (barriers on the render target) │
// │ end_frame:   blit RT -> image ─> PRESENT barrier ─> end cmd          │
// │              ─> submit (wait acquire, signal done[image] + fence)    │
// │              ─> present (wait done[image]) ─> next slot              │
// └──────────────────────────────────────────────────────────────────────┘
//
// Completion semaphores are per swapchain image, not per slot: with more
// images than slots, a per-slot semaphore could be signaled again while a
// present from an earlier use is still waiting on it.

use ash::vk;
use glam::Vec3;

use super::state::{insert_image_barrier, ImageState};
use super::{
    CommandRecorder, FrameRing, FrameSubmit, GpuDevice, PresentTarget, RenderTarget,
    SemaphoreStage, FRAMES_IN_FLIGHT,
};
use crate::error::FrameResult;
use crate::lifetime::Teardown;

/// Timeouts for the two blocking waits of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererSettings {
    /// Slot fence wait in `begin_frame`. `u64::MAX` = wait forever.
    pub fence_timeout_ns: u64,
    /// Swapchain image acquisition. `u64::MAX` = wait forever.
    pub acquire_timeout_ns: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            fence_timeout_ns: u64::MAX,
            acquire_timeout_ns: u64::MAX,
        }
    }
}

/// Drives the per-frame protocol over a device and a present-target.
pub struct Renderer<D, P> {
    device: D,
    present_target: P,
    settings: RendererSettings,

    /// HDR scene image; everything is drawn here and blitted on present.
    render_target: RenderTarget,
    ring: FrameRing,
    /// Indexed by swapchain image, signaled by submit, waited by present.
    render_finished: Vec<vk::Semaphore>,

    image_index: u32,
    frame_count: u64,
}

impl<D, P> Renderer<D, P>
where
    D: GpuDevice + CommandRecorder,
    P: PresentTarget,
{
    /// One-time setup: render target, frame slots, completion semaphores.
    pub fn init(device: D, present_target: P, settings: RendererSettings) -> FrameResult<Self> {
        let extent = present_target.extent();
        log::info!(
            "Initializing renderer: {}x{}, {} frames in flight, {} swapchain images",
            extent.width,
            extent.height,
            FRAMES_IN_FLIGHT,
            present_target.images().len()
        );

        let render_target = device.create_render_target(extent)?;

        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|_| device.create_frame_slot())
            .collect::<FrameResult<Vec<_>>>()?;

        let render_finished = (0..present_target.images().len())
            .map(|_| device.create_semaphore())
            .collect::<FrameResult<Vec<_>>>()?;

        Ok(Self {
            device,
            present_target,
            settings,
            render_target,
            ring: FrameRing::new(slots),
            render_finished,
            image_index: 0,
            frame_count: 0,
        })
    }

    /// Defer a device-idle wait so it runs before anything else at shutdown.
    /// Call once all setup-time resources have been created.
    pub fn end_init(&self) {
        self.device.defer(Teardown::WaitIdle);
        log::info!("Renderer initialization complete");
    }

    // =========================================================================
    // FRAME BRACKET
    // =========================================================================

    /// Start a frame: wait for the slot's previous GPU work, acquire an
    /// image, rewind the slot and begin recording.
    pub fn begin_frame(&mut self) -> FrameResult<()> {
        let slot = self.ring.current();
        let (fence, image_available, cmd) = (slot.fence, slot.image_available, slot.command_buffer);

        // The only CPU stall: this slot's last submission must be finished
        // before its command buffer can be rewound.
        self.device.wait_for_fence(fence, self.settings.fence_timeout_ns)?;
        self.ring.current_mut().mark_idle();

        // May differ from the slot index when there are more images than slots
        self.image_index = self
            .present_target
            .acquire_next_image(image_available, self.settings.acquire_timeout_ns)?;

        self.device.reset_fence(fence)?;
        self.device.reset_commands(cmd)?;
        self.device.begin_commands(cmd)?;
        self.ring.current_mut().mark_recording();

        log::trace!(
            "Frame {} begin: slot {}, image {}",
            self.frame_count,
            self.ring.current_index(),
            self.image_index
        );
        Ok(())
    }

    /// Finish a frame: copy the render target to the acquired image, submit,
    /// present, and move to the next slot.
    pub fn end_frame(&mut self) -> FrameResult<()> {
        let slot = self.ring.current();
        let (fence, image_available, cmd) = (slot.fence, slot.image_available, slot.command_buffer);
        let image_index = self.image_index as usize;

        self.blit_to_display(cmd, image_index);

        // After the blit, never before: the present engine reads the image
        // as soon as the completion semaphore fires.
        let display = &mut self.present_target.images_mut()[image_index];
        let display_image = display.image;
        insert_image_barrier(
            &self.device,
            cmd,
            display_image,
            &mut display.state,
            ImageState::PRESENT,
        );

        self.device.end_commands(cmd)?;

        let render_finished = self.render_finished[image_index];
        self.device.submit(&FrameSubmit {
            command_buffer: cmd,
            wait: SemaphoreStage {
                semaphore: image_available,
                stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            },
            signal: SemaphoreStage {
                semaphore: render_finished,
                stage: vk::PipelineStageFlags2::ALL_GRAPHICS,
            },
            fence,
        })?;
        self.ring.current_mut().mark_submitted();

        self.present_target.present(self.image_index, render_finished)?;

        log::trace!(
            "Frame {} presented: slot {}, image {}",
            self.frame_count,
            self.ring.current_index(),
            self.image_index
        );

        self.ring.advance();
        self.frame_count += 1;
        Ok(())
    }

    /// Render target -> TRANSFER_SRC, display image -> TRANSFER_DST, blit.
    fn blit_to_display(&mut self, cmd: vk::CommandBuffer, image_index: usize) {
        insert_image_barrier(
            &self.device,
            cmd,
            self.render_target.image,
            &mut self.render_target.state,
            ImageState::TRANSFER_SRC,
        );

        let display = &mut self.present_target.images_mut()[image_index];
        let (display_image, display_extent) = (display.image, display.extent);
        insert_image_barrier(
            &self.device,
            cmd,
            display_image,
            &mut display.state,
            ImageState::TRANSFER_DST,
        );

        self.device.blit_image(
            cmd,
            self.render_target.image,
            self.render_target.extent,
            display_image,
            display_extent,
        );
    }

    // =========================================================================
    // RECORDING (between begin_frame and end_frame only)
    // =========================================================================

    /// Clear the render target to an opaque color.
    pub fn clear(&mut self, color: Vec3) {
        let cmd = self.current_commands();

        insert_image_barrier(
            &self.device,
            cmd,
            self.render_target.image,
            &mut self.render_target.state,
            ImageState::TRANSFER_DST,
        );

        self.device
            .clear_color_image(cmd, self.render_target.image, [color.x, color.y, color.z, 1.0]);
    }

    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline, bind_point: vk::PipelineBindPoint) {
        let cmd = self.current_commands();
        self.device.bind_pipeline(cmd, bind_point, pipeline);
    }

    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let cmd = self.current_commands();
        self.device.bind_descriptor_set(cmd, bind_point, layout, set);
    }

    /// Dispatch compute work that writes the render target as a storage
    /// image (GENERAL layout).
    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        let cmd = self.current_commands();

        insert_image_barrier(
            &self.device,
            cmd,
            self.render_target.image,
            &mut self.render_target.state,
            ImageState::COMPUTE_WRITE,
        );

        self.device
            .dispatch(cmd, group_count_x, group_count_y, group_count_z);
    }

    fn current_commands(&self) -> vk::CommandBuffer {
        self.ring.current().command_buffer
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn present_target(&self) -> &P {
        &self.present_target
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Index of the active frame slot.
    pub fn current_frame_index(&self) -> usize {
        self.ring.current_index()
    }

    /// Swapchain image acquired by the last `begin_frame`.
    pub fn current_image_index(&self) -> u32 {
        self.image_index
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
