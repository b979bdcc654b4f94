// Frame engine - CPU/GPU handoff for multi-buffered rendering
//
// The engine itself never calls Vulkan directly. It talks to three seams:
//
//   GpuDevice        creates frame resources, waits/resets fences, submits
//   CommandRecorder  records into a frame slot's command buffer
//   PresentTarget    the swapchain: acquire an image index, present it
//
// `backend` implements all three on ash; tests implement them on a mock.
// Handles are plain `vk` handles used as opaque ids.

pub mod renderer;
pub mod ring;
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

use ash::vk;

use crate::error::FrameResult;
use crate::lifetime::Teardown;

pub use renderer::{Renderer, RendererSettings};
pub use ring::{FrameRing, FrameSlot, SlotState, FRAMES_IN_FLIGHT};
pub use state::{insert_image_barrier, ImageBarrier, ImageState};

/// An engine-owned, allocator-backed image (the HDR scene target).
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub state: ImageState,
}

/// One swapchain image. Owned by the present-target; the engine only
/// records against it and updates its state.
#[derive(Debug, Clone, Copy)]
pub struct DisplayImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    pub state: ImageState,
}

/// A semaphore paired with the pipeline stage it is waited on / signaled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreStage {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

/// Everything one frame's queue submission needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait: SemaphoreStage,
    pub signal: SemaphoreStage,
    pub fence: vk::Fence,
}

/// Device-level operations used by the frame loop.
///
/// Every `create_*` call registers the matching teardown itself, in
/// creation order.
pub trait GpuDevice {
    /// Allocate the scene render target with the given extent.
    fn create_render_target(&self, extent: vk::Extent2D) -> FrameResult<RenderTarget>;

    /// Create one frame slot: command pool + buffer, signaled fence,
    /// image-acquired semaphore.
    fn create_frame_slot(&self) -> FrameResult<FrameSlot>;

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore>;

    /// Block until `fence` is signaled. `u64::MAX` waits forever.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()>;

    fn reset_fence(&self, fence: vk::Fence) -> FrameResult<()>;

    fn submit(&self, submit: &FrameSubmit) -> FrameResult<()>;

    fn wait_idle(&self) -> FrameResult<()>;

    /// Append a teardown action to the process-wide stack.
    fn defer(&self, action: Teardown);
}

/// Command recording into a frame slot's command buffer.
///
/// Recording calls are only valid between `begin_commands` and
/// `end_commands`; this is not checked.
pub trait CommandRecorder {
    fn reset_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()>;
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()>;
    fn end_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()>;

    fn image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);

    /// Clear a color image that is in TRANSFER_DST_OPTIMAL layout.
    fn clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]);

    /// Linear-filtered blit of the whole `src` onto the whole `dst`
    /// (TRANSFER_SRC_OPTIMAL -> TRANSFER_DST_OPTIMAL).
    fn blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_extent: vk::Extent3D,
        dst: vk::Image,
        dst_extent: vk::Extent3D,
    );

    fn bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    fn bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );

    fn dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
}

/// The swapchain as seen by the frame loop.
pub trait PresentTarget {
    fn images(&self) -> &[DisplayImage];
    fn images_mut(&mut self) -> &mut [DisplayImage];
    fn extent(&self) -> vk::Extent2D;

    /// Index of the next image; `signal` is signaled once it may be written.
    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> FrameResult<u32>;

    /// Queue `image_index` for display once `wait` is signaled.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> FrameResult<()>;
}

// Shared handles (the backend hands out Arc<VulkanDevice>) forward to the
// device they point at.
impl<T: GpuDevice + ?Sized> GpuDevice for std::sync::Arc<T> {
    fn create_render_target(&self, extent: vk::Extent2D) -> FrameResult<RenderTarget> {
        (**self).create_render_target(extent)
    }
    fn create_frame_slot(&self) -> FrameResult<FrameSlot> {
        (**self).create_frame_slot()
    }
    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        (**self).create_semaphore()
    }
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()> {
        (**self).wait_for_fence(fence, timeout_ns)
    }
    fn reset_fence(&self, fence: vk::Fence) -> FrameResult<()> {
        (**self).reset_fence(fence)
    }
    fn submit(&self, submit: &FrameSubmit) -> FrameResult<()> {
        (**self).submit(submit)
    }
    fn wait_idle(&self) -> FrameResult<()> {
        (**self).wait_idle()
    }
    fn defer(&self, action: Teardown) {
        (**self).defer(action)
    }
}

impl<T: CommandRecorder + ?Sized> CommandRecorder for std::sync::Arc<T> {
    fn reset_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        (**self).reset_commands(cmd)
    }
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        (**self).begin_commands(cmd)
    }
    fn end_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        (**self).end_commands(cmd)
    }
    fn image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        (**self).image_barrier(cmd, barrier)
    }
    fn clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]) {
        (**self).clear_color_image(cmd, image, color)
    }
    fn blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_extent: vk::Extent3D,
        dst: vk::Image,
        dst_extent: vk::Extent3D,
    ) {
        (**self).blit_image(cmd, src, src_extent, dst, dst_extent)
    }
    fn bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        (**self).bind_pipeline(cmd, bind_point, pipeline)
    }
    fn bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        (**self).bind_descriptor_set(cmd, bind_point, layout, set)
    }
    fn dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        (**self).dispatch(cmd, x, y, z)
    }
}
