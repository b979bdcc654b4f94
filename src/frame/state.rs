// Resource state tracking - explicit image barriers
//
// Every image the engine writes to carries an ImageState describing the last
// (stage, access, layout) it was left in. Before each new use we emit a
// barrier from that stored state to the new one and overwrite it. No
// elision: a transition to the same state still emits a barrier, so the
// recorded stream always states exactly what it expects.

use ash::vk;

use super::CommandRecorder;

/// Last-known synchronization state of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl ImageState {
    /// Freshly created image: nothing has touched it, contents undefined.
    pub const UNDEFINED: Self = Self::new(
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );

    /// Source of a blit/copy.
    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// Destination of a blit/copy/clear.
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// Storage image written by a compute shader.
    pub const COMPUTE_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// Fresh swapchain image. Its stage is the one the submit waits on the
    /// acquire semaphore at, so the first barrier on it is ordered after
    /// the presentation engine releases the image.
    pub const UNACQUIRED: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );

    /// Handed to the presentation engine. The stage matches the acquire
    /// wait, so the barrier after the next acquire chains with it.
    pub const PRESENT: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );

    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self { stage, access, layout }
    }
}

impl Default for ImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// A single-image barrier: color aspect, first mip, first layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub src: ImageState,
    pub dst: ImageState,
}

impl ImageBarrier {
    /// The synchronization2 form of this barrier.
    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2 {
        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(self.src.stage)
            .src_access_mask(self.src.access)
            .dst_stage_mask(self.dst.stage)
            .dst_access_mask(self.dst.access)
            .old_layout(self.src.layout)
            .new_layout(self.dst.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(color_subresource_range())
            .build()
    }
}

/// Whole color range of a single-mip, single-layer image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a barrier moving `image` from its tracked state to `dst`, then
/// make `dst` the tracked state.
///
/// Must be called while `cmd` is recording. `state` must belong to `image`.
pub fn insert_image_barrier<R>(
    recorder: &R,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    state: &mut ImageState,
    dst: ImageState,
) where
    R: CommandRecorder + ?Sized,
{
    let barrier = ImageBarrier {
        image,
        src: *state,
        dst,
    };
    recorder.image_barrier(cmd, &barrier);
    *state = dst;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::{Event, MockDevice};
    use ash::vk::Handle;

    fn barriers(device: &MockDevice) -> Vec<ImageBarrier> {
        device
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Barrier(_, barrier) => Some(barrier),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_images_start_undefined() {
        let state = ImageState::default();
        assert_eq!(state.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(state.access, vk::AccessFlags2::NONE);
        assert_eq!(state.stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
    }

    #[test]
    fn test_swapchain_states_share_the_acquire_stage() {
        // Acquire semaphores are waited on at COLOR_ATTACHMENT_OUTPUT
        let wait = vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
        assert!(ImageState::UNACQUIRED.stage.contains(wait));
        assert!(ImageState::PRESENT.stage.contains(wait));
        assert_eq!(ImageState::UNACQUIRED.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_barrier_uses_stored_state_as_source() {
        let device = MockDevice::new();
        let cmd = vk::CommandBuffer::from_raw(7);
        let image = vk::Image::from_raw(42);
        let mut state = ImageState::default();

        insert_image_barrier(&device, cmd, image, &mut state, ImageState::TRANSFER_DST);
        insert_image_barrier(&device, cmd, image, &mut state, ImageState::COMPUTE_WRITE);
        insert_image_barrier(&device, cmd, image, &mut state, ImageState::TRANSFER_SRC);

        let emitted = barriers(&device);
        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[0].src, ImageState::UNDEFINED);
        // Each destination becomes the next call's source
        for pair in emitted.windows(2) {
            assert_eq!(pair[0].dst, pair[1].src);
        }
        assert_eq!(state, ImageState::TRANSFER_SRC);
    }

    #[test]
    fn test_identical_transition_is_not_elided() {
        let device = MockDevice::new();
        let cmd = vk::CommandBuffer::from_raw(7);
        let image = vk::Image::from_raw(42);
        let mut state = ImageState::default();

        insert_image_barrier(&device, cmd, image, &mut state, ImageState::TRANSFER_DST);
        insert_image_barrier(&device, cmd, image, &mut state, ImageState::TRANSFER_DST);

        let emitted = barriers(&device);
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[1].src, emitted[1].dst);
    }

    #[test]
    fn test_vk_barrier_fields() {
        let barrier = ImageBarrier {
            image: vk::Image::from_raw(9),
            src: ImageState::TRANSFER_DST,
            dst: ImageState::PRESENT,
        }
        .to_vk();

        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(
            barrier.dst_stage_mask,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.subresource_range.layer_count, 1);
    }
}
